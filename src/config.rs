//! Configuration types for LaTeX source normalisation.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The rule tables travel inside the
//! config as a [`RuleBook`], so two runs with different templates differ only
//! in data.

use crate::error::Tex2EpubError;
use crate::progress::ProgressCallback;
use crate::rules::{RuleBook, Template};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for one normalisation run.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_tex2epub::{ConversionConfig, MissingIncludePolicy};
///
/// let config = ConversionConfig::builder()
///     .max_include_depth(8)
///     .missing_includes(MissingIncludePolicy::Keep)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Deepest `\input` nesting accepted below the entry file. Default: 16.
    ///
    /// Real papers rarely nest more than three levels; the limit only exists
    /// so a pathological archive fails with `IncludeDepthExceeded` instead
    /// of exhausting memory.
    pub max_include_depth: usize,

    /// What to do when an include target is not in the archive. Default: [`MissingIncludePolicy::Fail`].
    pub missing_includes: MissingIncludePolicy,

    /// Skip classification and use this template's tables.
    pub template_override: Option<Template>,

    /// Use this file as the entry document instead of asking the manifest
    /// or scanning for `\begin{document}`.
    pub entry_override: Option<String>,

    /// Replace `\bibliography{..}` with the `.bbl` shipped in the archive. Default: false.
    ///
    /// arXiv bundles usually carry the compiled `.bbl` but not the `.bib`;
    /// a Render Backend that cannot run BibTeX needs the former inlined.
    pub inline_bibliography: bool,

    /// Template signatures and rule tables. Default: [`RuleBook::builtin`].
    pub rules: RuleBook,

    /// Complete `\includegraphics` extensions from the bundle's assets and
    /// turn column widths into `\textwidth`. Never applied to Generic
    /// documents. Default: true.
    pub fix_graphics: bool,

    /// Download timeout for arXiv and URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Stage progress events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_include_depth: 16,
            missing_includes: MissingIncludePolicy::default(),
            template_override: None,
            entry_override: None,
            inline_bibliography: false,
            rules: RuleBook::default(),
            fix_graphics: true,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("max_include_depth", &self.max_include_depth)
            .field("missing_includes", &self.missing_includes)
            .field("template_override", &self.template_override)
            .field("entry_override", &self.entry_override)
            .field("inline_bibliography", &self.inline_bibliography)
            .field("templates", &self.rules.templates())
            .field("fix_graphics", &self.fix_graphics)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.config.max_include_depth = depth;
        self
    }

    pub fn missing_includes(mut self, policy: MissingIncludePolicy) -> Self {
        self.config.missing_includes = policy;
        self
    }

    pub fn template_override(mut self, template: Template) -> Self {
        self.config.template_override = Some(template);
        self
    }

    pub fn entry_override(mut self, path: impl Into<String>) -> Self {
        self.config.entry_override = Some(path.into());
        self
    }

    pub fn inline_bibliography(mut self, v: bool) -> Self {
        self.config.inline_bibliography = v;
        self
    }

    pub fn rules(mut self, rules: RuleBook) -> Self {
        self.config.rules = rules;
        self
    }

    pub fn fix_graphics(mut self, v: bool) -> Self {
        self.config.fix_graphics = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Tex2EpubError> {
        let c = &self.config;
        if c.max_include_depth == 0 {
            return Err(Tex2EpubError::InvalidConfig(
                "max_include_depth must be ≥ 1".into(),
            ));
        }
        if c.download_timeout_secs == 0 {
            return Err(Tex2EpubError::InvalidConfig(
                "download_timeout_secs must be ≥ 1".into(),
            ));
        }
        if let Some(entry) = &c.entry_override {
            if crate::source::normalize_path(entry).is_none() {
                return Err(Tex2EpubError::InvalidConfig(format!(
                    "entry '{}' is not a path inside the archive",
                    entry
                )));
            }
        }
        c.rules.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Handling of `\input`/`\include` targets absent from the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingIncludePolicy {
    /// Halt with `IncludeNotFound`. (default)
    #[default]
    Fail,
    /// Leave the directive in place and record a warning.
    Keep,
}
