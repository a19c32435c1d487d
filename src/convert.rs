//! Normalization Orchestrator: the conversion entry points.
//!
//! One run walks a fixed stage sequence:
//!
//! ```text
//! Fetched → Unpacked → EntryResolved → Included → Classified → Stripped → Normalized → Emitted
//! ```
//!
//! [`StageTracker`] refuses any transition that is not the direct successor
//! of the last stage reached, so a run can neither skip nor repeat a stage.
//! The first failing stage ends the run: its error is returned and no
//! partial document is produced.
//!
//! [`normalize_tree`] is the synchronous core over an in-memory
//! [`SourceTree`]; [`convert`] adds fetching and unpacking in front of it.

use crate::config::{ConversionConfig, MissingIncludePolicy};
use crate::error::{NormalizationWarning, Tex2EpubError};
use crate::latex::{parser, DocumentNode};
use crate::output::{ConversionOutput, ConversionStats, InspectReport};
use crate::pipeline::entry::{resolve_entry, EntryResolution};
use crate::pipeline::environment::normalize_environments;
use crate::pipeline::graphics::{fix_graphics, GraphicsStats};
use crate::pipeline::include::{resolve_includes, IncludeOutcome};
use crate::pipeline::input::{self, Fetched, SourceInput};
use crate::pipeline::metadata::{extract_metadata, PaperMetadata};
use crate::pipeline::strip::strip_macros;
use crate::pipeline::unpack;
use crate::progress::ProgressCallback;
use crate::rules::Classification;
use crate::source::{self, Bundle, Manifest, SourceTree};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

// ── Stages ───────────────────────────────────────────────────────────────

/// Orchestrator states, in the only order they may be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetched,
    Unpacked,
    EntryResolved,
    Included,
    Classified,
    Stripped,
    Normalized,
    Emitted,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Fetched,
        Stage::Unpacked,
        Stage::EntryResolved,
        Stage::Included,
        Stage::Classified,
        Stage::Stripped,
        Stage::Normalized,
        Stage::Emitted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetched => "fetched",
            Stage::Unpacked => "unpacked",
            Stage::EntryResolved => "entry_resolved",
            Stage::Included => "included",
            Stage::Classified => "classified",
            Stage::Stripped => "stripped",
            Stage::Normalized => "normalized",
            Stage::Emitted => "emitted",
        }
    }

    /// The stage that must have been reached before this one.
    pub fn previous(self) -> Option<Stage> {
        let i = Self::ALL.iter().position(|s| *s == self)?;
        i.checked_sub(1).map(|p| Self::ALL[p])
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enforces strictly sequential stage transitions and forwards them to the
/// progress callback.
pub struct StageTracker {
    reached: Option<Stage>,
    callback: Option<ProgressCallback>,
}

impl StageTracker {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            reached: None,
            callback,
        }
    }

    /// A tracker for a run whose input is already in memory: `Fetched` and
    /// `Unpacked` count as reached.
    pub fn in_memory(callback: Option<ProgressCallback>) -> Self {
        Self {
            reached: Some(Stage::Unpacked),
            callback,
        }
    }

    pub fn reached(&self) -> Option<Stage> {
        self.reached
    }

    /// Run `stage`, reporting start, completion or failure.
    pub fn step<T>(
        &mut self,
        stage: Stage,
        work: impl FnOnce() -> Result<T, Tex2EpubError>,
        detail: impl FnOnce(&T) -> String,
    ) -> Result<T, Tex2EpubError> {
        self.begin(stage)?;
        match work() {
            Ok(value) => {
                self.complete(stage, &detail(&value));
                Ok(value)
            }
            Err(e) => {
                self.fail(stage, &e);
                Err(e)
            }
        }
    }

    fn begin(&mut self, stage: Stage) -> Result<(), Tex2EpubError> {
        if stage.previous() != self.reached {
            return Err(Tex2EpubError::Internal(format!(
                "stage '{}' cannot follow '{}'",
                stage,
                self.reached.map_or("start", |s| s.as_str())
            )));
        }
        if let Some(cb) = &self.callback {
            cb.on_stage_start(stage);
        }
        Ok(())
    }

    fn complete(&mut self, stage: Stage, detail: &str) {
        self.reached = Some(stage);
        info!("{}: {}", stage, detail);
        if let Some(cb) = &self.callback {
            cb.on_stage_complete(stage, detail);
        }
    }

    fn fail(&self, stage: Stage, error: &Tex2EpubError) {
        if let Some(cb) = &self.callback {
            cb.on_stage_failed(stage, &error.to_string());
        }
    }
}

// ── Core ─────────────────────────────────────────────────────────────────

/// Normalise an in-memory source tree. Synchronous; performs no I/O.
///
/// # Errors
/// Any of the structural errors ([`Tex2EpubError::NoEntryFound`],
/// [`Tex2EpubError::AmbiguousEntry`], [`Tex2EpubError::IncludeNotFound`],
/// [`Tex2EpubError::CyclicInclude`], [`Tex2EpubError::IncludeDepthExceeded`],
/// [`Tex2EpubError::MalformedSource`]) halts the run.
pub fn normalize_tree(
    tree: &SourceTree,
    manifest: Option<&Manifest>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Tex2EpubError> {
    let mut tracker = StageTracker::in_memory(config.progress_callback.clone());
    run_core(tree, &BTreeSet::new(), manifest, config, &mut tracker)
}

/// Normalise an unpacked bundle, using the manifest it ships (if any).
pub fn normalize_bundle(bundle: &Bundle, config: &ConversionConfig) -> Result<ConversionOutput, Tex2EpubError> {
    let manifest = bundle.manifest();
    let mut tracker = StageTracker::in_memory(config.progress_callback.clone());
    run_core(&bundle.tree, &asset_paths(bundle), manifest.as_ref(), config, &mut tracker)
}

fn asset_paths(bundle: &Bundle) -> BTreeSet<&str> {
    bundle.assets.keys().map(String::as_str).collect()
}

fn run_core(
    tree: &SourceTree,
    assets: &BTreeSet<&str>,
    manifest: Option<&Manifest>,
    config: &ConversionConfig,
    tracker: &mut StageTracker,
) -> Result<ConversionOutput, Tex2EpubError> {
    let start = Instant::now();

    let entry = tracker.step(
        Stage::EntryResolved,
        || resolve_entry(tree, manifest, config.entry_override.as_deref()),
        |e| format!("entry '{}' ({:?})", e.path, e.source),
    )?;

    let included = tracker.step(
        Stage::Included,
        || include_stage(tree, &entry, config),
        |o| format!("{} files spliced, {} left unresolved", o.files.len(), o.warnings.len()),
    )?;
    let metadata = extract_metadata(&included.document.fragments);

    let classification = tracker.step(
        Stage::Classified,
        || Ok(classify(&included.document, config)),
        |c| format!("template {}", c.template),
    )?;
    let template = classification.template.clone();

    let IncludeOutcome {
        document,
        warnings: include_warnings,
        files,
        bibliography,
    } = included;

    let (stripped, strip_stats) = tracker.step(
        Stage::Stripped,
        || strip_macros(document, config.rules.macros(&template)),
        |(_, s)| format!("{} macros stripped, {} rewritten", s.stripped, s.rewritten),
    )?;

    let (normalized, env_stats, graphics_stats) = tracker.step(
        Stage::Normalized,
        || {
            let (doc, env) = normalize_environments(stripped, config.rules.environments(&template));
            let (doc, graphics) = if config.fix_graphics && !template.is_generic() {
                fix_graphics(doc, &entry.path, assets)
            } else {
                (doc, GraphicsStats::default())
            };
            Ok((doc, env, graphics))
        },
        |(_, s, g)| {
            format!(
                "{} environments renamed, {} unwrapped, {} graphics fixed",
                s.renamed,
                s.unwrapped,
                g.total()
            )
        },
    )?;

    let latex = tracker.step(
        Stage::Emitted,
        || Ok(normalized.render()),
        |l| format!("{} bytes", l.len()),
    )?;

    let mut warnings: Vec<NormalizationWarning> = entry.warnings.clone();
    warnings.extend(include_warnings);

    let stats = ConversionStats {
        files_in_tree: tree.len(),
        files_included: files.len(),
        macros_stripped: strip_stats.stripped,
        macros_rewritten: strip_stats.rewritten,
        environments_renamed: env_stats.renamed,
        environments_unwrapped: env_stats.unwrapped,
        graphics_fixed: graphics_stats.total(),
        bibliography,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    if let Some(cb) = &config.progress_callback {
        cb.on_conversion_complete(latex.len());
    }

    Ok(ConversionOutput {
        latex,
        document: normalized,
        entry,
        classification,
        metadata,
        warnings,
        stats,
    })
}

fn include_stage(
    tree: &SourceTree,
    entry: &EntryResolution,
    config: &ConversionConfig,
) -> Result<IncludeOutcome, Tex2EpubError> {
    let text = tree
        .get(&entry.path)
        .ok_or_else(|| Tex2EpubError::Internal(format!("entry '{}' vanished from the tree", entry.path)))?;
    let fragments = parser::parse(&entry.path, text)?;
    resolve_includes(DocumentNode::new(entry.path.clone(), fragments), tree, config)
}

/// Classify, honouring `template_override`. The preamble facts are kept
/// either way.
fn classify(document: &DocumentNode, config: &ConversionConfig) -> Classification {
    let mut classification = config.rules.classify(&document.fragments);
    if let Some(forced) = &config.template_override {
        debug!("Template forced to {} (detected {})", forced, classification.template);
        classification.template = forced.clone();
    }
    classification
}

// ── Async entry points ───────────────────────────────────────────────────

/// Fetch, unpack and normalise an arXiv id, URL or local path.
///
/// # Example
/// ```rust,no_run
/// use edgequake_tex2epub::{convert, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let output = convert("1706.03762", &ConversionConfig::default()).await?;
/// println!("{}", output.latex);
/// # Ok(())
/// # }
/// ```
pub async fn convert(input: impl AsRef<str>, config: &ConversionConfig) -> Result<ConversionOutput, Tex2EpubError> {
    convert_with_bundle(input.as_ref(), config).await.map(|(out, _)| out)
}

async fn convert_with_bundle(
    input_str: &str,
    config: &ConversionConfig,
) -> Result<(ConversionOutput, Bundle), Tex2EpubError> {
    let start = Instant::now();
    let source = input::parse_input(input_str)?;
    info!("Starting conversion: {}", source.label());
    if let Some(cb) = &config.progress_callback {
        cb.on_conversion_start(&source.label());
    }

    let mut tracker = StageTracker::new(config.progress_callback.clone());
    let bundle = fetch_and_unpack(&source, config, &mut tracker).await?;
    let manifest = bundle.manifest();
    let mut output = run_core(&bundle.tree, &asset_paths(&bundle), manifest.as_ref(), config, &mut tracker)?;
    output.stats.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Conversion complete: {} ({} bytes, {}ms)",
        output.entry.path,
        output.latex.len(),
        output.stats.duration_ms
    );
    Ok((output, bundle))
}

async fn fetch_and_unpack(
    source: &SourceInput,
    config: &ConversionConfig,
    tracker: &mut StageTracker,
) -> Result<Bundle, Tex2EpubError> {
    tracker.begin(Stage::Fetched)?;
    let fetched = match input::fetch(source, config.download_timeout_secs).await {
        Ok(f) => f,
        Err(e) => {
            tracker.fail(Stage::Fetched, &e);
            return Err(e);
        }
    };
    match fetched {
        Fetched::Archive { name, bytes } => {
            tracker.complete(Stage::Fetched, &format!("{} bytes from {}", bytes.len(), source.label()));
            tracker.step(
                Stage::Unpacked,
                || unpack::unpack(&name, &bytes).map(|(bundle, _)| bundle),
                |b| format!("{} text files, {} assets", b.tree.len(), b.assets.len()),
            )
        }
        Fetched::Directory(bundle) => {
            tracker.complete(Stage::Fetched, &format!("directory {}", source.label()));
            tracker.step(
                Stage::Unpacked,
                || Ok(bundle),
                |b| format!("{} text files, {} assets", b.tree.len(), b.assets.len()),
            )
        }
    }
}

/// Convert and write the normalised LaTeX to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    input: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Tex2EpubError> {
    let output = convert(input, config).await?;
    write_atomic(output_path.as_ref(), output.latex.as_bytes()).await?;
    Ok(output)
}

/// Convert and write the normalised LaTeX into `dir`, named by
/// [`ConversionOutput::file_name`]. Returns the output and the file path.
pub async fn convert_to_titled_file(
    input: impl AsRef<str>,
    dir: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<(ConversionOutput, PathBuf), Tex2EpubError> {
    let output = convert(input, config).await?;
    let path = dir.as_ref().join(output.file_name());
    write_atomic(&path, output.latex.as_bytes()).await?;
    info!("Wrote {}", path.display());
    Ok((output, path))
}

/// Convert and materialise the whole submission under `dir`: every source
/// file and asset at its archive path, plus the normalised document written
/// next to the entry as `<entry stem>.normalized.tex` so relative figure
/// paths keep working for the Render Backend.
///
/// Returns the output and the path of the normalised document.
pub async fn convert_to_dir(
    input: impl AsRef<str>,
    dir: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<(ConversionOutput, PathBuf), Tex2EpubError> {
    let (output, bundle) = convert_with_bundle(input.as_ref(), config).await?;
    let dir = dir.as_ref();
    for (rel, text) in bundle.tree.iter() {
        write_file(&dir.join(rel), text.as_bytes()).await?;
    }
    for (rel, bytes) in &bundle.assets {
        write_file(&dir.join(rel), bytes).await?;
    }
    let document = dir.join(normalized_name(&output.entry.path));
    write_atomic(&document, output.latex.as_bytes()).await?;
    info!("Wrote {} files and {} under {}", bundle.file_count(), document.display(), dir.display());
    Ok((output, document))
}

/// `paper/main.tex` → `paper/main.normalized.tex`.
pub fn normalized_name(entry: &str) -> String {
    format!("{}.normalized.tex", source::strip_extension(entry))
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), Tex2EpubError> {
    let failed = |e| Tex2EpubError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }
    tokio::fs::write(path, bytes).await.map_err(failed)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Tex2EpubError> {
    let failed = |e| Tex2EpubError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }
    let tmp_path = path.with_extension("tex.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(failed)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(input: impl AsRef<str>, config: &ConversionConfig) -> Result<ConversionOutput, Tex2EpubError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Tex2EpubError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input, config))
}

/// Resolve the entry, classify and read metadata without stripping or
/// normalising. Absent include targets are tolerated.
pub async fn inspect(input: impl AsRef<str>, config: &ConversionConfig) -> Result<InspectReport, Tex2EpubError> {
    let source = input::parse_input(input.as_ref())?;
    let mut tracker = StageTracker::new(None);
    let bundle = fetch_and_unpack(&source, config, &mut tracker).await?;
    inspect_bundle(&bundle, config)
}

/// [`inspect`] over an in-memory bundle.
pub fn inspect_bundle(bundle: &Bundle, config: &ConversionConfig) -> Result<InspectReport, Tex2EpubError> {
    let manifest = bundle.manifest();
    let entry = resolve_entry(&bundle.tree, manifest.as_ref(), config.entry_override.as_deref())?;
    let mut lenient = config.clone();
    lenient.missing_includes = MissingIncludePolicy::Keep;
    lenient.inline_bibliography = false;
    let included = include_stage(&bundle.tree, &entry, &lenient)?;
    let classification = classify(&included.document, config);
    let metadata: PaperMetadata = extract_metadata(&included.document.fragments);
    Ok(InspectReport {
        entry,
        classification,
        metadata,
        tex_files: bundle.tree.tex_files().map(|(p, _)| p.to_string()).collect(),
        assets: bundle.assets.len(),
    })
}
