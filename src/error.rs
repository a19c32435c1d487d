//! Error types for the edgequake-tex2epub library.
//!
//! Two distinct types reflect two distinct failure modes:
//!
//! * [`Tex2EpubError`] — **Fatal**: the normalisation pass cannot produce a
//!   trustworthy document (no entry file, a cyclic include, unbalanced
//!   environments, a failed download). Returned as `Err(Tex2EpubError)` from
//!   every top-level `convert*` / `normalize*` function. No partial document is
//!   ever returned alongside it.
//!
//! * [`NormalizationWarning`] — **Non-fatal**: something the caller should
//!   hear about, but which leaves the document structurally sound (an include
//!   target absent from the archive while [`MissingIncludePolicy::Keep`] is
//!   active). Stored in [`crate::output::ConversionOutput::warnings`].
//!
//! Unknown macros and environments are neither: they are forwarded verbatim
//! and never reported.
//!
//! [`MissingIncludePolicy::Keep`]: crate::config::MissingIncludePolicy::Keep

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-tex2epub library.
#[derive(Debug, Error)]
pub enum Tex2EpubError {
    // ── Entry resolution ──────────────────────────────────────────────────
    /// No `.tex` file in the archive contains `\begin{document}`.
    #[error("No entry document found: none of the {scanned} .tex files contains \\begin{{document}}")]
    NoEntryFound { scanned: usize },

    /// Several top-level candidates tie on depth and size.
    #[error("Ambiguous entry document: {} candidates tie ({})\nName one explicitly with --entry.", candidates.len(), candidates.join(", "))]
    AmbiguousEntry { candidates: Vec<String> },

    // ── Include resolution ────────────────────────────────────────────────
    /// An `\input`/`\include` target could not be located in the archive.
    #[error("Included file '{target}' not found (referenced from '{from}')")]
    IncludeNotFound { target: String, from: String },

    /// A file (transitively) includes itself.
    #[error("Cyclic include: {}", cycle.join(" -> "))]
    CyclicInclude { cycle: Vec<String> },

    /// Include nesting went deeper than `max_include_depth`.
    #[error("Include depth exceeded {max} while expanding '{path}'\nRaise --max-include-depth if the archive is legitimately this deep.")]
    IncludeDepthExceeded { path: String, max: usize },

    // ── Parsing ───────────────────────────────────────────────────────────
    /// Unbalanced environment, stray brace or unterminated argument/math span.
    #[error("Malformed LaTeX in '{path}' at line {line}: {detail}")]
    MalformedSource {
        path: String,
        line: usize,
        /// Macro or environment name involved, when there is one.
        name: Option<String>,
        detail: String,
    },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file or directory was not found at the given path.
    #[error("Source not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the input.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is neither an arXiv id, a URL nor an existing path.
    #[error("Invalid input '{input}': not an arXiv id, an HTTP/HTTPS URL or a local path")]
    InvalidInput { input: String },

    /// Download failed (network error or non-2xx status).
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bundle carries no LaTeX at all (arXiv serves a PDF for PDF-only submissions).
    #[error("'{name}' contains no LaTeX source ({detail})")]
    NoLatexSource { name: String, detail: String },

    /// The archive bytes could not be decompressed or read.
    #[error("Failed to unpack '{name}': {detail}")]
    UnpackFailed { name: String, detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed, or a rule table is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Machine-readable error category, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoEntryFound,
    AmbiguousEntry,
    IncludeNotFound,
    CyclicInclude,
    IncludeDepthExceeded,
    MalformedSource,
    FileNotFound,
    PermissionDenied,
    InvalidInput,
    DownloadFailed,
    DownloadTimeout,
    NoLatexSource,
    UnpackFailed,
    OutputWriteFailed,
    InvalidConfig,
    Internal,
}

impl Tex2EpubError {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoEntryFound { .. } => ErrorKind::NoEntryFound,
            Self::AmbiguousEntry { .. } => ErrorKind::AmbiguousEntry,
            Self::IncludeNotFound { .. } => ErrorKind::IncludeNotFound,
            Self::CyclicInclude { .. } => ErrorKind::CyclicInclude,
            Self::IncludeDepthExceeded { .. } => ErrorKind::IncludeDepthExceeded,
            Self::MalformedSource { .. } => ErrorKind::MalformedSource,
            Self::FileNotFound { .. } => ErrorKind::FileNotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            Self::DownloadTimeout { .. } => ErrorKind::DownloadTimeout,
            Self::NoLatexSource { .. } => ErrorKind::NoLatexSource,
            Self::UnpackFailed { .. } => ErrorKind::UnpackFailed,
            Self::OutputWriteFailed { .. } => ErrorKind::OutputWriteFailed,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The source file the error points at, when it points at one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::IncludeNotFound { from, .. } => Some(from),
            Self::IncludeDepthExceeded { path, .. } => Some(path),
            Self::MalformedSource { path, .. } => Some(path),
            Self::CyclicInclude { cycle } => cycle.first().map(String::as_str),
            _ => None,
        }
    }

    /// Structured form of this error for JSON reports.
    pub fn report(&self) -> ErrorReport {
        let name = match self {
            Self::IncludeNotFound { target, .. } => Some(target.clone()),
            Self::MalformedSource { name, .. } => name.clone(),
            _ => None,
        };
        ErrorReport {
            kind: self.kind(),
            path: self.path().map(str::to_string),
            name,
            message: self.to_string(),
        }
    }
}

/// A serialisable failure: kind plus offending path and macro/environment name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub path: Option<String>,
    pub name: Option<String>,
    pub message: String,
}

/// A non-fatal finding recorded during normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum NormalizationWarning {
    /// Include target absent; the directive was kept verbatim.
    #[error("'{from}': included file '{target}' not found, directive left in place")]
    MissingInclude { target: String, from: String },

    /// The manifest named an entry file the archive does not contain.
    #[error("manifest names entry '{path}' which is not in the archive; scanned for a root instead")]
    StaleManifest { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyclic_include_display() {
        let e = Tex2EpubError::CyclicInclude {
            cycle: vec!["a.tex".into(), "b.tex".into(), "a.tex".into()],
        };
        assert!(e.to_string().contains("a.tex -> b.tex -> a.tex"), "got: {e}");
        assert_eq!(e.kind(), ErrorKind::CyclicInclude);
        assert_eq!(e.path(), Some("a.tex"));
    }

    #[test]
    fn ambiguous_entry_lists_candidates() {
        let e = Tex2EpubError::AmbiguousEntry {
            candidates: vec!["a.tex".into(), "b.tex".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("2 candidates"), "got: {msg}");
        assert!(msg.contains("a.tex, b.tex"));
    }

    #[test]
    fn malformed_source_report_carries_name() {
        let e = Tex2EpubError::MalformedSource {
            path: "sec/intro.tex".into(),
            line: 12,
            name: Some("figure".into()),
            detail: "\\begin{figure} is never closed".into(),
        };
        let r = e.report();
        assert_eq!(r.kind, ErrorKind::MalformedSource);
        assert_eq!(r.path.as_deref(), Some("sec/intro.tex"));
        assert_eq!(r.name.as_deref(), Some("figure"));
        assert!(r.message.contains("line 12"));
    }

    #[test]
    fn error_kind_serialises_snake_case() {
        let json = serde_json::to_string(&ErrorKind::IncludeDepthExceeded).unwrap();
        assert_eq!(json, "\"include_depth_exceeded\"");
    }

    #[test]
    fn missing_include_warning_display() {
        let w = NormalizationWarning::MissingInclude {
            target: "figs/plot".into(),
            from: "main.tex".into(),
        };
        assert!(w.to_string().contains("figs/plot"));
    }
}
