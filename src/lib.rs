//! # edgequake-tex2epub
//!
//! Normalise arXiv LaTeX source bundles into one self-contained document a
//! generic LaTeX converter (Pandoc and friends) can render into an e-book.
//!
//! ## Why this crate?
//!
//! arXiv sources are rarely a single file. Papers split across `\input`
//! trees, ship conference class files full of header, watermark and
//! camera-ready macros, and wrap figures in layout environments that
//! converters either choke on or render as noise. This crate finds the real
//! entry file, inlines every include and rewrites the template-specific
//! constructs into plain LaTeX, leaving everything it does not recognise
//! byte-for-byte intact.
//!
//! ## Pipeline Overview
//!
//! ```text
//! arXiv id / URL / path
//!  │
//!  ├─ 1. Fetch      download https://arxiv.org/src/{id} or read from disk
//!  ├─ 2. Unpack     tar.gz / tar / gzip / .tex → SourceTree + assets
//!  ├─ 3. Entry      00README manifest, else \begin{document} scan
//!  ├─ 4. Include    \input / \include expansion, cycle + depth checked
//!  ├─ 5. Classify   ICML / NeurIPS / ACL_EMNLP / PlainArticle / Generic
//!  ├─ 6. Strip      per-template macro table (strip / rewrite / passthrough)
//!  ├─ 7. Normalise  per-template environment table (rename / unwrap / passthrough)
//!  └─ 8. Emit       single normalised .tex + stats + warnings
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_tex2epub::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let output = convert("1706.03762", &config).await?;
//!     println!("{}", output.latex);
//!     eprintln!("template: {}, {} files inlined",
//!         output.classification.template,
//!         output.stats.files_included);
//!     Ok(())
//! }
//! ```
//!
//! The core is synchronous and I/O free; with a tree already in memory use
//! [`normalize_tree`]:
//!
//! ```rust
//! use edgequake_tex2epub::{normalize_tree, ConversionConfig, SourceTree};
//!
//! let tree: SourceTree = [
//!     ("main.tex", "\\documentclass{article}\\begin{document}\\input{intro}\\end{document}"),
//!     ("intro.tex", "Hello."),
//! ]
//! .into_iter()
//! .collect();
//! let out = normalize_tree(&tree, None, &ConversionConfig::default()).unwrap();
//! assert!(out.latex.contains("Hello."));
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `tex2epub` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-tex2epub = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod latex;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod rules;
pub mod source;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, MissingIncludePolicy};
pub use convert::{
    convert, convert_sync, convert_to_dir, convert_to_file, convert_to_titled_file, inspect, inspect_bundle, normalize_bundle,
    normalize_tree, Stage,
};
pub use error::{ErrorKind, ErrorReport, NormalizationWarning, Tex2EpubError};
pub use latex::{DocumentNode, Fragment, NormalizedDocument};
pub use output::{ConversionOutput, ConversionStats, InspectReport};
pub use pipeline::metadata::PaperMetadata;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use rules::{
    Classification, EnvironmentRuleTable, MacroRule, MacroTable, NormalizationRule, RuleBook, Template,
    TemplateProfile, TemplateSignature,
};
pub use source::{Bundle, Manifest, SourceTree};
