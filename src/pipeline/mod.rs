//! Pipeline stages for LaTeX source normalisation.
//!
//! Each submodule implements exactly one transformation step and can be
//! tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ unpack ──▶ entry ──▶ include ──▶ classify ──▶ strip ──▶ environment
//! (fetch)   (tar/gz)   (root)    (splice)    (rules)     (macros)   (envs)
//! ```
//!
//! 1. [`input`]   — arXiv id, URL or local path to raw bytes; the only stage
//!    with network I/O
//! 2. [`unpack`]  — gzip/tar detection by magic bytes into a [`crate::source::Bundle`]
//! 3. [`entry`]   — manifest hint or `\begin{document}` scan
//! 4. [`include`] — recursive `\input`/`\include` expansion with cycle and
//!    depth checks
//! 5. classification lives in [`crate::rules::RuleBook::classify`]
//! 6. [`strip`]   — per-template macro table
//! 7. [`environment`] — per-template environment table, innermost first
//! 8. [`graphics`] — `\includegraphics` extensions and widths against the
//!    bundle's assets
//!
//! [`metadata`] reads title and authors off the include-resolved document
//! before stripping removes the template forms.

pub mod entry;
pub mod environment;
pub mod graphics;
pub mod include;
pub mod input;
pub mod metadata;
pub mod strip;
pub mod unpack;
