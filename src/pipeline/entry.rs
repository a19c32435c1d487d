//! Manifest Resolver: pick the entry `.tex` file of a source tree.
//!
//! Order of authority:
//! 1. an explicit entry from the config,
//! 2. the manifest's `toplevel` file, when the tree contains it,
//! 3. a scan for `\begin{document}` outside comments, preferring the
//!    shallowest directory and then the largest file.
//!
//! Two scan candidates that tie on both criteria are an
//! [`Tex2EpubError::AmbiguousEntry`]; the resolver never guesses.

use crate::error::{NormalizationWarning, Tex2EpubError};
use crate::source::{Manifest, SourceTree};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

static BEGIN_DOCUMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\begin\s*\{document\}").unwrap());

/// Where the entry path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    Override,
    Manifest,
    Scan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryResolution {
    pub path: String,
    pub source: EntrySource,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<NormalizationWarning>,
}

/// Resolve the entry document of `tree`.
pub fn resolve_entry(
    tree: &SourceTree,
    manifest: Option<&Manifest>,
    entry_override: Option<&str>,
) -> Result<EntryResolution, Tex2EpubError> {
    if let Some(wanted) = entry_override {
        let path = crate::source::normalize_path(wanted)
            .filter(|p| tree.contains(p))
            .or_else(|| super::include::locate(tree, wanted, "", ""))
            .ok_or_else(|| Tex2EpubError::FileNotFound {
                path: PathBuf::from(wanted),
            })?;
        debug!("Entry '{}' given explicitly", path);
        return Ok(EntryResolution {
            path,
            source: EntrySource::Override,
            warnings: Vec::new(),
        });
    }

    let mut warnings = Vec::new();
    if let Some(named) = manifest.and_then(Manifest::entry) {
        if tree.contains(&named) {
            debug!("Entry '{}' named by manifest", named);
            return Ok(EntryResolution {
                path: named,
                source: EntrySource::Manifest,
                warnings,
            });
        }
        warn!("Manifest names '{}' but the archive has no such file", named);
        warnings.push(NormalizationWarning::StaleManifest { path: named });
    }

    let path = scan_for_root(tree)?;
    Ok(EntryResolution {
        path,
        source: EntrySource::Scan,
        warnings,
    })
}

/// Rank every `.tex` file declaring `\begin{document}`.
pub fn scan_for_root(tree: &SourceTree) -> Result<String, Tex2EpubError> {
    let mut scanned = 0usize;
    let mut candidates: Vec<(usize, usize, &str)> = Vec::new();
    for (path, text) in tree.tex_files() {
        scanned += 1;
        if declares_document(text) {
            let depth = path.matches('/').count();
            candidates.push((depth, text.len(), path));
        }
    }
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)).then(a.2.cmp(b.2)));
    debug!("Entry scan: {} of {} .tex files declare a document body", candidates.len(), scanned);

    match candidates.as_slice() {
        [] => Err(Tex2EpubError::NoEntryFound { scanned }),
        [(depth, size, path), rest @ ..] => {
            let tied: Vec<String> = rest
                .iter()
                .take_while(|(d, s, _)| d == depth && s == size)
                .map(|(_, _, p)| p.to_string())
                .collect();
            if tied.is_empty() {
                Ok(path.to_string())
            } else {
                let mut all = vec![path.to_string()];
                all.extend(tied);
                Err(Tex2EpubError::AmbiguousEntry { candidates: all })
            }
        }
    }
}

/// `\begin{document}` on a line, before any unescaped `%`.
fn declares_document(text: &str) -> bool {
    text.lines().any(|line| BEGIN_DOCUMENT.is_match(code_part(line)))
}

fn code_part(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut backslashes = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\\' => backslashes += 1,
            b'%' if backslashes % 2 == 0 => return &line[..i],
            _ => backslashes = 0,
        }
    }
    line
}
