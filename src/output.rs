//! Output types returned by the conversion entry points.

use crate::error::NormalizationWarning;
use crate::latex::NormalizedDocument;
use crate::pipeline::entry::EntryResolution;
use crate::pipeline::metadata::PaperMetadata;
use crate::rules::Classification;
use crate::source;
use serde::{Deserialize, Serialize};

/// Complete result of one normalisation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// The normalised single-document LaTeX handed to the Render Backend.
    pub latex: String,
    /// Fragment form of [`Self::latex`].
    #[serde(skip)]
    pub document: NormalizedDocument,
    pub entry: EntryResolution,
    pub classification: Classification,
    pub metadata: PaperMetadata,
    /// Non-fatal findings (kept include directives, stale manifest).
    pub warnings: Vec<NormalizationWarning>,
    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// Default file name for the normalised document: the slugified title,
    /// else the entry file's stem, with a `.tex` extension.
    pub fn file_name(&self) -> String {
        let from_title = self.metadata.title.as_deref().map(slugify).filter(|s| !s.is_empty());
        let slug = from_title.unwrap_or_else(|| {
            let stem = source::strip_extension(&self.entry.path);
            slugify(stem.rsplit('/').next().unwrap_or(stem))
        });
        if slug.is_empty() {
            "paper.tex".to_string()
        } else {
            format!("{slug}.tex")
        }
    }
}

/// Counters collected across the stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Text files in the source tree.
    pub files_in_tree: usize,
    /// Distinct files spliced in by the include resolver.
    pub files_included: usize,
    pub macros_stripped: usize,
    pub macros_rewritten: usize,
    pub environments_renamed: usize,
    pub environments_unwrapped: usize,
    /// `\includegraphics` paths completed plus widths normalised.
    pub graphics_fixed: usize,
    /// `.bbl` file inlined for `\bibliography`, if any.
    pub bibliography: Option<String>,
    pub duration_ms: u64,
}

/// Entry and template only, without stripping or normalising.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectReport {
    pub entry: EntryResolution,
    pub classification: Classification,
    pub metadata: PaperMetadata,
    /// Every `.tex` file in the tree.
    pub tex_files: Vec<String>,
    pub assets: usize,
}

/// File-name friendly form of a title: lowercase ASCII words joined by
/// dashes, at most 80 characters.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for word in title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let extra = if slug.is_empty() { word.len() } else { word.len() + 1 };
        if slug.len() + extra > 80 {
            break;
        }
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.push_str(&word.to_ascii_lowercase());
    }
    slug
}
