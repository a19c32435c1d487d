//! Graphics Fixer: make `\includegraphics` usable outside the original
//! build.
//!
//! - A target written without an extension gets the one the bundle ships
//!   (`figs/plot` → `figs/plot.png`), looked up next to the entry file and
//!   then at the archive root.
//! - Column-relative widths (`width=0.48\linewidth`, `width=\columnwidth`)
//!   become `width=\textwidth`: a reflowed page has a single column.
//!
//! Math spans and raw arguments are not searched. Both edits are fixed
//! points, so a second pass changes nothing.

use crate::latex::fragment::{render, Argument, Fragment, MacroInvocation, NormalizedDocument};
use crate::latex::parser;
use crate::source;
use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use std::collections::BTreeSet;
use tracing::debug;

/// Tried in this order when a target has no extension.
const GRAPHIC_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "pdf", "svg", "eps"];

static COLUMN_WIDTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"width\s*=\s*(?:[\d.]+\s*)?\\(?:line|text|column)width").unwrap());

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphicsStats {
    pub paths_completed: usize,
    pub widths_normalized: usize,
}

impl GraphicsStats {
    pub fn total(&self) -> usize {
        self.paths_completed + self.widths_normalized
    }
}

/// Fix every `\includegraphics` in `doc`. `assets` holds the bundle's
/// binary file paths; `entry` is the entry document's tree path.
pub fn fix_graphics(
    mut doc: NormalizedDocument,
    entry: &str,
    assets: &BTreeSet<&str>,
) -> (NormalizedDocument, GraphicsStats) {
    let mut fixer = Fixer {
        bases: search_bases(entry),
        assets,
        stats: GraphicsStats::default(),
    };
    fixer.sequence(&mut doc.fragments);
    debug!(
        "Graphics: {} paths completed, {} widths normalised",
        fixer.stats.paths_completed, fixer.stats.widths_normalized
    );
    (doc, fixer.stats)
}

fn search_bases(entry: &str) -> Vec<String> {
    let mut bases = vec![source::parent_dir(entry).to_string()];
    if !bases[0].is_empty() {
        bases.push(String::new());
    }
    bases
}

struct Fixer<'a> {
    bases: Vec<String>,
    assets: &'a BTreeSet<&'a str>,
    stats: GraphicsStats,
}

impl Fixer<'_> {
    fn sequence(&mut self, fragments: &mut [Fragment]) {
        for frag in fragments {
            match frag {
                Fragment::Macro(m) => {
                    if m.name == "includegraphics" {
                        self.includegraphics(m);
                    }
                    for body in m.args.iter_mut().filter_map(Argument::body_mut) {
                        self.sequence(body);
                    }
                }
                Fragment::Environment(e) => {
                    for body in e.args.iter_mut().filter_map(Argument::body_mut) {
                        self.sequence(body);
                    }
                    self.sequence(&mut e.body);
                }
                Fragment::Group { body } => self.sequence(body),
                Fragment::Text { .. } | Fragment::Include(_) | Fragment::Math(_) => {}
            }
        }
    }

    fn includegraphics(&mut self, m: &mut MacroInvocation) {
        // Options first, then the file; anything after the file is not ours.
        for arg in &mut m.args {
            match arg {
                Argument::Optional(body) => {
                    if let Some(fixed) = normalize_width(&render(body)) {
                        *body = fixed;
                        self.stats.widths_normalized += 1;
                    }
                }
                Argument::Required(body) => {
                    if let Some(completed) = self.complete_path(render(body).trim()) {
                        *body = vec![Fragment::text(completed)];
                        self.stats.paths_completed += 1;
                    }
                    break;
                }
                Argument::Verbatim(_) => {}
            }
        }
    }

    fn complete_path(&self, target: &str) -> Option<String> {
        if target.is_empty() || target.contains('\\') || source::extension(target).is_some() {
            return None;
        }
        GRAPHIC_EXTENSIONS.iter().find_map(|ext| {
            let name = format!("{target}.{ext}");
            let shipped = self
                .bases
                .iter()
                .filter_map(|base| source::join(base, &name))
                .any(|candidate| self.assets.contains(candidate.as_str()));
            shipped.then_some(name)
        })
    }
}

/// Options with column widths replaced, or `None` when nothing changed.
fn normalize_width(options: &str) -> Option<Vec<Fragment>> {
    let replaced = COLUMN_WIDTH.replace_all(options, NoExpand("width=\\textwidth"));
    if replaced == options {
        return None;
    }
    parser::parse("<includegraphics options>", &replaced).ok()
}
