//! Include Resolver: splice every `\input`/`\include` target into the
//! entry document.
//!
//! The active inclusion path is an explicit [`IncludeStack`]; pushing a file
//! that is already on it is a [`Tex2EpubError::CyclicInclude`], pushing
//! past `max_include_depth` is a [`Tex2EpubError::IncludeDepthExceeded`].
//! Both checks happen before the target is parsed, so a cyclic archive can
//! never recurse unboundedly.
//!
//! ## Target lookup
//!
//! A target is tried, in order, against the directory of the including
//! file, the directory of the entry file and the tree root (TeX resolves
//! relative to the working directory, and most arXiv bundles are compiled
//! from the entry's directory). At each base `target.tex` is tried before
//! `target`. When nothing matches exactly, a case-insensitive match that
//! ignores extensions is attempted, preferring `.tex` files.

use crate::config::{ConversionConfig, MissingIncludePolicy};
use crate::error::{NormalizationWarning, Tex2EpubError};
use crate::latex::fragment::{Argument, DocumentNode, Fragment, IncludeDirective, IncludeKind};
use crate::latex::parser;
use crate::source::{self, SourceTree};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// What the include stage produced.
#[derive(Debug, Clone)]
pub struct IncludeOutcome {
    pub document: DocumentNode,
    pub warnings: Vec<NormalizationWarning>,
    /// Distinct files spliced in, in first-inclusion order.
    pub files: Vec<String>,
    /// The `.bbl` file inlined for `\bibliography{..}`, if any.
    pub bibliography: Option<String>,
}

// ── IncludeStack ─────────────────────────────────────────────────────────

/// Files currently being expanded, outermost first.
#[derive(Debug, Clone)]
pub struct IncludeStack {
    paths: Vec<String>,
    max_depth: usize,
}

impl IncludeStack {
    /// A stack holding only the entry file (depth 0).
    pub fn new(entry: impl Into<String>, max_depth: usize) -> Self {
        Self {
            paths: vec![entry.into()],
            max_depth,
        }
    }

    /// Nesting depth of the innermost file; the entry is depth 0.
    pub fn depth(&self) -> usize {
        self.paths.len().saturating_sub(1)
    }

    pub fn current(&self) -> &str {
        self.paths.last().map_or("", String::as_str)
    }

    /// Enter `path`. Cycles are checked before depth.
    pub fn push(&mut self, path: &str) -> Result<(), Tex2EpubError> {
        if let Some(pos) = self.paths.iter().position(|p| p == path) {
            let mut cycle = self.paths[pos..].to_vec();
            cycle.push(path.to_string());
            return Err(Tex2EpubError::CyclicInclude { cycle });
        }
        if self.paths.len() > self.max_depth {
            return Err(Tex2EpubError::IncludeDepthExceeded {
                path: path.to_string(),
                max: self.max_depth,
            });
        }
        self.paths.push(path.to_string());
        Ok(())
    }

    pub fn pop(&mut self) {
        if self.paths.len() > 1 {
            self.paths.pop();
        }
    }
}

// ── Resolver ─────────────────────────────────────────────────────────────

/// Expand every include directive reachable from `entry`.
pub fn resolve_includes(
    entry: DocumentNode,
    tree: &SourceTree,
    config: &ConversionConfig,
) -> Result<IncludeOutcome, Tex2EpubError> {
    let mut resolver = Resolver {
        tree,
        entry_dir: source::parent_dir(&entry.path).to_string(),
        policy: config.missing_includes,
        warnings: Vec::new(),
        seen: BTreeSet::new(),
        files: Vec::new(),
        nesting: 0,
    };
    let mut stack = IncludeStack::new(entry.path.clone(), config.max_include_depth);
    let mut fragments = resolver.sequence(entry.fragments, &mut stack, false)?;

    let bibliography = if config.inline_bibliography {
        inline_bibliography(&mut fragments, &entry.path, tree)?
    } else {
        None
    };

    debug!(
        "Resolved includes from '{}': {} files spliced, {} left unresolved",
        entry.path,
        resolver.files.len(),
        resolver.warnings.len()
    );
    Ok(IncludeOutcome {
        document: DocumentNode::new(entry.path, fragments),
        warnings: resolver.warnings,
        files: resolver.files,
        bibliography,
    })
}

struct Resolver<'a> {
    tree: &'a SourceTree,
    entry_dir: String,
    policy: MissingIncludePolicy,
    warnings: Vec<NormalizationWarning>,
    seen: BTreeSet<String>,
    files: Vec<String>,
    /// Fragment-tree depth of the sequence being resolved.
    nesting: usize,
}

impl Resolver<'_> {
    fn sequence(
        &mut self,
        input: Vec<Fragment>,
        stack: &mut IncludeStack,
        in_math: bool,
    ) -> Result<Vec<Fragment>, Tex2EpubError> {
        self.nesting += 1;
        let resolved = self.resolve_all(input, stack, in_math);
        self.nesting -= 1;
        resolved
    }

    fn resolve_all(
        &mut self,
        input: Vec<Fragment>,
        stack: &mut IncludeStack,
        in_math: bool,
    ) -> Result<Vec<Fragment>, Tex2EpubError> {
        let mut out = Vec::with_capacity(input.len());
        for frag in input {
            match frag {
                Fragment::Include(directive) => self.directive(directive, stack, in_math, &mut out)?,
                Fragment::Macro(mut m) => {
                    self.arguments(&mut m.args, stack)?;
                    out.push(Fragment::Macro(m));
                }
                Fragment::Environment(mut e) => {
                    self.arguments(&mut e.args, stack)?;
                    e.body = self.sequence(std::mem::take(&mut e.body), stack, false)?;
                    out.push(Fragment::Environment(e));
                }
                Fragment::Group { body } => out.push(Fragment::Group {
                    body: self.sequence(body, stack, in_math)?,
                }),
                Fragment::Math(mut m) => {
                    m.body = self.sequence(std::mem::take(&mut m.body), stack, true)?;
                    out.push(Fragment::Math(m));
                }
                text @ Fragment::Text { .. } => out.push(text),
            }
        }
        Ok(out)
    }

    fn arguments(&mut self, args: &mut [Argument], stack: &mut IncludeStack) -> Result<(), Tex2EpubError> {
        for arg in args {
            if let Some(body) = arg.body_mut() {
                *body = self.sequence(std::mem::take(body), stack, false)?;
            }
        }
        Ok(())
    }

    fn directive(
        &mut self,
        directive: IncludeDirective,
        stack: &mut IncludeStack,
        in_math: bool,
        out: &mut Vec<Fragment>,
    ) -> Result<(), Tex2EpubError> {
        let from = stack.current().to_string();
        let Some(path) = locate(self.tree, &directive.target, &from, &self.entry_dir) else {
            return match self.policy {
                MissingIncludePolicy::Fail => Err(Tex2EpubError::IncludeNotFound {
                    target: directive.target,
                    from,
                }),
                MissingIncludePolicy::Keep => {
                    warn!("'{}': include target '{}' not in archive, kept as-is", from, directive.target);
                    self.warnings.push(NormalizationWarning::MissingInclude {
                        target: directive.target.clone(),
                        from,
                    });
                    out.push(Fragment::Include(directive));
                    Ok(())
                }
            };
        };

        stack.push(&path)?;
        let text = self.tree.get(&path).unwrap_or_default();
        // The spliced file replaces one fragment of the current sequence.
        let depth = self.nesting.saturating_sub(1);
        let parsed = if in_math {
            parser::parse_math_content_nested(&path, text, depth)?
        } else {
            parser::parse_nested(&path, text, depth)?
        };
        debug!("Splicing '{}' into '{}' (depth {})", path, from, stack.depth());
        let expanded = self.sequence(parsed, stack, in_math)?;
        stack.pop();

        if self.seen.insert(path.clone()) {
            self.files.push(path);
        }
        match directive.kind {
            IncludeKind::Input => out.extend(expanded),
            IncludeKind::Include => {
                out.push(Fragment::text("\n\n"));
                out.extend(expanded);
                out.push(Fragment::text("\n\n"));
            }
        }
        Ok(())
    }
}

/// Find `target` in the tree; see the module docs for the search order.
pub fn locate(tree: &SourceTree, target: &str, from: &str, entry_dir: &str) -> Option<String> {
    let mut bases: Vec<&str> = Vec::with_capacity(3);
    for base in [source::parent_dir(from), entry_dir, ""] {
        if !bases.contains(&base) {
            bases.push(base);
        }
    }

    let mut names = Vec::with_capacity(2);
    if !source::has_extension(target, "tex") {
        names.push(format!("{target}.tex"));
    }
    names.push(target.to_string());

    for base in &bases {
        for name in &names {
            if let Some(candidate) = source::join(base, name) {
                if tree.contains(&candidate) {
                    return Some(candidate);
                }
            }
        }
    }

    for base in &bases {
        let Some(wanted) = source::join(base, source::strip_extension(target)) else {
            continue;
        };
        let wanted = wanted.to_lowercase();
        let mut matches = tree
            .paths()
            .filter(|p| source::strip_extension(p).to_lowercase() == wanted)
            .collect::<Vec<_>>();
        matches.sort_by_key(|p| !source::has_extension(p, "tex"));
        if let Some(found) = matches.first() {
            debug!("Include '{}' matched '{}' loosely", target, found);
            return Some(found.to_string());
        }
    }
    None
}

// ── Bibliography ─────────────────────────────────────────────────────────

/// Replace the first `\bibliography{..}` with the parsed `.bbl` the archive
/// ships: `<entry stem>.bbl` first, then `<first bib name>.bbl`, then the
/// only `.bbl` in the tree.
fn inline_bibliography(
    fragments: &mut Vec<Fragment>,
    entry: &str,
    tree: &SourceTree,
) -> Result<Option<String>, Tex2EpubError> {
    let Some(bib_arg) = first_bibliography(fragments) else {
        return Ok(None);
    };

    let mut candidates = vec![format!("{}.bbl", source::strip_extension(entry))];
    if let Some(first) = bib_arg.split(',').next().map(str::trim).filter(|s| !s.is_empty()) {
        if let Some(p) = source::join(source::parent_dir(entry), &format!("{}.bbl", source::strip_extension(first))) {
            candidates.push(p);
        }
    }
    let all_bbl: Vec<&str> = tree.paths().filter(|p| source::has_extension(p, "bbl")).collect();
    if let [only] = all_bbl.as_slice() {
        candidates.push(only.to_string());
    }

    let Some(bbl) = candidates.into_iter().find(|c| tree.contains(c)) else {
        debug!("No .bbl found for \\bibliography{{{}}}; left in place", bib_arg);
        return Ok(None);
    };
    let parsed = parser::parse(&bbl, tree.get(&bbl).unwrap_or_default())?;
    replace_first_bibliography(fragments, &mut Some(parsed));
    debug!("Inlined bibliography from '{}'", bbl);
    Ok(Some(bbl))
}

fn first_bibliography(fragments: &[Fragment]) -> Option<String> {
    let mut found = None;
    crate::latex::fragment::visit(fragments, &mut |f| {
        if found.is_none() {
            if let Some(m) = f.as_macro().filter(|m| m.name == "bibliography") {
                found = Some(m.required(0).map(crate::latex::fragment::render).unwrap_or_default());
            }
        }
    });
    found
}

/// Returns `true` once the replacement has been placed.
fn replace_first_bibliography(fragments: &mut Vec<Fragment>, replacement: &mut Option<Vec<Fragment>>) -> bool {
    let mut i = 0;
    while i < fragments.len() {
        let is_target = fragments[i].as_macro().is_some_and(|m| m.name == "bibliography");
        if is_target {
            let body = replacement.take().unwrap_or_default();
            fragments.splice(i..=i, body);
            return true;
        }
        let placed = match &mut fragments[i] {
            Fragment::Environment(e) => replace_first_bibliography(&mut e.body, replacement),
            Fragment::Group { body } => replace_first_bibliography(body, replacement),
            Fragment::Macro(m) => m
                .args
                .iter_mut()
                .filter_map(Argument::body_mut)
                .any(|body| replace_first_bibliography(body, replacement)),
            _ => false,
        };
        if placed {
            return true;
        }
        i += 1;
    }
    false
}
