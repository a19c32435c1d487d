//! Macro Stripper: apply a [`MacroTable`] to every macro outside math.
//!
//! Arguments are processed before the macro that owns them, so a rewrite
//! carries already-cleaned argument content. Rewrite output is not
//! processed again. Math spans, include directives and raw definition bodies
//! are never touched.
//!
//! A stripped macro that was the only thing on its line also takes the
//! line's newline with it, so `\vspace{1em}` on its own line does not leave
//! an accidental paragraph break behind.

use crate::error::Tex2EpubError;
use crate::latex::fragment::{
    coalesce_text, render_argument_body, visit, Argument, DocumentNode, Fragment, MathSpan,
};
use crate::latex::parser;
use crate::rules::{MacroRule, MacroTable};
use std::collections::HashMap;
use tracing::debug;

/// Counters reported in [`crate::output::ConversionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StripStats {
    pub stripped: usize,
    pub rewritten: usize,
}

/// A [`MacroTable`] with its rewrite templates parsed.
#[derive(Debug)]
pub struct MacroStripper<'t> {
    table: &'t MacroTable,
    templates: HashMap<&'t str, Vec<Fragment>>,
}

impl<'t> MacroStripper<'t> {
    /// Parse every rewrite template. A template that does not parse, or uses
    /// a `#` that is not `#1`..`#9` or `##`, is [`Tex2EpubError::InvalidConfig`].
    pub fn new(table: &'t MacroTable) -> Result<Self, Tex2EpubError> {
        let mut templates = HashMap::new();
        for (name, rule) in table.iter() {
            let MacroRule::Rewrite(template) = rule else {
                continue;
            };
            let frags = parser::parse(&format!("<rewrite \\{name}>"), template).map_err(|e| {
                Tex2EpubError::InvalidConfig(format!("rewrite template for \\{name}: {e}"))
            })?;
            check_placeholders(&frags)
                .map_err(|detail| Tex2EpubError::InvalidConfig(format!("rewrite template for \\{name}: {detail}")))?;
            templates.insert(template.as_str(), frags);
        }
        Ok(Self { table, templates })
    }

    pub fn strip_document(&self, node: DocumentNode) -> (DocumentNode, StripStats) {
        let mut stats = StripStats::default();
        let fragments = self.sequence(node.fragments, true, &mut stats);
        debug!(
            "Macro stripping on '{}': {} stripped, {} rewritten",
            node.path, stats.stripped, stats.rewritten
        );
        (DocumentNode::new(node.path, fragments), stats)
    }

    fn sequence(&self, input: Vec<Fragment>, top: bool, stats: &mut StripStats) -> Vec<Fragment> {
        let mut out: Vec<Fragment> = Vec::with_capacity(input.len());
        // Set while the fragments removed since the last kept one started a line.
        let mut orphan = false;

        for frag in input {
            match frag {
                Fragment::Macro(mut m) => match self.table.rule(&m.name, m.starred) {
                    rule if rule.strips(&m) => {
                        stats.stripped += 1;
                        orphan = orphan || at_line_start(&out, top);
                    }
                    MacroRule::Rewrite(template) => {
                        self.arguments(&mut m.args, stats);
                        if let Some(compiled) = self.templates.get(template.as_str()) {
                            out.extend(substitute(compiled, &m.args));
                            stats.rewritten += 1;
                        } else {
                            out.push(Fragment::Macro(m));
                        }
                        orphan = false;
                    }
                    MacroRule::Strip | MacroRule::StripIf(_) | MacroRule::Passthrough => {
                        self.arguments(&mut m.args, stats);
                        out.push(Fragment::Macro(m));
                        orphan = false;
                    }
                },
                Fragment::Text { text } if orphan => {
                    orphan = false;
                    let after_blanks = text.trim_start_matches([' ', '\t']);
                    match after_blanks.strip_prefix('\n') {
                        Some(rest) => {
                            trim_trailing_blanks(&mut out);
                            if !rest.is_empty() {
                                out.push(Fragment::text(rest));
                            }
                        }
                        None => out.push(Fragment::Text { text }),
                    }
                }
                Fragment::Environment(mut e) => {
                    self.arguments(&mut e.args, stats);
                    e.body = self.sequence(std::mem::take(&mut e.body), false, stats);
                    out.push(Fragment::Environment(e));
                    orphan = false;
                }
                Fragment::Group { body } => {
                    out.push(Fragment::Group {
                        body: self.sequence(body, false, stats),
                    });
                    orphan = false;
                }
                other => {
                    out.push(other);
                    orphan = false;
                }
            }
        }
        coalesce_text(&mut out);
        out
    }

    fn arguments(&self, args: &mut [Argument], stats: &mut StripStats) {
        for arg in args {
            if let Some(body) = arg.body_mut() {
                *body = self.sequence(std::mem::take(body), false, stats);
            }
        }
    }
}

/// Strip one document with a table compiled on the spot.
pub fn strip_macros(node: DocumentNode, table: &MacroTable) -> Result<(DocumentNode, StripStats), Tex2EpubError> {
    Ok(MacroStripper::new(table)?.strip_document(node))
}

fn at_line_start(out: &[Fragment], top: bool) -> bool {
    match out.last() {
        Some(Fragment::Text { text }) => text.trim_end_matches([' ', '\t']).ends_with('\n'),
        None => top,
        _ => false,
    }
}

fn trim_trailing_blanks(out: &mut [Fragment]) {
    if let Some(Fragment::Text { text }) = out.last_mut() {
        let keep = text.trim_end_matches([' ', '\t']).len();
        text.truncate(keep);
    }
}

// ── Templates ────────────────────────────────────────────────────────────

fn check_placeholders(frags: &[Fragment]) -> Result<(), String> {
    let mut problem = None;
    visit(frags, &mut |f| {
        if let Fragment::Text { text } = f {
            let bytes = text.as_bytes();
            let mut i = 0;
            while i < bytes.len() {
                if bytes[i] == b'#' {
                    match bytes.get(i + 1) {
                        Some(b'1'..=b'9') | Some(b'#') => i += 1,
                        _ => {
                            problem.get_or_insert_with(|| format!("stray '#' in '{text}'"));
                        }
                    }
                }
                i += 1;
            }
        }
    });
    problem.map_or(Ok(()), Err)
}

/// Instantiate a compiled template with an invocation's arguments.
fn substitute(template: &[Fragment], args: &[Argument]) -> Vec<Fragment> {
    let mut out = Vec::with_capacity(template.len());
    for frag in template {
        match frag {
            Fragment::Text { text } => splice_text(text, args, &mut out),
            Fragment::Macro(m) => {
                let mut m = m.clone();
                substitute_args(&mut m.args, args);
                out.push(Fragment::Macro(m));
            }
            Fragment::Environment(e) => {
                let mut e = e.clone();
                substitute_args(&mut e.args, args);
                e.body = substitute(&e.body, args);
                out.push(Fragment::Environment(e));
            }
            Fragment::Group { body } => out.push(Fragment::Group {
                body: substitute(body, args),
            }),
            Fragment::Math(m) => out.push(Fragment::Math(MathSpan {
                open: m.open.clone(),
                body: m
                    .body
                    .iter()
                    .map(|f| match f {
                        Fragment::Text { text } => Fragment::text(replace_rendered(text, args)),
                        other => other.clone(),
                    })
                    .collect(),
                close: m.close.clone(),
            })),
            Fragment::Include(_) => out.push(frag.clone()),
        }
    }
    out
}

fn substitute_args(template_args: &mut [Argument], args: &[Argument]) {
    for arg in template_args {
        if let Some(body) = arg.body_mut() {
            let replaced = substitute(body, args);
            *body = replaced;
        }
    }
}

/// Split text at `#n`, splicing argument `n`'s fragments in between.
fn splice_text(text: &str, args: &[Argument], out: &mut Vec<Fragment>) {
    let mut literal = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '#' {
            literal.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('#') => {
                chars.next();
                literal.push('#');
            }
            Some(d @ '1'..='9') => {
                chars.next();
                if !literal.is_empty() {
                    out.push(Fragment::text(std::mem::take(&mut literal)));
                }
                if let Some(arg) = args.get(placeholder_index(d)) {
                    match arg {
                        Argument::Required(body) | Argument::Optional(body) => out.extend(body.iter().cloned()),
                        Argument::Verbatim(raw) => out.push(Fragment::text(raw.clone())),
                    }
                }
            }
            _ => literal.push('#'),
        }
    }
    if !literal.is_empty() {
        out.push(Fragment::text(literal));
    }
}

/// Inside math the argument goes in as rendered source text.
fn replace_rendered(text: &str, args: &[Argument]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '#' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('#') => {
                chars.next();
                out.push('#');
            }
            Some(d @ '1'..='9') => {
                chars.next();
                if let Some(arg) = args.get(placeholder_index(d)) {
                    out.push_str(&render_argument_body(arg));
                }
            }
            _ => out.push('#'),
        }
    }
    out
}

fn placeholder_index(digit: char) -> usize {
    (digit as u8 - b'1') as usize
}
