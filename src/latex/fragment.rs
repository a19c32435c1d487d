//! The fragment tree every pipeline stage reads and rewrites.
//!
//! A parsed file is an ordered `Vec<Fragment>`. Each fragment is owned by
//! exactly one parent sequence, so the tree needs no shared or back
//! references. Rendering a freshly parsed tree reproduces the source
//! byte-for-byte; stages that leave a fragment alone therefore leave its text
//! alone too.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Smallest unit of parsed document content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fragment {
    /// Plain text, including whitespace, comments and control words the
    /// parser treats as inert (`\verb`).
    Text { text: String },
    /// `\name*[opt]{req}...`
    Macro(MacroInvocation),
    /// `\begin{name}[args]...\end{name}`
    Environment(EnvironmentBlock),
    /// `\input{..}`, `\include{..}` and friends.
    Include(IncludeDirective),
    /// `$..$`, `$$..$$`, `\(..\)`, `\[..\]` or a display-math environment.
    /// Opaque to stripping and environment normalisation.
    Math(MathSpan),
    /// A bare brace group `{...}`.
    Group { body: Vec<Fragment> },
}

impl Fragment {
    pub fn text(s: impl Into<String>) -> Self {
        Fragment::Text { text: s.into() }
    }

    pub fn as_macro(&self) -> Option<&MacroInvocation> {
        match self {
            Fragment::Macro(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_environment(&self) -> Option<&EnvironmentBlock> {
        match self {
            Fragment::Environment(e) => Some(e),
            _ => None,
        }
    }

    /// Text that would be read as part of a preceding control word.
    fn starts_with_letter(&self) -> bool {
        match self {
            Fragment::Text { text } => text.bytes().next().is_some_and(|b| b.is_ascii_alphabetic() || b == b'@'),
            _ => false,
        }
    }
}

/// A macro call with its adjacent arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroInvocation {
    /// Control word without the backslash (`section`) or a control symbol (`\\`, `%`).
    pub name: String,
    pub starred: bool,
    pub args: Vec<Argument>,
}

impl MacroInvocation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            starred: false,
            args: Vec::new(),
        }
    }

    /// A control word with nothing after it; letters rendered next to it
    /// would extend its name.
    pub fn is_bare_control_word(&self) -> bool {
        !self.starred
            && self.args.is_empty()
            && !self.name.is_empty()
            && self.name.bytes().all(|b| b.is_ascii_alphabetic() || b == b'@')
    }

    /// Body of the `index`-th required argument.
    pub fn required(&self, index: usize) -> Option<&[Fragment]> {
        self.args
            .iter()
            .filter_map(|a| match a {
                Argument::Required(body) => Some(body.as_slice()),
                _ => None,
            })
            .nth(index)
    }

    /// Body of the `index`-th optional argument.
    pub fn optional(&self, index: usize) -> Option<&[Fragment]> {
        self.args
            .iter()
            .filter_map(|a| match a {
                Argument::Optional(body) => Some(body.as_slice()),
                _ => None,
            })
            .nth(index)
    }
}

/// One argument group following a macro or `\begin{..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Argument {
    /// `{...}`
    Required(Vec<Fragment>),
    /// `[...]`
    Optional(Vec<Fragment>),
    /// Raw source (definition bodies), rendered as-is with its own delimiters.
    Verbatim(String),
}

impl Argument {
    pub fn body(&self) -> Option<&[Fragment]> {
        match self {
            Argument::Required(b) | Argument::Optional(b) => Some(b),
            Argument::Verbatim(_) => None,
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut Vec<Fragment>> {
        match self {
            Argument::Required(b) | Argument::Optional(b) => Some(b),
            Argument::Verbatim(_) => None,
        }
    }
}

/// `\begin{name}` ... `\end{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentBlock {
    /// Environment name, including a trailing `*` (`figure*`).
    pub name: String,
    /// Arguments directly after `\begin{name}`.
    pub args: Vec<Argument>,
    pub body: Vec<Fragment>,
}

/// Whether an include keeps the surrounding paragraph or breaks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncludeKind {
    /// `\input`, `\subfile`, `\import`, `\subimport`: spliced in place.
    Input,
    /// `\include`: a paragraph boundary before and after.
    Include,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeDirective {
    pub kind: IncludeKind,
    /// Target path as written (directory and file joined for `\import`).
    pub target: String,
    /// The directive's source text, emitted unchanged when left unresolved.
    pub raw: String,
}

/// A math span. The body only ever holds `Text` and `Include` fragments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MathSpan {
    /// Opening delimiter as written: `$`, `$$`, `\(`, `\[` or `\begin{align*}`.
    pub open: String,
    pub body: Vec<Fragment>,
    pub close: String,
}

/// A parsed source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentNode {
    /// Path inside the source tree of the file this node was parsed from
    /// (the entry file once includes are resolved).
    pub path: String,
    pub fragments: Vec<Fragment>,
}

impl DocumentNode {
    pub fn new(path: impl Into<String>, fragments: Vec<Fragment>) -> Self {
        Self {
            path: path.into(),
            fragments,
        }
    }

    pub fn render(&self) -> String {
        render(&self.fragments)
    }
}

/// The final single-document artefact handed to the Render Backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    pub fragments: Vec<Fragment>,
}

impl NormalizedDocument {
    pub fn render(&self) -> String {
        render(&self.fragments)
    }

    /// Count of include directives still present (absent targets under the
    /// keep policy).
    pub fn unresolved_includes(&self) -> usize {
        let mut n = 0;
        visit(&self.fragments, &mut |f| {
            if matches!(f, Fragment::Include(_)) {
                n += 1;
            }
        });
        n
    }

    /// Does any macro fragment (outside math) carry this name?
    pub fn contains_macro(&self, name: &str) -> bool {
        let mut found = false;
        visit(&self.fragments, &mut |f| {
            if let Fragment::Macro(m) = f {
                found |= m.name == name;
            }
        });
        found
    }

    /// Does any environment fragment carry this name?
    pub fn contains_environment(&self, name: &str) -> bool {
        let mut found = false;
        visit(&self.fragments, &mut |f| {
            if let Fragment::Environment(e) = f {
                found |= e.name == name;
            }
        });
        found
    }
}

// ── Traversal ────────────────────────────────────────────────────────────

/// Pre-order walk over every fragment, descending into arguments, groups,
/// environment bodies and math bodies.
pub fn visit<'a, F>(fragments: &'a [Fragment], f: &mut F)
where
    F: FnMut(&'a Fragment),
{
    for frag in fragments {
        f(frag);
        match frag {
            Fragment::Macro(m) => {
                for arg in &m.args {
                    if let Some(body) = arg.body() {
                        visit(body, f);
                    }
                }
            }
            Fragment::Environment(e) => {
                for arg in &e.args {
                    if let Some(body) = arg.body() {
                        visit(body, f);
                    }
                }
                visit(&e.body, f);
            }
            Fragment::Group { body } => visit(body, f),
            Fragment::Math(m) => visit(&m.body, f),
            Fragment::Text { .. } | Fragment::Include(_) => {}
        }
    }
}

// ── Rendering ────────────────────────────────────────────────────────────

/// Render fragments back to LaTeX source.
pub fn render(fragments: &[Fragment]) -> String {
    let mut out = String::new();
    render_into(&mut out, fragments);
    out
}

pub fn render_into(out: &mut String, fragments: &[Fragment]) {
    for (i, frag) in fragments.iter().enumerate() {
        match frag {
            Fragment::Text { text } => out.push_str(text),
            Fragment::Macro(m) => {
                out.push('\\');
                out.push_str(&m.name);
                if m.starred {
                    out.push('*');
                }
                render_args(out, &m.args);
                if m.is_bare_control_word() && fragments.get(i + 1).is_some_and(Fragment::starts_with_letter) {
                    out.push(' ');
                }
            }
            Fragment::Environment(e) => {
                let _ = write!(out, "\\begin{{{}}}", e.name);
                render_args(out, &e.args);
                render_into(out, &e.body);
                let _ = write!(out, "\\end{{{}}}", e.name);
            }
            Fragment::Include(inc) => out.push_str(&inc.raw),
            Fragment::Math(m) => {
                out.push_str(&m.open);
                render_into(out, &m.body);
                out.push_str(&m.close);
            }
            Fragment::Group { body } => {
                out.push('{');
                render_into(out, body);
                out.push('}');
            }
        }
    }
}

fn render_args(out: &mut String, args: &[Argument]) {
    for arg in args {
        match arg {
            Argument::Required(body) => {
                out.push('{');
                render_into(out, body);
                out.push('}');
            }
            Argument::Optional(body) => {
                out.push('[');
                render_into(out, body);
                out.push(']');
            }
            Argument::Verbatim(raw) => out.push_str(raw),
        }
    }
}

/// Render an argument's content without its delimiters.
pub fn render_argument_body(arg: &Argument) -> String {
    match arg {
        Argument::Required(b) | Argument::Optional(b) => render(b),
        Argument::Verbatim(raw) => raw.clone(),
    }
}

/// Concatenate adjacent `Text` fragments in place.
pub fn coalesce_text(fragments: &mut Vec<Fragment>) {
    let mut out: Vec<Fragment> = Vec::with_capacity(fragments.len());
    for frag in fragments.drain(..) {
        match (out.last_mut(), frag) {
            (Some(Fragment::Text { text: prev }), Fragment::Text { text }) => prev.push_str(&text),
            (_, Fragment::Text { text }) if text.is_empty() => {}
            (_, frag) => out.push(frag),
        }
    }
    *fragments = out;
}
