//! Byte-exact LaTeX fragment parser.
//!
//! This is not a TeX engine: catcodes are fixed, macros are never expanded
//! and arity is unknown. Arguments are the `{..}`/`[..]` groups *directly*
//! adjacent to a control word; an optional group that fails to close is
//! re-read as plain text. Structure the Render Backend depends on is checked
//! strictly: a stray `}`, an `\end` that does not match its `\begin`, an
//! unterminated argument or math span is [`Tex2EpubError::MalformedSource`].
//!
//! Three regions are read raw, never tokenised:
//! - math spans (only `\input{..}` is recognised inside them),
//! - verbatim-like environments and `\verb`/`\lstinline`/`\url`,
//! - the bodies of definition commands (`\newcommand`, `\def`, …), which
//!   routinely hold half an environment.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Tex2EpubError;
use crate::latex::fragment::{
    Argument, EnvironmentBlock, Fragment, IncludeDirective, IncludeKind, MacroInvocation, MathSpan,
};

/// Environments whose body is display math.
pub const MATH_ENVIRONMENTS: &[&str] = &[
    "equation", "equation*", "align", "align*", "alignat", "alignat*", "gather", "gather*",
    "multline", "multline*", "flalign", "flalign*", "eqnarray", "eqnarray*", "displaymath",
    "math", "dmath", "dmath*",
];

/// Environments whose body is copied without tokenising.
pub const VERBATIM_ENVIRONMENTS: &[&str] = &[
    "verbatim", "verbatim*", "Verbatim", "Verbatim*", "BVerbatim", "LVerbatim", "lstlisting",
    "minted", "comment", "filecontents", "filecontents*",
];

/// LaTeX-style definitions: every adjacent group is kept raw.
const DEFINITION_MACROS: &[&str] = &[
    "newcommand", "renewcommand", "providecommand", "DeclareRobustCommand", "newenvironment",
    "renewenvironment", "NewDocumentCommand", "RenewDocumentCommand", "ProvideDocumentCommand",
    "DeclareDocumentCommand", "NewDocumentEnvironment", "RenewDocumentEnvironment",
    "DeclareMathOperator", "newrobustcmd", "renewrobustcmd", "newcommandx", "renewcommandx",
    "newtcolorbox", "renewtcolorbox", "newmdenv", "lstnewenvironment", "DeclareFloatingEnvironment",
    "algnewcommand", "algrenewcommand",
];

/// TeX primitives `\def\name<params>{body}`.
const TEX_DEFINITIONS: &[&str] = &["def", "gdef", "edef", "xdef"];

/// TeX primitives followed by unbraced glue (`\vskip 0.1in plus 1fil`).
const GLUE_PRIMITIVES: &[&str] = &["vskip", "hskip"];

static GLUE: Lazy<Regex> = Lazy::new(|| {
    let number = r"[-+]?[ \t]*(?:\d+(?:\.\d*)?|\.\d+)";
    let unit = r"(?:pt|in|em|ex|cm|mm|bp|pc|sp|dd|cc|mu|fil{1,3})";
    let register = r"\\[A-Za-z@]+";
    let amount = format!(r"(?:{number}[ \t]*{unit}|(?:{number}[ \t]*)?{register})");
    Regex::new(&format!(r"^[ \t]*{amount}(?:[ \t]+(?:plus|minus)[ \t]+{amount})*")).unwrap()
});

/// Macros whose first argument is a URL or path (may hold `%`, `#`, `~`).
const RAW_FIRST_ARGUMENT: &[&str] = &["url", "href", "path", "nolinkurl"];

/// Deepest group, argument, environment or math nesting accepted, counted
/// across spliced files.
pub const MAX_NESTING: usize = 256;

/// Parse a whole file into fragments.
pub fn parse(path: &str, src: &str) -> Result<Vec<Fragment>, Tex2EpubError> {
    parse_nested(path, src, 0)
}

/// Parse a file that is being spliced into a math span: only `\input{..}`
/// is structural, everything else stays text.
pub fn parse_math_content(path: &str, src: &str) -> Result<Vec<Fragment>, Tex2EpubError> {
    parse_math_content_nested(path, src, 0)
}

/// [`parse`] for a file spliced in `depth` levels below the top of the
/// including document.
pub fn parse_nested(path: &str, src: &str, depth: usize) -> Result<Vec<Fragment>, Tex2EpubError> {
    let mut p = Parser::new(path, src, depth);
    p.parse_sequence(&Stop::Eof)
}

/// [`parse_math_content`] for a file spliced in `depth` levels down.
pub fn parse_math_content_nested(path: &str, src: &str, depth: usize) -> Result<Vec<Fragment>, Tex2EpubError> {
    let mut p = Parser::new(path, src, depth);
    p.math_body(None, "")
}

/// What ends the sequence currently being parsed.
#[derive(Debug)]
enum Stop {
    Eof,
    Brace,
    Bracket,
    End(String),
}

struct Parser<'a> {
    path: &'a str,
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
    /// Set once [`MAX_NESTING`] is hit; the error must not be swallowed
    /// by an optional-argument retry.
    too_deep: bool,
    /// Offsets of `[` already known not to open a closed optional argument.
    failed_optionals: HashSet<usize>,
}

impl<'a> Parser<'a> {
    fn new(path: &'a str, src: &'a str, depth: usize) -> Self {
        Self {
            path,
            src,
            bytes: src.as_bytes(),
            pos: 0,
            depth,
            too_deep: false,
            failed_optionals: HashSet::new(),
        }
    }

    fn descend(&mut self) -> Result<(), Tex2EpubError> {
        if self.depth >= MAX_NESTING {
            self.too_deep = true;
            return Err(self.malformed(self.pos, None, "nesting too deep"));
        }
        self.depth += 1;
        Ok(())
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn rest(&self) -> &'a str {
        let src = self.src;
        &src[self.pos..]
    }

    /// Byte-level prefix test; safe at any offset.
    fn at(&self, s: &str) -> bool {
        self.bytes[self.pos..].starts_with(s.as_bytes())
    }

    fn line_at(&self, offset: usize) -> usize {
        self.bytes[..offset.min(self.bytes.len())]
            .iter()
            .filter(|&&b| b == b'\n')
            .count()
            + 1
    }

    fn malformed(&self, at: usize, name: Option<&str>, detail: impl Into<String>) -> Tex2EpubError {
        Tex2EpubError::MalformedSource {
            path: self.path.to_string(),
            line: self.line_at(at),
            name: name.map(str::to_string),
            detail: detail.into(),
        }
    }

    /// Advance past a `%` comment, including its newline.
    fn skip_comment(&mut self) {
        match self.src[self.pos..].find('\n') {
            Some(i) => self.pos += i + 1,
            None => self.pos = self.bytes.len(),
        }
    }

    /// Advance past one (possibly multi-byte) character.
    fn bump_char(&mut self) {
        let len = self.rest().chars().next().map_or(1, char::len_utf8);
        self.pos += len;
    }

    // ── Text mode ────────────────────────────────────────────────────────

    fn parse_sequence(&mut self, stop: &Stop) -> Result<Vec<Fragment>, Tex2EpubError> {
        self.descend()?;
        let parsed = self.sequence_body(stop);
        self.depth -= 1;
        parsed
    }

    fn sequence_body(&mut self, stop: &Stop) -> Result<Vec<Fragment>, Tex2EpubError> {
        let opened_at = self.pos;
        let mut out = Vec::new();
        let mut text_start = self.pos;

        loop {
            let Some(b) = self.peek() else {
                flush(&mut out, &self.src[text_start..self.pos]);
                return match stop {
                    Stop::Eof => Ok(out),
                    Stop::Brace => Err(self.malformed(
                        opened_at,
                        None,
                        "unterminated `{` group or argument",
                    )),
                    Stop::Bracket => Err(self.malformed(
                        opened_at,
                        None,
                        "unterminated `[` optional argument",
                    )),
                    Stop::End(name) => Err(self.malformed(
                        opened_at,
                        Some(name.as_str()),
                        format!("\\begin{{{name}}} is never closed"),
                    )),
                };
            };

            match b {
                b'\\' => {
                    flush(&mut out, &self.src[text_start..self.pos]);
                    if self.control_sequence(&mut out, stop)? {
                        return Ok(out);
                    }
                    text_start = self.pos;
                }
                b'{' => {
                    flush(&mut out, &self.src[text_start..self.pos]);
                    self.pos += 1;
                    let body = self.parse_sequence(&Stop::Brace)?;
                    out.push(Fragment::Group { body });
                    text_start = self.pos;
                }
                b'}' => {
                    if matches!(stop, Stop::Brace) {
                        flush(&mut out, &self.src[text_start..self.pos]);
                        self.pos += 1;
                        return Ok(out);
                    }
                    return Err(self.malformed(self.pos, None, "unbalanced `}`"));
                }
                b']' if matches!(stop, Stop::Bracket) => {
                    flush(&mut out, &self.src[text_start..self.pos]);
                    self.pos += 1;
                    return Ok(out);
                }
                b'$' => {
                    flush(&mut out, &self.src[text_start..self.pos]);
                    let open = if self.at("$$") { "$$" } else { "$" };
                    self.pos += open.len();
                    let body = self.math_body(Some(open), open)?;
                    out.push(Fragment::Math(MathSpan {
                        open: open.to_string(),
                        body,
                        close: open.to_string(),
                    }));
                    text_start = self.pos;
                }
                b'%' => self.skip_comment(),
                _ => self.pos += 1,
            }
        }
    }

    /// Handle a `\...` at `self.pos`. Returns `true` when it closed the
    /// environment named by `stop`.
    fn control_sequence(&mut self, out: &mut Vec<Fragment>, stop: &Stop) -> Result<bool, Tex2EpubError> {
        let src = self.src;
        let start = self.pos;
        self.pos += 1;

        let Some(first) = self.peek() else {
            out.push(Fragment::text("\\"));
            return Ok(false);
        };

        let name: &'a str = if is_letter(first) {
            let name_start = self.pos;
            while self.peek().is_some_and(is_letter) {
                self.pos += 1;
            }
            &src[name_start..self.pos]
        } else {
            let name_start = self.pos;
            self.bump_char();
            &src[name_start..self.pos]
        };

        match name {
            "(" => {
                let body = self.math_body(Some("\\)"), "\\(")?;
                out.push(math("\\(", body, "\\)"));
            }
            "[" => {
                let body = self.math_body(Some("\\]"), "\\[")?;
                out.push(math("\\[", body, "\\]"));
            }
            "begin" if self.peek() == Some(b'{') => self.begin_environment(out, start)?,
            "end" if self.peek() == Some(b'{') => {
                let env = self.braced_name()?;
                return match stop {
                    Stop::End(open) if *open == env => Ok(true),
                    Stop::End(open) => Err(self.malformed(
                        start,
                        Some(env.as_str()),
                        format!("\\end{{{env}}} does not match \\begin{{{open}}}"),
                    )),
                    _ => Err(self.malformed(
                        start,
                        Some(env.as_str()),
                        format!("\\end{{{env}}} without a matching \\begin"),
                    )),
                };
            }
            "verb" | "lstinline" => self.inline_verbatim(out, start, name)?,
            "input" | "include" | "subfile" => self.single_include(out, start, name)?,
            "import" | "subimport" | "inputfrom" | "subinputfrom" | "includefrom" | "subincludefrom" => {
                self.two_part_include(out, start, name)?
            }
            n if TEX_DEFINITIONS.contains(&n) => self.tex_definition(out, start, n)?,
            n if DEFINITION_MACROS.contains(&n) => {
                let starred = self.eat(b'*');
                let raw_start = self.pos;
                self.raw_definition_groups()?;
                let mut invocation = MacroInvocation::new(n);
                invocation.starred = starred;
                if self.pos > raw_start {
                    invocation
                        .args
                        .push(Argument::Verbatim(self.src[raw_start..self.pos].to_string()));
                }
                out.push(Fragment::Macro(invocation));
            }
            n if GLUE_PRIMITIVES.contains(&n) && GLUE.is_match(self.rest()) => {
                let glue_len = GLUE.find(self.rest()).map_or(0, |g| g.end());
                let mut invocation = MacroInvocation::new(n);
                invocation
                    .args
                    .push(Argument::Verbatim(self.src[self.pos..self.pos + glue_len].to_string()));
                self.pos += glue_len;
                out.push(Fragment::Macro(invocation));
            }
            n => {
                let word = is_letter(first);
                let starred = (word || n == "\\") && self.eat(b'*');
                let args = if word {
                    self.arguments(RAW_FIRST_ARGUMENT.contains(&n))?
                } else if n == "\\" {
                    self.optional_arguments_only()?
                } else {
                    Vec::new()
                };
                out.push(Fragment::Macro(MacroInvocation {
                    name: n.to_string(),
                    starred,
                    args,
                }));
            }
        }
        Ok(false)
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Adjacent `{..}` / `[..]` groups.
    fn arguments(&mut self, first_raw: bool) -> Result<Vec<Argument>, Tex2EpubError> {
        let mut args = Vec::new();
        loop {
            match self.peek() {
                Some(b'{') if first_raw && args.is_empty() => {
                    let open = self.pos;
                    self.pos += 1;
                    let inner_start = self.pos;
                    self.skip_balanced_url(open)?;
                    let inner = &self.src[inner_start..self.pos - 1];
                    args.push(Argument::Required(vec![Fragment::text(inner)]));
                }
                Some(b'{') => {
                    self.pos += 1;
                    args.push(Argument::Required(self.parse_sequence(&Stop::Brace)?));
                }
                Some(b'[') => match self.try_optional()? {
                    Some(body) => args.push(Argument::Optional(body)),
                    None => break,
                },
                _ => break,
            }
        }
        Ok(args)
    }

    fn optional_arguments_only(&mut self) -> Result<Vec<Argument>, Tex2EpubError> {
        let mut args = Vec::new();
        while self.peek() == Some(b'[') {
            match self.try_optional()? {
                Some(body) => args.push(Argument::Optional(body)),
                None => break,
            }
        }
        Ok(args)
    }

    /// Parse `[..]`; on failure rewind so the bracket is read as text.
    fn try_optional(&mut self) -> Result<Option<Vec<Fragment>>, Tex2EpubError> {
        let save = self.pos;
        if self.failed_optionals.contains(&save) {
            return Ok(None);
        }
        self.pos += 1;
        match self.parse_sequence(&Stop::Bracket) {
            Ok(body) => Ok(Some(body)),
            Err(e) if self.too_deep => Err(e),
            Err(_) => {
                self.failed_optionals.insert(save);
                self.pos = save;
                Ok(None)
            }
        }
    }

    /// `{name}` with no nesting; returns the name.
    fn braced_name(&mut self) -> Result<String, Tex2EpubError> {
        let open = self.pos;
        self.pos += 1;
        match self.rest().find(['}', '\n']) {
            Some(i) if self.rest().as_bytes()[i] == b'}' => {
                let name = self.src[self.pos..self.pos + i].trim().to_string();
                self.pos += i + 1;
                Ok(name)
            }
            _ => Err(self.malformed(open, None, "unterminated environment name")),
        }
    }

    fn begin_environment(&mut self, out: &mut Vec<Fragment>, start: usize) -> Result<(), Tex2EpubError> {
        let name = self.braced_name()?;

        if MATH_ENVIRONMENTS.contains(&name.as_str()) {
            let open = self.src[start..self.pos].to_string();
            let close = format!("\\end{{{name}}}");
            let body = self.math_body(Some(close.as_str()), &open)?;
            out.push(math(&open, body, &close));
            return Ok(());
        }

        if VERBATIM_ENVIRONMENTS.contains(&name.as_str()) {
            let close = format!("\\end{{{name}}}");
            let Some(i) = self.rest().find(&close) else {
                return Err(self.malformed(start, Some(name.as_str()), format!("\\begin{{{name}}} is never closed")));
            };
            let raw = &self.src[self.pos..self.pos + i];
            self.pos += i + close.len();
            out.push(Fragment::Environment(EnvironmentBlock {
                name,
                args: Vec::new(),
                body: vec![Fragment::text(raw)],
            }));
            return Ok(());
        }

        let args = self.arguments(false)?;
        let body = self.parse_sequence(&Stop::End(name.clone()))?;
        out.push(Fragment::Environment(EnvironmentBlock { name, args, body }));
        Ok(())
    }

    fn inline_verbatim(&mut self, out: &mut Vec<Fragment>, start: usize, name: &str) -> Result<(), Tex2EpubError> {
        let starred = self.eat(b'*');
        if name == "lstinline" && self.peek() == Some(b'[') {
            let open = self.pos;
            self.pos += 1;
            self.skip_balanced_raw(b'[', b']', open)?;
        }
        match self.peek() {
            Some(b'{') if name == "lstinline" => {
                let open = self.pos;
                self.pos += 1;
                self.skip_balanced_raw(b'{', b'}', open)?;
            }
            Some(d) if d.is_ascii() && !d.is_ascii_whitespace() && !is_letter(d) => {
                self.pos += 1;
                let line_end = self.rest().find('\n').unwrap_or(self.rest().len());
                match self.rest()[..line_end].find(d as char) {
                    Some(i) => self.pos += i + 1,
                    None => {
                        return Err(self.malformed(start, Some(name), format!("unterminated \\{name}")));
                    }
                }
            }
            _ => {
                let mut invocation = MacroInvocation::new(name);
                invocation.starred = starred;
                out.push(Fragment::Macro(invocation));
                return Ok(());
            }
        }
        out.push(Fragment::text(&self.src[start..self.pos]));
        Ok(())
    }

    fn single_include(&mut self, out: &mut Vec<Fragment>, start: usize, name: &str) -> Result<(), Tex2EpubError> {
        let kind = if name == "include" { IncludeKind::Include } else { IncludeKind::Input };
        let target = match self.peek() {
            Some(b'{') => {
                let open = self.pos;
                self.pos += 1;
                let inner_start = self.pos;
                self.skip_balanced_raw(b'{', b'}', open)?;
                self.src[inner_start..self.pos - 1].to_string()
            }
            // TeX primitive form: `\input file.tex`
            Some(b' ') if name == "input" => {
                let save = self.pos;
                while self.peek() == Some(b' ') {
                    self.pos += 1;
                }
                let file_start = self.pos;
                while self
                    .peek()
                    .is_some_and(|b| !b.is_ascii_whitespace() && !matches!(b, b'{' | b'}' | b'%' | b'\\'))
                {
                    self.pos += 1;
                }
                if self.pos == file_start {
                    self.pos = save;
                    out.push(Fragment::Macro(MacroInvocation::new(name)));
                    return Ok(());
                }
                self.src[file_start..self.pos].to_string()
            }
            _ => {
                out.push(Fragment::Macro(MacroInvocation::new(name)));
                return Ok(());
            }
        };
        out.push(Fragment::Include(IncludeDirective {
            kind,
            target: clean_target(&target),
            raw: self.src[start..self.pos].to_string(),
        }));
        Ok(())
    }

    fn two_part_include(&mut self, out: &mut Vec<Fragment>, start: usize, name: &str) -> Result<(), Tex2EpubError> {
        self.eat(b'*');
        let mut parts = Vec::with_capacity(2);
        for _ in 0..2 {
            if self.peek() != Some(b'{') {
                self.pos = start + 1 + name.len();
                out.push(Fragment::Macro(MacroInvocation::new(name)));
                return Ok(());
            }
            let open = self.pos;
            self.pos += 1;
            let inner_start = self.pos;
            self.skip_balanced_raw(b'{', b'}', open)?;
            parts.push(clean_target(&self.src[inner_start..self.pos - 1]));
        }
        let dir = parts[0].trim_end_matches('/');
        let target = if dir.is_empty() {
            parts[1].clone()
        } else {
            format!("{dir}/{}", parts[1])
        };
        let kind = if name.contains("include") { IncludeKind::Include } else { IncludeKind::Input };
        out.push(Fragment::Include(IncludeDirective {
            kind,
            target,
            raw: self.src[start..self.pos].to_string(),
        }));
        Ok(())
    }

    /// `\def\name#1#2{body}`, kept as one raw argument.
    fn tex_definition(&mut self, out: &mut Vec<Fragment>, start: usize, name: &str) -> Result<(), Tex2EpubError> {
        let raw_start = self.pos;
        match self.rest().find('{') {
            Some(i) => {
                self.pos += i;
                let open = self.pos;
                self.pos += 1;
                self.skip_balanced_raw(b'{', b'}', open)?;
            }
            None => {
                return Err(self.malformed(start, Some(name), format!("\\{name} without a body")));
            }
        }
        let mut invocation = MacroInvocation::new(name);
        invocation
            .args
            .push(Argument::Verbatim(self.src[raw_start..self.pos].to_string()));
        out.push(Fragment::Macro(invocation));
        Ok(())
    }

    /// Consume a control-sequence name and adjacent groups, all raw.
    fn raw_definition_groups(&mut self) -> Result<(), Tex2EpubError> {
        if self.peek() == Some(b'\\') {
            self.pos += 1;
            if self.peek().is_some_and(is_letter) {
                while self.peek().is_some_and(is_letter) {
                    self.pos += 1;
                }
            } else if self.peek().is_some() {
                self.bump_char();
            }
        }
        loop {
            match self.peek() {
                Some(b'{') => {
                    let open = self.pos;
                    self.pos += 1;
                    self.skip_balanced_raw(b'{', b'}', open)?;
                }
                Some(b'[') => {
                    let open = self.pos;
                    self.pos += 1;
                    self.skip_balanced_raw(b'[', b']', open)?;
                }
                _ => return Ok(()),
            }
        }
    }

    /// Skip to just past the `close` matching an already-consumed `open`.
    /// Braces nest; escaped delimiters and comments are skipped.
    fn skip_balanced_raw(&mut self, open: u8, close: u8, opened_at: usize) -> Result<(), Tex2EpubError> {
        self.skip_balanced(open, close, opened_at, true)
    }

    /// Like [`Self::skip_balanced_raw`], but `%` is an ordinary character (URLs).
    fn skip_balanced_url(&mut self, opened_at: usize) -> Result<(), Tex2EpubError> {
        self.skip_balanced(b'{', b'}', opened_at, false)
    }

    fn skip_balanced(&mut self, open: u8, close: u8, opened_at: usize, comments: bool) -> Result<(), Tex2EpubError> {
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            match b {
                b'\\' => {
                    self.pos += 1;
                    if self.peek().is_some() {
                        self.bump_char();
                    }
                }
                b'%' if comments => self.skip_comment(),
                b'{' => {
                    depth += 1;
                    self.pos += 1;
                }
                b'}' if close == b'}' && depth == 0 => {
                    self.pos += 1;
                    return Ok(());
                }
                b'}' => {
                    depth = depth.saturating_sub(1);
                    self.pos += 1;
                }
                b if b == close && depth == 0 => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => self.pos += 1,
            }
        }
        Err(self.malformed(
            opened_at,
            None,
            format!("unterminated `{}` group", open as char),
        ))
    }

    // ── Math mode ────────────────────────────────────────────────────────

    /// Read a math body up to `close` (or EOF when `close` is `None`).
    /// Only `\input{..}` becomes structure.
    fn math_body(&mut self, close: Option<&str>, open: &str) -> Result<Vec<Fragment>, Tex2EpubError> {
        self.descend()?;
        let parsed = self.math_body_inner(close, open);
        self.depth -= 1;
        parsed
    }

    fn math_body_inner(&mut self, close: Option<&str>, open: &str) -> Result<Vec<Fragment>, Tex2EpubError> {
        let opened_at = self.pos.saturating_sub(open.len());
        let dollar = close.is_some_and(|c| c.starts_with('$'));
        let mut out = Vec::new();
        let mut text_start = self.pos;
        let mut depth = 0usize;

        loop {
            if let Some(close) = close {
                if self.at(close) && (depth == 0 || !dollar) {
                    flush(&mut out, &self.src[text_start..self.pos]);
                    self.pos += close.len();
                    return Ok(out);
                }
            }
            let Some(b) = self.peek() else {
                flush(&mut out, &self.src[text_start..self.pos]);
                return match close {
                    None => Ok(out),
                    Some(_) => Err(self.malformed(
                        opened_at,
                        None,
                        format!("math span opened with `{open}` is never closed"),
                    )),
                };
            };
            match b {
                b'\\' if self.at("\\input{") => {
                    flush(&mut out, &self.src[text_start..self.pos]);
                    let start = self.pos;
                    self.pos += "\\input".len();
                    self.single_include(&mut out, start, "input")?;
                    text_start = self.pos;
                }
                b'\\' => {
                    self.pos += 1;
                    if self.peek().is_some() {
                        self.bump_char();
                    }
                }
                b'{' => {
                    depth += 1;
                    self.pos += 1;
                }
                b'}' => {
                    depth = depth.saturating_sub(1);
                    self.pos += 1;
                }
                b'%' => self.skip_comment(),
                _ => self.pos += 1,
            }
        }
    }
}

fn is_letter(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'@'
}

fn flush(out: &mut Vec<Fragment>, text: &str) {
    if !text.is_empty() {
        out.push(Fragment::text(text));
    }
}

fn math(open: &str, body: Vec<Fragment>, close: &str) -> Fragment {
    Fragment::Math(MathSpan {
        open: open.to_string(),
        body,
        close: close.to_string(),
    })
}

fn clean_target(raw: &str) -> String {
    raw.trim().trim_matches('"').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::latex::fragment::render;

    fn roundtrip(src: &str) -> Vec<Fragment> {
        let frags = parse("t.tex", src).expect("parse");
        assert_eq!(render(&frags), src);
        frags
    }

    #[test]
    fn macro_with_adjacent_arguments() {
        let frags = roundtrip("\\icmlauthor{Ada Lovelace}{inst1} rest");
        let m = frags[0].as_macro().unwrap();
        assert_eq!(m.name, "icmlauthor");
        assert_eq!(m.args.len(), 2);
        assert_eq!(frags[1], Fragment::text(" rest"));
    }

    #[test]
    fn space_separates_arguments() {
        let frags = roundtrip("\\centering {\\bf x}");
        assert!(frags[0].as_macro().unwrap().args.is_empty());
        assert!(matches!(frags[2], Fragment::Group { .. }));
    }

    #[test]
    fn starred_section_with_optional() {
        let frags = roundtrip("\\section*[short]{Long}");
        let m = frags[0].as_macro().unwrap();
        assert!(m.starred);
        assert_eq!(render(m.optional(0).unwrap()), "short");
    }

    #[test]
    fn environment_nesting() {
        let frags = roundtrip("\\begin{figure*}[t]\\begin{center}x\\end{center}\\end{figure*}");
        let e = frags[0].as_environment().unwrap();
        assert_eq!(e.name, "figure*");
        assert_eq!(e.args.len(), 1);
        assert_eq!(e.body[0].as_environment().unwrap().name, "center");
    }

    #[test]
    fn inline_and_display_math_are_opaque() {
        let src = "a $x_{1}$ b $$\\sum_i \\frac{1}{i}$$ c \\(y\\) d \\[z\\]";
        let frags = roundtrip(src);
        let maths: Vec<_> = frags
            .iter()
            .filter_map(|f| match f {
                Fragment::Math(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(maths.len(), 4);
        assert_eq!(maths[1].open, "$$");
        assert_eq!(render(&maths[1].body), "\\sum_i \\frac{1}{i}");
    }

    #[test]
    fn dollar_inside_text_macro_in_math() {
        let frags = roundtrip("$a \\text{if $b$} c$ after");
        assert!(matches!(frags[0], Fragment::Math(_)));
        assert_eq!(frags[1], Fragment::text(" after"));
    }

    #[test]
    fn math_environment_is_math_fragment() {
        let frags = roundtrip("\\begin{align*}a &= b \\\\ c &= d\\end{align*}");
        match &frags[0] {
            Fragment::Math(m) => {
                assert_eq!(m.open, "\\begin{align*}");
                assert_eq!(m.close, "\\end{align*}");
            }
            other => panic!("expected math, got {other:?}"),
        }
    }

    #[test]
    fn input_inside_math_is_directive() {
        let frags = roundtrip("$\\input{sym}$");
        match &frags[0] {
            Fragment::Math(m) => assert!(matches!(m.body[0], Fragment::Include(_))),
            other => panic!("expected math, got {other:?}"),
        }
    }

    #[test]
    fn include_directives() {
        let frags = roundtrip("\\input{sections/intro}\n\\include{appendix}\n\\subimport{parts/}{a.tex}");
        let kinds: Vec<_> = frags
            .iter()
            .filter_map(|f| match f {
                Fragment::Include(i) => Some((i.kind, i.target.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                (IncludeKind::Input, "sections/intro".to_string()),
                (IncludeKind::Include, "appendix".to_string()),
                (IncludeKind::Input, "parts/a.tex".to_string()),
            ]
        );
    }

    #[test]
    fn primitive_input_form() {
        let frags = roundtrip("\\input macros.tex\n");
        match &frags[0] {
            Fragment::Include(i) => assert_eq!(i.target, "macros.tex"),
            other => panic!("expected include, got {other:?}"),
        }
    }

    #[test]
    fn comments_hide_structure() {
        let frags = roundtrip("a % \\input{x} } \\end{foo}\nb");
        assert_eq!(frags.len(), 1);
    }

    #[test]
    fn definitions_are_raw() {
        let src = "\\newcommand{\\be}{\\begin{equation}}\n\\def\\ee{\\end{equation}}\n\\renewcommand\\x[1]{#1}";
        let frags = roundtrip(src);
        let defs: Vec<_> = frags.iter().filter_map(Fragment::as_macro).collect();
        assert_eq!(defs.len(), 3);
        assert!(defs.iter().all(|d| matches!(d.args[0], Argument::Verbatim(_))));
    }

    #[test]
    fn verbatim_environment_keeps_braces() {
        let frags = roundtrip("\\begin{verbatim}}{ \\end{itemize} $\\end{verbatim}");
        assert_eq!(frags.len(), 1);
    }

    #[test]
    fn verb_and_url_are_raw() {
        roundtrip("\\verb|}{$| and \\url{http://x.org/%20a#b} and \\href{http://y.org/~z%}{text}");
    }

    #[test]
    fn unclosed_optional_rewinds_to_text() {
        let frags = roundtrip("\\item[ no close\n\nnext");
        assert!(frags[0].as_macro().unwrap().args.is_empty());
    }

    #[test]
    fn line_break_with_spacing() {
        let frags = roundtrip("a\\\\[2pt]b\\\\*c");
        let m = frags[1].as_macro().unwrap();
        assert_eq!(m.name, "\\");
        assert_eq!(m.args.len(), 1);
    }

    #[test]
    fn escaped_specials_are_control_symbols() {
        let frags = roundtrip("100\\% of \\$5 \\{set\\}");
        assert!(frags.iter().filter_map(Fragment::as_macro).all(|m| m.args.is_empty()));
    }

    #[test]
    fn unicode_text_survives() {
        roundtrip("Schrödinger — \\emph{naïve} “quotes” $α$");
    }

    #[test]
    fn unbalanced_close_brace_is_malformed() {
        let err = parse("t.tex", "a }").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedSource);
    }

    #[test]
    fn unclosed_environment_is_malformed() {
        let err = parse("t.tex", "x\n\\begin{itemize}\n\\item a\n").unwrap_err();
        match err {
            Tex2EpubError::MalformedSource { name, line, .. } => {
                assert_eq!(name.as_deref(), Some("itemize"));
                assert_eq!(line, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mismatched_end_is_malformed() {
        let err = parse("t.tex", "\\begin{a}\\end{b}").unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn unterminated_argument_is_malformed() {
        let err = parse("t.tex", "\\title{Never closed").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedSource);
    }

    #[test]
    fn unterminated_math_is_malformed() {
        let err = parse("t.tex", "cost $5 and more").unwrap_err();
        assert!(err.to_string().contains("never closed"));
    }

    #[test]
    fn conditionals_are_inert() {
        let frags = roundtrip("\\ifdefined\\final\\icmlfinal\\else draft\\fi");
        let names: Vec<_> = frags.iter().filter_map(Fragment::as_macro).map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["ifdefined", "final", "icmlfinal", "else", "fi"]);
    }

    #[test]
    fn unclosed_optionals_stay_linear() {
        let src = "\\item[ x ".repeat(200);
        let started = std::time::Instant::now();
        let frags = roundtrip(&src);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(frags.iter().filter_map(Fragment::as_macro).count(), 200);
        assert!(frags.iter().filter_map(Fragment::as_macro).all(|m| m.args.is_empty()));
    }

    #[test]
    fn deep_nesting_is_malformed_not_a_crash() {
        let src = format!("{}x{}", "{".repeat(1000), "}".repeat(1000));
        let err = parse("deep.tex", &src).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedSource);
        assert!(err.to_string().contains("nesting too deep"));

        let math = format!("${}x{}$", "\\frac{".repeat(10), "}".repeat(10));
        roundtrip(&math);
    }

    #[test]
    fn nesting_below_the_cap_is_fine() {
        let src = format!("{}x{}", "{".repeat(MAX_NESTING - 2), "}".repeat(MAX_NESTING - 2));
        roundtrip(&src);
    }

    #[test]
    fn nesting_is_counted_across_spliced_files() {
        let src = format!("{}x{}", "{".repeat(20), "}".repeat(20));
        assert!(parse_nested("part.tex", &src, 10).is_ok());
        let err = parse_nested("part.tex", &src, MAX_NESTING - 5).unwrap_err();
        assert!(err.to_string().contains("part.tex"));
    }

    #[test]
    fn too_deep_optional_is_not_reread_as_text() {
        let src = format!("\\item[{}x{}]", "{".repeat(1000), "}".repeat(1000));
        let err = parse("t.tex", &src).unwrap_err();
        assert!(err.to_string().contains("nesting too deep"));
    }

    #[test]
    fn skip_primitives_take_their_glue() {
        let frags = roundtrip("\\vskip 0.1in plus 1fil\nnext\\hskip-2pt x\\vskip\\baselineskip y");
        let glue: Vec<_> = frags
            .iter()
            .filter_map(Fragment::as_macro)
            .map(|m| (m.name.as_str(), render(&[Fragment::Macro(m.clone())])))
            .collect();
        assert_eq!(
            glue,
            vec![
                ("vskip", "\\vskip 0.1in plus 1fil".to_string()),
                ("hskip", "\\hskip-2pt".to_string()),
                ("vskip", "\\vskip\\baselineskip".to_string()),
            ]
        );

        let bare = roundtrip("\\vskip{1em} and \\hskip words");
        assert!(matches!(bare[0].as_macro().map(|m| &m.args[0]), Some(Argument::Required(_))));
    }

    #[test]
    fn starred_verb_without_delimiter_keeps_its_star() {
        let frags = roundtrip("\\verb*x and more");
        assert!(frags[0].as_macro().is_some_and(|m| m.name == "verb" && m.starred));
    }
}
