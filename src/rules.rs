//! Template identifiers, rule tables and the Template Classifier.
//!
//! Rule tables are plain data. A [`RuleBook`] is an ordered list of
//! [`TemplateProfile`]s, each pairing a [`TemplateSignature`] with a
//! [`MacroTable`] and an [`EnvironmentRuleTable`]. Classification walks the
//! profiles in order and takes the first whose signature matches the
//! preamble; nothing matching means [`Template::Generic`], whose tables are
//! empty, so the rewrite stages become a no-op.
//!
//! All built-in profiles share one cleanup base (spacing, page layout,
//! cleveref, algorithm keywords, float stars). The base also drops preamble
//! styling (`\geometry`, `\titleformat`, `\theoremstyle`, ..) and any
//! `\usepackage` that loads only layout packages, via
//! [`MacroRule::StripIf`]. Every rewrite in a table only
//! produces names that table passes through, which is what makes a second
//! normalisation pass a fixed point.
//!
//! ```text
//!  profile        signature                         adds to the base
//!  ─────────────  ────────────────────────────────  ─────────────────────────────
//!  ICML           package icml*                     icml* header macros, \twocolumn[..]
//!  NeurIPS        package neurips* / nips*          \AND, final-copy switches
//!  ACL_EMNLP      package acl / acl* / emnlp* / ..  \AND, \aclfinalcopy, \titlebox
//!  PlainArticle   class article                     nothing
//!  Generic        (fallback)                        empty tables
//! ```

use crate::error::Tex2EpubError;
use crate::latex::fragment::{render, Fragment, MacroInvocation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

// ── Template ─────────────────────────────────────────────────────────────

/// A known document-class convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Template {
    Icml,
    NeurIps,
    AclEmnlp,
    PlainArticle,
    /// No signature matched: pure passthrough.
    Generic,
    /// A profile loaded from JSON.
    Custom(String),
}

impl Template {
    /// Stable identifier used in JSON tables and on the command line.
    pub fn id(&self) -> &str {
        match self {
            Template::Icml => "icml",
            Template::NeurIps => "neurips",
            Template::AclEmnlp => "acl_emnlp",
            Template::PlainArticle => "plain_article",
            Template::Generic => "generic",
            Template::Custom(name) => name,
        }
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, Template::Generic)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Template::Icml => f.write_str("ICML"),
            Template::NeurIps => f.write_str("NeurIPS"),
            Template::AclEmnlp => f.write_str("ACL_EMNLP"),
            Template::PlainArticle => f.write_str("PlainArticle"),
            Template::Generic => f.write_str("Generic"),
            Template::Custom(name) => f.write_str(name),
        }
    }
}

impl FromStr for Template {
    type Err = Infallible;

    /// Case, `_` and `-` insensitive for the built-ins; anything else is
    /// a custom template name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        Ok(match key.as_str() {
            "icml" => Template::Icml,
            "neurips" | "nips" => Template::NeurIps,
            "aclemnlp" | "acl" | "emnlp" => Template::AclEmnlp,
            "plainarticle" | "article" | "plain" => Template::PlainArticle,
            "generic" => Template::Generic,
            _ => Template::Custom(s.trim().to_string()),
        })
    }
}

impl From<String> for Template {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(t) => t,
            Err(never) => match never {},
        }
    }
}

impl From<Template> for String {
    fn from(t: Template) -> Self {
        t.id().to_string()
    }
}

// ── Rules ────────────────────────────────────────────────────────────────

/// What the Macro Stripper does with one macro name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacroRule {
    /// Remove the invocation and all its arguments.
    Strip,
    /// Replace with a LaTeX template; `#1`..`#9` are the invocation's
    /// arguments in source order, optional ones included.
    Rewrite(String),
    /// Remove the invocation when every comma-separated name in its first
    /// required argument matches one of these patterns (a trailing `*`
    /// matches any suffix); leave it unchanged otherwise.
    #[serde(rename = "strip_if")]
    StripIf(Vec<String>),
    /// Leave unchanged.
    Passthrough,
}

impl MacroRule {
    /// Whether this rule removes `invocation`.
    pub fn strips(&self, invocation: &MacroInvocation) -> bool {
        match self {
            MacroRule::Strip => true,
            MacroRule::StripIf(patterns) => {
                let names = invocation.required(0).map(plain_list).unwrap_or_default();
                !names.is_empty()
                    && names
                        .iter()
                        .all(|name| patterns.iter().any(|p| pattern_matches(p, name)))
            }
            MacroRule::Rewrite(_) | MacroRule::Passthrough => false,
        }
    }
}

/// What the Environment Normalizer does with one environment name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationRule {
    /// New begin/end name, same body. `\begin` arguments are dropped
    /// unless `keep_args` is set.
    Rename {
        to: String,
        #[serde(default)]
        keep_args: bool,
    },
    /// Drop the markers and arguments; splice the body into the parent.
    Unwrap,
    Passthrough,
}

impl NormalizationRule {
    pub fn rename(to: impl Into<String>) -> Self {
        NormalizationRule::Rename {
            to: to.into(),
            keep_args: false,
        }
    }
}

static PASSTHROUGH_MACRO: MacroRule = MacroRule::Passthrough;
static PASSTHROUGH_ENV: NormalizationRule = NormalizationRule::Passthrough;

/// Macro name (no backslash) → rule. A `name*` key applies to the starred
/// form only; a plain key covers both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacroTable(BTreeMap<String, MacroRule>);

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, rule: MacroRule) {
        self.0.insert(name.into(), rule);
    }

    /// Rule for an invocation; unknown names pass through.
    pub fn rule(&self, name: &str, starred: bool) -> &MacroRule {
        if starred {
            if let Some(rule) = self.0.get(&format!("{name}*")) {
                return rule;
            }
        }
        self.0.get(name).unwrap_or(&PASSTHROUGH_MACRO)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MacroRule)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Names whose rule is [`MacroRule::Strip`], star suffix removed.
    pub fn strip_names(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, r)| **r == MacroRule::Strip)
            .map(|(k, _)| k.trim_end_matches('*'))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Environment name (including any `*`) → rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentRuleTable(BTreeMap<String, NormalizationRule>);

impl EnvironmentRuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, rule: NormalizationRule) {
        self.0.insert(name.into(), rule);
    }

    pub fn rule(&self, name: &str) -> &NormalizationRule {
        self.0.get(name).unwrap_or(&PASSTHROUGH_ENV)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NormalizationRule)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Signatures and profiles ──────────────────────────────────────────────

/// Preamble fingerprint. Patterns are lowercase; a trailing `*` matches any
/// suffix. An empty list accepts anything, but a signature with both lists
/// empty never matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSignature {
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub packages: Vec<String>,
}

impl TemplateSignature {
    pub fn matches(&self, class: Option<&str>, packages: &[String]) -> bool {
        if self.classes.is_empty() && self.packages.is_empty() {
            return false;
        }
        let class_ok = self.classes.is_empty()
            || class.is_some_and(|c| self.classes.iter().any(|p| pattern_matches(p, c)));
        let packages_ok = self.packages.is_empty()
            || self
                .packages
                .iter()
                .any(|p| packages.iter().any(|pkg| pattern_matches(p, pkg)));
        class_ok && packages_ok
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

/// One template: how to recognise it and what to rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateProfile {
    pub template: Template,
    pub signature: TemplateSignature,
    #[serde(default)]
    pub macros: MacroTable,
    #[serde(default)]
    pub environments: EnvironmentRuleTable,
}

/// Result of classifying a document's preamble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub template: Template,
    /// Argument of `\documentclass` / `\documentstyle`, if present.
    pub class_name: Option<String>,
    pub class_options: Vec<String>,
    /// Every package named by `\usepackage` / `\RequirePackage`, lowercased.
    pub packages: Vec<String>,
}

// ── RuleBook ─────────────────────────────────────────────────────────────

/// The full configuration surface of the rewrite stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBook {
    pub profiles: Vec<TemplateProfile>,
}

static EMPTY_MACROS: once_cell::sync::Lazy<MacroTable> = once_cell::sync::Lazy::new(MacroTable::new);
static EMPTY_ENVIRONMENTS: once_cell::sync::Lazy<EnvironmentRuleTable> =
    once_cell::sync::Lazy::new(EnvironmentRuleTable::new);

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleImport {
    Book(RuleBook),
    Many(Vec<TemplateProfile>),
    One(Box<TemplateProfile>),
}

impl Default for RuleBook {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RuleBook {
    /// No profiles: everything classifies as Generic.
    pub fn empty() -> Self {
        Self { profiles: Vec::new() }
    }

    /// The built-in ICML, NeurIPS, ACL_EMNLP and PlainArticle profiles.
    pub fn builtin() -> Self {
        Self {
            profiles: vec![icml_profile(), neurips_profile(), acl_profile(), plain_article_profile()],
        }
    }

    pub fn profile(&self, template: &Template) -> Option<&TemplateProfile> {
        if template.is_generic() {
            return None;
        }
        self.profiles.iter().find(|p| p.template == *template)
    }

    /// Macro table for a template; empty for Generic and unknown templates.
    pub fn macros(&self, template: &Template) -> &MacroTable {
        self.profile(template).map_or(&EMPTY_MACROS, |p| &p.macros)
    }

    pub fn environments(&self, template: &Template) -> &EnvironmentRuleTable {
        self.profile(template)
            .map_or(&EMPTY_ENVIRONMENTS, |p| &p.environments)
    }

    /// Templates in classification order, Generic last.
    pub fn templates(&self) -> Vec<Template> {
        let mut out: Vec<Template> = self.profiles.iter().map(|p| p.template.clone()).collect();
        out.push(Template::Generic);
        out
    }

    /// Classify a parsed entry document by its preamble. Pure: reads only.
    pub fn classify(&self, fragments: &[Fragment]) -> Classification {
        let preamble = Preamble::scan(fragments);
        let template = self
            .profiles
            .iter()
            .find(|p| p.signature.matches(preamble.class_name.as_deref(), &preamble.packages))
            .map_or(Template::Generic, |p| p.template.clone());
        debug!(
            "Classified as {} (class {:?}, {} packages)",
            template,
            preamble.class_name,
            preamble.packages.len()
        );
        Classification {
            template,
            class_name: preamble.class_name,
            class_options: preamble.class_options,
            packages: preamble.packages,
        }
    }

    /// Check every profile: rewrite templates must parse and reference
    /// `#1`..`#9` only, rename targets must be plain names, and no profile
    /// may claim the Generic template.
    pub fn validate(&self) -> Result<(), Tex2EpubError> {
        for profile in &self.profiles {
            if profile.template.is_generic() {
                return Err(Tex2EpubError::InvalidConfig(
                    "the generic template is the empty fallback and cannot carry rules".into(),
                ));
            }
            crate::pipeline::strip::MacroStripper::new(&profile.macros)?;
            for (name, rule) in profile.environments.iter() {
                if let NormalizationRule::Rename { to, .. } = rule {
                    if to.is_empty() || to.contains(['{', '}', '\\']) {
                        return Err(Tex2EpubError::InvalidConfig(format!(
                            "{}: environment '{name}' renamed to invalid name '{to}'",
                            profile.template
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Pretty JSON of every profile.
    pub fn to_json(&self) -> Result<String, Tex2EpubError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Tex2EpubError::Internal(format!("rule serialisation: {e}")))
    }

    /// Parse a complete rule book.
    pub fn from_json(json: &str) -> Result<Self, Tex2EpubError> {
        let book: RuleBook = serde_json::from_str(json)
            .map_err(|e| Tex2EpubError::InvalidConfig(format!("rule book: {e}")))?;
        book.validate()?;
        Ok(book)
    }

    /// Add profiles from JSON (a rule book, a list of profiles or a single
    /// profile). New profiles are tried before existing ones and replace any
    /// existing profile for the same template.
    pub fn extend_from_json(&mut self, json: &str) -> Result<(), Tex2EpubError> {
        let import: RuleImport = serde_json::from_str(json)
            .map_err(|e| Tex2EpubError::InvalidConfig(format!("rule profiles: {e}")))?;
        let added = match import {
            RuleImport::Book(book) => book.profiles,
            RuleImport::Many(profiles) => profiles,
            RuleImport::One(profile) => vec![*profile],
        };
        let mut merged = Self { profiles: added };
        merged.validate()?;
        let incoming: Vec<Template> = merged.profiles.iter().map(|p| p.template.clone()).collect();
        merged
            .profiles
            .extend(self.profiles.drain(..).filter(|p| !incoming.contains(&p.template)));
        *self = merged;
        Ok(())
    }
}

// ── Preamble scan ────────────────────────────────────────────────────────

#[derive(Default)]
struct Preamble {
    class_name: Option<String>,
    class_options: Vec<String>,
    packages: Vec<String>,
}

impl Preamble {
    /// Top-level fragments before `\begin{document}`.
    fn scan(fragments: &[Fragment]) -> Self {
        let mut out = Preamble::default();
        for frag in fragments {
            if frag.as_environment().is_some_and(|e| e.name == "document") {
                break;
            }
            crate::latex::fragment::visit(std::slice::from_ref(frag), &mut |f| {
                let Some(m) = f.as_macro() else {
                    return;
                };
                match m.name.as_str() {
                    "documentclass" | "documentstyle" if out.class_name.is_none() => {
                        out.class_name = m
                            .required(0)
                            .map(|b| plain_list(b).join(","))
                            .filter(|s| !s.is_empty());
                        out.class_options = m.optional(0).map(plain_list).unwrap_or_default();
                        if m.name == "documentstyle" {
                            // LaTeX 2.09 loaded packages as class options.
                            out.packages.extend(out.class_options.iter().map(|o| o.to_ascii_lowercase()));
                        }
                    }
                    "usepackage" | "RequirePackage" => {
                        if let Some(body) = m.required(0) {
                            out.packages
                                .extend(plain_list(body).into_iter().map(|p| p.to_ascii_lowercase()));
                        }
                    }
                    _ => {}
                }
            });
        }
        out
    }
}

/// Comma-separated argument content with comments removed.
fn plain_list(body: &[Fragment]) -> Vec<String> {
    let rendered = render(body);
    let uncommented: String = rendered
        .lines()
        .map(strip_comment)
        .collect::<Vec<_>>()
        .join(" ");
    uncommented
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'%' && (i == 0 || bytes[i - 1] != b'\\') {
            return &line[..i];
        }
    }
    line
}

// ── Built-in tables ──────────────────────────────────────────────────────

const LAYOUT_STRIP: &[&str] = &[
    "vspace", "hspace", "vskip", "hskip", "FloatBarrier", "clearpage", "cleardoublepage", "newpage",
    "noindent", "centering", "raggedright", "raggedleft", "pagestyle", "thispagestyle",
    "captionsetup", "setlist", "setlength", "addtolength", "bibliographystyle", "hfill", "vfill",
    "selectfont", "fontfamily", "fontsize", "linespread", "todo", "balance", "enlargethispage",
    "looseness",
];

/// Preamble set-up for the packages in [`LAYOUT_PACKAGES`] and for float
/// and box environments the tables rename away. `\newtheorem` stays: it
/// carries the label text theorem environments are rendered with.
const PREAMBLE_STRIP: &[&str] = &[
    "theoremstyle", "DeclareFloatingEnvironment", "newmdenv", "geometry", "newgeometry",
    "restoregeometry", "titleformat", "titlespacing", "crefname", "Crefname", "microtypesetup",
    "floatname", "floatstyle", "restylefloat", "algrenewcommand", "algnewcommand",
];

/// Packages whose commands the built-in tables already remove or rewrite.
/// Conference styles are kept so the output classifies the same way.
const LAYOUT_PACKAGES: &[&str] = &[
    "microtype", "placeins", "todonotes", "newfloat", "mdframed", "geometry", "titlesec",
    "subcaption", "caption", "float", "wrapfig", "algorithm", "algorithmic", "algorithmicx",
    "algpseudocode", "cleveref",
];

/// Size switches splice their (rare) adjacent group so `\small{text}` keeps
/// its text.
const FONT_SIZES: &[&str] = &[
    "tiny", "scriptsize", "footnotesize", "small", "normalsize", "large", "Large", "LARGE", "huge",
    "Huge",
];

const COMMON_REWRITES: &[(&str, &str)] = &[
    ("cref", "\\ref{#1}"),
    ("Cref", "\\ref{#1}"),
    ("crefrange", "\\ref{#1}--\\ref{#2}"),
    ("Crefrange", "\\ref{#1}--\\ref{#2}"),
    ("autoref", "\\ref{#1}"),
    ("texorpdfstring", "#1"),
    ("resizebox", "#3"),
    // algorithmic
    ("REQUIRE", "\\textbf{Require:}"),
    ("ENSURE", "\\textbf{Ensure:}"),
    ("IF", "\\textbf{if} \\(#1\\) \\textbf{then}"),
    ("ELSIF", "\\textbf{else if} \\(#1\\) \\textbf{then}"),
    ("ELSE", "\\textbf{else}"),
    ("ENDIF", "\\textbf{end if}"),
    ("FOR", "\\textbf{for} \\(#1\\) \\textbf{do}"),
    ("FORALL", "\\textbf{for all} \\(#1\\) \\textbf{do}"),
    ("ENDFOR", "\\textbf{end for}"),
    ("WHILE", "\\textbf{while} \\(#1\\) \\textbf{do}"),
    ("ENDWHILE", "\\textbf{end while}"),
    ("RETURN", "\\textbf{return}"),
    // algpseudocode
    ("Require", "\\textbf{Require:}"),
    ("Ensure", "\\textbf{Ensure:}"),
    ("If", "\\textbf{if} \\(#1\\) \\textbf{then}"),
    ("ElsIf", "\\textbf{else if} \\(#1\\) \\textbf{then}"),
    ("Else", "\\textbf{else}"),
    ("EndIf", "\\textbf{end if}"),
    ("For", "\\textbf{for} \\(#1\\) \\textbf{do}"),
    ("ForAll", "\\textbf{for all} \\(#1\\) \\textbf{do}"),
    ("EndFor", "\\textbf{end for}"),
    ("While", "\\textbf{while} \\(#1\\) \\textbf{do}"),
    ("EndWhile", "\\textbf{end while}"),
    ("Return", "\\textbf{return}"),
];

const ALGORITHM_STATE: &[&str] = &["STATE", "State", "Statex"];

const UNWRAP_ENVIRONMENTS: &[&str] = &[
    "subfigure", "subtable", "minipage", "algorithmic", "algorithmicx", "adjustbox", "spacing",
    "singlespace", "onehalfspace", "doublespace", "sloppypar", "small", "footnotesize",
];

const QUOTE_ENVIRONMENTS: &[&str] = &[
    "algorithm", "algorithm*", "prompt", "mymessagebox", "tcolorbox", "mdframed", "framed",
    "shaded", "boxedminipage",
];

const FLOAT_RENAMES: &[(&str, &str)] = &[
    ("figure", "figure"),
    ("figure*", "figure"),
    ("wrapfigure", "figure"),
    ("sidewaysfigure", "figure"),
    ("table", "table"),
    ("table*", "table"),
    ("wraptable", "table"),
    ("sidewaystable", "table"),
];

fn common_macros() -> MacroTable {
    let mut t = MacroTable::new();
    for name in LAYOUT_STRIP.iter().chain(PREAMBLE_STRIP).chain(ALGORITHM_STATE) {
        t.insert(*name, MacroRule::Strip);
    }
    t.insert(
        "usepackage",
        MacroRule::StripIf(LAYOUT_PACKAGES.iter().map(|p| p.to_string()).collect()),
    );
    for name in FONT_SIZES {
        t.insert(*name, MacroRule::Rewrite("#1".into()));
    }
    for (name, template) in COMMON_REWRITES {
        t.insert(*name, MacroRule::Rewrite((*template).into()));
    }
    t
}

fn common_environments() -> EnvironmentRuleTable {
    let mut t = EnvironmentRuleTable::new();
    for (from, to) in FLOAT_RENAMES {
        t.insert(*from, NormalizationRule::rename(*to));
    }
    for name in UNWRAP_ENVIRONMENTS {
        t.insert(*name, NormalizationRule::Unwrap);
    }
    for name in QUOTE_ENVIRONMENTS {
        t.insert(*name, NormalizationRule::rename("quote"));
    }
    t
}

fn profile(template: Template, classes: &[&str], packages: &[&str]) -> TemplateProfile {
    TemplateProfile {
        template,
        signature: TemplateSignature {
            classes: classes.iter().map(|s| s.to_string()).collect(),
            packages: packages.iter().map(|s| s.to_string()).collect(),
        },
        macros: common_macros(),
        environments: common_environments(),
    }
}

fn icml_profile() -> TemplateProfile {
    let mut p = profile(Template::Icml, &[], &["icml*"]);
    for name in [
        "icmltitlerunning",
        "icmlsetsymbol",
        "icmlkeywords",
        "icmlaffiliation",
        "icmlcorrespondingauthor",
        "printAffiliationsAndNotice",
        "icmlEqualContribution",
    ] {
        p.macros.insert(name, MacroRule::Strip);
    }
    p.macros.insert("icmltitle", MacroRule::Rewrite("\\title{#1}".into()));
    p.macros.insert("icmlauthor", MacroRule::Rewrite("\\author{#1}".into()));
    p.macros.insert("twocolumn", MacroRule::Rewrite("#1".into()));
    p.environments.insert("icmlauthorlist", NormalizationRule::Unwrap);
    p
}

fn neurips_profile() -> TemplateProfile {
    let mut p = profile(Template::NeurIps, &[], &["neurips*", "nips*"]);
    for name in ["neuripsfinalcopy", "nipsfinalcopy"] {
        p.macros.insert(name, MacroRule::Strip);
    }
    for name in ["AND", "And"] {
        p.macros.insert(name, MacroRule::Rewrite("\\and".into()));
    }
    p
}

fn acl_profile() -> TemplateProfile {
    let mut p = profile(
        Template::AclEmnlp,
        &[],
        &["acl", "acl*", "emnlp*", "naacl*", "eacl*", "coling*"],
    );
    for name in ["aclfinalcopy", "aclpaperid", "titlebox"] {
        p.macros.insert(name, MacroRule::Strip);
    }
    for name in ["AND", "And"] {
        p.macros.insert(name, MacroRule::Rewrite("\\and".into()));
    }
    p
}

fn plain_article_profile() -> TemplateProfile {
    profile(Template::PlainArticle, &["article"], &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latex::fragment::{visit, Fragment};
    use crate::latex::parser::parse;

    fn classify(src: &str) -> Classification {
        RuleBook::builtin().classify(&parse("main.tex", src).unwrap())
    }

    #[test]
    fn icml_by_companion_package() {
        let c = classify("\\documentclass{article}\n\\usepackage[accepted]{icml2024}\n\\begin{document}\\end{document}");
        assert_eq!(c.template, Template::Icml);
        assert_eq!(c.class_name.as_deref(), Some("article"));
        assert!(c.packages.contains(&"icml2024".to_string()));
    }

    #[test]
    fn neurips_and_acl_signatures() {
        let n = classify("\\documentclass{article}\\usepackage[final]{neurips_2023}\\begin{document}\\end{document}");
        assert_eq!(n.template, Template::NeurIps);
        let a = classify("\\documentclass[11pt]{article}\n\\usepackage{times,latexsym}\n\\usepackage[hyperref]{acl}\n\\begin{document}\\end{document}");
        assert_eq!(a.template, Template::AclEmnlp);
        assert_eq!(a.class_options, vec!["11pt".to_string()]);
    }

    #[test]
    fn plain_article_and_generic_fallback() {
        assert_eq!(
            classify("\\documentclass{article}\\usepackage{amsmath}\\begin{document}\\end{document}").template,
            Template::PlainArticle
        );
        assert_eq!(
            classify("\\documentclass{revtex4-2}\\begin{document}\\end{document}").template,
            Template::Generic
        );
        assert_eq!(classify("no preamble at all").template, Template::Generic);
    }

    #[test]
    fn packages_after_document_begin_are_ignored() {
        let c = classify("\\documentclass{article}\\begin{document}\\usepackage{icml2024}\\end{document}");
        assert_eq!(c.template, Template::PlainArticle);
    }

    #[test]
    fn commented_package_list_entries_are_dropped() {
        let c = classify("\\documentclass{article}\n\\usepackage{amsmath,% maths\n  icml2023}\n\\begin{document}\\end{document}");
        assert_eq!(c.packages, vec!["amsmath".to_string(), "icml2023".to_string()]);
        assert_eq!(c.template, Template::Icml);
    }

    #[test]
    fn template_ids_round_trip_through_strings() {
        for t in RuleBook::builtin().templates() {
            assert_eq!(t.id().parse::<Template>().unwrap(), t);
        }
        assert_eq!("NeurIPS".parse::<Template>().unwrap(), Template::NeurIps);
        assert_eq!("ACL_EMNLP".parse::<Template>().unwrap(), Template::AclEmnlp);
        assert_eq!("revtex".parse::<Template>().unwrap(), Template::Custom("revtex".into()));
    }

    #[test]
    fn starred_key_overrides_plain_key() {
        let mut t = MacroTable::new();
        t.insert("section", MacroRule::Passthrough);
        t.insert("section*", MacroRule::Strip);
        assert_eq!(*t.rule("section", true), MacroRule::Strip);
        assert_eq!(*t.rule("section", false), MacroRule::Passthrough);
        assert_eq!(*t.rule("unknown", false), MacroRule::Passthrough);
    }

    /// Every macro a rewrite emits, and every rename target, must be left
    /// alone by the same profile, so a second pass changes nothing.
    #[test]
    fn builtin_rewrites_are_fixed_points() {
        for profile in RuleBook::builtin().profiles {
            for (name, rule) in profile.macros.iter() {
                let MacroRule::Rewrite(template) = rule else { continue };
                let frags = parse("rule", template).unwrap();
                visit(&frags, &mut |f| {
                    if let Fragment::Macro(m) = f {
                        assert_eq!(
                            *profile.macros.rule(&m.name, m.starred),
                            MacroRule::Passthrough,
                            "{}: rewrite of {name} emits \\{} which the table rewrites again",
                            profile.template,
                            m.name
                        );
                    }
                });
            }
            for (name, rule) in profile.environments.iter() {
                if let NormalizationRule::Rename { to, .. } = rule {
                    match profile.environments.rule(to) {
                        NormalizationRule::Passthrough => {}
                        NormalizationRule::Rename { to: again, keep_args: false } if again == to => {}
                        other => panic!("{}: {name} -> {to} is rewritten again by {other:?}", profile.template),
                    }
                }
            }
        }
    }

    #[test]
    fn builtin_book_validates_and_round_trips_json() {
        let book = RuleBook::builtin();
        book.validate().unwrap();
        let json = book.to_json().unwrap();
        assert!(json.contains("\"icmltitle\""));
        assert_eq!(RuleBook::from_json(&json).unwrap(), book);
    }

    #[test]
    fn extend_prepends_and_replaces() {
        let mut book = RuleBook::builtin();
        book.extend_from_json(
            r#"{"template":"revtex","signature":{"classes":["revtex*"]},
                "macros":{"preprint":"strip","affiliation":{"rewrite":"\\thanks{#1}"}},
                "environments":{"widetext":"unwrap"}}"#,
        )
        .unwrap();
        assert_eq!(book.profiles[0].template, Template::Custom("revtex".into()));
        let c = book.classify(&parse("m.tex", "\\documentclass[aps]{revtex4-2}\\begin{document}\\end{document}").unwrap());
        assert_eq!(c.template, Template::Custom("revtex".into()));

        book.extend_from_json(r#"[{"template":"icml","signature":{"packages":["icml*"]}}]"#)
            .unwrap();
        assert_eq!(book.profiles.iter().filter(|p| p.template == Template::Icml).count(), 1);
        assert!(book.macros(&Template::Icml).is_empty());
    }

    #[test]
    fn invalid_profiles_are_rejected() {
        let mut book = RuleBook::builtin();
        let generic = r#"{"template":"generic","signature":{"classes":["x"]}}"#;
        assert!(book.extend_from_json(generic).is_err());
        let bad_rewrite = r#"{"template":"x","signature":{"classes":["x"]},"macros":{"m":{"rewrite":"\\textbf{#1"}}}"#;
        assert!(book.extend_from_json(bad_rewrite).is_err());
        assert_eq!(book, RuleBook::builtin());
    }

    #[test]
    fn generic_tables_are_empty() {
        let book = RuleBook::builtin();
        assert!(book.macros(&Template::Generic).is_empty());
        assert!(book.environments(&Template::Generic).is_empty());
    }

    #[test]
    fn strip_if_needs_every_listed_name_to_match() {
        let rule = MacroRule::StripIf(vec!["caption".into(), "algo*".into()]);
        let first = |src: &str| match parse("m.tex", src).unwrap().remove(0) {
            Fragment::Macro(m) => m,
            other => panic!("unexpected {other:?}"),
        };
        assert!(rule.strips(&first("\\usepackage{caption}")));
        assert!(rule.strips(&first("\\usepackage[noend]{algorithmic, algpseudocode}")));
        assert!(!rule.strips(&first("\\usepackage{caption,amsmath}")));
        assert!(!rule.strips(&first("\\usepackage{}")));
        assert!(!rule.strips(&first("\\usepackage")));
        assert!(MacroRule::Strip.strips(&first("\\usepackage{amsmath}")));
    }

    #[test]
    fn strip_if_round_trips_through_json() {
        let mut book = RuleBook::builtin();
        book.extend_from_json(
            r#"{"template":"x","signature":{"classes":["x"]},"macros":{"usepackage":{"strip_if":["lineno"]}}}"#,
        )
        .unwrap();
        assert_eq!(
            *book.macros(&Template::Custom("x".into())).rule("usepackage", false),
            MacroRule::StripIf(vec!["lineno".into()])
        );
    }
}
