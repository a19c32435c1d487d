//! Paper metadata: title, authors, date and abstract as plain text.
//!
//! Read from the include-resolved document before any stripping, so
//! template-specific forms (`\icmltitle`, `\icmlauthor`) are still present.
//! Footnotes, `\thanks` and affiliation marks are dropped from the text.

use crate::latex::fragment::{visit, Argument, Fragment, MacroInvocation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub date: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
}

impl PaperMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.authors.is_empty() && self.date.is_none() && self.abstract_text.is_none()
    }
}

/// Macros whose arguments never belong in a metadata string.
const DROPPED: &[&str] = &[
    "thanks",
    "footnote",
    "footnotemark",
    "footnotetext",
    "textsuperscript",
    "inst",
    "icmlaffiliation",
    "icmlcorrespondingauthor",
    "label",
];

pub fn extract_metadata(fragments: &[Fragment]) -> PaperMetadata {
    let mut icml_title = None;
    let mut title = None;
    let mut icml_authors = Vec::new();
    let mut author = None;
    let mut date = None;
    let mut abstract_text = None;

    visit(fragments, &mut |f| match f {
        Fragment::Macro(m) => match m.name.as_str() {
            "icmltitle" if icml_title.is_none() => icml_title = first_required(m),
            "title" if title.is_none() => title = first_required(m),
            "icmlauthor" => icml_authors.extend(first_required(m)),
            "author" if author.is_none() => author = m.required(0).map(split_authors),
            "date" if date.is_none() => date = first_required(m),
            "abstract" if abstract_text.is_none() => abstract_text = first_required(m),
            _ => {}
        },
        Fragment::Environment(e) if e.name == "abstract" && abstract_text.is_none() => {
            abstract_text = Some(plain_text(&e.body)).filter(|s| !s.is_empty());
        }
        _ => {}
    });

    PaperMetadata {
        title: icml_title.or(title),
        authors: if icml_authors.is_empty() {
            author.unwrap_or_default()
        } else {
            icml_authors
        },
        date,
        abstract_text,
    }
}

fn first_required(m: &MacroInvocation) -> Option<String> {
    m.required(0).map(plain_text).filter(|s| !s.is_empty())
}

/// Split an `\author{..}` body at `\and`; each author keeps only the part
/// before the first `\\` (the rest is affiliation and e-mail).
fn split_authors(body: &[Fragment]) -> Vec<String> {
    let mut authors = Vec::new();
    let mut current: Vec<Fragment> = Vec::new();
    let mut after_break = false;
    for frag in body {
        match frag.as_macro().map(|m| m.name.as_str()) {
            Some("and" | "AND" | "And") => {
                authors.push(plain_text(&current));
                current.clear();
                after_break = false;
            }
            Some("\\") => after_break = true,
            _ if !after_break => current.push(frag.clone()),
            _ => {}
        }
    }
    authors.push(plain_text(&current));
    authors.retain(|a| !a.is_empty());
    authors
}

/// Flatten fragments to a single line of readable text.
pub fn plain_text(fragments: &[Fragment]) -> String {
    let mut raw = String::new();
    flatten(fragments, &mut raw);
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn flatten(fragments: &[Fragment], out: &mut String) {
    for frag in fragments {
        match frag {
            Fragment::Text { text } => {
                // `%` in a text fragment always starts a comment; `\%` is a macro.
                for line in text.split_inclusive('\n') {
                    let code = line.find('%').map_or(line, |i| &line[..i]);
                    out.extend(code.chars().map(|c| if c == '~' { ' ' } else { c }));
                }
            }
            Fragment::Macro(m) => {
                if DROPPED.contains(&m.name.as_str()) {
                    continue;
                }
                let mut chars = m.name.chars();
                match (chars.next(), chars.next()) {
                    (Some('\\'), None) | (Some(',' | ';' | ' ' | ':'), None) => out.push(' '),
                    (Some(c), None) if !c.is_alphabetic() => out.push(c),
                    _ => {
                        for arg in &m.args {
                            if let Argument::Required(body) = arg {
                                flatten(body, out);
                            }
                        }
                    }
                }
            }
            Fragment::Environment(e) => flatten(&e.body, out),
            Fragment::Group { body } => flatten(body, out),
            Fragment::Math(m) => {
                out.push_str(&m.open);
                out.push_str(&crate::latex::fragment::render(&m.body));
                out.push_str(&m.close);
            }
            Fragment::Include(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latex::parser::parse;

    fn meta(src: &str) -> PaperMetadata {
        extract_metadata(&parse("t.tex", src).unwrap())
    }

    #[test]
    fn article_fields() {
        let m = meta(
            "\\title{Deep  Things\\thanks{Funded.}}\n\\author{Ada Lovelace \\\\ Analytical Inc. \\and Alan~Turing}\n\\date{May 2024}\n\\begin{document}\\begin{abstract}\nWe show $x^2$ works. % really\n\\end{abstract}\\end{document}",
        );
        assert_eq!(m.title.as_deref(), Some("Deep Things"));
        assert_eq!(m.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(m.date.as_deref(), Some("May 2024"));
        assert_eq!(m.abstract_text.as_deref(), Some("We show $x^2$ works."));
    }

    #[test]
    fn icml_forms_take_precedence() {
        let m = meta(
            "\\icmltitle{Short}\\title{Long Running Title}\\begin{icmlauthorlist}\\icmlauthor{A One}{x}\\icmlauthor{B Two}{y}\\end{icmlauthorlist}\\icmlaffiliation{x}{Uni}",
        );
        assert_eq!(m.title.as_deref(), Some("Short"));
        assert_eq!(m.authors, vec!["A One", "B Two"]);
    }

    #[test]
    fn control_symbols_become_characters() {
        assert_eq!(plain_text(&parse("t", "R\\&D at 50\\% \\textbf{bold}").unwrap()), "R&D at 50% bold");
    }

    #[test]
    fn empty_document() {
        assert!(meta("nothing here").is_empty());
    }

    #[test]
    fn abstract_serialises_under_its_name() {
        let m = PaperMetadata {
            abstract_text: Some("x".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"abstract\":\"x\""), "{json}");
    }
}
