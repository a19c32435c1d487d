//! Property tests over documents composed from well-formed LaTeX chunks.
//!
//! Chunks are joined with whitespace or nothing at all, so a bare control
//! word can end up directly before a construct some table removes, and two
//! chunks can fuse into one control word or one argument list.

use edgequake_tex2epub::latex::{parse, render};
use edgequake_tex2epub::{normalize_tree, ConversionConfig, SourceTree};
use proptest::prelude::*;

// ── Chunk pools ──────────────────────────────────────────────────────────

/// Things some built-in rule table rewrites.
const RULED: &[&str] = &[
    "\\vspace{1em}",
    "\\vspace*{-2pt}",
    "\\centering",
    "\\noindent",
    "\\small",
    "\\footnotesize{tiny words}",
    "\\cref{sec:intro}",
    "\\Crefrange{a}{b}",
    "\\autoref{fig:1}",
    "\\texorpdfstring{$x$}{x}",
    "\\clearpage",
    "\\setlength{\\tabcolsep}{3pt}",
    "\\icmltitle{A Title}",
    "\\icmlkeywords{ML, stuff}",
    "\\aclfinalcopy",
    "\\AND",
    "\\begin{figure*}[t]\\centering body\\end{figure*}",
    "\\begin{table}[h]\n\\small{cell}\n\\end{table}",
    "\\begin{minipage}{0.4\\linewidth}inside\\end{minipage}",
    "\\begin{algorithm}[t]\\State step\\end{algorithm}",
    "\\begin{subfigure}{3cm}\\vspace{1pt}sub\\end{subfigure}",
];

/// Things no rule table knows about.
const UNKNOWN: &[&str] = &[
    "\\mysterymacro",
    "\\item",
    "\\par",
    "\\frobnicate[fast]{a}{b}",
    "\\begin{customblock}{x} kept \\end{customblock}",
    "\\begin{theorem}[Main] claim \\end{theorem}",
    "\\newcommand{\\half}[1]{\\frac{#1}{2}}",
    "\\verb|\\vspace{9em}|",
    "\\url{https://example.com/a%20b}",
    "{\\bf grouped}",
    "% a comment with \\vspace{1em}\n",
];

const MATH: &[&str] = &[
    "$x^2$",
    "$a \\vspace{1em} b$",
    "\\(\\cref{x}\\)",
    "\\[\\centering \\sum_i i\\]",
    "$$\\small y$$",
    "\\begin{equation}\\label{e} \\noindent E = mc^2\\end{equation}",
    "\\begin{align*} a &= b \\\\ c &= d\\end{align*}",
];

const TEXT: &[&str] = &["Plain words.", "More text, with punctuation!", "line one\n\nline two", "ünïcödé"];

const PREAMBLES: &[&str] = &[
    "\\documentclass{article}\n\\usepackage{icml2024}",
    "\\documentclass{article}\n\\usepackage[final]{neurips_2023}",
    "\\documentclass[11pt]{article}\n\\usepackage{acl}",
    "\\documentclass{article}",
    "\\documentclass{revtex4-2}",
];

fn pick(pool: &'static [&'static str]) -> impl Strategy<Value = &'static str> {
    prop::sample::select(pool)
}

fn any_chunk() -> impl Strategy<Value = &'static str> {
    prop_oneof![pick(RULED), pick(UNKNOWN), pick(MATH), pick(TEXT)]
}

fn separator() -> impl Strategy<Value = &'static str> {
    prop::sample::select(&["", " ", "\n", "\n\n", "  "][..])
}

fn join(chunks: &[(&str, &str)]) -> String {
    chunks.iter().map(|(c, sep)| format!("{c}{sep}")).collect()
}

fn document(preamble: &str, body: &str) -> SourceTree {
    let main = format!("{preamble}\n\\begin{{document}}\n{body}\n\\end{{document}}\n");
    [("main.tex", main)].into_iter().collect()
}

fn normalize(tree: &SourceTree) -> String {
    normalize_tree(tree, None, &ConversionConfig::default())
        .expect("composed documents are well-formed")
        .latex
}

// ── Properties ───────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn parse_then_render_is_byte_exact(
        chunks in prop::collection::vec((any_chunk(), separator()), 0..24)
    ) {
        let src = join(&chunks);
        let frags = parse("prop.tex", &src).unwrap();
        prop_assert_eq!(render(&frags), src);
    }

    #[test]
    fn normalisation_is_idempotent(
        preamble in pick(PREAMBLES),
        chunks in prop::collection::vec((any_chunk(), separator()), 0..16)
    ) {
        let once = normalize(&document(preamble, &join(&chunks)));
        let tree: SourceTree = [("main.tex", once.clone())].into_iter().collect();
        let twice = normalize(&tree);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn math_and_unknown_constructs_survive(
        preamble in pick(PREAMBLES),
        chunks in prop::collection::vec((any_chunk(), separator()), 0..16)
    ) {
        let out = normalize(&document(preamble, &join(&chunks)));
        for (i, (chunk, _)) in chunks.iter().enumerate() {
            if !(MATH.contains(chunk) || UNKNOWN.contains(chunk)) {
                continue;
            }
            // A group glued to a ruled macro is that macro's argument.
            let argument_of_ruled = i > 0
                && chunk.starts_with('{')
                && chunks[i - 1].1.is_empty()
                && RULED.contains(&chunks[i - 1].0);
            if !argument_of_ruled {
                prop_assert!(out.contains(chunk), "lost {:?} in {:?}", chunk, out);
            }
        }
    }

    #[test]
    fn removed_constructs_leave_no_fused_control_words(
        word in pick(&["\\item", "\\par", "\\mysterymacro"]),
        removed in pick(&["\\vspace{2pt}", "\\hspace*{1em}", "\\begin{minipage}{3cm}", "\\clearpage{}"]),
        text in pick(&["First point", "Text", "@later"]),
    ) {
        let body = if removed.starts_with("\\begin") {
            format!("{word}{removed}{text}\\end{{minipage}}")
        } else {
            format!("{word}{removed}{text}")
        };
        let out = normalize(&document(PREAMBLES[3], &body));
        let expected = format!("{word} {text}");
        prop_assert!(out.contains(&expected), "{:?} not in {:?}", expected, out);
    }

    #[test]
    fn inlined_file_appears_once_at_directive(
        before in pick(TEXT),
        inner in prop::collection::vec((pick(TEXT), separator()), 1..6),
        after in pick(TEXT),
    ) {
        let included = join(&inner);
        let main = format!(
            "\\documentclass{{revtex4-2}}\n\\begin{{document}}\n{before} \\input{{part}} {after}\n\\end{{document}}\n"
        );
        let tree: SourceTree = [("main.tex", main.clone()), ("part.tex", included.clone())]
            .into_iter()
            .collect();
        let out = normalize(&tree);
        let expected = format!("{before} {included} {after}");
        prop_assert!(out.contains(&expected), "{:?} not in {:?}", expected, out);
        prop_assert_eq!(out, main.replace("\\input{part}", &included));
    }
}
