//! The in-memory source bundle the normalisation core reads from.
//!
//! [`SourceTree`] maps normalised relative paths (`/`-separated, no `.` or
//! `..` segments) to decoded text. It is built once by the unpacker and only
//! read afterwards. Binary files (figures, fonts, PDFs) travel beside it in
//! [`Bundle::assets`] so a caller can materialise the whole tree for the
//! Render Backend.

use once_cell::sync::Lazy;
use regex::bytes::Regex as BytesRegex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Extensions decoded as text; everything else is an asset.
pub const TEXT_EXTENSIONS: &[&str] = &[
    "tex", "ltx", "latex", "sty", "cls", "clo", "bbl", "bib", "bst", "def", "cfg", "fd", "txt",
    "json", "md", "xxx", "tikz", "pgf", "inc", "pdf_tex", "eps_tex",
];

/// Manifest file names arXiv places at the bundle root.
pub const README_JSON: &str = "00README.json";
pub const README_LEGACY: &str = "00README.XXX";

// ── SourceTree ───────────────────────────────────────────────────────────

/// Relative path → text content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTree {
    files: BTreeMap<String, String>,
}

impl SourceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file. Returns `false` (and stores nothing) when the path is
    /// empty or climbs out of the tree root.
    pub fn insert(&mut self, path: impl AsRef<str>, text: impl Into<String>) -> bool {
        match normalize_path(path.as_ref()) {
            Some(p) => {
                self.files.insert(p, text.into());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths in lexicographic order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, t)| (p.as_str(), t.as_str()))
    }

    /// All `.tex` files, in path order.
    pub fn tex_files(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(p, _)| has_extension(p, "tex"))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for SourceTree {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tree = SourceTree::new();
        for (k, v) in iter {
            tree.insert(k, v);
        }
        tree
    }
}

// ── Bundle ───────────────────────────────────────────────────────────────

/// Everything unpacked from one submission.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    pub tree: SourceTree,
    /// Non-text files, keyed by normalised path.
    pub assets: BTreeMap<String, Vec<u8>>,
}

impl Bundle {
    /// Add a file, routing it to the text tree or the assets by extension.
    /// Returns `false` for paths that escape the root.
    pub fn add_file(&mut self, path: &str, bytes: Vec<u8>) -> bool {
        let Some(norm) = normalize_path(path) else {
            return false;
        };
        if is_text_path(&norm) {
            let text = decode_text(&bytes, inputenc_hint(&bytes).as_deref());
            self.tree.insert(&norm, text.into_owned())
        } else {
            self.assets.insert(norm, bytes);
            true
        }
    }

    /// Manifest shipped inside the bundle, if any.
    pub fn manifest(&self) -> Option<Manifest> {
        Manifest::discover(&self.tree)
    }

    pub fn file_count(&self) -> usize {
        self.tree.len() + self.assets.len()
    }
}

// ── Manifest ─────────────────────────────────────────────────────────────

/// Role name → path hint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub roles: BTreeMap<String, String>,
}

/// The role naming the entry document.
pub const ROLE_TOPLEVEL: &str = "toplevel";

#[derive(Deserialize)]
struct ReadmeJson {
    #[serde(default)]
    sources: Vec<ReadmeSource>,
}

#[derive(Deserialize)]
struct ReadmeSource {
    filename: String,
    #[serde(default)]
    usage: Option<String>,
}

impl Manifest {
    /// A manifest naming only the entry document.
    pub fn with_entry(path: impl Into<String>) -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(ROLE_TOPLEVEL.to_string(), path.into());
        Self { roles }
    }

    /// Path of the entry document, normalised.
    pub fn entry(&self) -> Option<String> {
        self.roles.get(ROLE_TOPLEVEL).and_then(|p| normalize_path(p))
    }

    /// Parse `00README.json`: `{"sources": [{"filename": .., "usage": "toplevel"}]}`.
    /// The first file listed for a role wins.
    pub fn from_readme_json(text: &str) -> Result<Self, serde_json::Error> {
        let parsed: ReadmeJson = serde_json::from_str(text)?;
        let mut roles = BTreeMap::new();
        for src in parsed.sources {
            if let Some(usage) = src.usage {
                roles.entry(usage).or_insert(src.filename);
            }
        }
        Ok(Self { roles })
    }

    /// Parse the legacy `00README.XXX`: one `<file> <directive>` per line,
    /// `toplevelfile` marking the entry.
    pub fn from_readme_legacy(text: &str) -> Self {
        let mut roles = BTreeMap::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let mut words = line.split_whitespace();
            let (Some(file), Some(directive), None) = (words.next(), words.next(), words.next()) else {
                continue;
            };
            let role = match directive {
                "toplevelfile" => ROLE_TOPLEVEL,
                other => other,
            };
            roles.entry(role.to_string()).or_insert_with(|| file.to_string());
        }
        Self { roles }
    }

    /// Look for either manifest file at the tree root. JSON wins when both
    /// exist; an unparseable JSON manifest is logged and ignored.
    pub fn discover(tree: &SourceTree) -> Option<Self> {
        if let Some(text) = tree.get(README_JSON) {
            match Self::from_readme_json(text) {
                Ok(m) if !m.roles.is_empty() => {
                    debug!("Manifest from {}: {:?}", README_JSON, m.roles);
                    return Some(m);
                }
                Ok(_) => {}
                Err(e) => warn!("Ignoring unparseable {}: {}", README_JSON, e),
            }
        }
        let legacy = tree.get(README_LEGACY).map(Self::from_readme_legacy)?;
        if legacy.roles.is_empty() {
            return None;
        }
        debug!("Manifest from {}: {:?}", README_LEGACY, legacy.roles);
        Some(legacy)
    }
}

// ── Paths ────────────────────────────────────────────────────────────────

/// Collapse `.`/`..` segments and backslashes into a `/`-separated
/// relative path. `None` when nothing is left or `..` climbs past the root.
pub fn normalize_path(raw: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for seg in raw.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Directory part of a tree path (`""` at the root).
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Resolve `rel` against `dir`, normalising the result.
pub fn join(dir: &str, rel: &str) -> Option<String> {
    if dir.is_empty() {
        normalize_path(rel)
    } else {
        normalize_path(&format!("{dir}/{rel}"))
    }
}

/// Lowercased extension of the final path segment, if any.
pub fn extension(path: &str) -> Option<String> {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.')
        .filter(|(stem, _)| !stem.is_empty())
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

pub fn has_extension(path: &str, ext: &str) -> bool {
    extension(path).is_some_and(|e| e == ext)
}

pub fn is_text_path(path: &str) -> bool {
    extension(path).is_some_and(|e| TEXT_EXTENSIONS.contains(&e.as_str()))
}

/// Path with its extension removed (`a/b.tex` → `a/b`).
pub fn strip_extension(path: &str) -> &str {
    let file_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[file_start..].rfind('.') {
        Some(i) if i > 0 => &path[..file_start + i],
        _ => path,
    }
}

// ── Decoding ─────────────────────────────────────────────────────────────

static INPUTENC: Lazy<BytesRegex> = Lazy::new(|| {
    BytesRegex::new(r"\\usepackage\s*\[\s*([A-Za-z0-9_-]+)\s*\]\s*\{\s*inputenc\s*\}").unwrap()
});

/// Encoding option of `\usepackage[..]{inputenc}`, if the file declares one.
pub fn inputenc_hint(bytes: &[u8]) -> Option<String> {
    INPUTENC
        .captures(bytes)
        .and_then(|c| c.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
}

/// Decode file bytes: UTF-8 (BOM-aware) first, then the declared
/// `inputenc` encoding, then Windows-1252.
pub fn decode_text<'a>(bytes: &'a [u8], hint_encoding: Option<&str>) -> Cow<'a, str> {
    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);
    if !malformed {
        return result;
    }

    if let Some(encoding) = hint_encoding.and_then(|name| encoding_rs::Encoding::for_label(name.as_bytes())) {
        let (result, _, _) = encoding.decode(bytes);
        return result;
    }

    let (result, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dots_and_backslashes() {
        assert_eq!(normalize_path("./paper/../paper/sec\\intro.tex").as_deref(), Some("paper/sec/intro.tex"));
        assert_eq!(normalize_path("/abs/x.tex").as_deref(), Some("abs/x.tex"));
        assert_eq!(normalize_path("../escape.tex"), None);
        assert_eq!(normalize_path("./"), None);
    }

    #[test]
    fn tree_rejects_escaping_paths() {
        let mut tree = SourceTree::new();
        assert!(!tree.insert("a/../../x.tex", "x"));
        assert!(tree.insert("a/./b.tex", "b"));
        assert_eq!(tree.get("a/b.tex"), Some("b"));
    }

    #[test]
    fn extension_helpers() {
        assert_eq!(extension("dir.v2/main.TEX").as_deref(), Some("tex"));
        assert_eq!(extension("dir.v2/Makefile"), None);
        assert_eq!(extension(".hidden"), None);
        assert_eq!(strip_extension("a.b/c.tex"), "a.b/c");
        assert_eq!(strip_extension("a.b/c"), "a.b/c");
        assert_eq!(parent_dir("a/b/c.tex"), "a/b");
        assert_eq!(parent_dir("c.tex"), "");
        assert_eq!(join("a/b", "../c.tex").as_deref(), Some("a/c.tex"));
    }

    #[test]
    fn readme_json_picks_toplevel() {
        let json = r#"{"sources":[
            {"filename":"figs/a.tex","usage":"include"},
            {"filename":"paper/main.tex","usage":"toplevel"},
            {"filename":"other.tex","usage":"toplevel"}
        ],"process":{"compiler":"pdflatex"}}"#;
        let m = Manifest::from_readme_json(json).unwrap();
        assert_eq!(m.entry().as_deref(), Some("paper/main.tex"));
    }

    #[test]
    fn readme_legacy_parses_directives() {
        let m = Manifest::from_readme_legacy("nohypertex\nms.tex toplevelfile\nfig.eps ignore  # unused\n");
        assert_eq!(m.entry().as_deref(), Some("ms.tex"));
        assert_eq!(m.roles.get("ignore").map(String::as_str), Some("fig.eps"));
    }

    #[test]
    fn discover_skips_broken_json_for_legacy() {
        let tree: SourceTree = [(README_JSON, "{not json"), (README_LEGACY, "ms.tex toplevelfile")]
            .into_iter()
            .collect();
        assert_eq!(Manifest::discover(&tree).and_then(|m| m.entry()).as_deref(), Some("ms.tex"));
    }

    #[test]
    fn bundle_routes_by_extension() {
        let mut b = Bundle::default();
        assert!(b.add_file("main.tex", b"\\begin{document}x\\end{document}".to_vec()));
        assert!(b.add_file("figs/plot.png", vec![0x89, b'P', b'N', b'G']));
        assert!(!b.add_file("../evil.tex", b"x".to_vec()));
        assert!(b.tree.contains("main.tex"));
        assert!(b.assets.contains_key("figs/plot.png"));
        assert_eq!(b.file_count(), 2);
    }

    #[test]
    fn decode_falls_back_to_latin1_hint() {
        let bytes = b"\\usepackage[latin1]{inputenc}\nna\xefve";
        assert_eq!(inputenc_hint(bytes).as_deref(), Some("latin1"));
        let text = decode_text(bytes, inputenc_hint(bytes).as_deref());
        assert!(text.ends_with("naïve"));
    }

    #[test]
    fn decode_keeps_valid_utf8_borrowed() {
        let text = decode_text("naïve".as_bytes(), None);
        assert!(matches!(text, Cow::Borrowed(_)));
    }
}
