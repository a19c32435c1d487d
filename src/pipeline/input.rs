//! Archive Fetcher: turn a user-supplied arXiv id, URL or path into bytes
//! (or, for a directory, straight into a [`Bundle`]).
//!
//! Accepted forms:
//! - `2401.00001`, `2401.00001v2`, `hep-th/9901001` (bare arXiv ids)
//! - `https://arxiv.org/abs/2401.00001` and the `pdf`/`html`/`src` variants
//! - any other `http(s)://` URL pointing at a source archive
//! - a local `.tar.gz`, `.tar`, `.gz` or `.tex` file
//! - a local directory holding an unpacked submission
//!
//! Everything is fetched completely before normalisation starts, so the
//! core never waits on the network.

use crate::error::Tex2EpubError;
use crate::source::Bundle;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("tex2epub/", env!("CARGO_PKG_VERSION"), " (academic paper converter)");

static ARXIV_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.|export\.)?arxiv\.org/(?:abs|pdf|html|src|e-print)/([a-z-]+(?:\.[A-Z]{2})?/\d{7}(?:v\d+)?|\d{4}\.\d{4,5}(?:v\d+)?)(?:\.pdf)?/?$").unwrap()
});
static ARXIV_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}\.\d{4,5}(?:v\d+)?$").unwrap());
static ARXIV_OLD_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z-]+(?:\.[A-Z]{2})?/\d{7}(?:v\d+)?$").unwrap());

/// A classified input string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    ArxivId(String),
    Url(String),
    LocalArchive(PathBuf),
    LocalDirectory(PathBuf),
}

impl SourceInput {
    /// Short label for logs and progress events.
    pub fn label(&self) -> String {
        match self {
            SourceInput::ArxivId(id) => format!("arXiv:{id}"),
            SourceInput::Url(url) => url.clone(),
            SourceInput::LocalArchive(p) | SourceInput::LocalDirectory(p) => p.display().to_string(),
        }
    }
}

/// What the fetcher produced.
#[derive(Debug)]
pub enum Fetched {
    /// Raw archive bytes, still to be unpacked.
    Archive { name: String, bytes: Vec<u8> },
    /// A directory already read into memory.
    Directory(Bundle),
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// arXiv id named by `input`, if it is a bare id or an arxiv.org URL.
pub fn arxiv_id(input: &str) -> Option<String> {
    let input = input.trim();
    if ARXIV_ID.is_match(input) || ARXIV_OLD_ID.is_match(input) {
        return Some(input.to_string());
    }
    ARXIV_URL
        .captures(input)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Source download URL for an arXiv id.
pub fn source_url(id: &str) -> String {
    format!("https://arxiv.org/src/{id}")
}

/// Classify the input. An existing local path always wins over an
/// id-shaped interpretation of the same string.
pub fn parse_input(input: &str) -> Result<SourceInput, Tex2EpubError> {
    let trimmed = input.trim();
    let path = PathBuf::from(trimmed);
    if !is_url(trimmed) && path.exists() {
        return Ok(if path.is_dir() {
            SourceInput::LocalDirectory(path)
        } else {
            SourceInput::LocalArchive(path)
        });
    }
    if let Some(id) = arxiv_id(trimmed) {
        return Ok(SourceInput::ArxivId(id));
    }
    if is_url(trimmed) {
        return Ok(SourceInput::Url(trimmed.to_string()));
    }
    if trimmed.contains(['/', '\\']) || path.extension().is_some() {
        return Err(Tex2EpubError::FileNotFound { path });
    }
    Err(Tex2EpubError::InvalidInput {
        input: input.to_string(),
    })
}

/// Fetch the input completely.
pub async fn fetch(input: &SourceInput, timeout_secs: u64) -> Result<Fetched, Tex2EpubError> {
    match input {
        SourceInput::ArxivId(id) => {
            let bytes = download(&source_url(id), timeout_secs).await?;
            Ok(Fetched::Archive {
                name: id.clone(),
                bytes,
            })
        }
        SourceInput::Url(url) => {
            let bytes = download(url, timeout_secs).await?;
            Ok(Fetched::Archive {
                name: url_filename(url),
                bytes,
            })
        }
        SourceInput::LocalArchive(path) => {
            let bytes = read_local(path)?;
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(Fetched::Archive {
                name: path.display().to_string(),
                bytes,
            })
        }
        SourceInput::LocalDirectory(path) => read_directory(path).map(Fetched::Directory),
    }
}

fn read_local(path: &Path) -> Result<Vec<u8>, Tex2EpubError> {
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Tex2EpubError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => Tex2EpubError::FileNotFound {
            path: path.to_path_buf(),
        },
    })
}

/// Read an unpacked submission. Hidden files and directories are skipped.
pub fn read_directory(root: &Path) -> Result<Bundle, Tex2EpubError> {
    let mut bundle = Bundle::default();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => Tex2EpubError::PermissionDenied { path: dir.clone() },
            _ => Tex2EpubError::FileNotFound { path: dir.clone() },
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| Tex2EpubError::Internal(format!("reading {}: {e}", dir.display())))?;
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let file_type = entry
                .file_type()
                .map_err(|e| Tex2EpubError::Internal(format!("{}: {e}", path.display())))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let Ok(rel) = path.strip_prefix(root) else {
                    continue;
                };
                let rel = rel.to_string_lossy().replace('\\', "/");
                let bytes = read_local(&path)?;
                if !bundle.add_file(&rel, bytes) {
                    warn!("Skipping '{}'", rel);
                }
            }
        }
    }
    if bundle.tree.tex_files().next().is_none() {
        return Err(Tex2EpubError::NoLatexSource {
            name: root.display().to_string(),
            detail: "directory holds no .tex files".into(),
        });
    }
    debug!("Read directory {}: {} files", root.display(), bundle.file_count());
    Ok(bundle)
}

/// Download a URL into memory.
async fn download(url: &str, timeout_secs: u64) -> Result<Vec<u8>, Tex2EpubError> {
    info!("Downloading source from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Tex2EpubError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Tex2EpubError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Tex2EpubError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Tex2EpubError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            Tex2EpubError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Tex2EpubError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

/// Last path segment of a URL, or `download` when there is none.
fn url_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }
    "download".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://arxiv.org/abs/2401.00001"));
        assert!(is_url("http://example.com/src.tar.gz"));
        assert!(!is_url("/tmp/src.tar.gz"));
        assert!(!is_url(""));
    }

    #[test]
    fn arxiv_ids_from_all_forms() {
        assert_eq!(arxiv_id("2401.00001").as_deref(), Some("2401.00001"));
        assert_eq!(arxiv_id("1706.03762v7").as_deref(), Some("1706.03762v7"));
        assert_eq!(arxiv_id("hep-th/9901001").as_deref(), Some("hep-th/9901001"));
        assert_eq!(arxiv_id("math.GT/0309136").as_deref(), Some("math.GT/0309136"));
        assert_eq!(arxiv_id("https://arxiv.org/abs/2401.00001").as_deref(), Some("2401.00001"));
        assert_eq!(arxiv_id("https://arxiv.org/pdf/2401.00001v2.pdf").as_deref(), Some("2401.00001v2"));
        assert_eq!(arxiv_id("arxiv.org/html/2401.00001").as_deref(), Some("2401.00001"));
        assert_eq!(arxiv_id("https://arxiv.org/abs/hep-th/9901001").as_deref(), Some("hep-th/9901001"));
        assert_eq!(arxiv_id("https://example.com/abs/2401.00001"), None);
        assert_eq!(arxiv_id("paper.tex"), None);
    }

    #[test]
    fn source_url_shape() {
        assert_eq!(source_url("2401.00001"), "https://arxiv.org/src/2401.00001");
    }

    #[test]
    fn parse_input_variants() {
        assert_eq!(
            parse_input("2401.00001").unwrap(),
            SourceInput::ArxivId("2401.00001".into())
        );
        assert_eq!(
            parse_input("https://example.com/src.tar.gz").unwrap(),
            SourceInput::Url("https://example.com/src.tar.gz".into())
        );
        assert!(matches!(
            parse_input("/definitely/not/here.tar.gz"),
            Err(Tex2EpubError::FileNotFound { .. })
        ));
        assert!(matches!(parse_input("hello"), Err(Tex2EpubError::InvalidInput { .. })));
    }

    #[test]
    fn existing_paths_are_local() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            parse_input(dir.path().to_str().unwrap()).unwrap(),
            SourceInput::LocalDirectory(dir.path().to_path_buf())
        );
        let file = dir.path().join("main.tex");
        std::fs::write(&file, "x").unwrap();
        assert_eq!(
            parse_input(file.to_str().unwrap()).unwrap(),
            SourceInput::LocalArchive(file)
        );
    }

    #[test]
    fn directory_is_read_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sec")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("main.tex"), "\\begin{document}\\end{document}").unwrap();
        std::fs::write(dir.path().join("sec/intro.tex"), "Hello.").unwrap();
        std::fs::write(dir.path().join("sec/fig.png"), [0u8, 1, 2]).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        let bundle = read_directory(dir.path()).unwrap();
        assert_eq!(bundle.tree.get("sec/intro.tex"), Some("Hello."));
        assert!(bundle.assets.contains_key("sec/fig.png"));
        assert_eq!(bundle.file_count(), 3);
    }

    #[test]
    fn empty_directory_has_no_latex() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_directory(dir.path()),
            Err(Tex2EpubError::NoLatexSource { .. })
        ));
    }

    #[test]
    fn url_filename_falls_back() {
        assert_eq!(url_filename("https://example.com/a/src.tar.gz"), "src.tar.gz");
        assert_eq!(url_filename("https://example.com/"), "download");
    }
}
