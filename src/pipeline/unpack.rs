//! Archive Unpacker: raw submission bytes → [`Bundle`].
//!
//! arXiv serves one of:
//! - a gzipped tarball (the common case),
//! - a single gzipped `.tex` file (single-file submissions),
//! - a PDF (PDF-only submissions, which carry no LaTeX at all).
//!
//! Local inputs may also be a plain tar or a bare `.tex` file. Detection is
//! by magic bytes, never by file name. Entries with absolute paths or `..`
//! segments are skipped so an archive can never place files outside its
//! own tree.

use crate::error::Tex2EpubError;
use crate::source::{self, Bundle};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Component, Path};
use tracing::{debug, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_MAGIC_OFFSET: usize = 257;

/// What the bytes turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Tar,
    GzipSingle,
    PlainText,
}

/// Unpack a submission. `name` is used for error messages and to name a
/// lone gzipped file when its header carries no usable name.
pub fn unpack(name: &str, bytes: &[u8]) -> Result<(Bundle, ArchiveFormat), Tex2EpubError> {
    if bytes.starts_with(b"%PDF") {
        return Err(Tex2EpubError::NoLatexSource {
            name: name.to_string(),
            detail: "the submission is a PDF".into(),
        });
    }

    let (bundle, format) = if bytes.starts_with(&GZIP_MAGIC) {
        let (inner, header_name) = gunzip(name, bytes)?;
        if is_tar(&inner) {
            (read_tar(name, &inner)?, ArchiveFormat::TarGz)
        } else if inner.starts_with(b"%PDF") {
            return Err(Tex2EpubError::NoLatexSource {
                name: name.to_string(),
                detail: "the compressed payload is a PDF".into(),
            });
        } else {
            let file = header_name
                .filter(|n| source::has_extension(n, "tex"))
                .unwrap_or_else(|| "main.tex".to_string());
            let mut bundle = Bundle::default();
            bundle.add_file(&file, inner);
            (bundle, ArchiveFormat::GzipSingle)
        }
    } else if is_tar(bytes) {
        (read_tar(name, bytes)?, ArchiveFormat::Tar)
    } else if looks_like_text(bytes) {
        let file = Path::new(name)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .filter(|n| source::has_extension(n, "tex"))
            .unwrap_or_else(|| "main.tex".to_string());
        let mut bundle = Bundle::default();
        bundle.add_file(&file, bytes.to_vec());
        (bundle, ArchiveFormat::PlainText)
    } else {
        return Err(Tex2EpubError::UnpackFailed {
            name: name.to_string(),
            detail: "not a gzip, tar or LaTeX file".into(),
        });
    };

    if bundle.tree.tex_files().next().is_none() {
        return Err(Tex2EpubError::NoLatexSource {
            name: name.to_string(),
            detail: format!("{} files, none of them .tex", bundle.file_count()),
        });
    }
    debug!(
        "Unpacked '{}' as {:?}: {} text files, {} assets",
        name,
        format,
        bundle.tree.len(),
        bundle.assets.len()
    );
    Ok((bundle, format))
}

fn gunzip(name: &str, bytes: &[u8]) -> Result<(Vec<u8>, Option<String>), Tex2EpubError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| Tex2EpubError::UnpackFailed {
        name: name.to_string(),
        detail: format!("gzip: {e}"),
    })?;
    let header_name = decoder
        .header()
        .and_then(|h| h.filename())
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .and_then(|f| Path::new(&f).file_name().map(|n| n.to_string_lossy().into_owned()));
    Ok((out, header_name))
}

fn is_tar(bytes: &[u8]) -> bool {
    bytes
        .get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5)
        .is_some_and(|magic| magic == b"ustar")
}

/// No NUL bytes in the first block.
fn looks_like_text(bytes: &[u8]) -> bool {
    !bytes.is_empty() && !bytes.iter().take(512).any(|&b| b == 0)
}

fn read_tar(name: &str, bytes: &[u8]) -> Result<Bundle, Tex2EpubError> {
    let failed = |e: std::io::Error| Tex2EpubError::UnpackFailed {
        name: name.to_string(),
        detail: format!("tar: {e}"),
    };

    let mut archive = tar::Archive::new(bytes);
    let mut bundle = Bundle::default();
    for entry in archive.entries().map_err(failed)? {
        let mut entry = entry.map_err(failed)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(failed)?.into_owned();
        if !is_safe(&path) {
            warn!("Skipping unsafe archive path '{}'", path.display());
            continue;
        }
        let rel = path.to_string_lossy().replace('\\', "/");
        if rel.split('/').any(|seg| seg == "__MACOSX" || seg.starts_with("._")) {
            continue;
        }
        // The header size is untrusted; the archive itself bounds the entry.
        let mut data = Vec::with_capacity((entry.size() as usize).min(bytes.len()));
        entry.read_to_end(&mut data).map_err(failed)?;
        if !bundle.add_file(&rel, data) {
            warn!("Skipping archive path '{}'", rel);
        }
    }
    Ok(bundle)
}

fn is_safe(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::{Compression, GzBuilder};
    use std::io::Write;

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in files {
            let mut header = tar::Header::new_ustar();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn tar_gz_splits_text_and_assets() {
        let tar = tar_bytes(&[
            ("main.tex", b"\\begin{document}x\\end{document}".as_slice()),
            ("figs/plot.png", [0x89, b'P', b'N', b'G', 0, 1].as_slice()),
            ("sec/intro.tex", b"Hello.".as_slice()),
        ]);
        let (bundle, format) = unpack("2401.00001", &gzip(&tar)).unwrap();
        assert_eq!(format, ArchiveFormat::TarGz);
        assert_eq!(bundle.tree.get("sec/intro.tex"), Some("Hello."));
        assert!(bundle.assets.contains_key("figs/plot.png"));
    }

    #[test]
    fn plain_tar() {
        let tar = tar_bytes(&[("a.tex", b"x".as_slice())]);
        let (bundle, format) = unpack("a.tar", &tar).unwrap();
        assert_eq!(format, ArchiveFormat::Tar);
        assert_eq!(bundle.tree.len(), 1);
    }

    #[test]
    fn single_gzipped_tex_uses_header_name() {
        let mut enc = GzBuilder::new()
            .filename("paper.tex")
            .write(Vec::new(), Compression::default());
        enc.write_all(b"\\documentclass{article}").unwrap();
        let (bundle, format) = unpack("2401.00002", &enc.finish().unwrap()).unwrap();
        assert_eq!(format, ArchiveFormat::GzipSingle);
        assert!(bundle.tree.contains("paper.tex"));
    }

    #[test]
    fn single_gzipped_without_name_becomes_main() {
        let (bundle, _) = unpack("x", &gzip(b"\\begin{document}\\end{document}")).unwrap();
        assert!(bundle.tree.contains("main.tex"));
    }

    #[test]
    fn pdf_is_no_latex_source() {
        let err = unpack("x", b"%PDF-1.5\n...").unwrap_err();
        assert!(matches!(err, Tex2EpubError::NoLatexSource { .. }));
        let err = unpack("x", &gzip(b"%PDF-1.7")).unwrap_err();
        assert!(matches!(err, Tex2EpubError::NoLatexSource { .. }));
    }

    #[test]
    fn archive_without_tex_is_rejected() {
        let tar = tar_bytes(&[("readme.txt", b"hi".as_slice())]);
        let err = unpack("x", &tar).unwrap_err();
        assert!(matches!(err, Tex2EpubError::NoLatexSource { .. }));
    }

    #[test]
    fn macos_metadata_is_skipped() {
        let tar = tar_bytes(&[("main.tex", b"x".as_slice()), ("__MACOSX/._main.tex", b"junk".as_slice())]);
        let (bundle, _) = unpack("x", &tar).unwrap();
        assert_eq!(bundle.tree.len(), 1);
    }

    #[test]
    fn unsafe_components_detected() {
        assert!(is_safe(Path::new("a/./b.tex")));
        assert!(!is_safe(Path::new("../b.tex")));
        assert!(!is_safe(Path::new("/etc/passwd")));
    }

    #[test]
    fn forged_entry_size_fails_cleanly() {
        let mut header = tar::Header::new_ustar();
        header.set_path("main.tex").unwrap();
        header.set_size(1 << 32);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        let mut tar = header.as_bytes().to_vec();
        tar.extend_from_slice(b"\\begin{document}x\\end{document}");
        tar.resize(tar.len() + 1024, 0);

        let err = unpack("forged.tar", &tar).unwrap_err();
        assert!(matches!(err, Tex2EpubError::UnpackFailed { .. }), "got {err:?}");
    }

    #[test]
    fn binary_garbage_fails() {
        let err = unpack("x", &[0u8, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, Tex2EpubError::UnpackFailed { .. }));
    }

    #[test]
    fn latin1_source_is_decoded() {
        let tar = tar_bytes(&[("main.tex", b"\\usepackage[latin1]{inputenc}\nna\xefve".as_slice())]);
        let (bundle, _) = unpack("x", &tar).unwrap();
        assert!(bundle.tree.get("main.tex").unwrap().ends_with("naïve"));
    }
}
