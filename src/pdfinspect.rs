use crate::error::{MarkpageError, Result};
use lopdf::Document as LoDocument;
use std::path::Path;

/// What a written PDF looks like when read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfInspectReport {
    pub pdf_version: String,
    pub page_count: usize,
    pub encrypted: bool,
    pub file_size_bytes: usize,
    pub title: Option<String>,
}

pub fn inspect_pdf_bytes(bytes: &[u8]) -> Result<PdfInspectReport> {
    let pdf = LoDocument::load_mem(bytes).map_err(|err| MarkpageError::Pdf(err.to_string()))?;
    let page_count = pdf.get_pages().len();
    if page_count == 0 {
        return Err(MarkpageError::Pdf("pdf has no pages".to_string()));
    }
    let title = pdf
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|info| info.as_reference().ok())
        .and_then(|id| pdf.get_dictionary(id).ok())
        .and_then(|dict| dict.get(b"Title").ok())
        .and_then(|obj| obj.as_str().ok())
        .map(decode_text_string);

    Ok(PdfInspectReport {
        pdf_version: pdf.version.clone(),
        page_count,
        encrypted: pdf.is_encrypted(),
        file_size_bytes: bytes.len(),
        title,
    })
}

pub fn inspect_pdf_path(path: &Path) -> Result<PdfInspectReport> {
    let data = std::fs::read(path)?;
    inspect_pdf_bytes(&data)
}

/// PDF text strings are UTF-16BE when they start with a BOM, PDFDocEncoding
/// (close enough to Latin-1 here) otherwise.
fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|b| char::from(*b)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::pdf::{PdfOptions, document_to_pdf};
    use crate::types::{Pt, Size};

    fn two_page_pdf(title: Option<&str>) -> Vec<u8> {
        let mut canvas = Canvas::new(Size::a4());
        canvas.draw_string(Pt::from_i32(72), Pt::from_i32(72), "one");
        canvas.show_page();
        canvas.draw_string(Pt::from_i32(72), Pt::from_i32(72), "two");
        let options = PdfOptions {
            title: title.map(str::to_string),
            ..PdfOptions::default()
        };
        document_to_pdf(&canvas.finish(), &options).expect("pdf")
    }

    #[test]
    fn reads_version_page_count_and_title() {
        let bytes = two_page_pdf(Some("Fluxograma Simplificado"));
        let report = inspect_pdf_bytes(&bytes).expect("inspect");
        assert_eq!(report.page_count, 2);
        assert_eq!(report.pdf_version, "1.7");
        assert!(!report.encrypted);
        assert_eq!(report.file_size_bytes, bytes.len());
        assert_eq!(report.title.as_deref(), Some("Fluxograma Simplificado"));
    }

    #[test]
    fn malformed_data_is_a_pdf_error() {
        let err = inspect_pdf_bytes(b"not a pdf").expect_err("invalid");
        assert!(matches!(err, MarkpageError::Pdf(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = inspect_pdf_path(&dir.path().join("missing.pdf")).expect_err("missing");
        assert!(matches!(err, MarkpageError::Io(_)));
    }

    #[test]
    fn path_and_bytes_agree() {
        let bytes = two_page_pdf(None);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.pdf");
        std::fs::write(&path, &bytes).expect("write");
        let from_path = inspect_pdf_path(&path).expect("path");
        assert_eq!(from_path, inspect_pdf_bytes(&bytes).expect("bytes"));
        assert_eq!(from_path.title, None);
    }

    #[test]
    fn utf16_titles_decode() {
        assert_eq!(decode_text_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE9]), "Aé");
        assert_eq!(decode_text_string(b"plain"), "plain");
    }
}
