//! Completion artifacts: the "Signed on" watermark and the certificate page
//! listing every signer.

use crate::assemble::merge_documents;
use crate::font::{self, helvetica_width, HELVETICA, HELVETICA_BOLD};
use crate::page::{add_page_resource, append_page_content, page_size};
use crate::{load_document, save_document, PdfSignError};
use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde::{Deserialize, Serialize};

pub const CERTIFICATE_WIDTH: f32 = 612.0;
pub const CERTIFICATE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 50.0;
const BOTTOM_MARGIN: f32 = 60.0;
const LINE_HEIGHT: f32 = 18.0;
const SIGNER_BLOCK_HEIGHT: f32 = 48.0;

const WATERMARK_FONT_SIZE: f32 = 8.0;
const WATERMARK_INSET: f32 = 20.0;
const WATERMARK_GRAY: f32 = 0.5;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

/// A signer as listed on the certificate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signer {
    pub name: String,
    pub email: String,
    /// `None` while the signer has not signed yet
    #[serde(default)]
    pub signed_at: Option<DateTime<Utc>>,
}

/// One line of certificate text, positioned in PDF user space
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateLine {
    pub text: String,
    pub bold: bool,
    pub size: f32,
    pub x: f32,
    /// Baseline, bottom-left origin
    pub y: f32,
}

impl CertificateLine {
    fn new(text: impl Into<String>, bold: bool, size: f32, y: f32) -> Self {
        Self {
            text: text.into(),
            bold,
            size,
            x: MARGIN,
            y,
        }
    }
}

/// Lay out the certificate text top-down.
///
/// Signer blocks that would cross the bottom margin are left out, along with
/// every signer after them.
pub fn certificate_lines(
    title: &str,
    signers: &[Signer],
    completed_at: DateTime<Utc>,
) -> Vec<CertificateLine> {
    let mut lines = Vec::new();
    let mut y = CERTIFICATE_HEIGHT - MARGIN - 20.0;

    lines.push(CertificateLine::new("Certificate of Completion", true, 20.0, y));
    y -= 2.0 * LINE_HEIGHT;
    lines.push(CertificateLine::new(format!("Document: {}", title), false, 12.0, y));
    y -= LINE_HEIGHT;
    lines.push(CertificateLine::new(
        format!("Completed: {}", completed_at.format(TIMESTAMP_FORMAT)),
        false,
        12.0,
        y,
    ));
    y -= 2.0 * LINE_HEIGHT;
    lines.push(CertificateLine::new("Signers", true, 14.0, y));
    y -= 24.0;

    for (i, signer) in signers.iter().enumerate() {
        if y - SIGNER_BLOCK_HEIGHT < BOTTOM_MARGIN {
            tracing::warn!(
                shown = i,
                omitted = signers.len() - i,
                "certificate page is full, omitting remaining signers"
            );
            break;
        }
        let status = match signer.signed_at {
            Some(at) => format!("Signed: {}", at.format(TIMESTAMP_FORMAT)),
            None => "Pending".to_string(),
        };
        lines.push(CertificateLine::new(signer.name.as_str(), true, 12.0, y));
        lines.push(CertificateLine::new(signer.email.as_str(), false, 11.0, y - 15.0));
        lines.push(CertificateLine::new(status, false, 11.0, y - 30.0));
        y -= SIGNER_BLOCK_HEIGHT;
    }

    lines
}

/// Build a single US-Letter page certifying completion
pub fn build_certificate_page(
    title: &str,
    signers: &[Signer],
    completed_at: DateTime<Utc>,
) -> Result<Vec<u8>, PdfSignError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular_id = doc.add_object(font::standard_font_dict(HELVETICA));
    let bold_id = doc.add_object(font::standard_font_dict(HELVETICA_BOLD));

    let mut operations = vec![Operation::new("BT", vec![])];
    for line in certificate_lines(title, signers, completed_at) {
        let font_name = if line.bold { "F2" } else { "F1" };
        operations.push(Operation::new("Tf", vec![font_name.into(), line.size.into()]));
        operations.push(Operation::new(
            "Tm",
            vec![1.into(), 0.into(), 0.into(), 1.into(), line.x.into(), line.y.into()],
        ));
        operations.push(Operation::new("Tj", vec![font::text_object(&line.text)]));
    }
    operations.push(Operation::new("ET", vec![]));

    let content = Content { operations }.encode().map_err(|e| {
        PdfSignError::ProcessingError(format!("Failed to encode certificate: {}", e))
    })?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), CERTIFICATE_WIDTH.into(), CERTIFICATE_HEIGHT.into()],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "Font" => dictionary! {
                "F1" => regular_id,
                "F2" => bold_id,
            },
        },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    doc.compress();
    save_document(&mut doc)
}

/// Append a certificate page after the last page of `pdf_bytes`
pub fn append_certificate(
    pdf_bytes: &[u8],
    title: &str,
    signers: &[Signer],
    completed_at: DateTime<Utc>,
) -> Result<Vec<u8>, PdfSignError> {
    let certificate = build_certificate_page(title, signers, completed_at)?;
    merge_documents(&[pdf_bytes, certificate.as_slice()])
}

/// Stamp "Signed on {label}" in the bottom-right corner of the first page.
///
/// Never fails: if anything goes wrong the input is returned unchanged.
pub fn add_completion_watermark(pdf_bytes: &[u8], signed_date_label: &str) -> Vec<u8> {
    match watermark(pdf_bytes, signed_date_label) {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "could not add completion watermark, returning the original PDF"
            );
            pdf_bytes.to_vec()
        }
    }
}

fn watermark(pdf_bytes: &[u8], signed_date_label: &str) -> Result<Vec<u8>, PdfSignError> {
    let mut doc = load_document(pdf_bytes)?;
    let page_id = *doc
        .get_pages()
        .get(&1)
        .ok_or_else(|| PdfSignError::ProcessingError("document has no pages".to_string()))?;
    let size = page_size(&doc, page_id);

    let text = format!("Signed on {}", signed_date_label);
    let x = size.width - WATERMARK_INSET - helvetica_width(&text, WATERMARK_FONT_SIZE);
    let font_id = doc.add_object(font::standard_font_dict(HELVETICA));
    let font_name =
        add_page_resource(&mut doc, page_id, "Font", "SigF", Object::Reference(font_id))?;

    let operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("g", vec![WATERMARK_GRAY.into()]),
        Operation::new("Tf", vec![font_name.as_str().into(), WATERMARK_FONT_SIZE.into()]),
        Operation::new("Td", vec![x.into(), WATERMARK_INSET.into()]),
        Operation::new("Tj", vec![font::text_object(&text)]),
        Operation::new("ET", vec![]),
    ];
    let content = Content { operations }
        .encode()
        .map_err(|e| PdfSignError::ProcessingError(format!("Failed to encode watermark: {}", e)))?;
    append_page_content(&mut doc, page_id, content)?;

    save_document(&mut doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{content_data, obj_to_f32};
    use crate::test_support::{blank_pdf, page_ids};
    use chrono::TimeZone;

    fn completed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 14, 30, 0).unwrap()
    }

    fn signer(i: usize, signed: bool) -> Signer {
        Signer {
            name: format!("Signer {}", i),
            email: format!("signer{}@example.com", i),
            signed_at: signed.then(completed),
        }
    }

    fn page_operations(doc: &Document, page_number: u32) -> Vec<Operation> {
        let page_id = doc.get_pages()[&page_number];
        let contents = doc
            .get_object(page_id)
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Contents")
            .unwrap();
        Content::decode(&content_data(doc, contents)).unwrap().operations
    }

    fn shown_text(operations: &[Operation]) -> Vec<String> {
        operations
            .iter()
            .filter(|op| op.operator == "Tj")
            .map(|op| String::from_utf8_lossy(op.operands[0].as_str().unwrap()).to_string())
            .collect()
    }

    #[test]
    fn test_lines_list_every_signer() {
        let lines = certificate_lines("Lease", &[signer(1, true), signer(2, false)], completed());
        let text: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();

        assert_eq!(text[0], "Certificate of Completion");
        assert!(lines[0].bold && lines[0].size == 20.0);
        assert!(text.contains(&"Document: Lease"));
        assert!(text.contains(&"Completed: 2026-10-18 14:30 UTC"));
        assert!(text.contains(&"signer1@example.com"));
        assert!(text.contains(&"Signed: 2026-10-18 14:30 UTC"));
        assert!(text.contains(&"Pending"));
        // lines run top-down
        assert!(lines.windows(2).all(|w| w[0].y > w[1].y));
    }

    #[test]
    fn test_excess_signers_are_omitted() {
        let signers: Vec<Signer> = (0..40).map(|i| signer(i, true)).collect();
        let lines = certificate_lines("Big", &signers, completed());

        let shown = lines.iter().filter(|l| l.text.contains('@')).count();
        assert!(shown > 0 && shown < signers.len());
        assert!(lines.iter().all(|l| l.y >= BOTTOM_MARGIN));

        // one more block would not have fit
        let last_status = lines.last().unwrap();
        assert!(last_status.y - 18.0 - SIGNER_BLOCK_HEIGHT < BOTTOM_MARGIN);
    }

    #[test]
    fn test_certificate_is_one_letter_page() {
        let pdf = build_certificate_page("Lease", &[signer(1, true)], completed()).unwrap();
        let doc = Document::load_mem(&pdf).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        let page_id = page_ids(&doc)[0];
        assert_eq!(page_size(&doc, page_id).width, 612.0);
        assert_eq!(page_size(&doc, page_id).height, 792.0);

        let text = shown_text(&page_operations(&doc, 1));
        assert!(text.contains(&"Signer 1".to_string()));
    }

    #[test]
    fn test_append_certificate_adds_last_page() {
        let pdf = blank_pdf(&[(595.0, 842.0), (595.0, 842.0)]);
        let out = append_certificate(&pdf, "Lease", &[signer(1, false)], completed()).unwrap();
        let doc = Document::load_mem(&out).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
        let ids = page_ids(&doc);
        assert_eq!(page_size(&doc, ids[0]).width, 595.0);
        assert_eq!(page_size(&doc, ids[2]).width, 612.0);
        assert!(shown_text(&page_operations(&doc, 3)).contains(&"Pending".to_string()));
    }

    #[test]
    fn test_watermark_on_invalid_bytes_returns_input() {
        let garbage = b"%PDF-1.7\ntruncated".to_vec();
        assert_eq!(add_completion_watermark(&garbage, "2026-10-18"), garbage);
        assert_eq!(add_completion_watermark(&[], "2026-10-18"), Vec::<u8>::new());
    }

    #[test]
    fn test_watermark_is_right_aligned_on_first_page_only() {
        let pdf = blank_pdf(&[(612.0, 792.0), (612.0, 792.0)]);
        let out = add_completion_watermark(&pdf, "2026-10-18");
        assert_ne!(out, pdf);
        let doc = Document::load_mem(&out).unwrap();

        let first = page_operations(&doc, 1);
        let text = "Signed on 2026-10-18";
        assert!(shown_text(&first).contains(&text.to_string()));
        let td = first.iter().find(|op| op.operator == "Td").unwrap();
        let x = obj_to_f32(&td.operands[0]).unwrap();
        let y = obj_to_f32(&td.operands[1]).unwrap();
        assert!((x + helvetica_width(text, 8.0) - 592.0).abs() < 1e-2);
        assert!((y - 20.0).abs() < 1e-3);

        assert!(shown_text(&page_operations(&doc, 2)).is_empty());
    }
}
