//! WebAssembly bindings for PDF signature fields

use crate::{
    add_completion_watermark, build_certificate_page, detect_pdf_fields, extract_pages,
    extract_text_runs, flatten, merge_documents, FilledField, FlattenOptions, Signer,
};
use chrono::{DateTime, Utc};
use wasm_bindgen::prelude::*;

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

fn js_error(e: impl std::fmt::Display) -> JsError {
    JsError::new(&e.to_string())
}

/// Detect likely signature, date, initial and name fields
///
/// # Returns
/// A JSON array of `{ page, x, y, type, keyword, confidence }` objects
#[wasm_bindgen]
pub fn detect_fields(pdf_bytes: &[u8]) -> Result<String, JsError> {
    let locations = detect_pdf_fields(pdf_bytes).map_err(js_error)?;
    serde_json::to_string(&locations).map_err(js_error)
}

/// Extract positioned text runs for every page, as JSON
#[wasm_bindgen]
pub fn extract_text(pdf_bytes: &[u8]) -> Result<String, JsError> {
    let pages = extract_text_runs(pdf_bytes).map_err(js_error)?;
    serde_json::to_string(&pages).map_err(js_error)
}

/// Burn filled field values into the PDF
///
/// # Arguments
/// * `pdf_bytes` - The input PDF file as a byte array
/// * `fields_json` - JSON array of fields, each with a `value`
/// * `quality` - JPEG quality 1-100 for opaque images (default: 90)
#[wasm_bindgen]
pub fn flatten_pdf(
    pdf_bytes: &[u8],
    fields_json: &str,
    quality: Option<u8>,
) -> Result<Vec<u8>, JsError> {
    let fields: Vec<FilledField> = serde_json::from_str(fields_json).map_err(js_error)?;
    let options = FlattenOptions {
        image_quality: quality.unwrap_or(90),
        ..Default::default()
    };
    flatten(pdf_bytes, &fields, &options).map_err(js_error)
}

/// Stamp "Signed on {label}" on page 1. Returns the input on failure.
#[wasm_bindgen]
pub fn add_watermark(pdf_bytes: &[u8], signed_date_label: &str) -> Vec<u8> {
    add_completion_watermark(pdf_bytes, signed_date_label)
}

/// Merge PDFs in array order
#[wasm_bindgen]
pub fn merge_pdfs(documents: js_sys::Array) -> Result<Vec<u8>, JsError> {
    let buffers: Vec<Vec<u8>> = documents
        .iter()
        .map(|value| js_sys::Uint8Array::new(&value).to_vec())
        .collect();
    merge_documents(&buffers).map_err(js_error)
}

/// Copy the given 1-based pages, in order, into a new PDF
#[wasm_bindgen]
pub fn extract_pdf_pages(pdf_bytes: &[u8], pages: &[u32]) -> Result<Vec<u8>, JsError> {
    extract_pages(pdf_bytes, pages).map_err(js_error)
}

/// Build a certificate-of-completion page
///
/// # Arguments
/// * `title` - Document title
/// * `signers_json` - JSON array of `{ name, email, signedAt }`
/// * `completed_at` - RFC 3339 timestamp
#[wasm_bindgen]
pub fn build_certificate(
    title: &str,
    signers_json: &str,
    completed_at: &str,
) -> Result<Vec<u8>, JsError> {
    let signers: Vec<Signer> = serde_json::from_str(signers_json).map_err(js_error)?;
    let completed_at: DateTime<Utc> = DateTime::parse_from_rfc3339(completed_at)
        .map_err(js_error)?
        .with_timezone(&Utc);
    build_certificate_page(title, &signers, completed_at).map_err(js_error)
}
