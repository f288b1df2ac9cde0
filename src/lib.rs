//! PDF Signature Fields Library
//!
//! Finds likely signature, date, initial and name fields in a PDF's text, and
//! flattens signed values (drawn signatures, typed text) into page content.
//! Also assembles documents: merging, page extraction, a completion
//! watermark and a certificate-of-completion page. Shared between CLI and
//! WASM targets.
//!
//! Every operation is a pure function over byte buffers. Positions exchanged
//! with callers are percentages of the page with a top-left origin; see
//! [`geometry`] for the conversions to PDF user space.

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub mod assemble;
pub mod certificate;
pub mod detect;
pub mod extract;
pub mod flatten;
pub mod font;
pub mod geometry;
mod page;

pub use assemble::{extract_pages, merge_documents};
pub use certificate::{add_completion_watermark, append_certificate, build_certificate_page, Signer};
pub use detect::{
    categorize_locations, detect_field_locations, detect_field_locations_with, CategorizedLocations,
    DetectedLocation, DetectorConfig, PageText, TextRun,
};
pub use extract::{detect_pdf_fields, extract_text_runs, ExtractOptions, TextExtractor};
pub use flatten::{flatten, Field, FieldKind, FilledField};
pub use geometry::{PageSize, PercentRect};

use lopdf::Document;

/// Options for flattening
#[derive(Debug, Clone)]
pub struct FlattenOptions {
    /// JPEG quality (1-100, only affects images without alpha)
    pub image_quality: u8,
    /// Compress PDF streams (reduces file size)
    pub compress_streams: bool,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            image_quality: 90,
            compress_streams: true,
        }
    }
}

impl FlattenOptions {
    pub fn validate(&self) -> Result<(), PdfSignError> {
        if self.image_quality == 0 || self.image_quality > 100 {
            return Err(PdfSignError::InvalidQuality);
        }
        Ok(())
    }
}

/// Error type for signature-field operations
#[derive(Debug, thiserror::Error)]
pub enum PdfSignError {
    #[error("Quality must be between 1 and 100")]
    InvalidQuality,
    #[error("Failed to load PDF: {0}")]
    LoadError(String),
    #[error("Failed to save PDF: {0}")]
    SaveError(String),
    #[error("Failed to decode image: {0}")]
    ImageError(String),
    #[error("Page {page} is out of range (document has {count} pages)")]
    PageOutOfRange { page: u32, count: usize },
    #[error("Nothing to do: {0}")]
    EmptyInput(&'static str),
    #[error("Processing error: {0}")]
    ProcessingError(String),
}

pub(crate) fn load_document(pdf_bytes: &[u8]) -> Result<Document, PdfSignError> {
    Document::load_mem(pdf_bytes).map_err(|e| PdfSignError::LoadError(e.to_string()))
}

pub(crate) fn save_document(doc: &mut Document) -> Result<Vec<u8>, PdfSignError> {
    let mut output_bytes = Vec::new();
    doc.save_to(&mut output_bytes)
        .map_err(|e| PdfSignError::SaveError(e.to_string()))?;
    Ok(output_bytes)
}

#[cfg(not(target_arch = "wasm32"))]
pub mod file_ops {
    use super::*;
    use std::path::Path;

    fn read_pdf(path: &Path) -> Result<Vec<u8>, PdfSignError> {
        std::fs::read(path).map_err(|e| PdfSignError::LoadError(format!("{:?}: {}", path, e)))
    }

    fn write_pdf(path: &Path, bytes: &[u8]) -> Result<(), PdfSignError> {
        std::fs::write(path, bytes)
            .map_err(|e| PdfSignError::SaveError(format!("{:?}: {}", path, e)))
    }

    /// Detect field locations in a PDF file
    pub fn detect_fields_file(input_path: &Path) -> Result<Vec<DetectedLocation>, PdfSignError> {
        detect_pdf_fields(&read_pdf(input_path)?)
    }

    /// Flatten filled fields into a PDF, from file path to file path
    pub fn flatten_pdf_file(
        input_path: &Path,
        output_path: &Path,
        fields: &[FilledField],
        options: &FlattenOptions,
    ) -> Result<(), PdfSignError> {
        options.validate()?;
        let output = flatten(&read_pdf(input_path)?, fields, options)?;
        write_pdf(output_path, &output)
    }

    /// Merge PDF files, in the given order, into one output file
    pub fn merge_pdf_files<P: AsRef<Path>>(
        input_paths: &[P],
        output_path: &Path,
    ) -> Result<(), PdfSignError> {
        let inputs = input_paths
            .iter()
            .map(|p| read_pdf(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        write_pdf(output_path, &merge_documents(&inputs)?)
    }

    /// Copy the selected 1-based pages of a PDF file into a new file
    pub fn extract_pages_file(
        input_path: &Path,
        output_path: &Path,
        pages: &[u32],
    ) -> Result<(), PdfSignError> {
        write_pdf(output_path, &extract_pages(&read_pdf(input_path)?, pages)?)
    }

}
