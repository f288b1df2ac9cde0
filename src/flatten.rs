//! Burn signer-submitted values into page content.
//!
//! Signatures and initials are embedded as image XObjects, dates and free
//! text are drawn with the standard Helvetica font. Both become part of the
//! page's content stream, so nothing is left as an editable overlay.

use crate::detect::DetectedLocation;
use crate::font::{self, HELVETICA};
use crate::geometry::{fit_image, percent_rect_to_points, PercentRect, PointRect};
use crate::page::{add_page_resource, append_page_content, page_size};
use crate::{load_document, save_document, FlattenOptions, PdfSignError};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use image::DynamicImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Left padding for text values, in points
const TEXT_LEFT_PAD: f32 = 5.0;
const DATE_FONT_SIZE: f32 = 12.0;
const TEXT_FONT_SIZE: f32 = 10.0;

/// What a field collects from the signer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Signature,
    Initial,
    Date,
    Text,
}

impl FieldKind {
    /// Signature-like fields carry an image value
    pub fn is_image(self) -> bool {
        matches!(self, FieldKind::Signature | FieldKind::Initial)
    }

    /// Default box size (width, height) in percent for a new field
    fn default_size(self) -> (f32, f32) {
        match self {
            FieldKind::Signature => (25.0, 6.0),
            FieldKind::Initial => (10.0, 5.0),
            FieldKind::Date => (18.0, 4.0),
            FieldKind::Text => (25.0, 4.0),
        }
    }
}

fn default_required() -> bool {
    true
}

/// A placed, signable region. Geometry is in percent of the page with a
/// top-left origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// 1-based page number
    pub page: u32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl Field {
    /// Seed an editable field from a detection, sized for its kind
    pub fn from_detected(location: &DetectedLocation) -> Self {
        let (width, height) = location.kind.default_size();
        let rect = PercentRect {
            x: location.x,
            y: location.y,
            width,
            height,
        }
        .clamped();
        Field {
            kind: location.kind,
            page: location.page,
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            required: true,
            assignee: None,
            label: location.keyword.clone(),
        }
    }

    pub fn rect(&self) -> PercentRect {
        PercentRect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// A field joined with the value a signer submitted for it.
///
/// For signature and initial fields `value` is base64 image data (a
/// `data:image/...;base64,` prefix is accepted); otherwise it is literal text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilledField {
    #[serde(flatten)]
    pub field: Field,
    pub value: String,
}

/// Render every filled field into its page and return the new PDF bytes.
///
/// Fields on pages the document does not have are skipped.
pub fn flatten(
    pdf_bytes: &[u8],
    fields: &[FilledField],
    options: &FlattenOptions,
) -> Result<Vec<u8>, PdfSignError> {
    options.validate()?;
    let mut doc = load_document(pdf_bytes)?;
    let pages = doc.get_pages();

    let mut by_page: BTreeMap<u32, Vec<&FilledField>> = BTreeMap::new();
    for filled in fields {
        by_page.entry(filled.field.page).or_default().push(filled);
    }

    for (page_number, page_fields) in by_page {
        let Some(&page_id) = pages.get(&page_number) else {
            tracing::warn!(
                page = page_number,
                pages = pages.len(),
                fields = page_fields.len(),
                "skipping fields on a page the document does not have"
            );
            continue;
        };
        flatten_page(&mut doc, page_id, &page_fields, options)?;
        tracing::debug!(page = page_number, fields = page_fields.len(), "flattened page");
    }

    if options.compress_streams {
        doc.compress();
    }
    save_document(&mut doc)
}

fn flatten_page(
    doc: &mut Document,
    page_id: ObjectId,
    fields: &[&FilledField],
    options: &FlattenOptions,
) -> Result<(), PdfSignError> {
    let size = page_size(doc, page_id);
    let mut operations = Vec::new();
    let mut font_name: Option<String> = None;

    for filled in fields {
        if filled.value.trim().is_empty() {
            tracing::debug!(kind = ?filled.field.kind, "skipping field without a value");
            continue;
        }
        let bounds = percent_rect_to_points(&filled.field.rect().clamped(), size);

        if filled.field.kind.is_image() {
            let image = decode_image_value(&filled.value)?;
            let (xobject, width, height) = image_xobject(doc, &image, options.image_quality)?;
            let name =
                add_page_resource(doc, page_id, "XObject", "SigIm", Object::Reference(xobject))?;
            operations.extend(draw_image_ops(&name, &fit_image(width, height, &bounds)));
        } else {
            let name = match &font_name {
                Some(name) => name.clone(),
                None => {
                    let font_id = doc.add_object(font::standard_font_dict(HELVETICA));
                    let font_ref = Object::Reference(font_id);
                    let name = add_page_resource(doc, page_id, "Font", "SigF", font_ref)?;
                    font_name = Some(name.clone());
                    name
                }
            };
            let font_size = match filled.field.kind {
                FieldKind::Date => DATE_FONT_SIZE,
                _ => TEXT_FONT_SIZE,
            };
            operations.extend(draw_text_ops(&name, font_size, &filled.value, &bounds));
        }
    }

    if operations.is_empty() {
        return Ok(());
    }
    let content = Content { operations }
        .encode()
        .map_err(|e| PdfSignError::ProcessingError(format!("Failed to encode content: {}", e)))?;
    append_page_content(doc, page_id, content)
}

/// Decode a base64 (or data URL) image value
pub fn decode_image_value(value: &str) -> Result<DynamicImage, PdfSignError> {
    let data = match value.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => value,
    };
    let bytes = B64
        .decode(data.trim().as_bytes())
        .map_err(|e| PdfSignError::ImageError(format!("invalid base64: {}", e)))?;
    image::load_from_memory(&bytes).map_err(|e| PdfSignError::ImageError(e.to_string()))
}

/// Check if an image has meaningful alpha
fn has_alpha(img: &DynamicImage) -> bool {
    match img {
        DynamicImage::ImageRgba8(rgba) => rgba.pixels().any(|p| p.0[3] < 255),
        DynamicImage::ImageLumaA8(la) => la.pixels().any(|p| p.0[1] < 255),
        other if other.color().has_alpha() => other.to_rgba8().pixels().any(|p| p.0[3] < 255),
        _ => false,
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, PdfSignError> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::best());
    std::io::Write::write_all(&mut encoder, data)
        .map_err(|e| PdfSignError::ImageError(format!("Failed to compress image data: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| PdfSignError::ImageError(format!("Failed to finish compression: {}", e)))
}

/// Add an image XObject (plus its soft mask, if the image has transparency)
/// to the document. Returns the object id and pixel dimensions.
fn image_xobject(
    doc: &mut Document,
    img: &DynamicImage,
    quality: u8,
) -> Result<(ObjectId, u32, u32), PdfSignError> {
    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return Err(PdfSignError::ImageError("image has no pixels".to_string()));
    }

    if has_alpha(img) {
        let rgba = img.to_rgba8();
        let mut rgb_data = Vec::with_capacity((width * height * 3) as usize);
        let mut alpha_data = Vec::with_capacity((width * height) as usize);
        for pixel in rgba.pixels() {
            rgb_data.extend_from_slice(&pixel.0[..3]);
            alpha_data.push(pixel.0[3]);
        }

        let smask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha_data)?,
        );
        let smask_id = doc.add_object(smask);

        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
                "SMask" => smask_id,
            },
            deflate(&rgb_data)?,
        );
        Ok((doc.add_object(image), width, height))
    } else {
        let rgb = img.to_rgb8();
        let mut jpeg_bytes = Vec::new();
        let encoder = jpeg_encoder::Encoder::new(&mut jpeg_bytes, quality);
        encoder
            .encode(
                rgb.as_raw(),
                u16::try_from(width)
                    .map_err(|_| PdfSignError::ImageError("image too wide".to_string()))?,
                u16::try_from(height)
                    .map_err(|_| PdfSignError::ImageError("image too tall".to_string()))?,
                jpeg_encoder::ColorType::Rgb,
            )
            .map_err(|e| PdfSignError::ImageError(format!("Failed to encode JPEG: {}", e)))?;

        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg_bytes,
        );
        Ok((doc.add_object(image), width, height))
    }
}

fn draw_image_ops(name: &str, placed: &PointRect) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                Object::Real(placed.width),
                Object::Real(0.0),
                Object::Real(0.0),
                Object::Real(placed.height),
                Object::Real(placed.x),
                Object::Real(placed.y),
            ],
        ),
        Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
        Operation::new("Q", vec![]),
    ]
}

/// Left-aligned, vertically centered text in `bounds`
fn draw_text_ops(
    font_name: &str,
    font_size: f32,
    text: &str,
    bounds: &PointRect,
) -> Vec<Operation> {
    let baseline = bounds.y + (bounds.height - font_size) / 2.0;
    vec![
        Operation::new("BT", vec![]),
        Operation::new("g", vec![Object::Real(0.0)]),
        Operation::new(
            "Tf",
            vec![Object::Name(font_name.as_bytes().to_vec()), Object::Real(font_size)],
        ),
        Operation::new(
            "Td",
            vec![Object::Real(bounds.x + TEXT_LEFT_PAD), Object::Real(baseline)],
        ),
        Operation::new("Tj", vec![font::text_object(text)]),
        Operation::new("ET", vec![]),
    ]
}
