//! Text-run extraction from PDF content streams.
//!
//! Walks each page's content (and any Form XObjects it paints), tracking the
//! graphics and text matrices, and records one [`TextRun`] per text-showing
//! operator. Positions are reported with a top-left origin so they can be fed
//! straight into the detector.

use crate::detect::{detect_field_locations, DetectedLocation, PageText, TextRun};
use crate::font::decode_win_ansi;
use crate::geometry::flip_y;
use crate::page::{
    content_data, decompress_stream, inherited_attribute, obj_to_f32, page_size, resolve,
};
use crate::{load_document, PdfSignError};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::HashSet;

/// Options for text extraction
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Glyph width (1/1000 em) used when a font carries no Widths array
    pub default_glyph_width: f32,
    /// A TJ adjustment at or below minus this value (1/1000 em) counts as a word gap
    pub space_threshold: f32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            default_glyph_width: 500.0,
            space_threshold: 250.0,
        }
    }
}

/// Extracts positioned text runs from PDF documents.
///
/// Construct once and reuse; it holds no per-document state.
#[derive(Debug, Clone, Default)]
pub struct TextExtractor {
    options: ExtractOptions,
}

impl TextExtractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }

    /// Extract text runs for every page of a PDF, in page order
    pub fn extract(&self, pdf_bytes: &[u8]) -> Result<Vec<PageText>, PdfSignError> {
        let doc = load_document(pdf_bytes)?;
        Ok(self.extract_document(&doc))
    }

    pub fn extract_document(&self, doc: &Document) -> Vec<PageText> {
        doc.get_pages()
            .into_iter()
            .map(|(page_number, page_id)| {
                let page = self.extract_page(doc, page_id);
                tracing::debug!(page = page_number, runs = page.runs.len(), "extracted text runs");
                page
            })
            .collect()
    }

    fn extract_page(&self, doc: &Document, page_id: ObjectId) -> PageText {
        let size = page_size(doc, page_id);
        let mut scanner = PageScanner {
            doc,
            options: &self.options,
            page_height: size.height,
            runs: Vec::new(),
            active_forms: HashSet::new(),
        };

        let resources = inherited_attribute(doc, page_id, b"Resources")
            .and_then(|r| resolve(doc, &r).and_then(|o| o.as_dict().ok()).cloned())
            .unwrap_or_default();
        let contents = doc
            .get_object(page_id)
            .and_then(|o| o.as_dict())
            .and_then(|d| d.get(b"Contents"))
            .ok();
        if let Some(contents) = contents {
            let data = content_data(doc, contents);
            scanner.scan_content(&data, &resources, Matrix::identity());
        }

        PageText {
            width: size.width,
            height: size.height,
            runs: scanner.runs,
        }
    }
}

/// Extract text runs with default options
pub fn extract_text_runs(pdf_bytes: &[u8]) -> Result<Vec<PageText>, PdfSignError> {
    TextExtractor::default().extract(pdf_bytes)
}

/// Extract text from a PDF and run field detection over it
pub fn detect_pdf_fields(pdf_bytes: &[u8]) -> Result<Vec<DetectedLocation>, PdfSignError> {
    let pages = extract_text_runs(pdf_bytes)?;
    Ok(detect_field_locations(&pages))
}

/// 2D transformation matrix [a, b, c, d, e, f]
/// Represents: | a b 0 |
///             | c d 0 |
///             | e f 1 |
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Matrix {
    fn identity() -> Self {
        Matrix::translate(0.0, 0.0)
    }

    fn translate(e: f32, f: f32) -> Self {
        Matrix {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e,
            f,
        }
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        if operands.len() < 6 {
            return None;
        }
        Some(Matrix {
            a: obj_to_f32(&operands[0])?,
            b: obj_to_f32(&operands[1])?,
            c: obj_to_f32(&operands[2])?,
            d: obj_to_f32(&operands[3])?,
            e: obj_to_f32(&operands[4])?,
            f: obj_to_f32(&operands[5])?,
        })
    }

    /// Concatenate another matrix: self * other
    fn concat(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    fn scale_y(&self) -> f32 {
        (self.c * self.c + self.d * self.d).sqrt()
    }
}

/// Widths and byte layout of the current font
#[derive(Debug, Clone, Default)]
struct FontMetrics {
    first_char: i64,
    widths: Vec<f32>,
    two_byte: bool,
}

impl FontMetrics {
    fn from_dict(doc: &Document, font: &Dictionary) -> Self {
        let two_byte = font.get(b"Subtype").and_then(|s| s.as_name()).ok() == Some(&b"Type0"[..]);
        let first_char = font
            .get(b"FirstChar")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(0);
        let widths = font
            .get(b"Widths")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_array().ok())
            .map(|arr| {
                arr.iter()
                    .map(|w| resolve(doc, w).and_then(obj_to_f32).unwrap_or(0.0))
                    .collect()
            })
            .unwrap_or_default();
        FontMetrics {
            first_char,
            widths,
            two_byte,
        }
    }

    /// Decode string bytes, returning the text and its advance in 1/1000 em
    fn decode(&self, bytes: &[u8], default_width: f32) -> (String, f32) {
        if self.two_byte {
            let text = bytes
                .chunks(2)
                .map(|pair| {
                    let code = pair.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
                    char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
                })
                .collect::<String>();
            let units = text.chars().count() as f32 * default_width;
            return (text, units);
        }

        let mut units = 0.0;
        let text = bytes
            .iter()
            .map(|&b| {
                let index = i64::from(b) - self.first_char;
                units += usize::try_from(index)
                    .ok()
                    .and_then(|i| self.widths.get(i))
                    .copied()
                    .filter(|w| *w > 0.0)
                    .unwrap_or(default_width);
                decode_win_ansi(b)
            })
            .collect::<String>();
        (text, units)
    }
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    font: FontMetrics,
    font_size: f32,
    leading: f32,
}

struct TextState {
    tm: Matrix,
    tlm: Matrix,
}

impl TextState {
    fn move_line(&mut self, tx: f32, ty: f32) {
        self.tlm = Matrix::translate(tx, ty).concat(&self.tlm);
        self.tm = self.tlm;
    }

    fn advance(&mut self, tx: f32) {
        self.tm = Matrix::translate(tx, 0.0).concat(&self.tm);
    }
}

struct PageScanner<'a> {
    doc: &'a Document,
    options: &'a ExtractOptions,
    page_height: f32,
    runs: Vec<TextRun>,
    /// Form XObjects on the current recursion path
    active_forms: HashSet<ObjectId>,
}

impl<'a> PageScanner<'a> {
    fn scan_content(&mut self, content: &[u8], resources: &Dictionary, base: Matrix) {
        let operations = match Content::decode(content) {
            Ok(content) => content.operations,
            Err(e) => {
                tracing::warn!(error = %e, "could not parse content stream, skipping it");
                return;
            }
        };

        let mut stack = vec![GraphicsState {
            ctm: base,
            font: FontMetrics::default(),
            font_size: 0.0,
            leading: 0.0,
        }];
        let mut text = TextState {
            tm: Matrix::identity(),
            tlm: Matrix::identity(),
        };

        for op in &operations {
            let operands = &op.operands;
            let number = |i: usize| operands.get(i).and_then(obj_to_f32);
            let Some(state) = stack.last_mut() else { break };

            match op.operator.as_str() {
                "q" => {
                    let saved = state.clone();
                    stack.push(saved);
                }
                "Q" => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        state.ctm = m.concat(&state.ctm);
                    }
                }
                "BT" => {
                    text.tm = Matrix::identity();
                    text.tlm = Matrix::identity();
                }
                "Tf" => {
                    if let (Some(name), Some(size)) =
                        (operands.first().and_then(|o| o.as_name().ok()), number(1))
                    {
                        state.font = self.font_metrics(resources, name);
                        state.font_size = size;
                    }
                }
                "TL" => {
                    if let Some(leading) = number(0) {
                        state.leading = leading;
                    }
                }
                "Td" | "TD" => {
                    if let (Some(tx), Some(ty)) = (number(0), number(1)) {
                        if op.operator == "TD" {
                            state.leading = -ty;
                        }
                        text.move_line(tx, ty);
                    }
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        text.tm = m;
                        text.tlm = m;
                    }
                }
                "T*" => text.move_line(0.0, -state.leading),
                "Tj" => self.show(&mut text, state, &operands[..operands.len().min(1)]),
                "'" => {
                    text.move_line(0.0, -state.leading);
                    self.show(&mut text, state, &operands[..operands.len().min(1)]);
                }
                "\"" => {
                    text.move_line(0.0, -state.leading);
                    self.show(&mut text, state, operands.get(2..).unwrap_or(&[]));
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = operands.first() {
                        self.show(&mut text, state, items);
                    }
                }
                "Do" => {
                    if let Some(name) = operands.first().and_then(|o| o.as_name().ok()) {
                        let ctm = state.ctm;
                        self.scan_form_xobject(resources, name, ctm);
                    }
                }
                _ => {}
            }
        }
    }

    /// Record one run for a text-showing operator and advance the text matrix
    fn show(&mut self, text: &mut TextState, state: &GraphicsState, items: &[Object]) {
        let start = text.tm.concat(&state.ctm);
        let mut shown = String::new();

        for item in items {
            match item {
                Object::String(bytes, _) => {
                    let (decoded, units) =
                        state.font.decode(bytes, self.options.default_glyph_width);
                    shown.push_str(&decoded);
                    text.advance(units / 1000.0 * state.font_size);
                }
                other => {
                    if let Some(adjust) = obj_to_f32(other) {
                        text.advance(-adjust / 1000.0 * state.font_size);
                        if adjust <= -self.options.space_threshold
                            && !shown.is_empty()
                            && !shown.ends_with(' ')
                        {
                            shown.push(' ');
                        }
                    }
                }
            }
        }

        if shown.trim().is_empty() {
            return;
        }
        let end = text.tm.concat(&state.ctm);
        self.runs.push(TextRun {
            text: shown.trim_end().to_string(),
            x: start.e,
            y: flip_y(start.f, self.page_height),
            width: (end.e - start.e).abs(),
            height: state.font_size * start.scale_y(),
        });
    }

    fn font_metrics(&self, resources: &Dictionary, name: &[u8]) -> FontMetrics {
        resources
            .get(b"Font")
            .ok()
            .and_then(|fonts| resolve(self.doc, fonts))
            .and_then(|fonts| fonts.as_dict().ok())
            .and_then(|fonts| fonts.get(name).ok())
            .and_then(|font| resolve(self.doc, font))
            .and_then(|font| font.as_dict().ok())
            .map(|font| FontMetrics::from_dict(self.doc, font))
            .unwrap_or_default()
    }

    /// Scan a Form XObject's content stream
    fn scan_form_xobject(&mut self, resources: &Dictionary, name: &[u8], ctm: Matrix) {
        let form_id = match resources
            .get(b"XObject")
            .ok()
            .and_then(|x| resolve(self.doc, x))
            .and_then(|x| x.as_dict().ok())
            .and_then(|x| x.get(name).ok())
        {
            Some(Object::Reference(id)) => *id,
            _ => return,
        };

        // A form painting itself, directly or through others
        if self.active_forms.contains(&form_id) {
            return;
        }

        let stream = match self.doc.get_object(form_id) {
            Ok(Object::Stream(s)) => s,
            _ => return,
        };
        if stream.dict.get(b"Subtype").and_then(|s| s.as_name()).ok() != Some(&b"Form"[..]) {
            return;
        }

        let form_matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|m| m.as_array().ok())
            .and_then(|arr| Matrix::from_operands(arr))
            .unwrap_or_else(Matrix::identity);
        let form_resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|r| resolve(self.doc, r))
            .and_then(|r| r.as_dict().ok())
            .cloned()
            .unwrap_or_else(|| resources.clone());

        let content = decompress_stream(stream);
        self.active_forms.insert(form_id);
        self.scan_content(&content, &form_resources, form_matrix.concat(&ctm));
        self.active_forms.remove(&form_id);
    }
}
