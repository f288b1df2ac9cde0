//! Document assembly: merging whole documents and copying selected pages
//! into a fresh document.

use crate::page::{inherited_attribute, INHERITABLE_KEYS};
use crate::{load_document, save_document, PdfSignError};
use lopdf::{dictionary, Dictionary, Document, Object};

/// Merge several PDFs into one, keeping every page in input order
pub fn merge_documents<B: AsRef<[u8]>>(documents: &[B]) -> Result<Vec<u8>, PdfSignError> {
    if documents.is_empty() {
        return Err(PdfSignError::EmptyInput("no documents to merge"));
    }

    let mut sources = Vec::with_capacity(documents.len());
    for (i, bytes) in documents.iter().enumerate() {
        let doc = load_document(bytes.as_ref())
            .map_err(|e| PdfSignError::LoadError(format!("document {}: {}", i + 1, e)))?;
        let selected: Vec<u32> = doc.get_pages().keys().copied().collect();
        sources.push((doc, selected));
    }

    tracing::debug!(documents = sources.len(), "merging documents");
    assemble(sources)
}

/// Copy the given 1-based pages, in the given order, into a new document.
///
/// A page listed more than once appears more than once.
pub fn extract_pages(pdf_bytes: &[u8], pages: &[u32]) -> Result<Vec<u8>, PdfSignError> {
    if pages.is_empty() {
        return Err(PdfSignError::EmptyInput("no pages selected"));
    }

    let doc = load_document(pdf_bytes)?;
    let available = doc.get_pages();
    if let Some(&page) = pages.iter().find(|p| !available.contains_key(p)) {
        return Err(PdfSignError::PageOutOfRange {
            page,
            count: available.len(),
        });
    }

    tracing::debug!(pages = ?pages, "extracting pages");
    assemble(vec![(doc, pages.to_vec())])
}

/// Build a new document from the selected pages of each source
fn assemble(sources: Vec<(Document, Vec<u32>)>) -> Result<Vec<u8>, PdfSignError> {
    let version = sources
        .first()
        .map(|(doc, _)| doc.version.clone())
        .unwrap_or_else(|| "1.5".to_string());
    let mut document = Document::with_version(version);
    let mut max_id: u32 = 1;
    let mut page_dicts: Vec<Dictionary> = Vec::new();

    for (mut doc, selected) in sources {
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        let pages = doc.get_pages();
        for number in &selected {
            let Some(&page_id) = pages.get(number) else {
                continue;
            };
            let mut dict = doc
                .get_object(page_id)
                .and_then(|o| o.as_dict())
                .cloned()
                .map_err(|e| PdfSignError::ProcessingError(format!("page {}: {}", number, e)))?;
            for key in INHERITABLE_KEYS {
                if !dict.has(key) {
                    if let Some(value) = inherited_attribute(&doc, page_id, key) {
                        dict.set(key.to_vec(), value);
                    }
                }
            }
            page_dicts.push(dict);
        }

        for (object_id, object) in doc.objects {
            match object.type_name().unwrap_or(b"") {
                b"Catalog" | b"Pages" | b"Page" | b"Outlines" | b"Outline" => {}
                _ => {
                    document.objects.insert(object_id, object);
                }
            }
        }
    }

    document.max_id = max_id;
    let pages_id = document.new_object_id();

    let kids: Vec<Object> = page_dicts
        .into_iter()
        .map(|mut dict| {
            dict.set("Parent", pages_id);
            Object::Reference(document.add_object(dict))
        })
        .collect();
    let count = kids.len() as i64;

    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    // Drop whatever only the unselected pages referenced
    document.prune_objects();
    document.compress();
    save_document(&mut document)
}
