//! Low-level page helpers shared by the extractor, flattener and assembler.

use crate::geometry::{PageSize, LETTER};
use crate::PdfSignError;
use flate2::read::ZlibDecoder;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::io::Read;

/// Page attributes that may be inherited from an ancestor `Pages` node
pub const INHERITABLE_KEYS: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Guard against cyclic `Parent` chains in malformed files
const MAX_TREE_DEPTH: usize = 32;

/// Decompress a stream's content
pub fn decompress_stream(stream: &Stream) -> Vec<u8> {
    let filters: Vec<Vec<u8>> = match stream.dict.get(b"Filter") {
        Ok(Object::Name(n)) => vec![n.clone()],
        Ok(Object::Array(arr)) => arr
            .iter()
            .filter_map(|f| f.as_name().ok().map(|n| n.to_vec()))
            .collect(),
        _ => Vec::new(),
    };

    let mut data = stream.content.clone();
    for filter in filters {
        match filter.as_slice() {
            b"FlateDecode" => {
                let mut decoder = ZlibDecoder::new(&data[..]);
                let mut decoded = Vec::new();
                if decoder.read_to_end(&mut decoded).is_err() {
                    return stream.content.clone();
                }
                data = decoded;
            }
            // Unknown filter, return as-is
            _ => return data,
        }
    }
    data
}

pub fn obj_to_f32(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Follow a single reference, if any
pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Look up a page attribute, walking up the page tree when it is inherited
pub fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = Some(page_id);
    let mut depth = 0;
    while let Some(id) = current {
        if depth > MAX_TREE_DEPTH {
            break;
        }
        let dict = doc.get_object(id).and_then(|o| o.as_dict()).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        current = dict.get(b"Parent").and_then(|p| p.as_reference()).ok();
        depth += 1;
    }
    None
}

/// Page size from the (possibly inherited) MediaBox, US Letter if missing
pub fn page_size(doc: &Document, page_id: ObjectId) -> PageSize {
    inherited_attribute(doc, page_id, b"MediaBox")
        .and_then(|media_box| {
            let arr = resolve(doc, &media_box)?.as_array().ok()?;
            if arr.len() != 4 {
                return None;
            }
            let values: Vec<f32> = arr
                .iter()
                .filter_map(|o| resolve(doc, o).and_then(obj_to_f32))
                .collect();
            if values.len() != 4 {
                return None;
            }
            Some(PageSize {
                width: (values[2] - values[0]).abs(),
                height: (values[3] - values[1]).abs(),
            })
        })
        .filter(|size| size.width > 0.0 && size.height > 0.0)
        .unwrap_or(LETTER)
}

/// Get content data from a Contents entry (may be stream or array of streams)
pub fn content_data(doc: &Document, contents: &Object) -> Vec<u8> {
    match contents {
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(obj) => content_data(doc, obj),
            Err(_) => Vec::new(),
        },
        Object::Stream(stream) => decompress_stream(stream),
        Object::Array(arr) => {
            let mut combined = Vec::new();
            for item in arr {
                combined.extend(content_data(doc, item));
                combined.push(b'\n');
            }
            combined
        }
        _ => Vec::new(),
    }
}

/// Make sure the page owns an inline Resources dictionary.
///
/// Shared or inherited resources are copied so that additions stay local to
/// this page.
fn ensure_page_resources(doc: &mut Document, page_id: ObjectId) -> Result<(), PdfSignError> {
    let resources = match inherited_attribute(doc, page_id, b"Resources") {
        Some(Object::Reference(id)) => doc
            .get_object(id)
            .and_then(|o| o.as_dict())
            .cloned()
            .unwrap_or_default(),
        Some(Object::Dictionary(dict)) => dict,
        _ => Dictionary::new(),
    };

    let page = page_dict_mut(doc, page_id)?;
    page.set("Resources", Object::Dictionary(resources));
    Ok(())
}

fn page_dict_mut(doc: &mut Document, page_id: ObjectId) -> Result<&mut Dictionary, PdfSignError> {
    doc.get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| {
            PdfSignError::ProcessingError(format!("page {:?} is not a dictionary: {}", page_id, e))
        })
}

/// Register `value` under a fresh name in the page's `category` resources
/// (`Font`, `XObject`, ...) and return that name.
pub fn add_page_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &str,
    prefix: &str,
    value: Object,
) -> Result<String, PdfSignError> {
    ensure_page_resources(doc, page_id)?;

    // Resolve a referenced category dictionary before borrowing the page mutably
    let existing = {
        let page = doc.get_object(page_id).and_then(|o| o.as_dict()).ok();
        let category_obj = page
            .and_then(|p| p.get(b"Resources").ok())
            .and_then(|r| r.as_dict().ok())
            .and_then(|r| r.get(category.as_bytes()).ok());
        match category_obj {
            Some(Object::Reference(id)) => {
                doc.get_object(*id).and_then(|o| o.as_dict()).cloned().ok()
            }
            Some(Object::Dictionary(dict)) => Some(dict.clone()),
            _ => None,
        }
    };
    let mut entries = existing.unwrap_or_default();

    let mut counter = 1;
    let name = loop {
        let candidate = format!("{}{}", prefix, counter);
        if !entries.has(candidate.as_bytes()) {
            break candidate;
        }
        counter += 1;
    };
    entries.set(name.as_bytes().to_vec(), value);

    let page = page_dict_mut(doc, page_id)?;
    match page.get_mut(b"Resources") {
        Ok(Object::Dictionary(resources)) => {
            resources.set(category.as_bytes().to_vec(), Object::Dictionary(entries));
        }
        _ => {
            return Err(PdfSignError::ProcessingError(
                "page resources are not a dictionary".to_string(),
            ))
        }
    }

    Ok(name)
}

/// Append a content stream to a page.
///
/// The page's existing content is bracketed by `q`/`Q` so that any graphics
/// state it leaves behind cannot leak into the appended operators.
pub fn append_page_content(
    doc: &mut Document,
    page_id: ObjectId,
    content: Vec<u8>,
) -> Result<(), PdfSignError> {
    let contents = doc
        .get_object(page_id)
        .and_then(|o| o.as_dict())
        .map_err(|e| PdfSignError::ProcessingError(e.to_string()))?
        .get(b"Contents")
        .ok();
    let existing: Vec<Object> = match contents {
        Some(Object::Array(arr)) => arr.clone(),
        // An indirect array must be spliced in, only stream references may be kept
        Some(obj @ Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(arr)) => arr.clone(),
            Ok(Object::Stream(_)) => vec![obj.clone()],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let mut streams = Vec::with_capacity(existing.len() + 2);
    if !existing.is_empty() {
        let save_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
        streams.push(Object::Reference(save_id));
        streams.extend(existing);
        let mut overlay = b"\nQ\n".to_vec();
        overlay.extend(content);
        let overlay_id = doc.add_object(Stream::new(dictionary! {}, overlay));
        streams.push(Object::Reference(overlay_id));
    } else {
        let overlay_id = doc.add_object(Stream::new(dictionary! {}, content));
        streams.push(Object::Reference(overlay_id));
    }

    let page = page_dict_mut(doc, page_id)?;
    page.set("Contents", Object::Array(streams));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{blank_pdf, page_ids};

    #[test]
    fn test_page_size_reads_media_box() {
        let doc = Document::load_mem(&blank_pdf(&[(595.0, 842.0)])).unwrap();
        let ids = page_ids(&doc);
        assert_eq!(page_size(&doc, ids[0]), PageSize { width: 595.0, height: 842.0 });
    }

    #[test]
    fn test_page_size_inherits_from_parent() {
        let mut doc = Document::load_mem(&blank_pdf(&[(612.0, 792.0)])).unwrap();
        let page_id = page_ids(&doc)[0];
        let parent_id = {
            let page = doc.get_object_mut(page_id).unwrap().as_dict_mut().unwrap();
            page.remove(b"MediaBox");
            page.get(b"Parent").unwrap().as_reference().unwrap()
        };
        doc.get_object_mut(parent_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("MediaBox", vec![0.into(), 0.into(), 300.into(), 400.into()]);

        assert_eq!(page_size(&doc, page_id), PageSize { width: 300.0, height: 400.0 });
    }

    #[test]
    fn test_page_size_defaults_to_letter() {
        let mut doc = Document::load_mem(&blank_pdf(&[(100.0, 100.0)])).unwrap();
        let page_id = page_ids(&doc)[0];
        doc.get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .remove(b"MediaBox");
        assert_eq!(page_size(&doc, page_id), LETTER);
    }

    #[test]
    fn test_add_page_resource_picks_unused_names() {
        let mut doc = Document::load_mem(&blank_pdf(&[(612.0, 792.0)])).unwrap();
        let page_id = page_ids(&doc)[0];

        let first = add_page_resource(&mut doc, page_id, "Font", "FS", Object::Null).unwrap();
        let second = add_page_resource(&mut doc, page_id, "Font", "FS", Object::Null).unwrap();
        assert_eq!(first, "FS1");
        assert_eq!(second, "FS2");

        let fonts = doc
            .get_object(page_id)
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Resources")
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Font")
            .unwrap()
            .as_dict()
            .unwrap();
        assert!(fonts.has(b"FS1") && fonts.has(b"FS2"));
    }

    #[test]
    fn test_append_wraps_existing_content() {
        let mut doc = Document::load_mem(&blank_pdf(&[(612.0, 792.0)])).unwrap();
        let page_id = page_ids(&doc)[0];
        append_page_content(&mut doc, page_id, b"0 0 m".to_vec()).unwrap();

        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        let contents = page.get(b"Contents").unwrap().clone();
        let data = String::from_utf8_lossy(&content_data(&doc, &contents)).to_string();
        let trimmed = data.trim_start();
        assert!(trimmed.starts_with('q'));
        assert!(data.contains("Q\n0 0 m"));
    }

    #[test]
    fn test_append_splices_indirect_content_array() {
        let mut doc = Document::load_mem(&blank_pdf(&[(612.0, 792.0)])).unwrap();
        let page_id = page_ids(&doc)[0];
        let stream_ref = doc
            .get_object(page_id)
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Contents")
            .unwrap()
            .clone();
        let array_id = doc.add_object(vec![stream_ref]);
        doc.get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Contents", array_id);
        let before = doc.get_page_content(page_id).unwrap();
        assert!(String::from_utf8_lossy(&before).contains("10 10 l"));

        append_page_content(&mut doc, page_id, b"0 0 m".to_vec()).unwrap();

        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        let contents = page.get(b"Contents").unwrap().as_array().unwrap();
        for item in contents {
            let id = item.as_reference().unwrap();
            assert!(doc.get_object(id).unwrap().as_stream().is_ok());
        }
        let data = String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).to_string();
        assert!(data.contains("10 10 l"));
        assert!(data.contains("0 0 m"));
    }

    #[test]
    fn test_decompress_flate_stream() {
        use flate2::write::ZlibEncoder;
        use std::io::Write;

        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"BT ET").unwrap();
        let compressed = encoder.finish().unwrap();
        let stream = Stream::new(dictionary! { "Filter" => "FlateDecode" }, compressed);
        assert_eq!(decompress_stream(&stream), b"BT ET".to_vec());
    }
}
