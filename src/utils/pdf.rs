// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use lopdf::{dictionary, Bookmark, Document, Object, ObjectId};
use thiserror::Error;
use tracing::warn;

/// PDF处理错误类型
#[derive(Error, Debug)]
pub enum PdfError {
    /// PDF无法解析
    #[error("Corrupt PDF: {0}")]
    Corrupt(String),

    /// 页码越界
    #[error("Invalid page number {page}: document has {total} pages")]
    InvalidPage { page: u32, total: u32 },

    /// 序列化失败
    #[error("Failed to write PDF: {0}")]
    Write(String),
}

/// 返回PDF页数
pub fn page_count(bytes: &[u8]) -> Result<u32, PdfError> {
    let doc = Document::load_mem(bytes).map_err(|e| PdfError::Corrupt(e.to_string()))?;
    Ok(doc.get_pages().len() as u32)
}

/// 将PDF拆分为单页文档
///
/// 返回按页序排列的单页PDF字节，1-based页号隐含在下标+1中
pub fn split_pages(bytes: &[u8]) -> Result<Vec<Vec<u8>>, PdfError> {
    let doc = Document::load_mem(bytes).map_err(|e| PdfError::Corrupt(e.to_string()))?;
    let total = doc.get_pages().len() as u32;

    let mut pages = Vec::with_capacity(total as usize);
    for page_number in 1..=total {
        pages.push(extract_from_document(&doc, page_number, total)?);
    }
    Ok(pages)
}

/// 提取PDF中的单页
pub fn extract_page(bytes: &[u8], page_number: u32) -> Result<Vec<u8>, PdfError> {
    let doc = Document::load_mem(bytes).map_err(|e| PdfError::Corrupt(e.to_string()))?;
    let total = doc.get_pages().len() as u32;

    if page_number == 0 || page_number > total {
        return Err(PdfError::InvalidPage {
            page: page_number,
            total,
        });
    }

    extract_from_document(&doc, page_number, total)
}

fn extract_from_document(doc: &Document, page_number: u32, total: u32) -> Result<Vec<u8>, PdfError> {
    let mut single = doc.clone();
    let delete: Vec<u32> = (1..=total).filter(|n| *n != page_number).collect();
    single.delete_pages(&delete);
    single.prune_objects();

    let mut buf = Vec::new();
    single
        .save_to(&mut buf)
        .map_err(|e| PdfError::Write(e.to_string()))?;
    Ok(buf)
}

/// 合并结果
pub struct MergeOutput {
    /// 合并后的PDF字节
    pub bytes: Vec<u8>,
    /// 成功合入的源文件名（发现顺序）
    pub merged: Vec<String>,
    /// 因损坏被跳过的源文件名
    pub skipped: Vec<String>,
}

/// 按发现顺序合并多个PDF，每个源文件生成一个书签
///
/// 损坏的PDF跳过并记录，不中断合并；全部损坏时返回Corrupt
pub fn merge_documents(sources: &[(String, Vec<u8>)]) -> Result<MergeOutput, PdfError> {
    let mut max_id = 1;
    let mut documents_pages: Vec<(String, Vec<(u32, u16)>, std::collections::BTreeMap<ObjectId, Object>)> =
        Vec::new();
    let mut documents_objects = std::collections::BTreeMap::new();
    let mut merged_names = Vec::new();
    let mut skipped = Vec::new();

    for (name, bytes) in sources {
        let mut doc = match Document::load_mem(bytes) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Skipping corrupt PDF '{}' during merge: {}", name, e);
                skipped.push(name.clone());
                continue;
            }
        };

        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        let pages: std::collections::BTreeMap<ObjectId, Object> = doc
            .get_pages()
            .into_values()
            .filter_map(|object_id| {
                doc.get_object(object_id)
                    .ok()
                    .map(|object| (object_id, object.to_owned()))
            })
            .collect();

        let page_ids: Vec<(u32, u16)> = pages.keys().copied().collect();
        documents_pages.push((name.clone(), page_ids, pages));
        documents_objects.extend(doc.objects);
        merged_names.push(name.clone());
    }

    if merged_names.is_empty() {
        return Err(PdfError::Corrupt(
            "no readable PDF documents to merge".to_string(),
        ));
    }

    let mut document = Document::with_version("1.5");

    // Catalog and Pages are rebuilt below from the merged page set
    let mut pages_object: Option<(ObjectId, Object)> = None;
    let mut catalog_object: Option<(ObjectId, Object)> = None;

    for (object_id, object) in documents_objects {
        match object.type_name().unwrap_or(b"") {
            b"Catalog" => {
                catalog_object = Some((
                    catalog_object.map(|(id, _)| id).unwrap_or(object_id),
                    object,
                ));
            }
            b"Pages" => {
                if let Ok(dictionary) = object.as_dict() {
                    let mut dictionary = dictionary.clone();
                    if let Some((_, ref existing)) = pages_object {
                        if let Ok(old) = existing.as_dict() {
                            dictionary.extend(old);
                        }
                    }
                    pages_object = Some((
                        pages_object.map(|(id, _)| id).unwrap_or(object_id),
                        Object::Dictionary(dictionary),
                    ));
                }
            }
            b"Page" => {}
            b"Outlines" => {}
            b"Outline" => {}
            _ => {
                document.objects.insert(object_id, object);
            }
        }
    }

    let pages_object = pages_object.ok_or_else(|| {
        PdfError::Corrupt("merged documents carry no page tree".to_string())
    })?;
    let catalog_object = catalog_object.ok_or_else(|| {
        PdfError::Corrupt("merged documents carry no catalog".to_string())
    })?;

    let mut all_page_ids: Vec<ObjectId> = Vec::new();
    for (name, page_ids, pages) in documents_pages {
        let mut first = true;
        for object_id in page_ids {
            if let Some(object) = pages.get(&object_id) {
                if let Ok(dictionary) = object.as_dict() {
                    let mut dictionary = dictionary.clone();
                    dictionary.set("Parent", pages_object.0);
                    document
                        .objects
                        .insert(object_id, Object::Dictionary(dictionary));
                    if first {
                        document.add_bookmark(
                            Bookmark::new(name.clone(), [0.0, 0.0, 0.0], 0, object_id),
                            None,
                        );
                        first = false;
                    }
                    all_page_ids.push(object_id);
                }
            }
        }
    }

    if let Ok(dictionary) = pages_object.1.as_dict() {
        let mut dictionary = dictionary.clone();
        dictionary.set("Count", all_page_ids.len() as u32);
        dictionary.set(
            "Kids",
            all_page_ids
                .iter()
                .map(|id| Object::Reference(*id))
                .collect::<Vec<_>>(),
        );
        document
            .objects
            .insert(pages_object.0, Object::Dictionary(dictionary));
    }

    if let Ok(dictionary) = catalog_object.1.as_dict() {
        let mut dictionary = dictionary.clone();
        dictionary.set("Pages", pages_object.0);
        dictionary.remove(b"Outlines");
        document
            .objects
            .insert(catalog_object.0, Object::Dictionary(dictionary));
    }

    document.trailer.set("Root", catalog_object.0);
    document.max_id = document.objects.len() as u32;
    document.renumber_objects();
    document.adjust_zero_pages();

    if let Some(outline_id) = document.build_outline() {
        if let Ok(Object::Dictionary(dict)) = document.get_object_mut(catalog_object.0) {
            dict.set("Outlines", Object::Reference(outline_id));
        }
    }

    document.compress();

    let mut buf = Vec::new();
    document
        .save_to(&mut buf)
        .map_err(|e| PdfError::Write(e.to_string()))?;

    Ok(MergeOutput {
        bytes: buf,
        merged: merged_names,
        skipped,
    })
}

/// 生成一个最小的单页PDF，内容为一行文本
///
/// 测试夹具用；正常流程从对象存储读取真实上传
pub fn minimal_pdf(text: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let content = lopdf::content::Content {
        operations: vec![
            lopdf::content::Operation::new("BT", vec![]),
            lopdf::content::Operation::new("Tf", vec!["F1".into(), 24.into()]),
            lopdf::content::Operation::new("Td", vec![72.into(), 720.into()]),
            lopdf::content::Operation::new("Tj", vec![Object::string_literal(text)]),
            lopdf::content::Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(lopdf::Stream::new(
        dictionary! {},
        content.encode().unwrap_or_default(),
    ));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("minimal pdf serializes");
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_count_single_page() {
        let bytes = minimal_pdf("Hello");
        assert_eq!(page_count(&bytes).unwrap(), 1);
    }

    #[test]
    fn test_page_count_rejects_garbage() {
        assert!(matches!(
            page_count(b"not a pdf at all"),
            Err(PdfError::Corrupt(_))
        ));
    }

    #[test]
    fn test_split_single_page_roundtrip() {
        let bytes = minimal_pdf("Hello");
        let pages = split_pages(&bytes).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(page_count(&pages[0]).unwrap(), 1);
    }

    #[test]
    fn test_extract_page_out_of_range() {
        let bytes = minimal_pdf("Hello");
        assert!(matches!(
            extract_page(&bytes, 2),
            Err(PdfError::InvalidPage { page: 2, total: 1 })
        ));
    }

    #[test]
    fn test_merge_skips_corrupt_sources() {
        let good = minimal_pdf("A");
        let sources = vec![
            ("a.pdf".to_string(), good.clone()),
            ("broken.pdf".to_string(), b"garbage".to_vec()),
            ("b.pdf".to_string(), minimal_pdf("B")),
        ];

        let output = merge_documents(&sources).unwrap();
        assert_eq!(output.merged, vec!["a.pdf", "b.pdf"]);
        assert_eq!(output.skipped, vec!["broken.pdf"]);
        assert_eq!(page_count(&output.bytes).unwrap(), 2);
    }

    #[test]
    fn test_merge_all_corrupt_fails() {
        let sources = vec![("x.pdf".to_string(), b"junk".to_vec())];
        assert!(merge_documents(&sources).is_err());
    }
}
