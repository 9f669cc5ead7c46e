//! Merging per-task artifacts into the final content document.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use lopdf::{dictionary, Document, Object, ObjectId};
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("nothing to merge: no task produced an artifact")]
    Empty,
    #[error("failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("malformed document {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("failed to write merged document: {0}")]
    Write(String),
}

/// Metadata stamped onto the merged document.
#[derive(Debug, Clone)]
pub struct DocumentMetadata {
    pub title: String,
    pub author: String,
    pub producer: String,
    pub creator: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub page_count: u32,
}

/// Concatenates artifacts in the order given.
pub trait ArtifactMerger: Send + Sync {
    fn merge(
        &self,
        inputs: &[PathBuf],
        metadata: &DocumentMetadata,
        output: &Path,
    ) -> Result<MergeSummary, MergeError>;
}

fn chunk_regex() -> &'static Regex {
    static CHUNKS: OnceLock<Regex> = OnceLock::new();
    CHUNKS.get_or_init(|| Regex::new(r"\d+|\D+").expect("static regex"))
}

/// Numeric-aware comparison: digit runs compare by value, the rest lexically.
///
/// `0000:2_x` < `0000:10_x` < `0001_TOC` < `9999:1_y`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let re = chunk_regex();
    let mut left = re.find_iter(a).map(|m| m.as_str());
    let mut right = re.find_iter(b).map(|m| m.as_str());
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u128>(), y.parse::<u128>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Sort output keys into reading order.
pub fn sort_keys(keys: &mut [String]) {
    keys.sort_by(|a, b| natural_cmp(a, b));
}

/// PDF merger backed by `lopdf`.
#[derive(Debug, Default, Clone)]
pub struct LopdfMerger;

const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

fn type_name(object: &Object) -> Option<&[u8]> {
    object.as_dict().ok()?.get(b"Type").ok()?.as_name().ok()
}

impl ArtifactMerger for LopdfMerger {
    fn merge(
        &self,
        inputs: &[PathBuf],
        metadata: &DocumentMetadata,
        output: &Path,
    ) -> Result<MergeSummary, MergeError> {
        if inputs.is_empty() {
            return Err(MergeError::Empty);
        }

        let mut next_id = 1;
        let mut pages: Vec<(ObjectId, Object)> = Vec::new();
        let mut merged = Document::with_version("1.5");
        let mut catalog: Option<(ObjectId, Object)> = None;
        let mut pages_root: Option<ObjectId> = None;

        for path in inputs {
            let mut doc = Document::load(path).map_err(|e| MergeError::Read {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            doc.renumber_objects_with(next_id);
            next_id = doc.max_id + 1;

            for (_, page_id) in doc.get_pages() {
                let page = doc.get_object(page_id).map_err(|e| MergeError::Malformed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                let mut dict = page
                    .as_dict()
                    .map_err(|e| MergeError::Malformed {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?
                    .clone();

                // Attributes inherited from the source page tree would be lost with it.
                if let Ok(parent) = dict
                    .get(b"Parent")
                    .and_then(|p| p.as_reference())
                    .and_then(|id| doc.get_dictionary(id))
                {
                    for key in INHERITABLE {
                        if !dict.has(key) {
                            if let Ok(value) = parent.get(key) {
                                dict.set(key.to_vec(), value.clone());
                            }
                        }
                    }
                }
                pages.push((page_id, Object::Dictionary(dict)));
            }

            for (id, object) in doc.objects.into_iter() {
                match type_name(&object) {
                    Some(b"Catalog") => {
                        if catalog.is_none() {
                            catalog = Some((id, object));
                        }
                    }
                    Some(b"Pages") => {
                        if pages_root.is_none() {
                            pages_root = Some(id);
                            merged.objects.insert(id, object);
                        }
                    }
                    Some(b"Page") | Some(b"Outlines") | Some(b"Outline") => {}
                    _ => {
                        merged.objects.insert(id, object);
                    }
                }
            }
        }

        let malformed = |reason: &str| MergeError::Malformed {
            path: inputs[0].clone(),
            reason: reason.to_string(),
        };
        let pages_id = pages_root.ok_or_else(|| malformed("no page tree"))?;
        let (catalog_id, catalog_object) = catalog.ok_or_else(|| malformed("no catalog"))?;

        for (id, page) in &pages {
            if let Object::Dictionary(dict) = page {
                let mut dict = dict.clone();
                dict.set("Parent", pages_id);
                merged.objects.insert(*id, Object::Dictionary(dict));
            }
        }

        let kids: Vec<Object> = pages.iter().map(|(id, _)| Object::Reference(*id)).collect();
        merged.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages.len() as i64,
            }),
        );

        let mut catalog_dict = catalog_object
            .as_dict()
            .map_err(|e| malformed(&e.to_string()))?
            .clone();
        catalog_dict.set("Pages", pages_id);
        catalog_dict.remove(b"Outlines");
        merged.objects.insert(catalog_id, Object::Dictionary(catalog_dict));
        merged.trailer.set("Root", catalog_id);

        merged.max_id = merged.objects.keys().map(|(id, _)| *id).max().unwrap_or(0);
        let info_id = merged.add_object(dictionary! {
            "Title" => Object::string_literal(metadata.title.clone()),
            "Author" => Object::string_literal(metadata.author.clone()),
            "Producer" => Object::string_literal(metadata.producer.clone()),
            "Creator" => Object::string_literal(metadata.creator.clone()),
            "CreationDate" => Object::string_literal(
                metadata.created_at.format("D:%Y%m%d%H%M%SZ").to_string()
            ),
        });
        merged.trailer.set("Info", info_id);

        merged.renumber_objects();
        merged.compress();
        merged
            .save(output)
            .map_err(|e| MergeError::Write(e.to_string()))?;

        Ok(MergeSummary {
            page_count: pages.len() as u32,
        })
    }
}
