//! Reference resolution inside a single document.
//!
//! [`EntryIndex`] maps every way an entry can be addressed (its `fullUrl`,
//! `Type/id`, the tail of an absolute URL, a normalized `urn:uuid`) to the
//! entry's resource type and position. [`ContainedIndex`] does the same for
//! `#id` references into a resource's `contained` list.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use url::Url;
use uuid::Uuid;

static RELATIVE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z][A-Za-z]+)/([A-Za-z0-9\-.]{1,64})(?:/_history/[A-Za-z0-9\-.]{1,64})?$")
        .expect("relative reference regex")
});

/// Entry addressed by a reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEntry {
    pub resource_type: String,
    pub id: Option<String>,
    pub entry_index: usize,
}

/// Outcome of resolving one reference string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceResolution {
    /// Points at an entry of this document
    Entry(IndexedEntry),
    /// Points at a contained resource of the current entry
    Contained { resource_type: String },
    /// Absolute URL outside this document; type taken from the URL tail when it has one
    External { resource_type: Option<String> },
    NotFound,
    InvalidFormat,
}

/// Index of the root collection, built once per document
#[derive(Debug, Clone, Default)]
pub struct EntryIndex {
    entries: IndexMap<String, IndexedEntry>,
}

impl EntryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a collection document (`{collection}[].resource`), or a
    /// single resource treated as entry 0
    pub fn from_document(document: &JsonValue, collection: &str) -> Self {
        let mut index = Self::new();

        match document.get(collection).and_then(|e| e.as_array()) {
            Some(entries) => {
                for (position, entry) in entries.iter().enumerate() {
                    if let Some(resource) = entry.get("resource") {
                        let full_url = entry.get("fullUrl").and_then(|u| u.as_str());
                        index.insert(position, resource, full_url);
                    }
                }
            }
            None if document.get("resourceType").is_some() => {
                index.insert(0, document, None);
            }
            None => {}
        }

        index
    }

    fn insert(&mut self, entry_index: usize, resource: &JsonValue, full_url: Option<&str>) {
        let Some(resource_type) = resource.get("resourceType").and_then(|t| t.as_str()) else {
            return;
        };
        let id = resource
            .get("id")
            .and_then(|i| i.as_str())
            .map(str::to_string);
        let indexed = IndexedEntry {
            resource_type: resource_type.to_string(),
            id: id.clone(),
            entry_index,
        };

        if let Some(id) = &id {
            self.entries
                .entry(format!("{resource_type}/{id}"))
                .or_insert_with(|| indexed.clone());
        }
        if let Some(full_url) = full_url {
            self.entries
                .entry(full_url.to_string())
                .or_insert_with(|| indexed.clone());
            if let Some(normalized) = normalize_urn_uuid(full_url) {
                self.entries
                    .entry(normalized)
                    .or_insert_with(|| indexed.clone());
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&IndexedEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a non-contained reference against the document
    pub fn resolve(&self, reference: &str) -> ReferenceResolution {
        let reference = reference.trim();
        if reference.is_empty() || reference.chars().any(char::is_whitespace) {
            return ReferenceResolution::InvalidFormat;
        }

        if let Some(entry) = self.entries.get(reference) {
            return ReferenceResolution::Entry(entry.clone());
        }

        if reference.starts_with("urn:uuid:") {
            return match normalize_urn_uuid(reference) {
                Some(key) => self
                    .entries
                    .get(&key)
                    .map_or(ReferenceResolution::NotFound, |e| {
                        ReferenceResolution::Entry(e.clone())
                    }),
                None => ReferenceResolution::InvalidFormat,
            };
        }

        if let Some(caps) = RELATIVE_REFERENCE.captures(reference) {
            let key = format!("{}/{}", &caps[1], &caps[2]);
            return self
                .entries
                .get(&key)
                .map_or(ReferenceResolution::NotFound, |e| {
                    ReferenceResolution::Entry(e.clone())
                });
        }

        if let Ok(url) = Url::parse(reference) {
            if url.cannot_be_a_base() {
                return ReferenceResolution::InvalidFormat;
            }
            let tail = url_tail(&url);
            if let Some((resource_type, id)) = &tail
                && let Some(entry) = self.entries.get(&format!("{resource_type}/{id}"))
            {
                return ReferenceResolution::Entry(entry.clone());
            }
            return ReferenceResolution::External {
                resource_type: tail.map(|(t, _)| t),
            };
        }

        ReferenceResolution::InvalidFormat
    }
}

/// Contained resources of one entry, by local id
#[derive(Debug, Clone, Default)]
pub struct ContainedIndex {
    contained: IndexMap<String, String>,
}

impl ContainedIndex {
    pub fn from_resource(resource: &JsonValue) -> Self {
        let contained = resource
            .get("contained")
            .and_then(|c| c.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let id = item.get("id")?.as_str()?;
                        let resource_type = item
                            .get("resourceType")
                            .and_then(|t| t.as_str())
                            .unwrap_or_default();
                        Some((id.to_string(), resource_type.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { contained }
    }

    /// Resolve `#id` (the leading `#` is expected)
    pub fn resolve(&self, reference: &str) -> ReferenceResolution {
        let Some(id) = reference.strip_prefix('#') else {
            return ReferenceResolution::InvalidFormat;
        };
        if id.is_empty() {
            return ReferenceResolution::InvalidFormat;
        }
        self.contained
            .get(id)
            .map_or(ReferenceResolution::NotFound, |t| {
                ReferenceResolution::Contained {
                    resource_type: t.clone(),
                }
            })
    }

    pub fn len(&self) -> usize {
        self.contained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contained.is_empty()
    }
}

fn normalize_urn_uuid(text: &str) -> Option<String> {
    let raw = text.strip_prefix("urn:uuid:")?;
    Uuid::parse_str(raw)
        .ok()
        .map(|uuid| format!("urn:uuid:{}", uuid.hyphenated()))
}

/// `Type/id` from the last path segments of an absolute URL, skipping `_history`
fn url_tail(url: &Url) -> Option<(String, String)> {
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let segments = match segments.iter().position(|s| *s == "_history") {
        Some(cut) => &segments[..cut],
        None => &segments[..],
    };
    match segments {
        [.., resource_type, id] if resource_type.starts_with(|c: char| c.is_ascii_uppercase()) => {
            Some((resource_type.to_string(), id.to_string()))
        }
        _ => None,
    }
}
