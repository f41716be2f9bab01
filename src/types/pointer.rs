//! Index-stable absolute locations inside a document.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PointerSegment {
    Field(String),
    Index(usize),
}

/// Absolute path from the document root.
///
/// Every array traversed contributes an explicit [`PointerSegment::Index`],
/// so the shape of a pointer never depends on how many elements an array
/// currently holds. Rendered as an RFC 6901 JSON Pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pointer {
    segments: Vec<PointerSegment>,
}

impl Pointer {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<PointerSegment>) -> Self {
        Self { segments }
    }

    /// Pointer to `entry/{index}/resource` under the given root collection
    pub fn entry(collection: &str, index: usize) -> Self {
        Self::root()
            .child_field(collection)
            .child_index(index)
            .child_field("resource")
    }

    pub fn child_field(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PointerSegment::Field(name.to_string()));
        Self { segments }
    }

    pub fn child_index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PointerSegment::Index(index));
        Self { segments }
    }

    pub fn segments(&self) -> &[PointerSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last_index(&self) -> Option<usize> {
        match self.segments.last() {
            Some(PointerSegment::Index(i)) => Some(*i),
            _ => None,
        }
    }

    /// Parse an RFC 6901 pointer; all-digit segments become indices
    pub fn parse(text: &str) -> Option<Self> {
        if text.is_empty() {
            return Some(Self::root());
        }
        let rest = text.strip_prefix('/')?;
        let segments = rest
            .split('/')
            .map(|raw| {
                let unescaped = raw.replace("~1", "/").replace("~0", "~");
                if !unescaped.is_empty() && unescaped.bytes().all(|b| b.is_ascii_digit()) {
                    unescaped
                        .parse::<usize>()
                        .map(PointerSegment::Index)
                        .unwrap_or(PointerSegment::Field(unescaped))
                } else {
                    PointerSegment::Field(unescaped)
                }
            })
            .collect();
        Some(Self { segments })
    }

    /// Look the pointer up in a document
    pub fn lookup<'a>(&self, root: &'a serde_json::Value) -> Option<&'a serde_json::Value> {
        root.pointer(&self.to_string())
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                PointerSegment::Field(name) => {
                    write!(f, "/{}", name.replace('~', "~0").replace('/', "~1"))?
                }
                PointerSegment::Index(i) => write!(f, "/{i}")?,
            }
        }
        Ok(())
    }
}

impl Serialize for Pointer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pointer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Pointer::parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid pointer: {text}")))
    }
}
