//! Path expressions used by rule targets.
//!
//! Grammar: `segment ('.' segment)*` where a segment is a field name, `*`, or
//! a choice element `name[x]`, followed by any number of bracket selectors:
//! `[3]` (explicit index) or `[field = 'literal']` (simple equality filter on
//! a directly nested scalar). Anything else inside brackets is kept as a
//! complex filter; the raw resolver refuses those and the planner routes
//! such rules to the authoritative lane.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::fmt;
use thiserror::Error;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").expect("identifier regex"));

static SIMPLE_FILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*('(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?|true|false)\s*$"#,
    )
    .expect("simple filter regex")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path addresses the document root")]
    RootOnly,
    #[error("empty segment at position {position}")]
    EmptySegment { position: usize },
    #[error("invalid segment name '{name}'")]
    InvalidName { name: String },
    #[error("unbalanced brackets in segment '{segment}'")]
    UnbalancedBrackets { segment: String },
    #[error("choice marker [x] must directly follow a field name in '{segment}'")]
    MisplacedChoice { segment: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentName {
    Field(String),
    /// `*`: every field of the current object
    Wildcard,
    /// `value[x]`: every field named `value<Type>`
    Choice(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equals { field: String, literal: JsonValue },
    Complex(String),
}

impl Filter {
    pub fn is_complex(&self) -> bool {
        matches!(self, Filter::Complex(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Index(usize),
    Filter(Filter),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub name: SegmentName,
    pub selectors: Vec<Selector>,
}

impl PathSegment {
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: SegmentName::Field(name.into()),
            selectors: Vec::new(),
        }
    }

    /// Field name (or choice prefix); `None` for wildcards
    pub fn field_name(&self) -> Option<&str> {
        match &self.name {
            SegmentName::Field(n) | SegmentName::Choice(n) => Some(n),
            SegmentName::Wildcard => None,
        }
    }

    pub fn filters(&self) -> impl Iterator<Item = &Filter> {
        self.selectors.iter().filter_map(|s| match s {
            Selector::Filter(f) => Some(f),
            Selector::Index(_) => None,
        })
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            SegmentName::Field(n) => write!(f, "{n}")?,
            SegmentName::Wildcard => write!(f, "*")?,
            SegmentName::Choice(n) => write!(f, "{n}[x]")?,
        }
        for selector in &self.selectors {
            match selector {
                Selector::Index(i) => write!(f, "[{i}]")?,
                Selector::Filter(Filter::Equals { field, literal }) => {
                    write!(f, "[{field}={literal}]")?
                }
                Selector::Filter(Filter::Complex(text)) => write!(f, "[{text}]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathExpression {
    segments: Vec<PathSegment>,
}

impl PathExpression {
    pub fn parse(text: &str) -> Result<Self, PathError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        if matches!(trimmed, "$" | "." | "/" | "%resource" | "$this") {
            return Err(PathError::RootOnly);
        }

        let segments = split_top_level(trimmed)?
            .into_iter()
            .enumerate()
            .map(|(position, raw)| parse_segment(position, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { segments })
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// A lone capitalized segment names a resource type, i.e. the entry root
    pub fn is_root_level(&self) -> bool {
        match self.segments.as_slice() {
            [only] => matches!(&only.name, SegmentName::Field(n)
                if n.starts_with(|c: char| c.is_ascii_uppercase()) && only.selectors.is_empty()),
            _ => false,
        }
    }

    pub fn wildcard_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.name == SegmentName::Wildcard)
            .count()
    }

    pub fn has_choice(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s.name, SegmentName::Choice(_)))
    }

    pub fn has_complex_filter(&self) -> bool {
        self.segments
            .iter()
            .any(|s| s.filters().any(Filter::is_complex))
    }

    /// Whether any segment names the given field
    pub fn touches(&self, field: &str) -> bool {
        self.segments.iter().any(|s| s.field_name() == Some(field))
    }

    /// Field names joined with dots, selectors dropped (`identifier.system`)
    pub fn shape_key(&self) -> String {
        self.segments
            .iter()
            .map(|s| match &s.name {
                SegmentName::Field(n) => n.clone(),
                SegmentName::Choice(n) => format!("{n}[x]"),
                SegmentName::Wildcard => "*".to_string(),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Resource type named by a capitalized first segment (`Patient.name`)
    pub fn leading_type(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [first, _, ..] if first.selectors.is_empty() => match &first.name {
                SegmentName::Field(name) if name.starts_with(|c: char| c.is_ascii_uppercase()) => {
                    Some(name)
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Drop a leading segment equal to the resource type (`Patient.name` → `name`)
    pub fn relative_to(&self, resource_type: &str) -> PathExpression {
        match self.segments.first() {
            Some(first)
                if self.segments.len() > 1
                    && first.selectors.is_empty()
                    && first.name == SegmentName::Field(resource_type.to_string()) =>
            {
                Self {
                    segments: self.segments[1..].to_vec(),
                }
            }
            _ => self.clone(),
        }
    }

    /// Split into the parent path and the last segment
    pub fn split_last(&self) -> Option<(PathExpression, &PathSegment)> {
        let (last, parent) = self.segments.split_last()?;
        Some((
            PathExpression {
                segments: parent.to_vec(),
            },
            last,
        ))
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.segments.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Split on dots that are outside brackets and quotes
fn split_top_level(text: &str) -> Result<Vec<&str>, PathError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' if depth > 0 => quote = Some(c),
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1).ok_or_else(|| PathError::UnbalancedBrackets {
                    segment: text.to_string(),
                })?
            }
            '.' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 || quote.is_some() {
        return Err(PathError::UnbalancedBrackets {
            segment: text.to_string(),
        });
    }
    parts.push(&text[start..]);
    Ok(parts)
}

fn parse_segment(position: usize, raw: &str) -> Result<PathSegment, PathError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PathError::EmptySegment { position });
    }

    let (name_part, mut rest) = match raw.find('[') {
        Some(i) => (&raw[..i], &raw[i..]),
        None => (raw, ""),
    };

    let mut name = if name_part == "*" {
        SegmentName::Wildcard
    } else if IDENTIFIER.is_match(name_part) {
        SegmentName::Field(name_part.to_string())
    } else {
        return Err(PathError::InvalidName {
            name: name_part.to_string(),
        });
    };

    let mut selectors = Vec::new();
    let mut first = true;
    while !rest.is_empty() {
        let close = matching_bracket(rest).ok_or_else(|| PathError::UnbalancedBrackets {
            segment: raw.to_string(),
        })?;
        let inner = rest[1..close].trim();
        rest = &rest[close + 1..];

        if inner == "x" {
            match (&name, first) {
                (SegmentName::Field(n), true) => name = SegmentName::Choice(n.clone()),
                _ => {
                    return Err(PathError::MisplacedChoice {
                        segment: raw.to_string(),
                    });
                }
            }
        } else if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit()) {
            match inner.parse::<usize>() {
                Ok(index) => selectors.push(Selector::Index(index)),
                Err(_) => selectors.push(Selector::Filter(Filter::Complex(inner.to_string()))),
            }
        } else {
            selectors.push(Selector::Filter(parse_filter(inner)));
        }
        first = false;
    }

    Ok(PathSegment { name, selectors })
}

/// Index of the `]` closing the bracket at position 0, honoring quotes
fn matching_bracket(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_filter(inner: &str) -> Filter {
    let Some(caps) = SIMPLE_FILTER.captures(inner) else {
        return Filter::Complex(inner.to_string());
    };
    let field = caps[1].to_string();
    let literal_text = &caps[2];
    let literal = match literal_text.chars().next() {
        Some('\'' | '"') => JsonValue::String(unquote(literal_text)),
        _ => serde_json::from_str(literal_text)
            .unwrap_or_else(|_| JsonValue::String(literal_text.to_string())),
    };
    Filter::Equals { field, literal }
}

fn unquote(text: &str) -> String {
    let body = &text[1..text.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
