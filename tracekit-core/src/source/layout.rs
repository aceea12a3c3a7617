//! Event field layouts
//!
//! A layout declares the fields of one event type and fixes their byte
//! offsets in the payload: fields are packed in declaration order with no
//! padding. Filters resolve a field path such as `args[1].fd` against a
//! layout once, at build time, and only read the resulting offset during
//! replay.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TraceError};

/// Width of a string slot: `u32` start plus `u32` length
const STRING_SLOT: u32 = 8;

/// Type of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    U16,
    U32,
    U64,
    F64,
    String,
    Struct { fields: Vec<FieldLayout> },
    Array { len: u32, element: Box<FieldKind> },
}

/// Field types that can be compared directly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    U16,
    U32,
    U64,
    F64,
    String,
}

impl FieldKind {
    /// Bytes taken in the fixed part of the payload
    pub fn size(&self) -> u32 {
        match self {
            FieldKind::U16 => 2,
            FieldKind::U32 => 4,
            FieldKind::U64 | FieldKind::F64 => 8,
            FieldKind::String => STRING_SLOT,
            FieldKind::Struct { fields } => fields.iter().map(|f| f.kind.size()).sum(),
            FieldKind::Array { len, element } => len * element.size(),
        }
    }

    pub fn scalar(&self) -> Option<ScalarKind> {
        match self {
            FieldKind::U16 => Some(ScalarKind::U16),
            FieldKind::U32 => Some(ScalarKind::U32),
            FieldKind::U64 => Some(ScalarKind::U64),
            FieldKind::F64 => Some(ScalarKind::F64),
            FieldKind::String => Some(ScalarKind::String),
            FieldKind::Struct { .. } | FieldKind::Array { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldLayout {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldLayout {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Field declarations of one event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLayout {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldLayout>,
}

/// Offset and type of a resolved field path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedField {
    pub offset: u32,
    pub kind: ScalarKind,
}

fn path_component() -> &'static Regex {
    static COMPONENT: OnceLock<Regex> = OnceLock::new();
    COMPONENT.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(?:\[(\d+)\])?$").expect("component regex is valid")
    })
}

impl EventLayout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldLayout::new(name, kind));
        self
    }

    /// Size of the fixed part of the payload
    pub fn size(&self) -> u32 {
        self.fields.iter().map(|f| f.kind.size()).sum()
    }

    /// Reject duplicate names and empty arrays, recursively
    pub fn validate(&self) -> Result<()> {
        validate_fields(&self.name, &self.fields)
    }

    /// Resolve a dotted, optionally indexed path (`a.b[2].c`) to a scalar
    pub fn resolve(&self, path: &str) -> Result<ResolvedField> {
        let unknown = || TraceError::UnknownField {
            path: format!("{}.{}", self.name, path),
        };

        let mut fields = &self.fields;
        let mut base = 0u32;
        let mut components = path.split('.').peekable();

        while let Some(component) = components.next() {
            let caps = path_component().captures(component).ok_or_else(unknown)?;
            let name = &caps[1];

            let mut offset = base;
            let mut found = None;
            for field in fields {
                if field.name == name {
                    found = Some(field);
                    break;
                }
                offset += field.kind.size();
            }
            let field = found.ok_or_else(unknown)?;
            let mut kind = &field.kind;

            if let Some(index) = caps.get(2) {
                let FieldKind::Array { len, element } = kind else {
                    return Err(unknown());
                };
                let index: u32 = index.as_str().parse().map_err(|_| unknown())?;
                if index >= *len {
                    return Err(unknown());
                }
                offset += index * element.size();
                kind = element.as_ref();
            }

            if components.peek().is_none() {
                return kind
                    .scalar()
                    .map(|kind| ResolvedField { offset, kind })
                    .ok_or_else(unknown);
            }

            match kind {
                FieldKind::Struct { fields: inner } => {
                    fields = inner;
                    base = offset;
                }
                _ => return Err(unknown()),
            }
        }
        Err(unknown())
    }

    /// Encode a JSON object of field values into a payload
    ///
    /// Nested structs are objects, arrays are JSON arrays. Absent values
    /// encode as zero or the empty string.
    pub fn encode(&self, values: &Value) -> Result<Vec<u8>> {
        let mut fixed = vec![0u8; self.size() as usize];
        let mut strings = Vec::new();
        encode_fields(&self.name, &self.fields, values, 0, &mut fixed, &mut strings)?;

        for (slot, text) in strings {
            let start = fixed.len() as u32;
            let len = text.len() as u32;
            fixed[slot..slot + 4].copy_from_slice(&start.to_le_bytes());
            fixed[slot + 4..slot + 8].copy_from_slice(&len.to_le_bytes());
            fixed.extend_from_slice(text.as_bytes());
        }
        Ok(fixed)
    }
}

fn validate_fields(event: &str, fields: &[FieldLayout]) -> Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if fields[..i].iter().any(|f| f.name == field.name) {
            return Err(TraceError::InvalidLayout {
                event: event.to_string(),
                reason: format!("duplicate field '{}'", field.name),
            });
        }
        validate_kind(event, &field.name, &field.kind)?;
    }
    Ok(())
}

fn validate_kind(event: &str, name: &str, kind: &FieldKind) -> Result<()> {
    match kind {
        FieldKind::Struct { fields } => validate_fields(event, fields),
        FieldKind::Array { len: 0, .. } => Err(TraceError::InvalidLayout {
            event: event.to_string(),
            reason: format!("array field '{}' has no elements", name),
        }),
        FieldKind::Array { element, .. } => validate_kind(event, name, element),
        _ => Ok(()),
    }
}

fn encode_fields(
    event: &str,
    fields: &[FieldLayout],
    values: &Value,
    mut offset: usize,
    buf: &mut [u8],
    strings: &mut Vec<(usize, String)>,
) -> Result<()> {
    for field in fields {
        let value = values.get(&field.name).unwrap_or(&Value::Null);
        encode_value(event, &field.name, &field.kind, value, offset, buf, strings)?;
        offset += field.kind.size() as usize;
    }
    Ok(())
}

fn encode_value(
    event: &str,
    name: &str,
    kind: &FieldKind,
    value: &Value,
    offset: usize,
    buf: &mut [u8],
    strings: &mut Vec<(usize, String)>,
) -> Result<()> {
    let invalid = |reason: &str| TraceError::InvalidLiteral {
        field: format!("{}.{}", event, name),
        value: value.to_string(),
        reason: reason.to_string(),
    };
    let unsigned = |max: u64| -> Result<u64> {
        if value.is_null() {
            return Ok(0);
        }
        value
            .as_u64()
            .filter(|v| *v <= max)
            .ok_or_else(|| invalid("expected an unsigned integer in range"))
    };

    match kind {
        FieldKind::U16 => {
            let v = unsigned(u16::MAX as u64)? as u16;
            buf[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
        }
        FieldKind::U32 => {
            let v = unsigned(u32::MAX as u64)? as u32;
            buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
        }
        FieldKind::U64 => {
            let v = unsigned(u64::MAX)?;
            buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
        }
        FieldKind::F64 => {
            let v = if value.is_null() {
                0.0
            } else {
                value.as_f64().ok_or_else(|| invalid("expected a number"))?
            };
            buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
        }
        FieldKind::String => {
            let text = match value {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                _ => return Err(invalid("expected a string")),
            };
            strings.push((offset, text));
        }
        FieldKind::Struct { fields } => {
            if !(value.is_null() || value.is_object()) {
                return Err(invalid("expected an object"));
            }
            encode_fields(event, fields, value, offset, buf, strings)?;
        }
        FieldKind::Array { len, element } => {
            let items = match value {
                Value::Null => &[][..],
                Value::Array(items) if items.len() <= *len as usize => items.as_slice(),
                _ => return Err(invalid("expected an array no longer than the declared length")),
            };
            let stride = element.size() as usize;
            for (i, item) in items.iter().enumerate() {
                encode_value(event, name, element, item, offset + i * stride, buf, strings)?;
            }
        }
    }
    Ok(())
}

/// Event layouts by event name
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    events: BTreeMap<String, EventLayout>,
}

impl FieldCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layout; an identical redeclaration is accepted, a conflicting
    /// one is not
    pub fn insert(&mut self, layout: EventLayout) -> Result<()> {
        layout.validate()?;
        match self.events.get(&layout.name) {
            Some(existing) if *existing != layout => Err(TraceError::InvalidLayout {
                event: layout.name.clone(),
                reason: "conflicts with an earlier declaration".to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.events.insert(layout.name.clone(), layout);
                Ok(())
            }
        }
    }

    pub fn get(&self, event: &str) -> Option<&EventLayout> {
        self.events.get(event)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events.contains_key(event)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Resolve `path` within the layout of `event`
    pub fn resolve(&self, event: &str, path: &str) -> Result<ResolvedField> {
        self.events
            .get(event)
            .ok_or_else(|| TraceError::UnknownField {
                path: format!("{}.{}", event, path),
            })?
            .resolve(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_layout() -> EventLayout {
        EventLayout::new("fs_open")
            .field("fd", FieldKind::U32)
            .field("filename", FieldKind::String)
            .field(
                "args",
                FieldKind::Array {
                    len: 3,
                    element: Box::new(FieldKind::Struct {
                        fields: vec![
                            FieldLayout::new("flag", FieldKind::U16),
                            FieldLayout::new("value", FieldKind::U64),
                        ],
                    }),
                },
            )
            .field("elapsed", FieldKind::F64)
    }

    #[test]
    fn test_size_and_resolution() {
        let layout = open_layout();
        // 4 + 8 + 3 * (2 + 8) + 8
        assert_eq!(layout.size(), 50);

        assert_eq!(
            layout.resolve("filename").unwrap(),
            ResolvedField { offset: 4, kind: ScalarKind::String }
        );
        assert_eq!(
            layout.resolve("args[2].value").unwrap(),
            ResolvedField { offset: 12 + 20 + 2, kind: ScalarKind::U64 }
        );
        assert_eq!(layout.resolve("elapsed").unwrap().offset, 42);
    }

    #[test]
    fn test_bad_paths() {
        let layout = open_layout();
        assert!(layout.resolve("missing").is_err());
        assert!(layout.resolve("args").is_err());
        assert!(layout.resolve("args[3].flag").is_err());
        assert!(layout.resolve("fd[0]").is_err());
        assert!(layout.resolve("fd.inner").is_err());
        assert!(layout.resolve("args[1].").is_err());
    }

    #[test]
    fn test_encode_places_values() {
        let layout = open_layout();
        let payload = layout
            .encode(&json!({
                "fd": 3,
                "filename": "/etc/passwd",
                "args": [{"flag": 1, "value": 10}, {"flag": 2, "value": 20}],
                "elapsed": 0.5
            }))
            .unwrap();

        assert_eq!(&payload[0..4], &3u32.to_le_bytes());
        let start = u32::from_le_bytes(payload[4..8].try_into().unwrap()) as usize;
        let len = u32::from_le_bytes(payload[8..12].try_into().unwrap()) as usize;
        assert_eq!(start, 50);
        assert_eq!(&payload[start..start + len], b"/etc/passwd");

        let second_value = 12 + 10 + 2;
        assert_eq!(&payload[second_value..second_value + 8], &20u64.to_le_bytes());
        // third array slot left zeroed
        assert!(payload[32..42].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_encode_rejects_wrong_types() {
        let layout = open_layout();
        assert!(layout.encode(&json!({"fd": "three"})).is_err());
        assert!(layout.encode(&json!({"fd": 5_000_000_000u64})).is_err());
        assert!(layout.encode(&json!({"args": [{}, {}, {}, {}]})).is_err());
    }

    #[test]
    fn test_catalog_conflicts() {
        let mut catalog = FieldCatalog::new();
        catalog.insert(open_layout()).unwrap();
        catalog.insert(open_layout()).unwrap();
        assert_eq!(catalog.len(), 1);

        let other = EventLayout::new("fs_open").field("fd", FieldKind::U64);
        assert!(catalog.insert(other).is_err());

        let dup = EventLayout::new("bad")
            .field("x", FieldKind::U16)
            .field("x", FieldKind::U16);
        assert!(catalog.insert(dup).is_err());
    }

    #[test]
    fn test_layout_from_json() {
        let layout: EventLayout = serde_json::from_str(
            r#"{"name": "sched_switch", "fields": [
                {"name": "prev_pid", "type": "u32"},
                {"name": "comm", "type": "array", "len": 2, "element": {"type": "u16"}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(layout.size(), 8);
        assert_eq!(layout.resolve("comm[1]").unwrap().offset, 6);
    }
}
