//! Reply framing and field parsing for the 10micron protocol
//!
//! A batched reply is the concatenation of every answer in the batch. Terminated
//! answers end in `#`; raw answers are bare bytes. `parse_fields` maps the
//! `#`-separated chunks of a reply onto named, typed slots.

use std::collections::BTreeMap;

use crate::coords::{parse_degrees, parse_hours, parse_limit_degrees, parse_longitude};
use crate::error::{MountError, MountResult};

/// Default mount TCP port
pub const DEFAULT_PORT: u16 = 3492;

/// A complete reply to one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    text: String,
}

impl Reply {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// `#`-separated chunks, without the trailing empty chunk
    pub fn fields(&self) -> Vec<&str> {
        split_fields(&self.text)
    }

    /// Model commands answer `1` on success; a batch succeeds when its last
    /// answer does
    pub fn ends_with_success(&self) -> bool {
        self.text.trim_end_matches('#').ends_with('1')
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Reply::new(s)
    }
}

/// Split a reply on `#`. A reply ending in `#` does not yield an empty last field.
pub fn split_fields(reply: &str) -> Vec<&str> {
    let mut fields: Vec<&str> = reply.split('#').collect();
    if fields.last().map_or(false, |f| f.is_empty()) {
        fields.pop();
    }
    fields
}

/// How to coerce one reply field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Float,
    Int,
    /// `0` / `1`
    Flag,
    /// `HH:MM:SS.ss`
    Hours,
    /// `±DD*MM:SS.s`
    Degrees,
    /// Wire longitude, sign inverted on read
    Longitude,
    /// `+80*`
    Limit,
}

/// One named slot of a reply schema
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

pub const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

/// A coerced field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Float(f64),
    Int(i64),
    Flag(bool),
}

/// Named values produced by `parse_fields`
#[derive(Debug, Clone, Default)]
pub struct Fields {
    values: BTreeMap<&'static str, FieldValue>,
}

impl Fields {
    fn get(&self, name: &str) -> MountResult<&FieldValue> {
        self.values
            .get(name)
            .ok_or_else(|| MountError::mismatch(format!("no field '{}'", name)))
    }

    pub fn text(&self, name: &str) -> MountResult<String> {
        match self.get(name)? {
            FieldValue::Text(s) => Ok(s.clone()),
            other => Err(MountError::mismatch(format!("field '{}' is {:?}", name, other))),
        }
    }

    pub fn float(&self, name: &str) -> MountResult<f64> {
        match self.get(name)? {
            FieldValue::Float(v) => Ok(*v),
            FieldValue::Int(v) => Ok(*v as f64),
            other => Err(MountError::mismatch(format!("field '{}' is {:?}", name, other))),
        }
    }

    pub fn int(&self, name: &str) -> MountResult<i64> {
        match self.get(name)? {
            FieldValue::Int(v) => Ok(*v),
            other => Err(MountError::mismatch(format!("field '{}' is {:?}", name, other))),
        }
    }

    pub fn flag(&self, name: &str) -> MountResult<bool> {
        match self.get(name)? {
            FieldValue::Flag(v) => Ok(*v),
            other => Err(MountError::mismatch(format!("field '{}' is {:?}", name, other))),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn coerce(spec: &FieldSpec, raw: &str) -> MountResult<FieldValue> {
    let bad = || MountError::mismatch(format!("field '{}' has bad value '{}'", spec.name, raw));
    let raw_trim = raw.trim();
    Ok(match spec.kind {
        FieldKind::Text => FieldValue::Text(raw_trim.to_string()),
        FieldKind::Float => FieldValue::Float(raw_trim.parse().map_err(|_| bad())?),
        FieldKind::Int => FieldValue::Int(raw_trim.parse().map_err(|_| bad())?),
        FieldKind::Flag => match raw_trim {
            "1" => FieldValue::Flag(true),
            "0" => FieldValue::Flag(false),
            _ => return Err(bad()),
        },
        FieldKind::Hours => FieldValue::Float(parse_hours(raw_trim).map_err(|_| bad())?),
        FieldKind::Degrees => FieldValue::Float(parse_degrees(raw_trim).map_err(|_| bad())?),
        FieldKind::Longitude => FieldValue::Float(parse_longitude(raw_trim).map_err(|_| bad())?),
        FieldKind::Limit => FieldValue::Float(parse_limit_degrees(raw_trim).map_err(|_| bad())?),
    })
}

/// Split `reply` on `#` and coerce each chunk per `schema`
pub fn parse_fields(reply: &str, schema: &[FieldSpec]) -> MountResult<Fields> {
    let chunks = split_fields(reply);
    if chunks.len() < schema.len() {
        return Err(MountError::ParseShort {
            expected: schema.len(),
            got: chunks.len(),
        });
    }
    if chunks.len() > schema.len() {
        return Err(MountError::mismatch(format!(
            "expected {} fields, got {}",
            schema.len(),
            chunks.len()
        )));
    }
    parse_values(&chunks, schema)
}

/// Coerce already split values, e.g. the comma-separated body of `Ginfo`
pub fn parse_values(values: &[&str], schema: &[FieldSpec]) -> MountResult<Fields> {
    if values.len() != schema.len() {
        return Err(MountError::ParseShort {
            expected: schema.len(),
            got: values.len(),
        });
    }
    let mut fields = Fields::default();
    for (spec, raw) in schema.iter().zip(values) {
        fields.values.insert(spec.name, coerce(spec, raw)?);
    }
    Ok(fields)
}

/// Escape a protocol string for single-line logging. Long strings are
/// truncated.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 200;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
