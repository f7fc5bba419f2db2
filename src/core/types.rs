use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rows per fragment. Row routing relies on this being `1 << FRAGMENT_SHIFT`.
pub const FRAGMENT_CAPACITY: usize = 8192;
pub const FRAGMENT_SHIFT: u32 = 13;
pub const FRAGMENT_MASK: usize = FRAGMENT_CAPACITY - 1;

/// Hard ceiling for any column's row capacity
pub const MAX_COLUMN_CAPACITY: usize = 65534;

/// Map a table row (row 0 is the header) to `(fragment index, intra-fragment index)`.
pub fn route_row(row: usize) -> Option<(usize, usize)> {
    if row == 0 {
        return None;
    }
    let data = row - 1;
    Some((data >> FRAGMENT_SHIFT, data & FRAGMENT_MASK))
}

/// Decoded image payload; boxed into a portable record before serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

/// Handle to an arbitrary in-process object. Never persisted.
#[derive(Clone)]
pub struct Opaque(pub Arc<dyn Any + Send + Sync>);

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({:p})", Arc::as_ptr(&self.0))
    }
}

/// A single cell value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Big decimal stored as a double
    Decimal(f64),
    Timestamp(DateTime<Utc>),
    String(Arc<str>),
    Binary(Bytes),
    Image(Arc<Image>),
    Opaque(Opaque),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Value {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn timestamp_millis(ms: i64) -> Value {
        match DateTime::from_timestamp_millis(ms) {
            Some(ts) => Value::Timestamp(ts),
            None => Value::Null,
        }
    }

    pub fn opaque<T: Any + Send + Sync>(value: T) -> Value {
        Value::Opaque(Opaque(Arc::new(value)))
    }

    pub fn as_opaque<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(o) => o.0.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// False for values the object codec cannot write to disk.
    pub fn is_persistable(&self) -> bool {
        !matches!(self, Value::Opaque(_))
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Null | Value::Opaque(_) | Value::Binary(_) | Value::Image(_) => 0.0,
            Value::Bool(b) => *b as u8 as f64,
            Value::Byte(v) => *v as f64,
            Value::Short(v) => *v as f64,
            Value::Int(v) => *v as f64,
            Value::Long(v) => *v as f64,
            Value::Float(v) => *v as f64,
            Value::Double(v) | Value::Decimal(v) => *v,
            Value::Timestamp(ts) => ts.timestamp_millis() as f64,
            Value::String(s) => s.trim().parse().unwrap_or(0.0),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Value::Byte(v) => *v as i64,
            Value::Short(v) => *v as i64,
            Value::Int(v) => *v as i64,
            Value::Long(v) => *v,
            Value::Timestamp(ts) => ts.timestamp_millis(),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .unwrap_or_else(|_| s.trim().parse::<f64>().unwrap_or(0.0) as i64),
            other => other.as_f64() as i64,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::String(s) => s.eq_ignore_ascii_case("true"),
            Value::Null | Value::Opaque(_) | Value::Binary(_) | Value::Image(_) => false,
            other => other.as_f64() != 0.0,
        }
    }

    /// Column kind a dynamic Object column specializes to for this value.
    pub fn specialized_kind(&self) -> Option<ColumnKind> {
        match self {
            Value::Bool(_) => Some(ColumnKind::Boolean),
            Value::Byte(_) | Value::Short(_) | Value::Int(_) => Some(ColumnKind::Int),
            Value::Long(_) => Some(ColumnKind::Long),
            Value::Float(_) | Value::Double(_) => Some(ColumnKind::Double),
            Value::Decimal(_) => Some(ColumnKind::Decimal),
            Value::Timestamp(_) => Some(ColumnKind::Timestamp),
            Value::String(_) => Some(ColumnKind::String),
            _ => None,
        }
    }

    fn discriminant(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Byte(_) => 2,
            Value::Short(_) => 3,
            Value::Int(_) => 4,
            Value::Long(_) => 5,
            Value::Float(_) => 6,
            Value::Double(_) => 7,
            Value::Decimal(_) => 8,
            Value::Timestamp(_) => 9,
            Value::String(_) => 10,
            Value::Binary(_) => 11,
            Value::Image(_) => 12,
            Value::Opaque(_) => 13,
        }
    }
}

// Floats compare bitwise so that -0.0 and NaN payloads survive round-trips.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Decimal(a), Value::Decimal(b)) => a.to_bits() == b.to_bits(),
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Image(a), Value::Image(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.discriminant().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Byte(v) => v.hash(state),
            Value::Short(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Long(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Double(v) | Value::Decimal(v) => v.to_bits().hash(state),
            Value::Timestamp(v) => v.hash(state),
            Value::String(v) => v.hash(state),
            Value::Binary(v) => v.hash(state),
            Value::Image(v) => v.hash(state),
            Value::Opaque(v) => (Arc::as_ptr(&v.0) as *const () as usize).hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Short(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) | Value::Decimal(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Value::String(v) => f.write_str(v),
            Value::Binary(v) => write!(f, "<{} bytes>", v.len()),
            Value::Image(v) => write!(f, "<image {}x{}>", v.width, v.height),
            Value::Opaque(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Physical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Decimal,
    Timestamp,
    String,
    Object,
    /// Large values kept in a private file outside a small working set
    Blob,
}

/// Per-column "creator": how to build the column for each new fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub kind: ColumnKind,
    pub initial_capacity: usize,
    pub max_capacity: usize,
    /// Object columns: specialize on the first non-null value.
    /// Typed columns: this column came from such a retype.
    pub dynamic: bool,
}

impl ColumnSpec {
    pub fn new(kind: ColumnKind) -> Self {
        ColumnSpec {
            kind,
            initial_capacity: 256,
            max_capacity: FRAGMENT_CAPACITY,
            dynamic: false,
        }
    }

    pub fn dynamic_object() -> Self {
        ColumnSpec {
            dynamic: true,
            ..ColumnSpec::new(ColumnKind::Object)
        }
    }

    pub fn with_capacity(mut self, initial: usize, max: usize) -> Self {
        let max = max.min(MAX_COLUMN_CAPACITY);
        self.initial_capacity = initial.min(max);
        self.max_capacity = max;
        self
    }

    /// Spec for the column that replaces a dynamic Object column.
    pub fn retyped(&self, kind: ColumnKind) -> Self {
        ColumnSpec {
            kind,
            dynamic: true,
            ..self.clone()
        }
    }
}

/// Stable column identifier, preserved across snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnId(pub Uuid);

impl ColumnId {
    pub fn new() -> Self {
        ColumnId(Uuid::new_v4())
    }
}

impl Default for ColumnId {
    fn default() -> Self {
        Self::new()
    }
}
