pub mod codec;
pub mod slot;
pub mod primitive;
pub mod boolean;
pub mod string;
pub mod object;
pub mod blob;

use std::sync::Arc;
use crate::column::blob::BlobColumn;
use crate::column::boolean::BooleanColumn;
use crate::column::object::{ObjectColumn, ObjectPush};
use crate::column::primitive::{Decimal, Millis, PrimitiveColumn};
use crate::column::slot::SwapExtent;
use crate::column::string::StringColumn;
use crate::core::context::ColumnEnv;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ColumnKind, ColumnSpec, Value};
use crate::memory::scheduler::Swappable;

/// One attribute's values within a fragment.
pub enum Column {
    Boolean(BooleanColumn),
    Byte(PrimitiveColumn<i8>),
    Short(PrimitiveColumn<i16>),
    Int(PrimitiveColumn<i32>),
    Long(PrimitiveColumn<i64>),
    Float(PrimitiveColumn<f32>),
    Double(PrimitiveColumn<f64>),
    Decimal(PrimitiveColumn<Decimal>),
    Timestamp(PrimitiveColumn<Millis>),
    String(StringColumn),
    Object(ObjectColumn),
    Blob(Arc<BlobColumn>),
}

/// A column rebuilt as a better-fitting type, with the `ColumnSpec` that built it
pub struct Retyped {
    pub spec: ColumnSpec,
    pub column: Column,
}

impl std::fmt::Debug for Retyped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retyped").field("spec", &self.spec).finish_non_exhaustive()
    }
}

/// Every variant except Blob is backed by a `ColumnSlot`.
macro_rules! with_slot {
    ($column:expr, $slot:ident => $body:expr, blob $blob:ident => $blob_body:expr) => {
        match $column {
            Column::Boolean(c) => { let $slot = &c.slot; $body }
            Column::Byte(c) => { let $slot = &c.slot; $body }
            Column::Short(c) => { let $slot = &c.slot; $body }
            Column::Int(c) => { let $slot = &c.slot; $body }
            Column::Long(c) => { let $slot = &c.slot; $body }
            Column::Float(c) => { let $slot = &c.slot; $body }
            Column::Double(c) => { let $slot = &c.slot; $body }
            Column::Decimal(c) => { let $slot = &c.slot; $body }
            Column::Timestamp(c) => { let $slot = &c.slot; $body }
            Column::String(c) => { let $slot = &c.slot; $body }
            Column::Object(c) => { let $slot = &c.slot; $body }
            Column::Blob($blob) => $blob_body,
        }
    };
}

/// Numeric fast path for fixed-width variants; everything else goes through `Value`.
macro_rules! native_or_value {
    ($column:expr, $row:expr, $native:ident => $convert:expr, $value:ident => $fallback:expr) => {
        match $column {
            Column::Byte(c) => Ok(c.get($row)?.map(|$native| $convert).unwrap_or_default()),
            Column::Short(c) => Ok(c.get($row)?.map(|$native| $convert).unwrap_or_default()),
            Column::Int(c) => Ok(c.get($row)?.map(|$native| $convert).unwrap_or_default()),
            Column::Long(c) => Ok(c.get($row)?.map(|$native| $convert).unwrap_or_default()),
            Column::Float(c) => Ok(c.get($row)?.map(|$native| $convert).unwrap_or_default()),
            Column::Double(c) => Ok(c.get($row)?.map(|$native| $convert).unwrap_or_default()),
            Column::Decimal(c) => Ok(c.get($row)?.map(|$native| $convert).unwrap_or_default()),
            Column::Timestamp(c) => Ok(c.get($row)?.map(|$native| $convert).unwrap_or_default()),
            other => {
                let $value = other.get_value($row)?;
                Ok($fallback)
            }
        }
    };
}

impl Column {
    pub fn new(spec: &ColumnSpec, env: ColumnEnv) -> Column {
        match spec.kind {
            ColumnKind::Boolean => Column::Boolean(BooleanColumn::new(spec, env)),
            ColumnKind::Byte => Column::Byte(PrimitiveColumn::new(spec, env)),
            ColumnKind::Short => Column::Short(PrimitiveColumn::new(spec, env)),
            ColumnKind::Int => Column::Int(PrimitiveColumn::new(spec, env)),
            ColumnKind::Long => Column::Long(PrimitiveColumn::new(spec, env)),
            ColumnKind::Float => Column::Float(PrimitiveColumn::new(spec, env)),
            ColumnKind::Double => Column::Double(PrimitiveColumn::new(spec, env)),
            ColumnKind::Decimal => Column::Decimal(PrimitiveColumn::new(spec, env)),
            ColumnKind::Timestamp => Column::Timestamp(PrimitiveColumn::new(spec, env)),
            ColumnKind::String => Column::String(StringColumn::new(spec, env)),
            ColumnKind::Object => Column::Object(ObjectColumn::new(spec, env)),
            ColumnKind::Blob => {
                let scheduler = env.ctx.scheduler.clone();
                let blob = Arc::new(BlobColumn::new(spec, env));
                if let Some(scheduler) = scheduler {
                    scheduler.register(&blob);
                }
                Column::Blob(blob)
            }
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Column::Boolean(_) => ColumnKind::Boolean,
            Column::Byte(_) => ColumnKind::Byte,
            Column::Short(_) => ColumnKind::Short,
            Column::Int(_) => ColumnKind::Int,
            Column::Long(_) => ColumnKind::Long,
            Column::Float(_) => ColumnKind::Float,
            Column::Double(_) => ColumnKind::Double,
            Column::Decimal(_) => ColumnKind::Decimal,
            Column::Timestamp(_) => ColumnKind::Timestamp,
            Column::String(_) => ColumnKind::String,
            Column::Object(_) => ColumnKind::Object,
            Column::Blob(_) => ColumnKind::Blob,
        }
    }

    fn env(&self) -> Option<&ColumnEnv> {
        with_slot!(self, slot => Some(slot.env()), blob _b => None)
    }

    /// Append one row. `Some` means this column was rebuilt as a more
    /// fitting type; the caller must use the replacement from now on.
    pub fn add(&self, spec: &ColumnSpec, value: &Value) -> Result<Option<Retyped>> {
        let stored = match self {
            Column::Boolean(c) => c.push(value)?,
            Column::Byte(c) => c.push(value)?,
            Column::Short(c) => c.push(value)?,
            Column::Int(c) => c.push(value)?,
            Column::Long(c) => c.push(value)?,
            Column::Float(c) => c.push(value)?,
            Column::Double(c) => c.push(value)?,
            Column::Decimal(c) => c.push(value)?,
            Column::Timestamp(c) => c.push(value)?,
            Column::String(c) => c.push(value)?,
            Column::Object(c) => match c.push(value)? {
                ObjectPush::Stored => true,
                ObjectPush::Retype(kind) => {
                    return self.rebuild_as(spec.retyped(kind), value).map(Some);
                }
            },
            Column::Blob(c) => {
                c.push(value)?;
                true
            }
        };
        if stored {
            return Ok(None);
        }

        if spec.dynamic {
            // A retyped column met a value of another type: fall back to generic
            let fallback = ColumnSpec {
                kind: ColumnKind::Object,
                dynamic: false,
                ..spec.clone()
            };
            return self.rebuild_as(fallback, value).map(Some);
        }
        Err(Error::new(
            ErrorKind::InvalidInput,
            format!("{:?} column cannot store {:?}", self.kind(), value),
        ))
    }

    /// New column of `spec.kind` holding every existing row plus `next`.
    /// The replacement may itself fall back to Object part way through.
    fn rebuild_as(&self, spec: ColumnSpec, next: &Value) -> Result<Retyped> {
        let env = self
            .env()
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::InvalidState, "blob columns are not retyped".to_string()))?;
        let mut rebuilt = Retyped {
            column: Column::new(&spec, env),
            spec,
        };
        for row in 0..=self.len() {
            let value = if row < self.len() { self.get_value(row)? } else { next.clone() };
            if let Some(replacement) = rebuilt.column.add(&rebuilt.spec, &value)? {
                rebuilt = replacement;
            }
        }
        Ok(rebuilt)
    }

    pub fn len(&self) -> usize {
        with_slot!(self, slot => slot.len(), blob b => b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        with_slot!(self, slot => slot.capacity(), blob b => b.capacity())
    }

    pub fn is_serializable(&self) -> bool {
        with_slot!(self, slot => slot.is_serializable(), blob b => b.is_serializable())
    }

    pub fn is_resident(&self) -> bool {
        with_slot!(self, slot => slot.is_resident(), blob _b => true)
    }

    pub fn missing(&self) -> Option<String> {
        with_slot!(self, slot => slot.missing(), blob _b => None)
    }

    pub fn get_value(&self, row: usize) -> Result<Value> {
        match self {
            Column::Boolean(c) => c.value(row),
            Column::Byte(c) => c.value(row),
            Column::Short(c) => c.value(row),
            Column::Int(c) => c.value(row),
            Column::Long(c) => c.value(row),
            Column::Float(c) => c.value(row),
            Column::Double(c) => c.value(row),
            Column::Decimal(c) => c.value(row),
            Column::Timestamp(c) => c.value(row),
            Column::String(c) => c.value(row),
            Column::Object(c) => c.value(row),
            Column::Blob(c) => c.value(row),
        }
    }

    pub fn is_null(&self, row: usize) -> Result<bool> {
        match self {
            Column::Boolean(c) => Ok(c.get(row)?.is_none()),
            Column::Byte(c) => Ok(c.get(row)?.is_none()),
            Column::Short(c) => Ok(c.get(row)?.is_none()),
            Column::Int(c) => Ok(c.get(row)?.is_none()),
            Column::Long(c) => Ok(c.get(row)?.is_none()),
            Column::Float(c) => Ok(c.get(row)?.is_none()),
            Column::Double(c) => Ok(c.get(row)?.is_none()),
            Column::Decimal(c) => Ok(c.get(row)?.is_none()),
            Column::Timestamp(c) => Ok(c.get(row)?.is_none()),
            Column::String(c) => Ok(c.get(row)?.is_none()),
            Column::Object(c) => Ok(c.value(row)?.is_null()),
            Column::Blob(c) => c.is_null(row),
        }
    }

    pub fn get_f64(&self, row: usize) -> Result<f64> {
        use crate::column::primitive::NativeType;
        native_or_value!(self, row, v => v.to_f64(), value => value.as_f64())
    }

    pub fn get_f32(&self, row: usize) -> Result<f32> {
        Ok(self.get_f64(row)? as f32)
    }

    pub fn get_i64(&self, row: usize) -> Result<i64> {
        use crate::column::primitive::NativeType;
        native_or_value!(self, row, v => v.to_i64(), value => value.as_i64())
    }

    pub fn get_i32(&self, row: usize) -> Result<i32> {
        Ok(self.get_i64(row)? as i32)
    }

    pub fn get_i16(&self, row: usize) -> Result<i16> {
        Ok(self.get_i64(row)? as i16)
    }

    pub fn get_i8(&self, row: usize) -> Result<i8> {
        Ok(self.get_i64(row)? as i8)
    }

    pub fn get_bool(&self, row: usize) -> Result<bool> {
        match self {
            Column::Boolean(c) => Ok(c.get(row)?.unwrap_or(false)),
            other => Ok(other.get_value(row)?.as_bool()),
        }
    }

    /// Encoded, compressed payload for a swap file; `None` when this column
    /// is not written into fragment files.
    pub fn payload(&self) -> Result<Option<Vec<u8>>> {
        with_slot!(self, slot => slot.payload(), blob _b => Ok(None))
    }

    /// Drop the in-memory buffer once its bytes are known to be on disk.
    pub fn evict(&self, extent: Option<SwapExtent>) -> bool {
        match self {
            Column::Blob(b) => b.swap(),
            other => with_slot!(other, slot => slot.evict(extent), blob _b => false),
        }
    }

    pub fn bind(&self, extent: SwapExtent, rows: usize) {
        with_slot!(self, slot => slot.bind(extent, rows), blob _b => ())
    }

    pub fn mark_missing(&self, diagnostic: String, rows: usize) {
        with_slot!(self, slot => slot.mark_missing(diagnostic, rows), blob _b => ())
    }

    /// Seal: drop transient caches and charge the buffer to the monitor.
    pub fn complete(&self) {
        match self {
            Column::String(c) => c.complete(),
            Column::Object(c) => c.complete(),
            other => with_slot!(other, slot => slot.complete(), blob _b => ()),
        }
    }

    pub fn dispose(&self) {
        with_slot!(self, slot => slot.dispose(), blob b => b.dispose())
    }

    pub fn heap_size(&self) -> usize {
        with_slot!(self, slot => slot.heap_size(), blob _b => 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::codec::FormatVersion;
    use crate::core::config::StoreConfig;
    use crate::core::context::StoreContext;
    use chrono::DateTime;

    fn env() -> ColumnEnv {
        let ctx = Arc::new(StoreContext::new(StoreConfig::default()).unwrap());
        ColumnEnv::new(ctx, FormatVersion::V2)
    }

    /// Feed values, following replacements like a fragment would.
    fn fill(spec: &ColumnSpec, values: &[Value]) -> (Column, ColumnSpec) {
        let mut spec = spec.clone();
        let mut column = Column::new(&spec, env());
        for value in values {
            if let Some(retyped) = column.add(&spec, value).unwrap() {
                spec = retyped.spec;
                column = retyped.column;
            }
        }
        (column, spec)
    }

    #[test]
    fn dynamic_object_column_becomes_int() {
        let values: Vec<Value> = (0..1000).map(Value::Int).collect();
        let (column, spec) = fill(&ColumnSpec::dynamic_object(), &values);
        assert_eq!(column.kind(), ColumnKind::Int);
        assert_eq!(spec.kind, ColumnKind::Int);
        for (row, value) in values.iter().enumerate() {
            assert_eq!(&column.get_value(row).unwrap(), value);
        }

        // A null does not trigger another retype
        assert!(column.add(&spec, &Value::Null).unwrap().is_none());
        assert!(column.is_null(1000).unwrap());
    }

    #[test]
    fn leading_nulls_survive_retype() {
        let values = vec![Value::Null, Value::Null, Value::string("a"), Value::string("b")];
        let (column, _) = fill(&ColumnSpec::dynamic_object(), &values);
        assert_eq!(column.kind(), ColumnKind::String);
        for (row, value) in values.iter().enumerate() {
            assert_eq!(&column.get_value(row).unwrap(), value);
        }
    }

    #[test]
    fn retyped_column_falls_back_to_object_on_mixed_input() {
        let values = vec![Value::Int(1), Value::string("two"), Value::Int(3)];
        let (column, spec) = fill(&ColumnSpec::dynamic_object(), &values);
        assert_eq!(column.kind(), ColumnKind::Object);
        assert!(!spec.dynamic);
        for (row, value) in values.iter().enumerate() {
            assert_eq!(&column.get_value(row).unwrap(), value);
        }
    }

    #[test]
    fn sub_millisecond_timestamps_stay_exact() {
        let base = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let values = vec![Value::Timestamp(base), Value::Null, Value::timestamp_millis(5)];
        let (column, spec) = fill(&ColumnSpec::dynamic_object(), &values);
        assert_eq!(column.kind(), ColumnKind::Object);
        assert!(!spec.dynamic);
        for (row, value) in values.iter().enumerate() {
            assert_eq!(&column.get_value(row).unwrap(), value);
        }

        // Whole milliseconds still specialize, until a finer value shows up
        let millis = vec![Value::timestamp_millis(1_000), Value::timestamp_millis(2_000)];
        let (column, spec) = fill(&ColumnSpec::dynamic_object(), &millis);
        assert_eq!(column.kind(), ColumnKind::Timestamp);
        let finer = Value::Timestamp(base);
        let fallback = column.add(&spec, &finer).unwrap().expect("falls back");
        assert_eq!(fallback.column.kind(), ColumnKind::Object);
        assert_eq!(fallback.column.get_value(2).unwrap(), finer);
        assert_eq!(fallback.column.get_value(0).unwrap(), millis[0]);
    }

    #[test]
    fn static_column_rejects_wrong_type() {
        let spec = ColumnSpec::new(ColumnKind::Int);
        let column = Column::new(&spec, env());
        let err = column.add(&spec, &Value::string("x")).unwrap_err();
        assert!(err.is(ErrorKind::InvalidInput));
    }

    #[test]
    fn non_persistable_object_marks_column() {
        let spec = ColumnSpec::new(ColumnKind::Object);
        let column = Column::new(&spec, env());
        column.add(&spec, &Value::Int(1)).unwrap();
        assert!(column.is_serializable());
        column.add(&spec, &Value::opaque(vec![1u8])).unwrap();
        column.add(&spec, &Value::Int(2)).unwrap();
        assert!(!column.is_serializable());
        assert!(column.payload().unwrap().is_none());
    }

    #[test]
    fn typed_getters_convert() {
        let spec = ColumnSpec::new(ColumnKind::Short);
        let column = Column::new(&spec, env());
        column.add(&spec, &Value::Short(-7)).unwrap();
        column.add(&spec, &Value::Null).unwrap();
        assert_eq!(column.get_f64(0).unwrap(), -7.0);
        assert_eq!(column.get_i32(0).unwrap(), -7);
        assert_eq!(column.get_i64(1).unwrap(), 0);
        assert!(column.is_null(1).unwrap());
        assert!(column.get_value(2).unwrap_err().is(ErrorKind::OutOfBounds));
    }

    #[test]
    fn capacity_is_enforced() {
        let spec = ColumnSpec::new(ColumnKind::Boolean).with_capacity(2, 3);
        let column = Column::new(&spec, env());
        for _ in 0..3 {
            column.add(&spec, &Value::Bool(true)).unwrap();
        }
        let err = column.add(&spec, &Value::Bool(false)).unwrap_err();
        assert!(err.is(ErrorKind::CapacityExceeded));
        assert_eq!(column.len(), 3);
        assert!(column.get_bool(0).unwrap());
    }

    #[test]
    fn string_cache_turns_off_for_unique_values() {
        let spec = ColumnSpec::new(ColumnKind::String);
        let column = StringColumn::new(&spec, env());
        for i in 0..512 {
            column.push(&Value::string(format!("value-{}", i))).unwrap();
        }
        assert!(!column.cache_enabled());
        assert_eq!(column.value(511).unwrap(), Value::string("value-511"));
    }
}
