use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use crate::cache::value_cache::ValueCache;
use crate::column::slot::{reserve_one, take_bytes, take_len_prefix, ColumnBuffer, ColumnSlot};
use crate::core::context::ColumnEnv;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ColumnKind, ColumnSpec, Value};

pub struct ObjectBuffer {
    values: Vec<Value>,
    max: usize,
}

impl ColumnBuffer for ObjectBuffer {
    fn rows(&self) -> usize {
        self.values.len()
    }

    fn heap_size(&self) -> usize {
        let inline = self.values.capacity() * std::mem::size_of::<Value>();
        let payload: usize = self
            .values
            .iter()
            .map(|v| match v {
                Value::String(s) => s.len(),
                Value::Binary(b) => b.len(),
                Value::Image(i) => i.pixels.len(),
                _ => 0,
            })
            .sum();
        inline + payload
    }

    // Per row: i32 native-endian length (-1 = null) then the codec bytes
    fn encode(&self, env: &ColumnEnv) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.values.len() * 8);
        for value in &self.values {
            if value.is_null() {
                out.extend_from_slice(&(-1i32).to_ne_bytes());
                continue;
            }
            let bytes = env.ctx.codec.encode(value, env.version)?;
            let len = i32::try_from(bytes.len()).map_err(|_| {
                Error::new(ErrorKind::CapacityExceeded, format!("object of {} bytes", bytes.len()))
            })?;
            out.extend_from_slice(&len.to_ne_bytes());
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }

    fn decode(bytes: &[u8], rows: usize, env: &ColumnEnv) -> Result<Self> {
        let mut input = bytes;
        let mut values = Vec::with_capacity(rows);
        for _ in 0..rows {
            let len = take_len_prefix(&mut input)?;
            if len < 0 {
                values.push(Value::Null);
                continue;
            }
            let raw = take_bytes(&mut input, len as usize)?;
            values.push(env.ctx.codec.decode(raw, env.version)?);
        }
        Ok(ObjectBuffer { values, max: rows })
    }
}

/// What happened to a value offered to an Object column
pub enum ObjectPush {
    Stored,
    /// Not stored: the column should be rebuilt as this kind
    Retype(ColumnKind),
}

/// Generic column holding any [`Value`].
pub struct ObjectColumn {
    pub(crate) slot: ColumnSlot<ObjectBuffer>,
    cache: Mutex<Option<ValueCache<Value>>>,
    /// Still waiting for the first non-null value to pick a type
    retype_pending: AtomicBool,
}

impl ObjectColumn {
    pub fn new(spec: &ColumnSpec, env: ColumnEnv) -> Self {
        let buffer = ObjectBuffer {
            values: Vec::with_capacity(spec.initial_capacity),
            max: spec.max_capacity,
        };
        ObjectColumn {
            slot: ColumnSlot::new(buffer, spec.max_capacity, env),
            cache: Mutex::new(Some(ValueCache::new())),
            retype_pending: AtomicBool::new(spec.dynamic && spec.kind == ColumnKind::Object),
        }
    }

    pub fn push(&self, value: &Value) -> Result<ObjectPush> {
        if !value.is_null() && self.retype_pending.swap(false, Ordering::AcqRel) {
            if let Some(kind) = value.specialized_kind() {
                return Ok(ObjectPush::Retype(kind));
            }
        }
        if !value.is_persistable() {
            self.slot.mark_unserializable();
        }

        let value = match self.cache.lock().as_mut() {
            Some(cache) if !value.is_null() => cache.intern(value.clone()),
            _ => value.clone(),
        };
        self.slot.write(|buffer| {
            reserve_one(&mut buffer.values, buffer.max)?;
            buffer.values.push(value);
            Ok(())
        })?;
        Ok(ObjectPush::Stored)
    }

    pub fn value(&self, row: usize) -> Result<Value> {
        self.slot.check_row(row)?;
        self.slot.read(|buffer| buffer.values[row].clone())
    }

    pub fn complete(&self) {
        self.cache.lock().take();
        self.slot.complete();
    }
}
