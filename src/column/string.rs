use std::sync::Arc;
use parking_lot::Mutex;
use crate::cache::value_cache::ValueCache;
use crate::column::slot::{reserve_one, take_bytes, take_len_prefix, ColumnBuffer, ColumnSlot};
use crate::core::context::ColumnEnv;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ColumnSpec, Value};

pub struct StringBuffer {
    values: Vec<Option<Arc<str>>>,
    /// Sum of UTF-8 lengths, used to size the encode buffer
    total_bytes: usize,
    max: usize,
}

impl ColumnBuffer for StringBuffer {
    fn rows(&self) -> usize {
        self.values.len()
    }

    fn heap_size(&self) -> usize {
        self.values.capacity() * std::mem::size_of::<Option<Arc<str>>>() + self.total_bytes
    }

    // Per row: i32 native-endian length (-1 = null) then the UTF-8 bytes
    fn encode(&self, _env: &ColumnEnv) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.values.len() * 4 + self.total_bytes);
        for value in &self.values {
            match value {
                None => out.extend_from_slice(&(-1i32).to_ne_bytes()),
                Some(s) => {
                    let len = i32::try_from(s.len()).map_err(|_| {
                        Error::new(ErrorKind::CapacityExceeded, format!("string of {} bytes", s.len()))
                    })?;
                    out.extend_from_slice(&len.to_ne_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
            }
        }
        Ok(out)
    }

    fn decode(bytes: &[u8], rows: usize, _env: &ColumnEnv) -> Result<Self> {
        let mut input = bytes;
        let mut values = Vec::with_capacity(rows);
        let mut total_bytes = 0;
        for _ in 0..rows {
            let len = take_len_prefix(&mut input)?;
            if len < 0 {
                values.push(None);
                continue;
            }
            let raw = take_bytes(&mut input, len as usize)?;
            let s = std::str::from_utf8(raw)
                .map_err(|e| Error::new(ErrorKind::Parse, format!("string column: {}", e)))?;
            total_bytes += raw.len();
            values.push(Some(Arc::from(s)));
        }
        Ok(StringBuffer { values, total_bytes, max: rows })
    }
}

pub struct StringColumn {
    pub(crate) slot: ColumnSlot<StringBuffer>,
    /// Dropped on `complete()`
    cache: Mutex<Option<ValueCache<Arc<str>>>>,
    /// Produced by a dynamic retype: only genuine strings are accepted
    strict: bool,
}

impl StringColumn {
    pub fn new(spec: &ColumnSpec, env: ColumnEnv) -> Self {
        let buffer = StringBuffer {
            values: Vec::with_capacity(spec.initial_capacity),
            total_bytes: 0,
            max: spec.max_capacity,
        };
        StringColumn {
            slot: ColumnSlot::new(buffer, spec.max_capacity, env),
            cache: Mutex::new(Some(ValueCache::new())),
            strict: spec.dynamic,
        }
    }

    pub fn push(&self, value: &Value) -> Result<bool> {
        let text: Option<Arc<str>> = match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Binary(_) | Value::Image(_) | Value::Opaque(_) => return Ok(false),
            _ if self.strict => return Ok(false),
            other => Some(Arc::from(other.to_string())),
        };
        let text = match (text, self.cache.lock().as_mut()) {
            (Some(s), Some(cache)) => Some(cache.intern(s)),
            (text, _) => text,
        };

        self.slot.write(|buffer| {
            reserve_one(&mut buffer.values, buffer.max)?;
            if let Some(s) = &text {
                buffer.total_bytes += s.len();
            }
            buffer.values.push(text);
            Ok(())
        })?;
        Ok(true)
    }

    pub fn get(&self, row: usize) -> Result<Option<Arc<str>>> {
        self.slot.check_row(row)?;
        self.slot.read(|buffer| buffer.values[row].clone())
    }

    pub fn value(&self, row: usize) -> Result<Value> {
        Ok(self.get(row)?.map(Value::String).unwrap_or(Value::Null))
    }

    pub fn complete(&self) {
        self.cache.lock().take();
        self.slot.complete();
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.lock().as_ref().is_some_and(ValueCache::is_enabled)
    }
}
