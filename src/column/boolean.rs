use crate::column::slot::{reserve_one, take_bytes, ColumnBuffer, ColumnSlot};
use crate::core::context::ColumnEnv;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ColumnSpec, Value};

pub const FALSE: u8 = 0;
pub const TRUE: u8 = 1;
pub const NULL: u8 = 2;

/// One tri-state byte per row
pub struct BoolBuffer {
    values: Vec<u8>,
    max: usize,
}

impl ColumnBuffer for BoolBuffer {
    fn rows(&self) -> usize {
        self.values.len()
    }

    fn heap_size(&self) -> usize {
        self.values.capacity()
    }

    fn encode(&self, _env: &ColumnEnv) -> Result<Vec<u8>> {
        Ok(self.values.clone())
    }

    fn decode(bytes: &[u8], rows: usize, _env: &ColumnEnv) -> Result<Self> {
        let mut input = bytes;
        let values = take_bytes(&mut input, rows)?.to_vec();
        if let Some(bad) = values.iter().find(|&&b| b > NULL) {
            return Err(Error::new(ErrorKind::Parse, format!("invalid boolean byte {}", bad)));
        }
        Ok(BoolBuffer { max: rows, values })
    }
}

pub struct BooleanColumn {
    pub(crate) slot: ColumnSlot<BoolBuffer>,
}

impl BooleanColumn {
    pub fn new(spec: &ColumnSpec, env: ColumnEnv) -> Self {
        let buffer = BoolBuffer {
            values: Vec::with_capacity(spec.initial_capacity),
            max: spec.max_capacity,
        };
        BooleanColumn {
            slot: ColumnSlot::new(buffer, spec.max_capacity, env),
        }
    }

    pub fn push(&self, value: &Value) -> Result<bool> {
        let byte = match value {
            Value::Null => NULL,
            Value::Bool(true) => TRUE,
            Value::Bool(false) => FALSE,
            _ => return Ok(false),
        };
        self.slot.write(|buffer| {
            reserve_one(&mut buffer.values, buffer.max)?;
            buffer.values.push(byte);
            Ok(())
        })?;
        Ok(true)
    }

    pub fn get(&self, row: usize) -> Result<Option<bool>> {
        self.slot.check_row(row)?;
        self.slot.read(|buffer| match buffer.values[row] {
            NULL => None,
            b => Some(b == TRUE),
        })
    }

    pub fn value(&self, row: usize) -> Result<Value> {
        Ok(self.get(row)?.map(Value::Bool).unwrap_or(Value::Null))
    }
}
