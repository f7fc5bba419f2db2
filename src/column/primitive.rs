use std::io::Cursor;
use chrono::DateTime;
use roaring::RoaringBitmap;
use crate::column::slot::{reserve_one, take_bytes, ColumnBuffer, ColumnSlot};
use crate::core::context::ColumnEnv;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ColumnKind, ColumnSpec, Value};

/// Private NaN payloads marking null floating cells
pub const NULL_FLOAT_BITS: u32 = 0x7FC0_0BAD;
pub const NULL_DOUBLE_BITS: u64 = 0x7FF8_0000_0BAD_F00D;
/// Null timestamp, in epoch millis
pub const NULL_TIMESTAMP: i64 = -1;

/// How a typed column accepts an incoming value
pub enum Coerced<T> {
    Null,
    Value(T),
    Mismatch,
}

/// Fixed-width element stored in a primitive column.
pub trait NativeType: Copy + Send + Sync + 'static {
    const KIND: ColumnKind;
    const WIDTH: usize;
    /// Types without a sentinel track nulls in a bitmap.
    const HAS_SENTINEL: bool;

    fn sentinel() -> Self;

    fn is_sentinel(self) -> bool;

    fn coerce(value: &Value) -> Coerced<Self>;

    fn to_value(self) -> Value;

    fn to_f64(self) -> f64;

    fn to_i64(self) -> i64;

    fn write_ne(self, out: &mut Vec<u8>);

    fn read_ne(bytes: &[u8]) -> Self;
}

macro_rules! integer_native {
    ($ty:ty, $kind:ident, $variant:ident, [$($from:ident),*]) => {
        impl NativeType for $ty {
            const KIND: ColumnKind = ColumnKind::$kind;
            const WIDTH: usize = std::mem::size_of::<$ty>();
            const HAS_SENTINEL: bool = false;

            fn sentinel() -> Self {
                0
            }

            fn is_sentinel(self) -> bool {
                false
            }

            fn coerce(value: &Value) -> Coerced<Self> {
                match value {
                    Value::Null => Coerced::Null,
                    $(Value::$from(v) => Coerced::Value(*v as $ty),)*
                    _ => Coerced::Mismatch,
                }
            }

            fn to_value(self) -> Value {
                Value::$variant(self)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn to_i64(self) -> i64 {
                self as i64
            }

            fn write_ne(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(raw)
            }
        }
    };
}

integer_native!(i8, Byte, Byte, [Byte]);
integer_native!(i16, Short, Short, [Byte, Short]);
integer_native!(i32, Int, Int, [Byte, Short, Int]);
integer_native!(i64, Long, Long, [Byte, Short, Int, Long]);

impl NativeType for f32 {
    const KIND: ColumnKind = ColumnKind::Float;
    const WIDTH: usize = 4;
    const HAS_SENTINEL: bool = true;

    fn sentinel() -> Self {
        f32::from_bits(NULL_FLOAT_BITS)
    }

    fn is_sentinel(self) -> bool {
        self.to_bits() == NULL_FLOAT_BITS
    }

    fn coerce(value: &Value) -> Coerced<Self> {
        match value {
            Value::Null => Coerced::Null,
            Value::Float(v) => Coerced::Value(*v),
            Value::Byte(v) => Coerced::Value(*v as f32),
            Value::Short(v) => Coerced::Value(*v as f32),
            _ => Coerced::Mismatch,
        }
    }

    fn to_value(self) -> Value {
        Value::Float(self)
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn to_i64(self) -> i64 {
        self as i64
    }

    fn write_ne(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }

    fn read_ne(bytes: &[u8]) -> Self {
        f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

fn coerce_double(value: &Value) -> Coerced<f64> {
    match value {
        Value::Null => Coerced::Null,
        Value::Double(v) | Value::Decimal(v) => Coerced::Value(*v),
        Value::Float(v) => Coerced::Value(*v as f64),
        Value::Byte(v) => Coerced::Value(*v as f64),
        Value::Short(v) => Coerced::Value(*v as f64),
        Value::Int(v) => Coerced::Value(*v as f64),
        Value::Long(v) => Coerced::Value(*v as f64),
        _ => Coerced::Mismatch,
    }
}

fn read_f64(bytes: &[u8]) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    f64::from_ne_bytes(raw)
}

impl NativeType for f64 {
    const KIND: ColumnKind = ColumnKind::Double;
    const WIDTH: usize = 8;
    const HAS_SENTINEL: bool = true;

    fn sentinel() -> Self {
        f64::from_bits(NULL_DOUBLE_BITS)
    }

    fn is_sentinel(self) -> bool {
        self.to_bits() == NULL_DOUBLE_BITS
    }

    fn coerce(value: &Value) -> Coerced<Self> {
        coerce_double(value)
    }

    fn to_value(self) -> Value {
        Value::Double(self)
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn to_i64(self) -> i64 {
        self as i64
    }

    fn write_ne(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }

    fn read_ne(bytes: &[u8]) -> Self {
        read_f64(bytes)
    }
}

/// Big decimal held as a double
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decimal(pub f64);

impl NativeType for Decimal {
    const KIND: ColumnKind = ColumnKind::Decimal;
    const WIDTH: usize = 8;
    const HAS_SENTINEL: bool = true;

    fn sentinel() -> Self {
        Decimal(f64::from_bits(NULL_DOUBLE_BITS))
    }

    fn is_sentinel(self) -> bool {
        self.0.to_bits() == NULL_DOUBLE_BITS
    }

    fn coerce(value: &Value) -> Coerced<Self> {
        match coerce_double(value) {
            Coerced::Null => Coerced::Null,
            Coerced::Value(v) => Coerced::Value(Decimal(v)),
            Coerced::Mismatch => Coerced::Mismatch,
        }
    }

    fn to_value(self) -> Value {
        Value::Decimal(self.0)
    }

    fn to_f64(self) -> f64 {
        self.0
    }

    fn to_i64(self) -> i64 {
        self.0 as i64
    }

    fn write_ne(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_ne_bytes());
    }

    fn read_ne(bytes: &[u8]) -> Self {
        Decimal(read_f64(bytes))
    }
}

/// Timestamp as epoch millis; `-1` is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Millis(pub i64);

impl NativeType for Millis {
    const KIND: ColumnKind = ColumnKind::Timestamp;
    const WIDTH: usize = 8;
    const HAS_SENTINEL: bool = true;

    fn sentinel() -> Self {
        Millis(NULL_TIMESTAMP)
    }

    fn is_sentinel(self) -> bool {
        self.0 == NULL_TIMESTAMP
    }

    fn coerce(value: &Value) -> Coerced<Self> {
        match value {
            Value::Null => Coerced::Null,
            // Finer than a millisecond, or colliding with the null sentinel
            Value::Timestamp(ts) if ts.timestamp_subsec_nanos() % 1_000_000 != 0 => Coerced::Mismatch,
            Value::Timestamp(ts) if ts.timestamp_millis() == NULL_TIMESTAMP => Coerced::Mismatch,
            Value::Timestamp(ts) => Coerced::Value(Millis(ts.timestamp_millis())),
            Value::Long(ms) => Coerced::Value(Millis(*ms)),
            _ => Coerced::Mismatch,
        }
    }

    fn to_value(self) -> Value {
        match DateTime::from_timestamp_millis(self.0) {
            Some(ts) => Value::Timestamp(ts),
            None => Value::Null,
        }
    }

    fn to_f64(self) -> f64 {
        self.0 as f64
    }

    fn to_i64(self) -> i64 {
        self.0
    }

    fn write_ne(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_ne_bytes());
    }

    fn read_ne(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Millis(i64::from_ne_bytes(raw))
    }
}

/// Values plus, for sentinel-free types, a bitmap of null rows.
pub struct PrimitiveBuffer<T: NativeType> {
    values: Vec<T>,
    nulls: RoaringBitmap,
    max: usize,
}

impl<T: NativeType> PrimitiveBuffer<T> {
    fn with_capacity(initial: usize, max: usize) -> Self {
        PrimitiveBuffer {
            values: Vec::with_capacity(initial),
            nulls: RoaringBitmap::new(),
            max,
        }
    }

    fn push(&mut self, value: Option<T>) -> Result<()> {
        reserve_one(&mut self.values, self.max)?;
        match value {
            Some(v) => self.values.push(v),
            None => {
                if !T::HAS_SENTINEL {
                    self.nulls.insert(self.values.len() as u32);
                }
                self.values.push(T::sentinel());
            }
        }
        Ok(())
    }

    fn get(&self, row: usize) -> Option<T> {
        let value = *self.values.get(row)?;
        let null = if T::HAS_SENTINEL {
            value.is_sentinel()
        } else {
            self.nulls.contains(row as u32)
        };
        if null { None } else { Some(value) }
    }
}

impl<T: NativeType> ColumnBuffer for PrimitiveBuffer<T> {
    fn rows(&self) -> usize {
        self.values.len()
    }

    fn heap_size(&self) -> usize {
        self.values.capacity() * T::WIDTH + self.nulls.serialized_size()
    }

    // [ values: rows * WIDTH, native-endian ][ null bitmap (sentinel-free types only) ]
    fn encode(&self, _env: &ColumnEnv) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.values.len() * T::WIDTH);
        for value in &self.values {
            value.write_ne(&mut out);
        }
        if !T::HAS_SENTINEL {
            self.nulls.serialize_into(&mut out)?;
        }
        Ok(out)
    }

    fn decode(bytes: &[u8], rows: usize, _env: &ColumnEnv) -> Result<Self> {
        let mut input = bytes;
        let raw = take_bytes(&mut input, rows * T::WIDTH)?;
        let values: Vec<T> = raw.chunks_exact(T::WIDTH).map(T::read_ne).collect();

        let nulls = if T::HAS_SENTINEL || input.is_empty() {
            RoaringBitmap::new()
        } else {
            RoaringBitmap::deserialize_from(Cursor::new(input))
                .map_err(|e| Error::new(ErrorKind::Parse, format!("null bitmap: {}", e)))?
        };

        Ok(PrimitiveBuffer { max: values.len(), values, nulls })
    }
}

/// Column of one fixed-width native type.
pub struct PrimitiveColumn<T: NativeType> {
    pub(crate) slot: ColumnSlot<PrimitiveBuffer<T>>,
}

impl<T: NativeType> PrimitiveColumn<T> {
    pub fn new(spec: &ColumnSpec, env: ColumnEnv) -> Self {
        let buffer = PrimitiveBuffer::with_capacity(spec.initial_capacity, spec.max_capacity);
        PrimitiveColumn {
            slot: ColumnSlot::new(buffer, spec.max_capacity, env),
        }
    }

    /// Append; `Ok(false)` when the value does not fit this type.
    pub fn push(&self, value: &Value) -> Result<bool> {
        let native = match T::coerce(value) {
            Coerced::Null => None,
            Coerced::Value(v) => Some(v),
            Coerced::Mismatch => return Ok(false),
        };
        self.slot.write(|buffer| buffer.push(native))?;
        Ok(true)
    }

    pub fn get(&self, row: usize) -> Result<Option<T>> {
        self.slot.check_row(row)?;
        self.slot.read(|buffer| buffer.get(row))
    }

    pub fn value(&self, row: usize) -> Result<Value> {
        Ok(self.get(row)?.map(T::to_value).unwrap_or(Value::Null))
    }
}
