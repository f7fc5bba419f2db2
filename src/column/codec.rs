use std::sync::Arc;
use bincode::Options;
use bytes::Bytes;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Image, Value};

/// Object serializer format. Chosen per fragment; older files stay readable
/// by selecting the version they were written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatVersion {
    /// Fixed-width integers
    V1,
    /// Variable-length integers
    V2,
}

/// Pluggable serializer for generic Object and Blob column elements.
pub trait ObjectCodec: Send + Sync {
    fn encode(&self, value: &Value, version: FormatVersion) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8], version: FormatVersion) -> Result<Value>;
}

/// Default codec built on bincode.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl ObjectCodec for BincodeCodec {
    fn encode(&self, value: &Value, version: FormatVersion) -> Result<Vec<u8>> {
        let portable = PortableValue::try_from(value)?;
        match version {
            FormatVersion::V1 => Ok(bincode::serialize(&portable)?),
            FormatVersion::V2 => Ok(bincode::DefaultOptions::new().serialize(&portable)?),
        }
    }

    fn decode(&self, bytes: &[u8], version: FormatVersion) -> Result<Value> {
        let portable: PortableValue = match version {
            FormatVersion::V1 => bincode::deserialize(bytes)?,
            FormatVersion::V2 => bincode::DefaultOptions::new().deserialize(bytes)?,
        };
        portable.into_value()
    }
}

/// Serializable mirror of [`Value`]. Images are boxed (pixels compressed)
/// on the way in and unboxed on the way out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortableValue {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Decimal(f64),
    Timestamp { secs: i64, nanos: u32 },
    String(String),
    Binary(Vec<u8>),
    Image(BoxedImage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxedImage {
    pub width: u32,
    pub height: u32,
    pub packed: Vec<u8>,
}

impl BoxedImage {
    fn pack(image: &Image) -> Result<Self> {
        Ok(BoxedImage {
            width: image.width,
            height: image.height,
            packed: lz4::block::compress(&image.pixels, None, true)?,
        })
    }

    fn unpack(self) -> Result<Image> {
        let pixels = lz4::block::decompress(&self.packed, None)
            .map_err(|e| Error::new(ErrorKind::Serialization, format!("image pixels: {}", e)))?;
        Ok(Image {
            width: self.width,
            height: self.height,
            pixels: Bytes::from(pixels),
        })
    }
}

impl TryFrom<&Value> for PortableValue {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        Ok(match value {
            Value::Null => PortableValue::Null,
            Value::Bool(v) => PortableValue::Bool(*v),
            Value::Byte(v) => PortableValue::Byte(*v),
            Value::Short(v) => PortableValue::Short(*v),
            Value::Int(v) => PortableValue::Int(*v),
            Value::Long(v) => PortableValue::Long(*v),
            Value::Float(v) => PortableValue::Float(*v),
            Value::Double(v) => PortableValue::Double(*v),
            Value::Decimal(v) => PortableValue::Decimal(*v),
            Value::Timestamp(ts) => PortableValue::Timestamp {
                secs: ts.timestamp(),
                nanos: ts.timestamp_subsec_nanos(),
            },
            Value::String(s) => PortableValue::String(s.to_string()),
            Value::Binary(b) => PortableValue::Binary(b.to_vec()),
            Value::Image(image) => PortableValue::Image(BoxedImage::pack(image)?),
            Value::Opaque(o) => {
                return Err(Error::new(
                    ErrorKind::Serialization,
                    format!("{:?} cannot be persisted", o),
                ))
            }
        })
    }
}

impl PortableValue {
    pub fn into_value(self) -> Result<Value> {
        Ok(match self {
            PortableValue::Null => Value::Null,
            PortableValue::Bool(v) => Value::Bool(v),
            PortableValue::Byte(v) => Value::Byte(v),
            PortableValue::Short(v) => Value::Short(v),
            PortableValue::Int(v) => Value::Int(v),
            PortableValue::Long(v) => Value::Long(v),
            PortableValue::Float(v) => Value::Float(v),
            PortableValue::Double(v) => Value::Double(v),
            PortableValue::Decimal(v) => Value::Decimal(v),
            PortableValue::Timestamp { secs, nanos } => {
                let ts = DateTime::from_timestamp(secs, nanos).ok_or_else(|| {
                    Error::new(ErrorKind::Parse, format!("timestamp {}s {}ns out of range", secs, nanos))
                })?;
                Value::Timestamp(ts)
            }
            PortableValue::String(s) => Value::String(Arc::from(s)),
            PortableValue::Binary(b) => Value::Binary(Bytes::from(b)),
            PortableValue::Image(boxed) => Value::Image(Arc::new(boxed.unpack()?)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Value> {
        vec![
            Value::Null,
            Value::Bool(true),
            Value::Short(i16::MIN),
            Value::Long(i64::MAX),
            Value::Double(-0.0),
            Value::Decimal(12345.678),
            Value::timestamp_millis(1_700_000_000_123),
            Value::string("héllo"),
            Value::Binary(Bytes::from_static(b"\x00\x01\x02")),
            Value::Image(Arc::new(Image {
                width: 2,
                height: 2,
                pixels: Bytes::from(vec![7u8; 16]),
            })),
        ]
    }

    #[test]
    fn both_versions_restore_values() {
        let codec = BincodeCodec;
        for version in [FormatVersion::V1, FormatVersion::V2] {
            for value in samples() {
                let bytes = codec.encode(&value, version).unwrap();
                assert_eq!(codec.decode(&bytes, version).unwrap(), value);
            }
        }
    }

    #[test]
    fn versions_differ_on_the_wire() {
        let codec = BincodeCodec;
        let v1 = codec.encode(&Value::Long(1), FormatVersion::V1).unwrap();
        let v2 = codec.encode(&Value::Long(1), FormatVersion::V2).unwrap();
        assert!(v2.len() < v1.len());
    }

    #[test]
    fn opaque_values_are_rejected() {
        let err = BincodeCodec
            .encode(&Value::opaque(5u8), FormatVersion::V2)
            .unwrap_err();
        assert!(err.is(ErrorKind::Serialization));
    }
}
