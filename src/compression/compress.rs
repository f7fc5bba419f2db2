use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};

/// Byte-level transform applied to every column payload in a swap file.
///
/// The transform is not recorded in the swap file itself; readers must use the
/// same setting the writer used (snapshot manifests record it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionType {
    None,
    LZ4,      // Fast compression (~500 MB/s), ratio 2-3x
    Zstd,     // Better ratio (3-5x), slower (~200 MB/s)
    Snappy,   // Balanced (2-3x ratio, ~300 MB/s)
}

impl CompressionType {
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            CompressionType::None => Ok(data.to_vec()),

            // Size prefix lets decompress allocate exactly once
            CompressionType::LZ4 => Ok(lz4::block::compress(data, None, true)?),

            CompressionType::Zstd => Ok(zstd::encode_all(data, 3)?),

            CompressionType::Snappy => {
                let mut encoder = snap::raw::Encoder::new();
                encoder.compress_vec(data)
                    .map_err(|e| Error::new(ErrorKind::Io, e.to_string()))
            }
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            CompressionType::None => Ok(data.to_vec()),

            CompressionType::LZ4 => {
                lz4::block::decompress(data, None)
                    .map_err(|e| Error::new(ErrorKind::Io, e.to_string()))
            }

            CompressionType::Zstd => {
                zstd::decode_all(data)
                    .map_err(|e| Error::new(ErrorKind::Io, e.to_string()))
            }

            CompressionType::Snappy => {
                let mut decoder = snap::raw::Decoder::new();
                decoder.decompress_vec(data)
                    .map_err(|e| Error::new(ErrorKind::Io, e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_transform_restores_input() {
        let data: Vec<u8> = (0..10_000u32).flat_map(|i| (i % 97).to_le_bytes()).collect();
        for kind in [
            CompressionType::None,
            CompressionType::LZ4,
            CompressionType::Zstd,
            CompressionType::Snappy,
        ] {
            let packed = kind.compress(&data).unwrap();
            assert_eq!(kind.decompress(&packed).unwrap(), data, "{:?}", kind);
        }
    }

    #[test]
    fn empty_payload() {
        let packed = CompressionType::LZ4.compress(&[]).unwrap();
        assert!(CompressionType::LZ4.decompress(&packed).unwrap().is_empty());
    }
}
