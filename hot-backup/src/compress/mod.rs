//! Streaming block compression around the archive stream.
//!
//! * `snappy` – Snappy framing format: a stream identifier chunk followed by
//!   chunks holding at most 64 KiB of input each, every chunk carrying a
//!   masked CRC-32C of its uncompressed bytes. Existing `.tar.snappy`
//!   snapshots use this format.
//! * `zstd` – one zstd frame for the whole stream, written incrementally.
//!
//! Errors that originate in a codec are tagged `Compression`; errors passing
//! through from the neighbouring stages keep their own tag.

use crate::utils::errors::{tag_io, BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, BufReader, Read, Write};
use std::str::FromStr;

/// Compression codec of a snapshot stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Snappy,
    Zstd,
}

impl Codec {
    /// Object key suffix following `.tar`.
    pub fn extension(self) -> &'static str {
        match self {
            Codec::Snappy => "snappy",
            Codec::Zstd => "zst",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Codec::Snappy => "snappy",
            Codec::Zstd => "zstd",
        })
    }
}

impl FromStr for Codec {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "snappy" => Ok(Codec::Snappy),
            "zstd" | "zst" => Ok(Codec::Zstd),
            other => Err(BackupError::Config(format!(
                "unknown compression '{other}' (expected snappy or zstd)"
            ))),
        }
    }
}

fn codec_error(err: io::Error) -> io::Error {
    tag_io(err, |e| BackupError::Compression(e.to_string()))
}

/// Compressing writer.
pub enum Compressor<W: Write> {
    Snappy(snap::write::FrameEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Compressor<W> {
    pub fn new(codec: Codec, level: i32, inner: W) -> io::Result<Self> {
        Ok(match codec {
            Codec::Snappy => Compressor::Snappy(snap::write::FrameEncoder::new(inner)),
            Codec::Zstd => {
                Compressor::Zstd(zstd::stream::write::Encoder::new(inner, level).map_err(codec_error)?)
            }
        })
    }

    /// Emit the final partial frame and return the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Snappy(mut encoder) => {
                encoder.flush().map_err(codec_error)?;
                encoder
                    .into_inner()
                    .map_err(|e| codec_error(io::Error::new(e.error().kind(), e.error().to_string())))
            }
            Compressor::Zstd(encoder) => encoder.finish().map_err(codec_error),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Snappy(encoder) => encoder.write(buf),
            Compressor::Zstd(encoder) => encoder.write(buf),
        }
        .map_err(codec_error)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Snappy(encoder) => encoder.flush(),
            Compressor::Zstd(encoder) => encoder.flush(),
        }
        .map_err(codec_error)
    }
}

/// Decompressing reader.
pub enum Decompressor<R: Read> {
    Snappy(snap::read::FrameDecoder<R>),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<R>>),
}

impl<R: Read> Decompressor<R> {
    pub fn new(codec: Codec, inner: R) -> io::Result<Self> {
        Ok(match codec {
            Codec::Snappy => Decompressor::Snappy(snap::read::FrameDecoder::new(inner)),
            Codec::Zstd => {
                Decompressor::Zstd(zstd::stream::read::Decoder::new(inner).map_err(codec_error)?)
            }
        })
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Snappy(decoder) => decoder.read(buf),
            Decompressor::Zstd(decoder) => decoder.read(buf),
        }
        .map_err(codec_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compress(codec: Codec, data: &[u8]) -> Vec<u8> {
        let mut compressor = Compressor::new(codec, 3, Vec::new()).unwrap();
        compressor.write_all(data).unwrap();
        compressor.finish().unwrap()
    }

    fn decompress(codec: Codec, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        Decompressor::new(codec, data)
            .and_then(|mut d| d.read_to_end(&mut out))
            .map_err(|e| BackupError::from_io(e, |s| BackupError::io("test", s)))?;
        Ok(out)
    }

    fn sample() -> Vec<u8> {
        (0..200_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect()
    }

    #[test]
    fn test_codec_round_trip() -> Result<()> {
        let data = sample();
        for codec in [Codec::Snappy, Codec::Zstd] {
            let packed = compress(codec, &data);
            assert!(packed.len() < data.len(), "{codec} did not compress");
            assert_eq!(decompress(codec, &packed)?, data);
        }
        Ok(())
    }

    #[test]
    fn test_snappy_stream_identifier() {
        let packed = compress(Codec::Snappy, b"x");
        assert_eq!(&packed[..10], b"\xff\x06\x00\x00sNaPpY");
    }

    #[test]
    fn test_truncated_snappy_is_compression_error() {
        let packed = compress(Codec::Snappy, &sample());
        let err = decompress(Codec::Snappy, &packed[..packed.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), "CompressionError");
    }

    #[test]
    fn test_garbage_is_compression_error() {
        for codec in [Codec::Snappy, Codec::Zstd] {
            let err = decompress(codec, b"definitely not a compressed stream").unwrap_err();
            assert_eq!(err.kind(), "CompressionError", "{codec}");
        }
    }

    #[test]
    fn test_codec_parsing() {
        assert_eq!("snappy".parse::<Codec>().unwrap(), Codec::Snappy);
        assert_eq!("ZSTD".parse::<Codec>().unwrap(), Codec::Zstd);
        assert!(matches!("gzip".parse::<Codec>(), Err(BackupError::Config(_))));
        assert_eq!(Codec::Zstd.extension(), "zst");
        assert_eq!(Codec::default(), Codec::Snappy);
    }
}
