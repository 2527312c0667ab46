//! Store, deflate and bzip2 shims around the compression crates
//!
//! Deflate streams use the raw window (no zlib framing), which is what the
//! ZIP format stores. Both directions are streaming: the decoder side is a
//! boxed `Read`, the encoder side wraps any `Write` and is finalized to
//! recover the sink.

use std::io::{Read, Write};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{Result, ZuError};

/// Compression method ids stored in ZIP headers
pub const METHOD_STORE: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;
pub const METHOD_BZIP2: u16 = 12;

/// Human-readable method name for listings.
pub fn method_name(method: u16) -> &'static str {
    match method {
        METHOD_STORE => "stored",
        METHOD_DEFLATE => "deflated",
        METHOD_BZIP2 => "bzip2",
        _ => "unknown",
    }
}

/// Minimum reader version advertised for a method.
pub fn version_needed_for(method: u16, zip64: bool) -> u16 {
    if zip64 {
        45
    } else if method == METHOD_BZIP2 {
        46
    } else {
        20
    }
}

/// Wrap a compressed-byte reader in the decoder for `method`.
pub fn decoder<'a, R: Read + 'a>(method: u16, reader: R) -> Result<Box<dyn Read + 'a>> {
    match method {
        METHOD_STORE => Ok(Box::new(reader)),
        METHOD_DEFLATE => Ok(Box::new(DeflateDecoder::new(reader))),
        METHOD_BZIP2 => Ok(Box::new(BzDecoder::new(reader))),
        other => Err(ZuError::NotImplemented(format!(
            "compression method {}",
            other
        ))),
    }
}

/// Streaming encoder over an arbitrary sink.
pub enum Encoder<W: Write> {
    Store(W),
    Deflate(DeflateEncoder<W>),
    Bzip2(BzEncoder<W>),
}

impl<W: Write> Encoder<W> {
    pub fn new(method: u16, level: u32, sink: W) -> Result<Self> {
        match method {
            METHOD_STORE => Ok(Encoder::Store(sink)),
            METHOD_DEFLATE => Ok(Encoder::Deflate(DeflateEncoder::new(
                sink,
                Compression::new(level.min(9)),
            ))),
            // bzip2 has no level 0; the writer maps level 0 to store before
            // reaching this point
            METHOD_BZIP2 => Ok(Encoder::Bzip2(BzEncoder::new(
                sink,
                bzip2::Compression::new(level.clamp(1, 9)),
            ))),
            other => Err(ZuError::NotImplemented(format!(
                "compression method {}",
                other
            ))),
        }
    }

    /// Flush any buffered compressed output and return the sink.
    pub fn finish(self) -> Result<W> {
        match self {
            Encoder::Store(w) => Ok(w),
            Encoder::Deflate(e) => Ok(e.finish()?),
            Encoder::Bzip2(e) => Ok(e.finish()?),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Encoder::Store(w) => w.write(buf),
            Encoder::Deflate(e) => e.write(buf),
            Encoder::Bzip2(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Encoder::Store(w) => w.flush(),
            Encoder::Deflate(e) => e.flush(),
            Encoder::Bzip2(e) => e.flush(),
        }
    }
}

/// Writer adapter that counts the bytes passing through it.
pub struct CountingWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        CountingWriter { inner, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(method: u16, data: &[u8]) -> Vec<u8> {
        let mut enc = Encoder::new(method, 6, Vec::new()).unwrap();
        enc.write_all(data).unwrap();
        let compressed = enc.finish().unwrap();
        let mut out = Vec::new();
        decoder(method, &compressed[..])
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn store_is_identity() {
        let data = b"plain bytes".to_vec();
        assert_eq!(round_trip(METHOD_STORE, &data), data);
    }

    #[test]
    fn deflate_round_trips_raw() {
        let data = vec![0x41u8; 10_000];
        assert_eq!(round_trip(METHOD_DEFLATE, &data), data);
    }

    #[test]
    fn bzip2_round_trips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        assert_eq!(round_trip(METHOD_BZIP2, &data), data);
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(matches!(
            decoder(14, &b""[..]),
            Err(ZuError::NotImplemented(_))
        ));
    }
}
