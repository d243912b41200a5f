//! Little-endian serialization primitives.
//!
//! Section writers are generic over [`Sink`] so the same code path computes a
//! section's exact byte size (via [`SizeSerializer`]) and then produces the
//! bytes (via [`Serializer`]). Readers use [`Deserializer`], which surfaces
//! `Truncated` on any short read.

use tessera_error::{tessera_bail, TesseraResult};

/// A byte sink for section writers.
pub trait Sink {
    /// Append raw bytes.
    fn write_bytes(&mut self, data: &[u8]);

    /// Append a `u8`.
    fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    /// Append a little-endian `u32`.
    fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    /// Append a little-endian `u64`.
    fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    /// Append a slice of little-endian `u64` values.
    fn write_u64_slice(&mut self, values: &[u64]) {
        for v in values {
            self.write_u64(*v);
        }
    }
}

/// A sink that only accumulates the byte count.
#[derive(Debug, Default)]
pub struct SizeSerializer {
    size: u64,
}

impl SizeSerializer {
    /// A fresh size computation.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of bytes the writer produced.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Sink for SizeSerializer {
    fn write_bytes(&mut self, data: &[u8]) {
        self.size += data.len() as u64;
    }
}

/// A sink that materializes bytes.
#[derive(Debug, Default)]
pub struct Serializer {
    buf: Vec<u8>,
}

impl Serializer {
    /// A fresh serializer.
    pub fn new() -> Self {
        Self::default()
    }

    /// A serializer preallocated to `capacity` bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            buf: Vec::with_capacity(capacity as usize),
        }
    }

    /// The number of bytes written so far.
    pub fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the serializer, yielding its bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl Sink for Serializer {
    fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }
}

/// A cursor over a byte slice that decodes little-endian values.
#[derive(Debug, Clone, Copy)]
pub struct Deserializer<'a> {
    data: &'a [u8],
}

impl<'a> Deserializer<'a> {
    /// A deserializer over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> u64 {
        self.data.len() as u64
    }

    /// Consume `n` raw bytes.
    pub fn read_bytes(&mut self, n: u64) -> TesseraResult<&'a [u8]> {
        if self.remaining() < n {
            tessera_bail!(Truncated: "needed {} bytes, {} remain", n, self.remaining());
        }
        let (head, tail) = self.data.split_at(n as usize);
        self.data = tail;
        Ok(head)
    }

    /// Consume a `u8`.
    pub fn read_u8(&mut self) -> TesseraResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Consume a little-endian `u32`.
    pub fn read_u32(&mut self) -> TesseraResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(
            bytes.try_into().expect("split of exactly four bytes"),
        ))
    }

    /// Consume a little-endian `u64`.
    pub fn read_u64(&mut self) -> TesseraResult<u64> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(
            bytes.try_into().expect("split of exactly eight bytes"),
        ))
    }

    /// Consume `n` little-endian `u64` values.
    pub fn read_u64_vec(&mut self, n: u64) -> TesseraResult<Vec<u64>> {
        let bytes = self.read_bytes(n.checked_mul(8).ok_or_else(
            || tessera_error::tessera_err!(Corrupt: "u64 vector length {} overflows", n),
        )?)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().expect("exact chunks of eight")))
            .collect())
    }
}
