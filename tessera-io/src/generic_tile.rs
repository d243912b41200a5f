//! Generic tiles: self-describing, length-prefixed units used to persist
//! every metadata section.
//!
//! On storage a generic tile is `[header][payload]`, where the header records
//! the format version, codec, original and persisted payload sizes, a CRC32
//! of the persisted bytes, and the writer key's check value. A tile is
//! independently decodable given only its starting offset.

use bytes::Bytes;
use tessera_error::{tessera_bail, TesseraResult};

use crate::{
    Config, Deserializer, EncryptionKey, Serializer, Sink, Vfs, GENERIC_TILE_CODEC_KEY,
};

/// Current generic-tile format version.
pub const GENERIC_TILE_VERSION: u32 = 1;

/// Byte size of the generic-tile header.
pub const GENERIC_TILE_HEADER_SIZE: u64 = 4 + 1 + 8 + 8 + 4 + 4;

/// Codec applied to a generic tile's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TileCodec {
    /// Payload stored verbatim.
    None = 0,
    /// LZ4 block compression with a length prefix.
    Lz4 = 1,
}

impl TileCodec {
    fn from_wire(value: u8) -> TesseraResult<Self> {
        match value {
            0 => Ok(TileCodec::None),
            1 => Ok(TileCodec::Lz4),
            other => Err(tessera_error::tessera_err!(Corrupt: "unknown tile codec {}", other)),
        }
    }

    fn from_config(config: &Config) -> TesseraResult<Self> {
        match config.get(GENERIC_TILE_CODEC_KEY) {
            Some("lz4") | None => Ok(TileCodec::Lz4),
            Some("none") => Ok(TileCodec::None),
            Some(other) => {
                tessera_bail!(InvalidArgument: "unknown generic tile codec {:?}", other)
            }
        }
    }
}

/// An in-memory tile: one contiguous decoded buffer.
#[derive(Debug, Clone)]
pub struct Tile {
    data: Bytes,
}

impl Tile {
    /// A tile owning `data`.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// The tile's bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The tile's size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// A deserializer over the tile, starting at `offset`.
    pub fn deserializer_at(&self, offset: u64) -> TesseraResult<Deserializer<'_>> {
        if offset > self.size() {
            tessera_bail!(OutOfBounds: "offset {} past tile of {} bytes", offset, self.size());
        }
        Ok(Deserializer::new(&self.data[offset as usize..]))
    }
}

/// Reads and writes generic tiles against one storage object.
pub struct GenericTileIo<'a> {
    vfs: &'a dyn Vfs,
    uri: &'a str,
}

impl<'a> GenericTileIo<'a> {
    /// Tile I/O over the object at `uri`.
    pub fn new(vfs: &'a dyn Vfs, uri: &'a str) -> Self {
        Self { vfs, uri }
    }

    /// Read and decode the generic tile starting at `offset`.
    pub fn read_generic(
        &self,
        offset: u64,
        key: &EncryptionKey,
        _config: &Config,
    ) -> TesseraResult<Tile> {
        let header = self.vfs.read(self.uri, offset, GENERIC_TILE_HEADER_SIZE)?;
        let mut de = Deserializer::new(&header);
        let version = de.read_u32()?;
        if version > GENERIC_TILE_VERSION {
            tessera_bail!(Corrupt: "generic tile at {}:{} has unknown version {}", self.uri, offset, version);
        }
        let codec = TileCodec::from_wire(de.read_u8()?)?;
        let original_size = de.read_u64()?;
        let persisted_size = de.read_u64()?;
        let checksum = de.read_u32()?;
        let key_check: [u8; 4] = de
            .read_bytes(4)?
            .try_into()
            .expect("read of exactly four bytes");

        if key_check != key.check_value() {
            tessera_bail!(Decrypt: "key mismatch for generic tile at {}:{}", self.uri, offset);
        }

        let persisted = self
            .vfs
            .read(self.uri, offset + GENERIC_TILE_HEADER_SIZE, persisted_size)?;
        if crc32fast::hash(&persisted) != checksum {
            tessera_bail!(Corrupt: "checksum mismatch for generic tile at {}:{}", self.uri, offset);
        }

        let payload = match codec {
            TileCodec::None => persisted,
            TileCodec::Lz4 => {
                let decoded = lz4_flex::decompress_size_prepended(&persisted).map_err(
                    |e| tessera_error::tessera_err!(Corrupt: "lz4 decode of tile at {}:{} failed: {}", self.uri, offset, e),
                )?;
                Bytes::from(decoded)
            }
        };
        if payload.len() as u64 != original_size {
            tessera_bail!(
                Corrupt: "generic tile at {}:{} decoded to {} bytes, header says {}",
                self.uri, offset, payload.len(), original_size
            );
        }

        Ok(Tile::from_bytes(payload))
    }

    /// Encode `payload` as a generic tile and append it to the object.
    /// Returns the number of bytes the tile consumed on storage.
    pub fn write_generic(
        &self,
        payload: &[u8],
        key: &EncryptionKey,
        config: &Config,
    ) -> TesseraResult<u64> {
        let codec = TileCodec::from_config(config)?;
        let persisted = match codec {
            TileCodec::None => Bytes::copy_from_slice(payload),
            TileCodec::Lz4 => Bytes::from(lz4_flex::compress_prepend_size(payload)),
        };

        let mut ser = Serializer::with_capacity(GENERIC_TILE_HEADER_SIZE + persisted.len() as u64);
        ser.write_u32(GENERIC_TILE_VERSION);
        ser.write_u8(codec as u8);
        ser.write_u64(payload.len() as u64);
        ser.write_u64(persisted.len() as u64);
        ser.write_u32(crc32fast::hash(&persisted));
        ser.write_bytes(&key.check_value());
        ser.write_bytes(&persisted);

        let nbytes = ser.len();
        self.vfs.write(self.uri, &ser.into_inner())?;
        Ok(nbytes)
    }
}
