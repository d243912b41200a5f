//! Fragment naming: `__<t_start>_<t_end>_<uuid>_<version>`.

use tessera_error::{tessera_bail, tessera_err, TesseraResult};
use uuid::Uuid;

/// File name of the fragment manifest inside a fragment directory.
pub const FRAGMENT_METADATA_FILENAME: &str = "__fragment_metadata.tdb";

/// Suffix of every data file.
pub const FILE_SUFFIX: &str = ".tdb";

/// Suffix of vacuum files listing fragments scheduled for deletion.
pub const VACUUM_FILE_SUFFIX: &str = ".vac";

/// Schema name assumed for fragments older than the named-schema format.
pub const LEGACY_SCHEMA_NAME: &str = "__array_schema.tdb";

/// A parsed fragment name: timestamp range, unique id, and on-disk format
/// version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentName {
    name: String,
    timestamp_range: (u64, u64),
    version: u32,
}

impl FragmentName {
    /// Generate a fresh fragment name for the given timestamp range and
    /// format version.
    pub fn generate(timestamp_range: (u64, u64), version: u32) -> Self {
        let name = format!(
            "__{}_{}_{}_{}",
            timestamp_range.0,
            timestamp_range.1,
            Uuid::new_v4().simple(),
            version
        );
        Self {
            name,
            timestamp_range,
            version,
        }
    }

    /// Parse a fragment name or a URI ending in one.
    pub fn parse(name_or_uri: &str) -> TesseraResult<Self> {
        let name = last_path_part(name_or_uri);
        let Some(body) = name.strip_prefix("__") else {
            tessera_bail!(InvalidArgument: "{:?} is not a fragment name", name);
        };
        let parts: Vec<&str> = body.split('_').collect();
        if parts.len() != 4 {
            tessera_bail!(InvalidArgument: "{:?} is not a fragment name", name);
        }
        let t_start = parse_u64(parts[0], name)?;
        let t_end = parse_u64(parts[1], name)?;
        let version = parse_u64(parts[3], name)? as u32;
        if t_start > t_end {
            tessera_bail!(InvalidArgument: "fragment {:?} has a reversed timestamp range", name);
        }
        Ok(Self {
            name: name.to_string(),
            timestamp_range: (t_start, t_end),
            version,
        })
    }

    /// The bare fragment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The embedded timestamp range.
    pub fn timestamp_range(&self) -> (u64, u64) {
        self.timestamp_range
    }

    /// The embedded on-disk format version.
    pub fn version(&self) -> u32 {
        self.version
    }
}

/// The last path component of a URI, ignoring a trailing slash.
pub fn last_path_part(uri: &str) -> &str {
    let trimmed = uri.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn parse_u64(s: &str, name: &str) -> TesseraResult<u64> {
    s.parse::<u64>()
        .map_err(|_| tessera_err!(InvalidArgument: "malformed fragment name {:?}", name))
}
