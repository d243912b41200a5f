//! 1-D coordinate ranges and N-dimensional subarrays.

use std::fmt::{Debug, Formatter};

use tessera_error::{tessera_bail, TesseraExpect, TesseraResult};

use crate::{NativeCellType, ToLeBytes, TryFromLeBytes};

/// A closed 1-D range `[start, end]` over one dimension.
///
/// For fixed-size dimensions the backing buffer is exactly
/// `2 * coord_size` bytes: the start value followed by the end value. For
/// variable-size dimensions the buffer is the concatenation of the start and
/// end byte strings, with `start_size` recording the split point.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Range {
    data: Box<[u8]>,
    start_size: u64,
    var: bool,
}

impl Range {
    /// An empty (unset) range.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A fixed-size range from typed bounds.
    pub fn from_typed<T: NativeCellType>(start: T, end: T) -> Self {
        let start = start.to_le_bytes();
        let end = end.to_le_bytes();
        let mut data = Vec::with_capacity(start.as_ref().len() * 2);
        data.extend_from_slice(start.as_ref());
        data.extend_from_slice(end.as_ref());
        Self {
            data: data.into_boxed_slice(),
            start_size: 0,
            var: false,
        }
    }

    /// A fixed-size range from raw bytes. `data` must be `2 * coord_size`
    /// bytes.
    pub fn from_fixed_bytes(data: &[u8]) -> Self {
        Self {
            data: data.into(),
            start_size: 0,
            var: false,
        }
    }

    /// A variable-size range from start and end byte strings.
    pub fn from_var(start: &[u8], end: &[u8]) -> Self {
        let mut data = Vec::with_capacity(start.len() + end.len());
        data.extend_from_slice(start);
        data.extend_from_slice(end);
        Self {
            data: data.into_boxed_slice(),
            start_size: start.len() as u64,
            var: true,
        }
    }

    /// A variable-size range from a concatenated buffer and its split point.
    pub fn from_var_bytes(data: &[u8], start_size: u64) -> TesseraResult<Self> {
        if start_size > data.len() as u64 {
            tessera_bail!(Corrupt: "range start size {} exceeds buffer of {} bytes", start_size, data.len());
        }
        Ok(Self {
            data: data.into(),
            start_size,
            var: true,
        })
    }

    /// Returns `true` iff this range has never been set.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && !self.var
    }

    /// Returns `true` iff this is a variable-size range.
    pub fn is_var(&self) -> bool {
        self.var
    }

    /// Total size of the backing buffer in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The raw backing buffer.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the start bound in bytes.
    pub fn start_size(&self) -> u64 {
        if self.var {
            self.start_size
        } else {
            (self.data.len() / 2) as u64
        }
    }

    /// Size of the end bound in bytes.
    pub fn end_size(&self) -> u64 {
        self.size() - self.start_size()
    }

    /// The start bound's bytes.
    pub fn start_bytes(&self) -> &[u8] {
        &self.data[..self.start_size() as usize]
    }

    /// The end bound's bytes.
    pub fn end_bytes(&self) -> &[u8] {
        &self.data[self.start_size() as usize..]
    }

    /// Decode the start bound of a fixed-size range.
    pub fn start_as<T: NativeCellType>(&self) -> T {
        T::try_from_le_bytes(self.start_bytes()).tessera_expect("range width matches datatype")
    }

    /// Decode the end bound of a fixed-size range.
    pub fn end_as<T: NativeCellType>(&self) -> T {
        T::try_from_le_bytes(self.end_bytes()).tessera_expect("range width matches datatype")
    }

    /// Replace the start bound of a fixed-size range.
    pub fn set_start<T: NativeCellType>(&mut self, start: T) {
        let bytes = start.to_le_bytes();
        let n = bytes.as_ref().len();
        self.data[..n].copy_from_slice(bytes.as_ref());
    }

    /// Replace the end bound of a fixed-size range.
    pub fn set_end<T: NativeCellType>(&mut self, end: T) {
        let bytes = end.to_le_bytes();
        let n = bytes.as_ref().len();
        let total = self.data.len();
        self.data[total - n..].copy_from_slice(bytes.as_ref());
    }
}

impl Debug for Range {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.var {
            write!(
                f,
                "Range[var {:?}..{:?}]",
                String::from_utf8_lossy(self.start_bytes()),
                String::from_utf8_lossy(self.end_bytes())
            )
        } else {
            write!(f, "Range[fixed {} bytes]", self.data.len())
        }
    }
}

/// An N-dimensional subarray: one [`Range`] per dimension.
pub type NDRange = Vec<Range>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_round_trip() {
        let r = Range::from_typed(-5i32, 17i32);
        assert!(!r.is_var());
        assert_eq!(r.size(), 8);
        assert_eq!(r.start_as::<i32>(), -5);
        assert_eq!(r.end_as::<i32>(), 17);
    }

    #[test]
    fn fixed_mutation() {
        let mut r = Range::from_typed(0u64, 10u64);
        r.set_start(3u64);
        r.set_end(7u64);
        assert_eq!(r.start_as::<u64>(), 3);
        assert_eq!(r.end_as::<u64>(), 7);
    }

    #[test]
    fn var_split() {
        let r = Range::from_var(b"aa", b"bccc");
        assert!(r.is_var());
        assert_eq!(r.start_bytes(), b"aa");
        assert_eq!(r.end_bytes(), b"bccc");
        assert_eq!(r.start_size(), 2);
        assert_eq!(r.end_size(), 4);
    }

    #[test]
    fn var_from_bytes_validates() {
        assert!(Range::from_var_bytes(b"abc", 4).is_err());
        let r = Range::from_var_bytes(b"abc", 1).unwrap();
        assert_eq!(r.start_bytes(), b"a");
        assert_eq!(r.end_bytes(), b"bc");
    }

    #[test]
    fn empty_is_empty() {
        assert!(Range::empty().is_empty());
        assert!(!Range::from_typed(0u8, 0u8).is_empty());
    }
}
