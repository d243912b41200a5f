#![deny(missing_docs)]
//! Error handling for the Tessera storage engine.
//!
//! Every fallible operation in the workspace returns [`TesseraResult`]. Errors
//! carry a kind that mirrors the taxonomy surfaced at the engine boundary, so
//! callers can tell a corrupt manifest from a memory-budget refusal from a
//! caller bug without string matching.

mod ext;

use std::borrow::Cow;
use std::fmt::{self, Display, Formatter};
use std::ops::Deref;

pub use ext::*;

/// A string wrapper for error messages, cheap to construct from both owned and
/// static strings.
#[derive(Debug)]
pub struct ErrString(Cow<'static, str>);

impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    fn from(msg: T) -> Self {
        ErrString(msg.into())
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The top-level error type for Tessera.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TesseraError {
    /// An argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(ErrString),
    /// An index or coordinate lies outside its valid domain.
    #[error("out of bounds: {0}")]
    OutOfBounds(ErrString),
    /// The on-disk format version is not supported by this build.
    #[error("unsupported format version: {0}")]
    FormatVersionUnsupported(ErrString),
    /// Persisted bytes failed structural validation or a checksum.
    #[error("corrupt data: {0}")]
    Corrupt(ErrString),
    /// Fewer bytes were present than the format requires.
    #[error("truncated data: {0}")]
    Truncated(ErrString),
    /// The supplied encryption key does not match the persisted data.
    #[error("decryption failure: {0}")]
    Decrypt(ErrString),
    /// The memory tracker refused an allocation.
    #[error("out of memory budget: {0}")]
    OutOfBudget(ErrString),
    /// A referenced object does not exist on storage.
    #[error("not found: {0}")]
    NotFound(ErrString),
    /// The caller violated an API precondition.
    #[error("usage error: {0}")]
    UsageError(ErrString),
    /// The operation was cancelled at an I/O boundary.
    #[error("cancelled: {0}")]
    Cancelled(ErrString),
    /// An error from the underlying storage backend.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// A wrapper for errors that carry additional context.
    #[error("{0}: {1}")]
    Context(ErrString, Box<TesseraError>),
}

impl TesseraError {
    /// Wrap this error with an additional message, preserving the original as
    /// the cause.
    pub fn with_context(self, msg: impl Into<ErrString>) -> Self {
        TesseraError::Context(msg.into(), Box::new(self))
    }
}

/// The result type used throughout Tessera.
pub type TesseraResult<T> = Result<T, TesseraError>;

/// Construct a [`TesseraError`] of the given kind from a format string.
#[macro_export]
macro_rules! tessera_err {
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::TesseraError::$variant(format!($fmt, $($arg),*).into())
    }};
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::tessera_err!(InvalidArgument: $fmt $(, $arg)*)
    }};
}

/// Return early with a [`TesseraError`] of the given kind.
#[macro_export]
macro_rules! tessera_bail {
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {{
        return Err($crate::tessera_err!($variant: $fmt $(, $arg)*));
    }};
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        return Err($crate::tessera_err!($fmt $(, $arg)*));
    }};
}

/// Panic with a formatted message. Reserved for invariants whose violation
/// means the process state is unrecoverable; fallible paths return
/// [`TesseraResult`] instead.
#[macro_export]
macro_rules! tessera_panic {
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {{
        panic!("{}", $crate::tessera_err!($variant: $fmt $(, $arg)*))
    }};
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        panic!("{}", $crate::tessera_err!($fmt $(, $arg)*))
    }};
}
