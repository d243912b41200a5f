use std::fmt::Display;

use crate::{ErrString, TesseraError, TesseraResult};

/// Extension trait for unwrapping results with a message that survives into
/// the panic payload. Used where an `Err` indicates a bug rather than a
/// runtime condition.
pub trait TesseraExpect {
    /// The success type.
    type Output;

    /// Unwrap the value, panicking with `msg` and the underlying error.
    fn tessera_expect(self, msg: &str) -> Self::Output;
}

impl<T, E: Display> TesseraExpect for Result<T, E> {
    type Output = T;

    fn tessera_expect(self, msg: &str) -> Self::Output {
        self.unwrap_or_else(|e| panic!("{msg}: {e}"))
    }
}

impl<T> TesseraExpect for Option<T> {
    type Output = T;

    fn tessera_expect(self, msg: &str) -> Self::Output {
        self.unwrap_or_else(|| panic!("{msg}"))
    }
}

/// Extension trait converting foreign errors into [`TesseraError`] with a
/// context message.
pub trait TesseraUnwrap {
    /// The success type.
    type Output;

    /// Map the error into a [`TesseraError`] with the given context.
    fn tessera_context(self, msg: impl Into<ErrString>) -> TesseraResult<Self::Output>;
}

impl<T> TesseraUnwrap for TesseraResult<T> {
    type Output = T;

    fn tessera_context(self, msg: impl Into<ErrString>) -> TesseraResult<T> {
        self.map_err(|e| e.with_context(msg))
    }
}

/// Extension trait for flattening nested results.
pub trait ResultExt<T>: private::Sealed {
    /// Flatten a nested [`TesseraResult`].
    fn flatten(self) -> TesseraResult<T>;
}

mod private {
    use crate::TesseraResult;

    pub trait Sealed {}

    impl<T> Sealed for TesseraResult<TesseraResult<T>> {}
}

impl<T> ResultExt<T> for TesseraResult<TesseraResult<T>> {
    fn flatten(self) -> TesseraResult<T> {
        match self {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) | Err(e) => Err(e),
        }
    }
}
