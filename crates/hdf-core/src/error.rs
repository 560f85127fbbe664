//! Status codes shared by every component of the driver framework.
//!
//! Every operation that crosses a component boundary reports an integer
//! status: `0` is success, every negative value names one failure kind.  The
//! integer form is what travels over the wire; inside a process the same
//! information is carried by [`HdfError`] so callers can use `?`.
//!
//! # Why keep integer codes at all?
//!
//! Device hosts and the device manager run in different processes.  A reply
//! frame carries the status of the remote call as a plain `i32`, so both
//! sides need an agreed, stable numbering.  [`HdfError::code`] and
//! [`HdfError::from_code`] convert in both directions.

use thiserror::Error;

/// Status code for a successful operation.
pub const HDF_SUCCESS: i32 = 0;

/// Error kinds understood by every component.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash)]
pub enum HdfError {
    /// Generic failure with no more specific kind.
    #[error("operation failed")]
    Failure,
    /// The callee does not implement the requested operation.
    #[error("operation not supported")]
    NotSupported,
    /// An argument was missing or out of range.
    #[error("invalid parameter")]
    InvalidParam,
    /// The target object is missing or has been torn down.
    #[error("invalid object")]
    InvalidObject,
    /// A resource could not be allocated.
    #[error("allocation failed")]
    MallocFail,
    /// A remote call did not complete in time.
    #[error("operation timed out")]
    Timeout,
    /// A worker thread could not be started.
    #[error("thread creation failed")]
    ThreadCreateFail,
    /// The device or node is already present.
    #[error("device busy")]
    DeviceBusy,
    /// Transport or file-system I/O failed.
    #[error("I/O failure")]
    Io,
    /// No device, driver or host matches the request.
    #[error("not found")]
    NotFound,
}

impl HdfError {
    /// Returns the wire status code of this error.
    pub fn code(self) -> i32 {
        match self {
            HdfError::Failure => -1,
            HdfError::NotSupported => -2,
            HdfError::InvalidParam => -3,
            HdfError::InvalidObject => -4,
            HdfError::MallocFail => -6,
            HdfError::Timeout => -7,
            HdfError::ThreadCreateFail => -10,
            HdfError::DeviceBusy => -16,
            HdfError::Io => -17,
            HdfError::NotFound => -202,
        }
    }

    /// Maps a wire status code back to an error.
    ///
    /// Unknown negative codes collapse to [`HdfError::Failure`]; `0` is not an
    /// error and must be checked with [`status_to_result`] instead.
    pub fn from_code(code: i32) -> Self {
        match code {
            -2 => HdfError::NotSupported,
            -3 => HdfError::InvalidParam,
            -4 => HdfError::InvalidObject,
            -6 => HdfError::MallocFail,
            -7 => HdfError::Timeout,
            -10 => HdfError::ThreadCreateFail,
            -16 => HdfError::DeviceBusy,
            -17 => HdfError::Io,
            -202 => HdfError::NotFound,
            _ => HdfError::Failure,
        }
    }
}

/// Result alias used throughout the framework.
pub type HdfResult<T> = Result<T, HdfError>;

/// Converts an operation result into its wire status code.
pub fn result_to_status<T>(result: &HdfResult<T>) -> i32 {
    match result {
        Ok(_) => HDF_SUCCESS,
        Err(e) => e.code(),
    }
}

/// Converts a wire status code into an operation result.
pub fn status_to_result(status: i32) -> HdfResult<()> {
    if status == HDF_SUCCESS {
        Ok(())
    } else {
        Err(HdfError::from_code(status))
    }
}
