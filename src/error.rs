use crate::addr::RawAddr;
use crate::{addr, bus, path, uuid};

/// Error type returned by all fallible operations.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("attribute not found")]
    NotFound,
    #[error("device {0} not found")]
    DeviceNotFound(RawAddr),
    #[error("out of memory")]
    OutOfMemory,
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
    #[error("device error: {0}")]
    Device(String),
    #[error(transparent)]
    Bus(#[from] bus::Error),
    #[error("internal error: {0}")]
    Internal(&'static str),
    #[error("device not connected")]
    NotConnected,
    #[error("device busy: services not resolved")]
    Busy,
}

impl Error {
    /// Returns the result code for this error.
    #[must_use]
    pub fn status(&self) -> Status {
        match *self {
            Self::InvalidParameter(_) => Status::InvalidParameter,
            Self::NotFound | Self::DeviceNotFound(_) => Status::NotFound,
            Self::OutOfMemory => Status::OutOfMemory,
            Self::NotSupported(_) => Status::NotSupported,
            Self::Device(_) => Status::DeviceError,
            Self::Bus(ref e) if e.is_transport() => Status::BusTransport,
            Self::Bus(_) => Status::BusDomain,
            Self::Internal(_) => Status::Internal,
            Self::NotConnected => Status::NotConnected,
            Self::Busy => Status::Busy,
        }
    }
}

impl From<uuid::ParseError> for Error {
    #[inline]
    fn from(e: uuid::ParseError) -> Self {
        Self::InvalidParameter(e.to_string())
    }
}

impl From<addr::ParseError> for Error {
    #[inline]
    fn from(e: addr::ParseError) -> Self {
        Self::InvalidParameter(e.to_string())
    }
}

impl From<path::HandleError> for Error {
    #[inline]
    fn from(e: path::HandleError) -> Self {
        Self::Device(e.to_string())
    }
}

/// Common result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Result codes shared by synchronous calls and completion callbacks.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[cfg_attr(test, derive(enum_iterator::Sequence))]
#[repr(u8)]
pub enum Status {
    Success = 0,
    InvalidParameter = 1,
    NotFound = 2,
    OutOfMemory = 3,
    NotSupported = 4,
    DeviceError = 5,
    /// Bus transport failure.
    BusTransport = 6,
    /// Error returned by the Bluetooth service.
    BusDomain = 7,
    Internal = 8,
    NotConnected = 9,
    Busy = 10,
}

impl Status {
    /// Returns the status of an operation result.
    #[inline]
    #[must_use]
    pub fn of<T>(r: &Result<T>) -> Self {
        r.as_ref().map_or_else(Error::status, |_| Self::Success)
    }

    /// Returns whether the status indicates success.
    #[inline(always)]
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Success)
    }
}
