use embedded_hal::spi::ErrorKind;
use thiserror::Error;

/// Errors surfaced by devices, triggers and the buffer layer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("resource temporarily unavailable, try again")]
    Again,
    #[error("operation not supported")]
    NotSupported,
    #[error("invalid argument")]
    Invalid,
    #[error("probe deferred, a dependency is not ready yet")]
    ProbeDefer,
    #[error("device or resource busy")]
    Busy,
    #[error("already exists")]
    Exists,
    #[error("no such device")]
    NoDevice,
    #[error("bus transfer failed: {0}")]
    Transport(ErrorKind),
}

impl Error {
    /// Negative errno as reported to user space.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Again => -11,
            Self::NotSupported | Self::Invalid => -22,
            Self::ProbeDefer => -517,
            Self::Busy => -16,
            Self::Exists => -17,
            Self::NoDevice => -19,
            Self::Transport(_) => -5,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::Transport(kind)
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
