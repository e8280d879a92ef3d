//! Crate-wide error type.
//!
//! Mirrors the error kinds named in the design: argument validation fails
//! synchronously before any OS call, spawn/resize failures carry the
//! originating OS error, and operating on a disposed connection is its own
//! variant rather than being folded into `Io`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid spawn options: {0}")]
    InvalidArguments(String),

    #[error("platform does not support pseudo consoles (Windows 10 1809 or newer is required)")]
    PlatformNotSupported,

    #[error("failed to spawn child process: {message} (os error {os_error})")]
    SpawnFailed { os_error: i32, message: String },

    #[error("pseudo console operation failed: HRESULT 0x{hresult:08X}")]
    PseudoConsoleFailed { hresult: i32 },

    #[error("failed to resize pty: {0}")]
    ResizeFailed(#[source] std::io::Error),

    #[error("operation attempted on an already-disposed connection")]
    AlreadyDisposed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn spawn_failed(os_error: i32, message: impl Into<String>) -> Self {
        Error::SpawnFailed {
            os_error,
            message: message.into(),
        }
    }
}
