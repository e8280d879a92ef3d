//! `pty-host`
//!
//! Cross-platform pseudo-terminal host: spawns a child program attached to a
//! freshly created PTY (`forkpty` on Unix, ConPTY + Job Object on Windows),
//! exposes bidirectional byte streams to it, forwards window-size changes,
//! and guarantees clean termination of the child (and any grandchildren) on
//! disposal.
//!
//! This crate is a transport, not a terminal emulator: it does not parse
//! ANSI escape sequences, buffer scrollback, or convert encodings. Bytes
//! written to [`PtyConnection`]'s writer reach the child's stdin as PTY
//! input; bytes the child writes to its stdout/stderr arrive on the reader.
//!
//! ```no_run
//! use std::io::Write;
//! use pty_host::{spawn, SpawnOptions};
//!
//! # fn main() -> pty_host::Result<()> {
//! let mut opts = SpawnOptions::new("/bin/sh", "/tmp");
//! opts.command_line = vec!["-c".into(), "echo hello".into()];
//!
//! let conn = spawn(&opts)?;
//! let mut writer = conn.take_writer()?;
//! writeln!(writer, "echo still alive")?;
//!
//! let exit = conn.wait_for_exit(None).expect("wait_for_exit(None) always returns Some");
//! assert!(exit.success());
//! # Ok(())
//! # }
//! ```

mod connection;
mod error;
mod exit;
mod options;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

pub use connection::PtyConnection;
pub use error::{Error, Result};
pub use exit::ExitCode;
pub use options::{PtySize, SpawnOptions};

use tracing::instrument;

/// Spawn `opts.app` attached to a new PTY/ConPTY, selecting the Unix or
/// Windows backend at compile time per spec.md's Platform Selector. This is
/// the only entry point into the core lifecycle machinery; everything else
/// in this crate hangs off the [`PtyConnection`] it returns.
#[instrument(skip(opts), fields(app = ?opts.app))]
pub fn spawn(opts: &SpawnOptions) -> Result<PtyConnection> {
    opts.validate()?;

    #[cfg(unix)]
    {
        let provider = unix::UnixPtyProvider;
        let conn = provider.spawn(opts)?;
        Ok(PtyConnection::from_unix(conn))
    }

    #[cfg(windows)]
    {
        let provider = windows::WindowsPtyProvider;
        let conn = provider.spawn(opts)?;
        Ok(PtyConnection::from_windows(conn))
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(Error::PlatformNotSupported)
    }
}
