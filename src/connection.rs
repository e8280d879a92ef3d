//! `PtyConnection` — the single public handle spec.md §3 names, wrapping
//! whichever platform backend [`crate::spawn`] picked.
//!
//! Exactly one `PtyConnection` per spawn, with no shared scheduler state
//! across connections (spec.md's multi-child-supervision non-goal): unlike
//! `turborepo_process::child::ChildHandle`, there is no enclosing manager
//! tracking a fleet of these.

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::exit::ExitCode;
#[cfg(feature = "async-tokio")]
use crate::exit::ExitWaiter;
#[cfg(feature = "async-tokio")]
use std::sync::Arc;

#[cfg(unix)]
use crate::unix::UnixConnection;
#[cfg(windows)]
use crate::windows::WindowsConnection;

enum Inner {
    #[cfg(unix)]
    Unix(UnixConnection),
    #[cfg(windows)]
    Windows(WindowsConnection),
}

/// A running (or just-exited) child attached to a PTY/ConPTY.
///
/// All operations are blocking by default (the `sync` feature); with
/// `async-tokio` enabled, [`PtyConnection::wait_for_exit_async`] and
/// [`PtyConnection::exited`] are also available.
pub struct PtyConnection {
    inner: Inner,
}

impl PtyConnection {
    #[cfg(unix)]
    pub(crate) fn from_unix(conn: UnixConnection) -> Self {
        PtyConnection {
            inner: Inner::Unix(conn),
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_windows(conn: WindowsConnection) -> Self {
        PtyConnection {
            inner: Inner::Windows(conn),
        }
    }

    /// The child's process id.
    pub fn pid(&self) -> i32 {
        match &self.inner {
            #[cfg(unix)]
            Inner::Unix(c) => c.pid(),
            #[cfg(windows)]
            Inner::Windows(c) => c.pid(),
        }
    }

    /// Duplicate the read side of the connection. May be called more than
    /// once; each clone reads the same underlying stream independently of
    /// position (the OS pipe/fd has no per-handle cursor).
    pub fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        match &self.inner {
            #[cfg(unix)]
            Inner::Unix(c) => c.try_clone_reader(),
            #[cfg(windows)]
            Inner::Windows(c) => c.try_clone_reader(),
        }
    }

    /// Take ownership of the write side. May only be called once; a second
    /// call returns an error.
    pub fn take_writer(&self) -> Result<Box<dyn Write + Send>> {
        match &self.inner {
            #[cfg(unix)]
            Inner::Unix(c) => c.take_writer(),
            #[cfg(windows)]
            Inner::Windows(c) => c.take_writer(),
        }
    }

    /// Forward a terminal resize.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            Inner::Unix(c) => c.resize(cols, rows),
            #[cfg(windows)]
            Inner::Windows(c) => c.resize(cols, rows),
        }
    }

    /// Terminate the child (and, on Unix, its process group; on Windows,
    /// its whole Job Object). Idempotent once the child has already
    /// exited.
    pub fn kill(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            Inner::Unix(c) => c.kill(),
            #[cfg(windows)]
            Inner::Windows(c) => c.kill(),
        }
    }

    /// Block until the child exits or `timeout` elapses. `None` timeout
    /// blocks indefinitely. Returns `None` on timeout, `Some` on exit —
    /// callers that have already seen `Some` may call this again for the
    /// same (cached) result.
    pub fn wait_for_exit(&self, timeout: Option<Duration>) -> Option<ExitCode> {
        match &self.inner {
            #[cfg(unix)]
            Inner::Unix(c) => c.wait_for_exit(timeout),
            #[cfg(windows)]
            Inner::Windows(c) => c.wait_for_exit(timeout),
        }
    }

    /// The exit code, if the child has already exited; `None` otherwise.
    /// Never blocks.
    pub fn exit_code(&self) -> Option<ExitCode> {
        match &self.inner {
            #[cfg(unix)]
            Inner::Unix(c) => c.exit_code(),
            #[cfg(windows)]
            Inner::Windows(c) => c.exit_code(),
        }
    }

}

#[cfg(feature = "async-tokio")]
impl PtyConnection {
    /// The shared `Mutex`+`Condvar` exit watcher backing whichever platform
    /// connection this wraps, as a platform-erased trait object so async
    /// code can wait on it without matching on [`Inner`].
    fn exit_waiter(&self) -> Arc<dyn ExitWaiter> {
        match &self.inner {
            #[cfg(unix)]
            Inner::Unix(c) => c.exit_waiter(),
            #[cfg(windows)]
            Inner::Windows(c) => c.exit_waiter(),
        }
    }

    /// Async counterpart to [`PtyConnection::wait_for_exit`]: awaits the
    /// child's exit on a blocking task rather than polling, so it does not
    /// occupy a tokio worker thread for the duration.
    ///
    /// Clones the `Arc<dyn ExitWaiter>` into the blocking task rather than
    /// capturing `self`, so a caller that cancels this future (e.g. by
    /// wrapping it in `tokio::time::timeout`) and then drops the
    /// `PtyConnection` leaves the detached `spawn_blocking` thread holding
    /// its own `Arc` rather than a reference into freed memory —
    /// `spawn_blocking` tasks are not cancelled when their `JoinHandle` is
    /// dropped, so the task outliving the connection is the expected case
    /// to design for, not an edge case to ignore.
    pub async fn wait_for_exit_async(&self, timeout: Option<Duration>) -> Option<ExitCode> {
        let waiter = self.exit_waiter();
        if let Some(code) = waiter.get() {
            return Some(code);
        }
        tokio::task::spawn_blocking(move || waiter.wait(timeout))
            .await
            .unwrap_or(None)
    }

    /// Resolves once the child has exited. Equivalent to
    /// `wait_for_exit_async(None)` but named to match the "one-shot
    /// event" framing in spec.md §3.
    pub async fn exited(&self) -> ExitCode {
        self.wait_for_exit_async(None)
            .await
            .expect("wait_for_exit_async(None) only returns on exit")
    }
}
