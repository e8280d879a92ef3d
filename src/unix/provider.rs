//! `UnixPtyProvider` — the spawn entry point on Unix.
//!
//! Grounded on `portable-pty::unix::openpty` for descriptor setup and on
//! `turborepo-process::child::ChildHandle::spawn_pty` for the "configure
//! the controller side, then hand the receiver side to the child" shape,
//! reworked around the shim's single `pty_spawn` call instead of
//! `std::process::Command` + `pre_exec`.

use std::os::unix::io::RawFd;

use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::exit::ExitCode;
use crate::options::SpawnOptions;

use super::connection::UnixConnection;
use super::shim::{self, PtyWinsizeFfi};

/// Spawns a child attached to a fresh PTY, per spec.md §4.1.
#[derive(Default)]
pub struct UnixPtyProvider;

impl UnixPtyProvider {
    #[instrument(skip(self, opts))]
    pub fn spawn(&self, opts: &SpawnOptions) -> Result<UnixConnection> {
        opts.validate()?;

        let app = opts
            .app
            .to_str()
            .ok_or_else(|| Error::InvalidArguments("app must be valid UTF-8 on unix".into()))?;
        let cwd = opts
            .cwd
            .to_str()
            .ok_or_else(|| Error::InvalidArguments("cwd must be valid UTF-8 on unix".into()))?;

        let args: Vec<&str> = opts
            .command_line
            .iter()
            .map(|a| {
                a.to_str()
                    .ok_or_else(|| Error::InvalidArguments("arguments must be valid UTF-8 on unix".into()))
            })
            .collect::<Result<_>>()?;

        let env_pairs: Vec<(String, String)> = opts
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let envp = if env_pairs.is_empty() {
            None
        } else {
            Some(env_pairs.as_slice())
        };

        let termios = shim::default_termios_ffi();
        let winsize = PtyWinsizeFfi {
            rows: opts.size.rows,
            cols: opts.size.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let result = unsafe { shim::pty_spawn(app, &args, envp, Some(cwd), &termios, &winsize) };

        if result.pid < 0 {
            return Err(Error::spawn_failed(
                result.error,
                format!("forkpty failed while spawning {app:?}"),
            ));
        }

        debug!(pid = result.pid, master_fd = result.master_fd, "spawned pty child");

        Ok(UnixConnection::new(result.pid, result.master_fd))
    }
}

/// Wait on a raw pid without reaping twice; shared between `wait_for_exit`
/// and `Drop`.
pub(super) fn reap(pid: libc::pid_t) -> Option<ExitCode> {
    let mut status: libc::c_int = 0;
    let reaped = shim::pty_waitpid(pid, &mut status, libc::WNOHANG);
    if reaped == pid {
        Some(ExitCode::from_wait_status(status))
    } else {
        None
    }
}

pub(super) fn close_fd(fd: RawFd) {
    shim::pty_close(fd);
}
