//! `UnixConnection` — the reader/writer/lifecycle handle returned by
//! [`UnixPtyProvider::spawn`](super::provider::UnixPtyProvider::spawn).
//!
//! Grounded on `portable-pty::unix::{UnixMasterPty, UnixMasterWriter}` for
//! the fd-cloning reader/writer shape (including the EIO-as-EOF treatment
//! on read, and the EOF-on-drop behavior of the writer), and on spec.md
//! §4.2 for the kill/wait_for_exit algorithm, which targets the process
//! group rather than the single pid the teacher's `ChildKiller` uses —
//! spec.md §9 calls this out explicitly so that a shell's own children get
//! reaped along with the shell itself.

use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace, warn};

use crate::error::{Error, Result};
use crate::exit::{ExitCode, ExitWaiter};

use super::provider::{close_fd, reap};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const GRACE_PERIOD: Duration = Duration::from_millis(250);

struct ExitWatcher {
    lock: Mutex<Option<ExitCode>>,
    cond: Condvar,
}

impl ExitWatcher {
    fn new() -> Self {
        ExitWatcher {
            lock: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    fn set(&self, code: ExitCode) {
        let mut guard = self.lock.lock().expect("exit watcher mutex poisoned");
        if guard.is_none() {
            *guard = Some(code);
            self.cond.notify_all();
        }
    }

    fn get(&self) -> Option<ExitCode> {
        *self.lock.lock().expect("exit watcher mutex poisoned")
    }

    fn wait(&self, timeout: Option<Duration>) -> Option<ExitCode> {
        let guard = self.lock.lock().expect("exit watcher mutex poisoned");
        match timeout {
            None => {
                let guard = self
                    .cond
                    .wait_while(guard, |code| code.is_none())
                    .expect("exit watcher mutex poisoned");
                *guard
            }
            Some(timeout) => {
                let (guard, _) = self
                    .cond
                    .wait_timeout_while(guard, timeout, |code| code.is_none())
                    .expect("exit watcher mutex poisoned");
                *guard
            }
        }
    }
}

impl ExitWaiter for ExitWatcher {
    fn get(&self) -> Option<ExitCode> {
        ExitWatcher::get(self)
    }

    fn wait(&self, timeout: Option<Duration>) -> Option<ExitCode> {
        ExitWatcher::wait(self, timeout)
    }
}

/// The Unix half of [`crate::PtyConnection`].
pub struct UnixConnection {
    pid: libc::pid_t,
    master_fd: RawFd,
    took_writer: Mutex<bool>,
    exit: Arc<ExitWatcher>,
    reaper_started: Mutex<bool>,
}

impl UnixConnection {
    pub(super) fn new(pid: libc::pid_t, master_fd: RawFd) -> Self {
        let conn = UnixConnection {
            pid,
            master_fd,
            took_writer: Mutex::new(false),
            exit: Arc::new(ExitWatcher::new()),
            reaper_started: Mutex::new(false),
        };
        conn.ensure_reaper();
        conn
    }

    /// Spin up the background thread that blocks in `waitpid` (Linux) or
    /// polls it (macOS, per spec.md §9's resolution of the open question)
    /// and records the result once. Started lazily so a connection that is
    /// immediately dropped without anyone calling `wait_for_exit` still
    /// gets reaped.
    fn ensure_reaper(&self) {
        let mut started = self.reaper_started.lock().expect("reaper flag poisoned");
        if *started {
            return;
        }
        *started = true;

        let pid = self.pid;
        let exit = Arc::clone(&self.exit);
        std::thread::spawn(move || {
            #[cfg(target_os = "macos")]
            {
                loop {
                    if let Some(code) = reap(pid) {
                        exit.set(code);
                        return;
                    }
                    std::thread::sleep(WAIT_POLL_INTERVAL);
                }
            }
            #[cfg(not(target_os = "macos"))]
            {
                let mut status: libc::c_int = 0;
                let reaped = unsafe { libc::waitpid(pid, &mut status, 0) };
                if reaped == pid {
                    exit.set(ExitCode::from_wait_status(status));
                }
            }
        });
    }

    pub fn pid(&self) -> i32 {
        self.pid as i32
    }

    pub fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        let dup = unsafe { libc::dup(self.master_fd) };
        if dup < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(Box::new(PtyReader { fd: dup }))
    }

    pub fn take_writer(&self) -> Result<Box<dyn Write + Send>> {
        let mut took = self.took_writer.lock().expect("writer flag poisoned");
        if *took {
            return Err(Error::AlreadyDisposed);
        }
        let dup = unsafe { libc::dup(self.master_fd) };
        if dup < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        *took = true;
        Ok(Box::new(PtyWriter { fd: dup }))
    }

    #[instrument(skip(self))]
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        if super::shim::pty_resize(self.master_fd, rows, cols) != 0 {
            return Err(Error::ResizeFailed(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Sends `SIGHUP` to the process group, waits up to [`GRACE_PERIOD`],
    /// then `SIGKILL`s the group if it hasn't exited. Targeting the group
    /// (negated pid) rather than the single pid catches grandchildren a
    /// shell itself spawned, per spec.md §4.2/§9.
    #[instrument(skip(self))]
    pub fn kill(&self) -> Result<()> {
        if self.exit.get().is_some() {
            return Ok(());
        }
        debug!(pid = self.pid, "sending SIGHUP to process group");
        if super::shim::pty_kill(-self.pid, libc::SIGHUP) != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(Error::Io(err));
            }
        }

        if self.exit.wait(Some(GRACE_PERIOD)).is_some() {
            return Ok(());
        }

        warn!(pid = self.pid, "process group did not exit after SIGHUP, sending SIGKILL");
        if super::shim::pty_kill(-self.pid, libc::SIGKILL) != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(Error::Io(err));
            }
        }
        Ok(())
    }

    pub fn wait_for_exit(&self, timeout: Option<Duration>) -> Option<ExitCode> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            if let Some(code) = self.exit.get() {
                return Some(code);
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return None;
                    }
                    Some(d - now)
                }
                None => None,
            };
            if let Some(code) = self.exit.wait(remaining) {
                return Some(code);
            }
            if timeout.is_some() && Instant::now() >= deadline.unwrap() {
                return None;
            }
        }
    }

    pub fn exit_code(&self) -> Option<ExitCode> {
        self.exit.get()
    }

    #[cfg(feature = "async-tokio")]
    pub(crate) fn exit_waiter(&self) -> Arc<dyn ExitWaiter> {
        Arc::clone(&self.exit) as Arc<dyn ExitWaiter>
    }
}

impl Drop for UnixConnection {
    fn drop(&mut self) {
        trace!(pid = self.pid, "dropping unix connection, closing master fd");
        close_fd(self.master_fd);
    }
}

struct PtyReader {
    fd: RawFd,
}

impl Read for PtyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            // EIO means the slave side closed; treat it as EOF, matching
            // portable-pty's own PtyFd::read.
            if err.raw_os_error() == Some(libc::EIO) {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(n as usize)
    }
}

impl Drop for PtyReader {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

struct PtyWriter {
    fd: RawFd,
}

impl Write for PtyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::write(self.fd, buf.as_ptr() as *const _, buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PtyWriter {
    fn drop(&mut self) {
        // Send EOF on close, same rationale as portable-pty's
        // UnixMasterWriter: EOF is only interpreted after a newline.
        let mut t: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(self.fd, &mut t) } == 0 {
            let eot = t.c_cc[libc::VEOF];
            if eot != 0 {
                let bytes = [b'\n', eot];
                unsafe {
                    libc::write(self.fd, bytes.as_ptr() as *const _, bytes.len());
                }
            }
        }
        unsafe { libc::close(self.fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SpawnOptions;
    use crate::unix::provider::UnixPtyProvider;
    use std::ffi::OsString;

    fn opts(app: &str, args: &[&str]) -> SpawnOptions {
        let mut o = SpawnOptions::new(app, "/tmp");
        o.command_line = args.iter().map(OsString::from).collect();
        o
    }

    #[test]
    #[tracing_test::traced_test]
    fn spawn_true_and_wait_reports_success() {
        let provider = UnixPtyProvider;
        let conn = provider.spawn(&opts("/bin/sh", &["-c", "exit 0"])).unwrap();
        let code = conn
            .wait_for_exit(Some(Duration::from_secs(5)))
            .expect("child should have exited within timeout");
        assert!(code.success());
    }

    #[test]
    fn spawn_false_reports_nonzero_exit() {
        let provider = UnixPtyProvider;
        let conn = provider.spawn(&opts("/bin/sh", &["-c", "exit 3"])).unwrap();
        let code = conn
            .wait_for_exit(Some(Duration::from_secs(5)))
            .expect("child should have exited within timeout");
        assert_eq!(code.code(), 3);
    }

    #[test]
    fn kill_terminates_a_long_running_child() {
        let provider = UnixPtyProvider;
        let conn = provider.spawn(&opts("/bin/sh", &["-c", "sleep 30"])).unwrap();
        conn.kill().unwrap();
        let code = conn
            .wait_for_exit(Some(Duration::from_secs(5)))
            .expect("child should have exited after kill");
        assert!(!code.success());
    }

    #[test]
    fn resize_succeeds_on_a_live_pty() {
        let provider = UnixPtyProvider;
        let conn = provider.spawn(&opts("/bin/sh", &["-c", "sleep 1"])).unwrap();
        assert!(conn.resize(100, 40).is_ok());
        conn.kill().unwrap();
    }
}
