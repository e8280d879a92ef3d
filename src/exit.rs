//! Exit status decoding, shared between the Unix and Windows connections.

use std::time::Duration;

/// Common interface over each backend's `Mutex`+`Condvar`-backed exit
/// watcher, so the async facade in `connection.rs` can wait on either one
/// through an `Arc<dyn ExitWaiter>` instead of matching on the platform
/// enum and reaching for unsafe lifetime tricks.
pub(crate) trait ExitWaiter: Send + Sync {
    fn get(&self) -> Option<ExitCode>;
    fn wait(&self, timeout: Option<Duration>) -> Option<ExitCode>;
}

/// The outcome of a spawned child, as delivered through `exit_code()` and
/// the `exited` event.
///
/// On Unix this decodes `WEXITSTATUS`/`WTERMSIG`; on Windows it is simply
/// the value `GetExitCodeProcess` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode {
    code: i32,
    signal: Option<i32>,
}

impl ExitCode {
    pub fn from_code(code: i32) -> Self {
        ExitCode { code, signal: None }
    }

    #[cfg(unix)]
    pub fn from_wait_status(status: i32) -> Self {
        if libc::WIFSIGNALED(status) {
            ExitCode {
                code: 128 + libc::WTERMSIG(status),
                signal: Some(libc::WTERMSIG(status)),
            }
        } else {
            ExitCode {
                code: libc::WEXITSTATUS(status),
                signal: None,
            }
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    pub fn success(&self) -> bool {
        self.signal.is_none() && self.code == 0
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.signal {
            Some(sig) => write!(f, "terminated by signal {sig}"),
            None => write!(f, "exited with code {}", self.code),
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;

    #[test]
    fn decodes_normal_exit() {
        // WIFEXITED status for exit code 7 is (7 << 8).
        let status = 7 << 8;
        let exit = ExitCode::from_wait_status(status);
        assert_eq!(exit.code(), 7);
        assert_eq!(exit.signal(), None);
        assert!(!exit.success());
    }

    #[test]
    fn decodes_success() {
        let exit = ExitCode::from_wait_status(0);
        assert!(exit.success());
    }

    #[test]
    fn decodes_signal_termination() {
        // WIFSIGNALED status for SIGKILL (9) is just the signal number.
        let status = 9;
        let exit = ExitCode::from_wait_status(status);
        assert_eq!(exit.signal(), Some(9));
        assert!(!exit.success());
    }
}
