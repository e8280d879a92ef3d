//! `SpawnOptions` — the public configuration surface.
//!
//! This struct and the validation it performs sit outside the core PTY
//! lifecycle machinery (the facade that picks a platform provider is the
//! only consumer), so it stays a plain data holder: no builder macros, no
//! derive-heavy config crate, just the fields the design names and the
//! synchronous validation spec'd for `InvalidArguments`.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Window size, in character cells. Both dimensions must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for PtySize {
    fn default() -> Self {
        PtySize { cols: 80, rows: 24 }
    }
}

/// Input to a platform provider's spawn call.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Absolute path, or a bare name resolved via `PATH`.
    pub app: OsString,
    /// Working directory for the child; must be absolute and non-empty.
    pub cwd: PathBuf,
    pub size: PtySize,
    /// Ordered argument list; argv[0] is derived from `app`, not repeated
    /// here.
    pub command_line: Vec<OsString>,
    /// name -> value. An empty value means "unset this variable in the
    /// child's environment" rather than "set it to empty".
    pub environment: BTreeMap<String, String>,
    /// When set, `command_line` is joined with single spaces and passed to
    /// the child verbatim instead of being quoted per Windows rules.
    pub verbatim_command_line: bool,
    /// Optional diagnostic label; never interpreted by the provider.
    pub name: Option<String>,
}

impl SpawnOptions {
    pub fn new(app: impl Into<OsString>, cwd: impl Into<PathBuf>) -> Self {
        SpawnOptions {
            app: app.into(),
            cwd: cwd.into(),
            size: PtySize::default(),
            command_line: Vec::new(),
            environment: BTreeMap::new(),
            verbatim_command_line: false,
            name: None,
        }
    }

    /// Validate the required fields before any OS resource is touched.
    /// Called by every provider as the very first step of `spawn`.
    pub fn validate(&self) -> Result<()> {
        if self.app.is_empty() {
            return Err(Error::InvalidArguments("app must not be empty".into()));
        }
        if self.cwd.as_os_str().is_empty() {
            return Err(Error::InvalidArguments("cwd must not be empty".into()));
        }
        if !self.cwd.is_absolute() {
            return Err(Error::InvalidArguments(format!(
                "cwd must be absolute, got {:?}",
                self.cwd
            )));
        }
        if self.size.cols == 0 || self.size.rows == 0 {
            return Err(Error::InvalidArguments(
                "cols and rows must both be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_app() {
        let opts = SpawnOptions::new("", "/tmp");
        assert!(matches!(opts.validate(), Err(Error::InvalidArguments(_))));
    }

    #[test]
    fn rejects_relative_cwd() {
        let opts = SpawnOptions::new("/bin/sh", "relative/path");
        assert!(matches!(opts.validate(), Err(Error::InvalidArguments(_))));
    }

    #[test]
    fn rejects_empty_cwd() {
        let opts = SpawnOptions::new("/bin/sh", "");
        assert!(matches!(opts.validate(), Err(Error::InvalidArguments(_))));
    }

    #[test]
    fn rejects_zero_size() {
        let mut opts = SpawnOptions::new("/bin/sh", "/tmp");
        opts.size = PtySize { cols: 0, rows: 24 };
        assert!(matches!(opts.validate(), Err(Error::InvalidArguments(_))));
    }

    #[test]
    fn accepts_well_formed_options() {
        let opts = SpawnOptions::new("/bin/sh", "/tmp");
        assert!(opts.validate().is_ok());
    }
}
