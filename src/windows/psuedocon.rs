//! `PsuedoCon` — owns a ConPTY handle (`HPCON`) and the child process it
//! was used to spawn.
//!
//! Grounded on `portable-pty::win::psuedocon::PsuedoCon`: the flag choice
//! (`PSEUDOCONSOLE_RESIZE_QUIRK | PSEUDOCONSOLE_WIN32_INPUT_MODE`, and the
//! explicit omission of `PSUEDOCONSOLE_INHERIT_CURSOR` because this crate,
//! like the teacher, pipes PTY output verbatim rather than answering
//! Device Status Report escape sequences) and the `STARTUPINFOEXW`
//! construction are carried over almost verbatim. Two things change: the
//! binding is `windows-sys` (linked directly against `kernel32.dll`,
//! rather than the teacher's vendored `winapi` + runtime `GetProcAddress`
//! shim — modern Windows SDKs export `CreatePseudoConsole` statically, so
//! the dynamic-load dance isn't needed), and `spawn_command` takes the
//! already-built command line/environment block from
//! [`super::cmdline`]/[`super::envblock`] instead of `CommandBuilder`.

use std::io;
use std::mem;
use std::ptr;

use tracing::instrument;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::Console::{
    ClosePseudoConsole, CreatePseudoConsole, ResizePseudoConsole, COORD, HPCON,
};
use windows_sys::Win32::System::Threading::{
    CreateProcessW, EXTENDED_STARTUPINFO_PRESENT, PROCESS_INFORMATION, STARTF_USESTDHANDLES,
    STARTUPINFOEXW,
};
use windows_sys::Win32::System::WindowsProgramming::CREATE_UNICODE_ENVIRONMENT;

use crate::error::{Error, Result};

use super::procthreadattr::ProcThreadAttributeList;

const PSEUDOCONSOLE_RESIZE_QUIRK: u32 = 0x2;
const PSEUDOCONSOLE_WIN32_INPUT_MODE: u32 = 0x4;

pub struct PsuedoCon {
    con: HPCON,
}

unsafe impl Send for PsuedoCon {}
unsafe impl Sync for PsuedoCon {}

impl Drop for PsuedoCon {
    fn drop(&mut self) {
        unsafe { ClosePseudoConsole(self.con) };
    }
}

impl PsuedoCon {
    #[instrument(skip(input, output))]
    pub fn new(cols: i16, rows: i16, input: HANDLE, output: HANDLE) -> Result<Self> {
        let size = COORD { X: cols, Y: rows };
        let mut con: HPCON = INVALID_HANDLE_VALUE;
        let result = unsafe {
            CreatePseudoConsole(
                size,
                input,
                output,
                PSEUDOCONSOLE_RESIZE_QUIRK | PSEUDOCONSOLE_WIN32_INPUT_MODE,
                &mut con,
            )
        };
        if result != 0 {
            return Err(Error::PseudoConsoleFailed { hresult: result });
        }
        Ok(Self { con })
    }

    pub fn resize(&self, cols: i16, rows: i16) -> Result<()> {
        let size = COORD { X: cols, Y: rows };
        let result = unsafe { ResizePseudoConsole(self.con, size) };
        if result != 0 {
            return Err(Error::PseudoConsoleFailed { hresult: result });
        }
        Ok(())
    }

    /// Used by the connection's disposal state machine: ConPTY must be
    /// closed before the child's stdio pipes are, per spec.md §9.
    pub fn close(&mut self) {
        if self.con != INVALID_HANDLE_VALUE {
            unsafe { ClosePseudoConsole(self.con) };
            self.con = INVALID_HANDLE_VALUE;
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn spawn_process(
        &self,
        mut exe: Vec<u16>,
        mut cmdline: Vec<u16>,
        mut env_block: Vec<u16>,
        mut cwd: Option<Vec<u16>>,
    ) -> Result<(HANDLE, u32)> {
        let mut si: STARTUPINFOEXW = unsafe { mem::zeroed() };
        si.StartupInfo.cb = mem::size_of::<STARTUPINFOEXW>() as u32;
        si.StartupInfo.dwFlags = STARTF_USESTDHANDLES;
        si.StartupInfo.hStdInput = INVALID_HANDLE_VALUE;
        si.StartupInfo.hStdOutput = INVALID_HANDLE_VALUE;
        si.StartupInfo.hStdError = INVALID_HANDLE_VALUE;

        let mut attrs = ProcThreadAttributeList::with_capacity(1)
            .map_err(|e| Error::PseudoConsoleFailed { hresult: e.raw_os_error().unwrap_or(-1) })?;
        attrs
            .set_pty(self.con)
            .map_err(|e| Error::PseudoConsoleFailed { hresult: e.raw_os_error().unwrap_or(-1) })?;
        si.lpAttributeList = attrs.as_mut_ptr();

        let mut pi: PROCESS_INFORMATION = unsafe { mem::zeroed() };

        let cwd_ptr = cwd
            .as_mut()
            .map(|w| w.as_mut_ptr())
            .unwrap_or(ptr::null_mut());

        let res = unsafe {
            CreateProcessW(
                exe.as_mut_ptr(),
                cmdline.as_mut_ptr(),
                ptr::null(),
                ptr::null(),
                0,
                EXTENDED_STARTUPINFO_PRESENT | CREATE_UNICODE_ENVIRONMENT,
                env_block.as_mut_ptr() as *mut _,
                cwd_ptr,
                &mut si.StartupInfo,
                &mut pi,
            )
        };

        if res == 0 {
            let err = io::Error::last_os_error();
            return Err(Error::spawn_failed(
                err.raw_os_error().unwrap_or(-1),
                "CreateProcessW failed",
            ));
        }

        unsafe { CloseHandle(pi.hThread) };

        Ok((pi.hProcess, pi.dwProcessId))
    }
}
