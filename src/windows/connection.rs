//! `WindowsConnection` — the reader/writer/lifecycle handle returned by
//! [`WindowsPtyProvider::spawn`](super::provider::WindowsPtyProvider::spawn).
//!
//! The teacher's `turborepo_process::child::ChildHandle` tears resources
//! down implicitly, through field drop order. spec.md §9 asks for that
//! ordering to be explicit instead — closing the pseudoconsole only after
//! the pipes and handles it feeds are also gone would orphan `conhost`, so
//! disposal is written as a one-way state machine that cannot skip a step.

use std::io::{self, Read, Write};
use std::os::windows::io::{FromRawHandle, OwnedHandle};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace, warn};
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows_sys::Win32::System::Threading::{
    GetExitCodeProcess, TerminateProcess, WaitForSingleObject,
};

use crate::error::{Error, Result};
use crate::exit::{ExitCode, ExitWaiter};

use super::job_object::JobObject;
use super::psuedocon::PsuedoCon;

/// Disposal proceeds strictly forward; there is no transition that skips a
/// step, matching spec.md §9's explicit ordering requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisposalState {
    Running,
    PseudoConsoleClosed,
    PipesClosed,
    ProcessHandlesClosed,
    JobClosed,
    Disposed,
}

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
                    .wait_while(guard, |c| c.is_none())
                    .expect("exit watcher mutex poisoned");
                *guard
            }
            Some(t) => {
                let (guard, _) = self
                    .cond
                    .wait_timeout_while(guard, t, |c| c.is_none())
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

/// Raw handle wrapper: `HANDLE` is not `Send`/`Sync` by default in
/// `windows-sys`, but ownership genuinely does move between the spawning
/// thread and the background wait thread here, same rationale as
/// `turborepo_process::job_object::JobObject`'s `unsafe impl Send`.
struct SendHandle(HANDLE);
unsafe impl Send for SendHandle {}

pub struct WindowsConnection {
    pid: u32,
    process_handle: Mutex<Option<HANDLE>>,
    pseudo_con: Mutex<Option<PsuedoCon>>,
    job: Mutex<Option<JobObject>>,
    input_write: Mutex<Option<OwnedHandle>>,
    output_read: Mutex<Option<OwnedHandle>>,
    state: Mutex<DisposalState>,
    exit: Arc<ExitWatcher>,
}

impl WindowsConnection {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        pid: u32,
        process_handle: HANDLE,
        pseudo_con: PsuedoCon,
        job: JobObject,
        input_write: OwnedHandle,
        output_read: OwnedHandle,
    ) -> Self {
        let conn = WindowsConnection {
            pid,
            process_handle: Mutex::new(Some(process_handle)),
            pseudo_con: Mutex::new(Some(pseudo_con)),
            job: Mutex::new(Some(job)),
            input_write: Mutex::new(Some(input_write)),
            output_read: Mutex::new(Some(output_read)),
            state: Mutex::new(DisposalState::Running),
            exit: Arc::new(ExitWatcher::new()),
        };
        conn.spawn_wait_thread(process_handle);
        conn
    }

    fn spawn_wait_thread(&self, process_handle: HANDLE) {
        let handle = SendHandle(process_handle);
        let exit = Arc::clone(&self.exit);
        std::thread::spawn(move || {
            let handle = handle;
            unsafe {
                WaitForSingleObject(handle.0, u32::MAX);
                let mut code: u32 = 0;
                if GetExitCodeProcess(handle.0, &mut code) != 0 {
                    exit.set(ExitCode::from_code(code as i32));
                }
            }
        });
    }

    pub fn pid(&self) -> i32 {
        self.pid as i32
    }

    pub fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        let guard = self.output_read.lock().expect("output_read poisoned");
        let handle = guard.as_ref().ok_or(Error::AlreadyDisposed)?;
        let dup = duplicate_handle(handle)?;
        Ok(Box::new(PipeReader { handle: dup }))
    }

    pub fn take_writer(&self) -> Result<Box<dyn Write + Send>> {
        let mut guard = self.input_write.lock().expect("input_write poisoned");
        let handle = guard.take().ok_or(Error::AlreadyDisposed)?;
        Ok(Box::new(PipeWriter { handle }))
    }

    #[instrument(skip(self))]
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let guard = self.pseudo_con.lock().expect("pseudo_con poisoned");
        match guard.as_ref() {
            Some(con) => con.resize(cols as i16, rows as i16),
            None => Err(Error::AlreadyDisposed),
        }
    }

    #[instrument(skip(self))]
    pub fn kill(&self) -> Result<()> {
        if self.exit.get().is_some() {
            return Ok(());
        }
        let guard = self.process_handle.lock().expect("process_handle poisoned");
        match guard.as_ref() {
            Some(handle) => {
                debug!(pid = self.pid, "terminating windows process tree via job object");
                if unsafe { TerminateProcess(*handle, 1) } == 0 {
                    return Err(Error::Io(io::Error::last_os_error()));
                }
                Ok(())
            }
            None => Ok(()),
        }
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

    /// Runs the disposal ordering spec.md §9 prescribes:
    /// `PseudoConsole -> Pipes -> ProcessHandles -> Job -> Disposed`. Each
    /// step only runs once; calling twice is a no-op on the later steps.
    #[instrument(skip(self))]
    fn dispose(&self) {
        let mut state = self.state.lock().expect("disposal state poisoned");
        if *state == DisposalState::Disposed {
            return;
        }

        if *state == DisposalState::Running {
            if let Some(mut con) = self.pseudo_con.lock().expect("pseudo_con poisoned").take() {
                trace!(pid = self.pid, "closing pseudoconsole");
                con.close();
            }
            *state = DisposalState::PseudoConsoleClosed;
        }

        if *state == DisposalState::PseudoConsoleClosed {
            self.input_write.lock().expect("input_write poisoned").take();
            self.output_read.lock().expect("output_read poisoned").take();
            *state = DisposalState::PipesClosed;
        }

        if *state == DisposalState::PipesClosed {
            if let Some(handle) = self
                .process_handle
                .lock()
                .expect("process_handle poisoned")
                .take()
            {
                unsafe { CloseHandle(handle) };
            }
            *state = DisposalState::ProcessHandlesClosed;
        }

        if *state == DisposalState::ProcessHandlesClosed {
            if let Some(job) = self.job.lock().expect("job poisoned").take() {
                trace!(pid = self.pid, "closing job object, killing any stragglers");
                drop(job);
            } else {
                warn!(pid = self.pid, "disposing connection with no job object present");
            }
            *state = DisposalState::JobClosed;
        }

        *state = DisposalState::Disposed;
    }
}

impl Drop for WindowsConnection {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn duplicate_handle(handle: &OwnedHandle) -> Result<OwnedHandle> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::DUPLICATE_SAME_ACCESS;
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    let mut dup: HANDLE = std::ptr::null_mut();
    let process = unsafe { GetCurrentProcess() };
    let ok = unsafe {
        windows_sys::Win32::Foundation::DuplicateHandle(
            process,
            handle.as_raw_handle() as HANDLE,
            process,
            &mut dup,
            0,
            0,
            DUPLICATE_SAME_ACCESS,
        )
    };
    if ok == 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(unsafe { OwnedHandle::from_raw_handle(dup as _) })
}

struct PipeReader {
    handle: OwnedHandle,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Storage::FileSystem::ReadFile;

        let mut read: u32 = 0;
        let ok = unsafe {
            ReadFile(
                self.handle.as_raw_handle() as HANDLE,
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut read,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            let err = io::Error::last_os_error();
            // ERROR_BROKEN_PIPE: the child side (and conhost) went away.
            if err.raw_os_error() == Some(109) {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(read as usize)
    }
}

struct PipeWriter {
    handle: OwnedHandle,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Storage::FileSystem::WriteFile;

        let mut written: u32 = 0;
        let ok = unsafe {
            WriteFile(
                self.handle.as_raw_handle() as HANDLE,
                buf.as_ptr(),
                buf.len() as u32,
                &mut written,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(written as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
