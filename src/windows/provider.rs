//! `WindowsPtyProvider` — the spawn entry point on Windows.
//!
//! Follows the ten steps spec.md §4.3 lays out, in spec order: create the
//! Job Object *first*, then the anonymous stdio pipes, then ConPTY over
//! one end of each, then the quoted command line and environment block,
//! then `CreateProcessW` with the pseudoconsole attribute attached, then
//! immediately assign the new process to the job (grounded directly on
//! `turborepo_process::job_object::JobObject::assign_pid`). Creating the
//! job before `CreateProcessW` (rather than after, as a simpler but
//! spec-violating ordering would do) means any failure past that point
//! can rely on the job — plus the `ProcessGuard` below for the narrow
//! window before the process is actually assigned to it — to make sure a
//! crashed spawn never leaves a running child or `conhost.exe` behind.

use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::ptr;

use tracing::instrument;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::System::Pipes::CreatePipe;
use windows_sys::Win32::System::Threading::TerminateProcess;

use crate::error::{Error, Result};
use crate::options::SpawnOptions;

use super::cmdline::{build_command_line, resolve_executable, wide_nul};
use super::connection::WindowsConnection;
use super::envblock::build_block;
use super::job_object::JobObject;
use super::psuedocon::PsuedoCon;

#[derive(Default)]
pub struct WindowsPtyProvider;

impl WindowsPtyProvider {
    #[instrument(skip(self, opts))]
    pub fn spawn(&self, opts: &SpawnOptions) -> Result<WindowsConnection> {
        opts.validate()?;

        // Step 1: the Job Object, created before anything else exists to
        // assign to it, per spec.md §4.3 step 1.
        let job = JobObject::new().map_err(Error::Io)?;

        // Step 2: two anonymous pipes for ConPTY's stdio.
        let (input_read, input_write) = create_pipe()?;
        let (output_read, output_write) = create_pipe()?;

        // Step 3: create the pseudoconsole over the "child-facing" ends.
        let pseudo_con = PsuedoCon::new(
            opts.size.cols as i16,
            opts.size.rows as i16,
            input_read.as_raw_handle() as HANDLE,
            output_write.as_raw_handle() as HANDLE,
        )?;
        // The pseudoconsole duplicates the handles it needs; the ends we
        // passed in are no longer ours to keep open.
        drop(input_read);
        drop(output_write);

        // Step 4/5: resolve the executable and build the command line.
        let exe = resolve_executable(&opts.app, &opts.cwd)?;
        let exe_wide = wide_nul(&exe);
        let cmdline_wide =
            build_command_line(&exe, &opts.command_line, opts.verbatim_command_line);
        let env_block = build_block(&opts.environment);
        let cwd_wide = Some(wide_nul(opts.cwd.as_os_str()));

        // Step 6: CreateProcessW with the pseudoconsole attribute list. The
        // child is now running but not yet in the job; guard it so a
        // failure in the next step doesn't leak it.
        let (process_handle, pid) =
            pseudo_con.spawn_process(exe_wide, cmdline_wide, env_block, cwd_wide)?;
        let guard = ProcessGuard(process_handle);

        // Step 7: assign the process to the job immediately. On failure
        // the guard's Drop terminates and closes the handle instead of
        // leaving an orphaned child/conhost running outside any job.
        job.assign_pid(pid).map_err(Error::Io)?;
        guard.disarm();

        Ok(WindowsConnection::new(
            pid,
            process_handle,
            pseudo_con,
            job,
            input_write,
            output_read,
        ))
    }
}

/// Kills and closes a just-spawned process handle unless [`disarm`](Self::disarm)
/// is called, so an early return between `CreateProcessW` and the process
/// actually being assigned to the job never leaks a running child.
struct ProcessGuard(HANDLE);

impl ProcessGuard {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        unsafe {
            TerminateProcess(self.0, 1);
            CloseHandle(self.0);
        }
    }
}

fn create_pipe() -> Result<(OwnedHandle, OwnedHandle)> {
    let mut attrs: SECURITY_ATTRIBUTES = unsafe { std::mem::zeroed() };
    attrs.nLength = std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32;
    attrs.bInheritHandle = 1;
    attrs.lpSecurityDescriptor = ptr::null_mut();

    let mut read_handle: HANDLE = ptr::null_mut();
    let mut write_handle: HANDLE = ptr::null_mut();

    let ok = unsafe { CreatePipe(&mut read_handle, &mut write_handle, &attrs, 0) };
    if ok == 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }

    Ok((
        unsafe { OwnedHandle::from_raw_handle(read_handle as _) },
        unsafe { OwnedHandle::from_raw_handle(write_handle as _) },
    ))
}
