//! `PROC_THREAD_ATTRIBUTE_LIST` wrapper used to attach a pseudoconsole
//! handle to a `CreateProcessW` call.
//!
//! Not present in the teacher's vendored `portable-pty` source (its
//! `psuedocon.rs` references `crate::win::procthreadattr::ProcThreadAttributeList`
//! but the module itself isn't in the retrieved tree), so this is authored
//! from the documented `InitializeProcThreadAttributeList` /
//! `UpdateProcThreadAttributeList` sequence, using `windows-sys` to match
//! `turborepo-process::job_object`'s binding choice rather than `winapi`.

use std::io;

use windows_sys::Win32::System::Threading::{
    InitializeProcThreadAttributeList, UpdateProcThreadAttributeList,
    DeleteProcThreadAttributeList, LPPROC_THREAD_ATTRIBUTE_LIST,
    PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
};
use windows_sys::Win32::Foundation::HANDLE;

pub struct ProcThreadAttributeList {
    buffer: Vec<u8>,
}

impl ProcThreadAttributeList {
    /// Allocate a list with room for `attribute_count` attributes.
    pub fn with_capacity(attribute_count: u32) -> io::Result<Self> {
        let mut size: usize = 0;
        unsafe {
            // First call with a null list just computes the required size.
            InitializeProcThreadAttributeList(
                std::ptr::null_mut(),
                attribute_count,
                0,
                &mut size,
            );
        }

        let mut buffer = vec![0u8; size];
        let list_ptr = buffer.as_mut_ptr() as LPPROC_THREAD_ATTRIBUTE_LIST;

        let ok = unsafe {
            InitializeProcThreadAttributeList(list_ptr, attribute_count, 0, &mut size)
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(ProcThreadAttributeList { buffer })
    }

    fn list_ptr(&mut self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        self.buffer.as_mut_ptr() as LPPROC_THREAD_ATTRIBUTE_LIST
    }

    /// Attach the pseudoconsole handle so the created process inherits it
    /// as its console.
    pub fn set_pty(&mut self, hpc: HANDLE) -> io::Result<()> {
        let list = self.list_ptr();
        let ok = unsafe {
            UpdateProcThreadAttributeList(
                list,
                0,
                PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE as usize,
                hpc as *const _,
                std::mem::size_of::<HANDLE>(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn as_mut_ptr(&mut self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        self.list_ptr()
    }
}

impl Drop for ProcThreadAttributeList {
    fn drop(&mut self) {
        let list = self.list_ptr();
        unsafe {
            DeleteProcThreadAttributeList(list);
        }
    }
}
