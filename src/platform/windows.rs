use std::ffi::c_void;
use std::io;
use std::mem;
use std::os::windows::io::AsRawHandle;
use std::process::Child;

use windows_sys::Win32::Foundation::{CloseHandle, FALSE, HANDLE};
use windows_sys::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
use windows_sys::Win32::System::Threading::{
    GetCurrentProcess, OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
};

use crate::{native_address, TryIntoProcessHandle, VmAddress};

pub type Pid = u32;
pub type ProcessHandle = HANDLE;

/// `DWORD` can be turned into a `HANDLE` with `OpenProcess`.
impl TryIntoProcessHandle for u32 {
    fn try_into_process_handle(self) -> io::Result<ProcessHandle> {
        let handle = unsafe { OpenProcess(PROCESS_VM_READ | PROCESS_QUERY_INFORMATION, FALSE, self) };
        if handle == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(handle)
        }
    }

    fn opens_handle(&self) -> bool {
        true
    }
}

impl<'a> TryIntoProcessHandle for &'a Child {
    fn try_into_process_handle(self) -> io::Result<ProcessHandle> {
        Ok(self.as_raw_handle() as ProcessHandle)
    }
}

/// `OpenProcess` already asked for `PROCESS_VM_READ`.
pub fn check_access(_handle: ProcessHandle) -> io::Result<()> {
    Ok(())
}

pub fn close_handle(handle: ProcessHandle) {
    if unsafe { CloseHandle(handle) } == FALSE {
        warn!("CloseHandle({:?}) failed: {}", handle, io::Error::last_os_error());
    }
}

pub fn current_process() -> ProcessHandle {
    unsafe { GetCurrentProcess() }
}

pub fn page_size() -> usize {
    let mut info: SYSTEM_INFO = unsafe { mem::zeroed() };
    unsafe { GetSystemInfo(&mut info) };
    if info.dwPageSize == 0 {
        4096
    } else {
        info.dwPageSize as usize
    }
}

pub fn copy_address(handle: ProcessHandle, addr: VmAddress, buf: &mut [u8]) -> io::Result<()> {
    if buf.is_empty() {
        return Ok(());
    }

    let mut read_len: usize = 0;
    if unsafe {
        ReadProcessMemory(
            handle,
            native_address(addr)? as *const c_void,
            buf.as_mut_ptr() as *mut c_void,
            buf.len(),
            &mut read_len,
        )
    } == FALSE
    {
        return Err(io::Error::last_os_error());
    }

    if read_len != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short read at {:#x}: {} of {} bytes", addr, read_len, buf.len()),
        ));
    }

    Ok(())
}
