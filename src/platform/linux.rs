use libc::{c_void, iovec, pid_t, process_vm_readv};
use std::fs::File;
use std::io;
use std::process::Child;

use crate::{native_address, TryIntoProcessHandle, VmAddress};

pub type Pid = pid_t;
pub type ProcessHandle = pid_t;

impl<'a> TryIntoProcessHandle for &'a Child {
    fn try_into_process_handle(self) -> io::Result<ProcessHandle> {
        Ok(self.id() as pid_t)
    }
}

/// A pid is only a number; opening `/proc/<pid>/mem` checks that the process
/// exists and that we pass the same ptrace access check `process_vm_readv`
/// will apply.
pub fn check_access(pid: ProcessHandle) -> io::Result<()> {
    if pid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid pid {}", pid),
        ));
    }
    File::open(format!("/proc/{}/mem", pid)).map(drop)
}

/// Pids own nothing.
pub fn close_handle(_pid: ProcessHandle) {}

pub fn current_process() -> ProcessHandle {
    unsafe { libc::getpid() }
}

pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// `process_vm_readv` stops at the first unreadable page and returns the
/// count it managed, so anything short of `buf.len()` is a failure.
pub fn copy_address(pid: ProcessHandle, addr: VmAddress, buf: &mut [u8]) -> io::Result<()> {
    if buf.is_empty() {
        return Ok(());
    }

    let local_iov = iovec {
        iov_base: buf.as_mut_ptr() as *mut c_void,
        iov_len: buf.len(),
    };
    let remote_iov = iovec {
        iov_base: native_address(addr)? as *mut c_void,
        iov_len: buf.len(),
    };
    let result = unsafe { process_vm_readv(pid, &local_iov, 1, &remote_iov, 1, 0) };
    if result == -1 {
        Err(io::Error::last_os_error())
    } else if result as usize != buf.len() {
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short read at {:#x}: {} of {} bytes", addr, result, buf.len()),
        ))
    } else {
        Ok(())
    }
}
