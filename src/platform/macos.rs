extern crate mach;

use libc::{c_int, pid_t};
use self::mach::kern_return::{kern_return_t, KERN_SUCCESS};
use self::mach::port::{mach_port_t, mach_port_name_t, MACH_PORT_NULL};
use self::mach::vm_types::{mach_vm_address_t, mach_vm_size_t};
use std::io;

use crate::{TryIntoProcessHandle, VmAddress};

#[allow(non_camel_case_types)] type vm_map_t = mach_port_t;

pub type Pid = pid_t;
pub type ProcessHandle = mach_port_name_t;

extern "C" {
    fn mach_vm_read_overwrite(target_task: vm_map_t, address: mach_vm_address_t, size: mach_vm_size_t, data: mach_vm_address_t, out_size: *mut mach_vm_size_t) -> kern_return_t;
}

fn task_for_pid(pid: pid_t) -> io::Result<mach_port_name_t> {
    let mut task: mach_port_name_t = MACH_PORT_NULL;

    unsafe {
        let result = mach::traps::task_for_pid(mach::traps::mach_task_self(), pid as c_int, &mut task);
        if result != KERN_SUCCESS {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("task_for_pid({}) failed: kern_return_t {}", pid, result),
            ));
        }
    }

    Ok(task)
}

/// `pid_t` can be turned into a `mach_port_name_t` with `task_for_pid`.
impl TryIntoProcessHandle for pid_t {
    fn try_into_process_handle(self) -> io::Result<ProcessHandle> {
        task_for_pid(self)
    }

    fn opens_handle(&self) -> bool {
        true
    }
}

impl<'a> TryIntoProcessHandle for &'a std::process::Child {
    fn try_into_process_handle(self) -> io::Result<ProcessHandle> {
        task_for_pid(self.id() as pid_t)
    }

    fn opens_handle(&self) -> bool {
        true
    }
}

/// `task_for_pid` already refused anything we cannot read.
pub fn check_access(_task: ProcessHandle) -> io::Result<()> {
    Ok(())
}

pub fn close_handle(task: ProcessHandle) {
    let result = unsafe { mach::mach_port::mach_port_deallocate(mach::traps::mach_task_self(), task) };
    if result != KERN_SUCCESS {
        warn!("mach_port_deallocate({}) failed: kern_return_t {}", task, result);
    }
}

pub fn current_process() -> ProcessHandle {
    unsafe { mach::traps::mach_task_self() }
}

pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// Copies straight into `buf`; the kernel reports how much it wrote.
pub fn copy_address(task: ProcessHandle, addr: VmAddress, buf: &mut [u8]) -> io::Result<()> {
    if buf.is_empty() {
        return Ok(());
    }

    let mut read_len: mach_vm_size_t = 0;
    let result = unsafe {
        mach_vm_read_overwrite(
            task,
            addr as mach_vm_address_t,
            buf.len() as mach_vm_size_t,
            buf.as_mut_ptr() as usize as mach_vm_address_t,
            &mut read_len,
        )
    };

    if result != KERN_SUCCESS {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("mach_vm_read_overwrite at {:#x} failed: kern_return_t {}", addr, result),
        ));
    }

    if read_len != buf.len() as mach_vm_size_t {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short read at {:#x}: {} of {} bytes", addr, read_len, buf.len()),
        ));
    }

    Ok(())
}
