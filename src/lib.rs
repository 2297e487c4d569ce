//! Read memory from another process (or from the calling process) for crash
//! diagnostics.
//!
//! A target is bound once, through [`Process::new`] for another process or
//! [`CurrentProcess::new`] for the caller, and then wrapped in a
//! [`ProcessMemory`], which splits every request into page-sized chunks so that
//! a read either copies the whole range or fails.
//!
//! ```no_run
//! use process_memory_reader::{Pid, ProcessMemory};
//!
//! # fn main() -> Result<(), process_memory_reader::Error> {
//! let memory = ProcessMemory::initialize(1234 as Pid)?;
//! let header = memory.read_to_vec(0x7f00_0000_0000, 64)?;
//! let name = memory.read_c_string_size_limited(0x7f00_0000_1000, 256)?;
//! # let _ = (header, name);
//! # Ok(())
//! # }
//! ```

#[macro_use] extern crate log;
extern crate libc;

use std::io;

mod error;
mod memory;

pub use error::{Error, Result};
pub use memory::ProcessMemory;

/// A numeric address in the target's address space.
///
/// Always 64 bits wide so a 32-bit reader can describe a 64-bit target; it is
/// never dereferenced in the reader's own address space.
pub type VmAddress = u64;

/// The single-shot read primitive of a bound target.
///
/// Implementations copy exactly `buf.len()` bytes starting at `addr` or fail.
/// A short transfer is a failure. Callers keep each request within one chunk
/// (see [`ProcessMemory`]), so implementations never need to handle spans
/// larger than a page, but they must not crash on unmapped addresses.
pub trait CopyAddress {
    fn copy_address(&self, addr: VmAddress, buf: &mut [u8]) -> io::Result<()>;
}

impl<'a, T: CopyAddress + ?Sized> CopyAddress for &'a T {
    fn copy_address(&self, addr: VmAddress, buf: &mut [u8]) -> io::Result<()> {
        (**self).copy_address(addr, buf)
    }
}

// This should be dropped in favor of TryInto when that stabilizes:
// https://github.com/rust-lang/rust/issues/33417
pub trait TryIntoProcessHandle {
    fn try_into_process_handle(self) -> io::Result<platform::ProcessHandle>;

    /// Whether `try_into_process_handle` opens a new handle that the
    /// resulting `Process` must release.
    fn opens_handle(&self) -> bool {
        false
    }
}

/// Trivial implementation of `TryIntoProcessHandle`.
impl TryIntoProcessHandle for platform::ProcessHandle {
    fn try_into_process_handle(self) -> io::Result<platform::ProcessHandle> {
        Ok(self)
    }
}

/// Another process, reached through a platform handle.
#[derive(Debug)]
pub struct Process {
    handle: platform::ProcessHandle,
    owned: bool,
}

pub use platform::{Pid, ProcessHandle};

impl Process {
    /// Binds to `process`. Fails if the handle is invalid or the process
    /// cannot be opened for memory inspection.
    ///
    /// A handle opened here (from a pid, say) is released when the `Process`
    /// is dropped; one passed in by the caller is left alone.
    pub fn new<T>(process: T) -> io::Result<Process> where T: TryIntoProcessHandle {
        let owned = process.opens_handle();
        let process = Process {
            handle: process.try_into_process_handle()?,
            owned,
        };
        platform::check_access(process.handle)?;
        Ok(process)
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.owned {
            platform::close_handle(self.handle);
        }
    }
}

impl CopyAddress for Process {
    fn copy_address(&self, addr: VmAddress, buf: &mut [u8]) -> io::Result<()> {
        platform::copy_address(self.handle, addr, buf)
    }
}

/// The calling process.
///
/// Reads still go through the OS primitive rather than through a pointer
/// dereference, so an unmapped address is reported as an error instead of
/// faulting.
#[derive(Debug)]
pub struct CurrentProcess {
    handle: platform::ProcessHandle,
}

impl CurrentProcess {
    pub fn new() -> CurrentProcess {
        CurrentProcess {
            handle: platform::current_process(),
        }
    }
}

impl Default for CurrentProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyAddress for CurrentProcess {
    fn copy_address(&self, addr: VmAddress, buf: &mut [u8]) -> io::Result<()> {
        platform::copy_address(self.handle, addr, buf)
    }
}

/// The OS page size, the default chunk size of [`ProcessMemory`].
pub fn page_size() -> usize {
    platform::page_size()
}

/// Converts `addr` to a native pointer-sized value, failing if the reader
/// cannot express it.
#[cfg_attr(target_os = "macos", allow(dead_code))]
fn native_address(addr: VmAddress) -> io::Result<usize> {
    usize::try_from(addr).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("address {:#x} does not fit in this process's pointer width", addr),
        )
    })
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[path = "platform/linux.rs"]
mod platform;

#[cfg(target_os = "macos")]
#[path = "platform/macos.rs"]
mod platform;

#[cfg(windows)]
#[path = "platform/windows.rs"]
mod platform;
