use std::io;

use crate::VmAddress;

/// Failures reported by [`ProcessMemory`](crate::ProcessMemory).
///
/// Callers that only need success or failure can treat every variant alike;
/// the variants exist for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not open the target process for memory inspection")]
    Initialize(#[source] io::Error),

    /// Some chunk of the requested range could not be copied: unmapped, not
    /// readable, or the target is gone.
    #[error("could not read {length} bytes at {address:#x} from the target process")]
    Read {
        address: VmAddress,
        length: usize,
        #[source]
        source: io::Error,
    },

    #[error("range of {length} bytes at {address:#x} wraps the address space")]
    AddressOverflow { address: VmAddress, length: usize },

    /// A string read ran out of budget (or address space) before a NUL byte.
    /// `scanned` is how many bytes were read and found non-zero.
    #[error("no NUL terminator in the {scanned} bytes scanned at {address:#x}")]
    TerminatorNotFound { address: VmAddress, scanned: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
