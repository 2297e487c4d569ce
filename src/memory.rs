use std::num::NonZeroUsize;

use crate::error::{Error, Result};
use crate::{page_size, CopyAddress, Process, TryIntoProcessHandle, VmAddress};

/// All-or-nothing reads from a bound target.
///
/// Every request is split at multiples of the chunk size (the page size by
/// default) and each piece goes to [`CopyAddress::copy_address`] on its own,
/// in increasing address order. No piece ever crosses a chunk boundary, so
/// the source only has to be atomic within one chunk.
///
/// Nothing is cached between calls and no locking is added: sharing a
/// `ProcessMemory` across threads is exactly as safe as sharing `T`.
#[derive(Debug)]
pub struct ProcessMemory<T> {
    source: T,
    chunk_size: usize,
}

impl ProcessMemory<Process> {
    /// Binds a reader to another process.
    pub fn initialize<H>(handle: H) -> Result<ProcessMemory<Process>>
    where
        H: TryIntoProcessHandle,
    {
        let process = Process::new(handle).map_err(Error::Initialize)?;
        Ok(ProcessMemory::new(process))
    }
}

impl<T: CopyAddress> ProcessMemory<T> {
    pub fn new(source: T) -> ProcessMemory<T> {
        ProcessMemory {
            source,
            chunk_size: page_size().max(1),
        }
    }

    /// Any chunk size works; one that is not a divisor of the page size just
    /// means some chunks span two pages and rely on the source for that.
    pub fn with_chunk_size(source: T, chunk_size: NonZeroUsize) -> ProcessMemory<T> {
        ProcessMemory {
            source,
            chunk_size: chunk_size.get(),
        }
    }

    pub fn source(&self) -> &T {
        &self.source
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Fills `buf` with the bytes at `[address, address + buf.len())`.
    ///
    /// An empty `buf` succeeds without reading anything, whatever `address`
    /// is. On failure the contents of `buf` are unspecified.
    pub fn read(&self, address: VmAddress, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        debug!("read: addr: {:x}, len: {}", address, buf.len());

        // The last byte may be u64::MAX itself.
        if address.checked_add(buf.len() as u64 - 1).is_none() {
            return Err(Error::AddressOverflow {
                address,
                length: buf.len(),
            });
        }

        let mut offset = 0;
        for (chunk_address, len) in self.chunks(address, buf.len()) {
            self.copy_chunk(chunk_address, &mut buf[offset..offset + len])?;
            offset += len;
        }
        Ok(())
    }

    pub fn read_to_vec(&self, address: VmAddress, length: usize) -> Result<Vec<u8>> {
        let mut copy = vec![0; length];
        self.read(address, &mut copy)?;
        Ok(copy)
    }

    /// Reads the NUL-terminated string at `address`, without the terminator.
    ///
    /// Fails if any chunk before the terminator is unreadable; a string that
    /// runs into unmapped memory is never returned truncated.
    pub fn read_c_string(&self, address: VmAddress) -> Result<Vec<u8>> {
        debug!("read_c_string: addr: {:x}", address);
        self.scan_c_string(address, usize::MAX)
    }

    /// Like [`read_c_string`](Self::read_c_string), but the terminator must
    /// lie within the first `max_size` bytes. At most `max_size` bytes are
    /// requested from the target, so `max_size == 0` always fails.
    pub fn read_c_string_size_limited(&self, address: VmAddress, max_size: usize) -> Result<Vec<u8>> {
        debug!("read_c_string_size_limited: addr: {:x}, max: {}", address, max_size);
        self.scan_c_string(address, max_size)
    }

    fn scan_c_string(&self, address: VmAddress, max_size: usize) -> Result<Vec<u8>> {
        let mut string = Vec::new();
        let mut chunk = vec![0u8; self.chunk_size.min(max_size)];

        for (chunk_address, len) in self.chunks(address, max_size) {
            let chunk = &mut chunk[..len];
            self.copy_chunk(chunk_address, chunk)?;
            match chunk.iter().position(|&b| b == 0) {
                Some(end) => {
                    string.extend_from_slice(&chunk[..end]);
                    return Ok(string);
                }
                None => string.extend_from_slice(chunk),
            }
        }

        Err(Error::TerminatorNotFound {
            address,
            scanned: string.len(),
        })
    }

    fn copy_chunk(&self, address: VmAddress, buf: &mut [u8]) -> Result<()> {
        trace!("copy_chunk: addr: {:x}, len: {}", address, buf.len());
        self.source.copy_address(address, buf).map_err(|e| {
            warn!("copy_address failed for {:x}: {:?}", address, e);
            Error::Read {
                address,
                length: buf.len(),
                source: e,
            }
        })
    }

    fn chunks(&self, address: VmAddress, length: usize) -> Chunks {
        Chunks {
            address,
            remaining: length,
            chunk_size: self.chunk_size as u64,
        }
    }
}

/// Splits `[address, address + remaining)` into `(address, len)` pieces that
/// end on multiples of `chunk_size`, stopping at the top of the address space.
struct Chunks {
    address: VmAddress,
    remaining: usize,
    chunk_size: u64,
}

impl Iterator for Chunks {
    type Item = (VmAddress, usize);

    fn next(&mut self) -> Option<(VmAddress, usize)> {
        if self.remaining == 0 {
            return None;
        }

        let to_boundary = self.chunk_size - self.address % self.chunk_size;
        let mut len = usize::try_from(to_boundary).map_or(self.remaining, |n| n.min(self.remaining));

        // Bytes left in the address space, minus one.
        let room = u64::MAX - self.address;
        if (len - 1) as u64 > room {
            len = room as usize + 1;
        }

        let chunk = (self.address, len);
        match self.address.checked_add(len as u64) {
            Some(next) => {
                self.address = next;
                self.remaining -= len;
            }
            None => self.remaining = 0,
        }
        Some(chunk)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;
    use std::io;

    /// A target whose only mapped bytes are `bytes` at `base`. Records every
    /// call it receives.
    struct FakeTarget {
        base: VmAddress,
        bytes: Vec<u8>,
        calls: RefCell<Vec<(VmAddress, usize)>>,
    }

    impl FakeTarget {
        fn new(base: VmAddress, bytes: Vec<u8>) -> FakeTarget {
            FakeTarget {
                base,
                bytes,
                calls: RefCell::new(Vec::new()),
            }
        }

        fn pattern(base: VmAddress, len: usize) -> FakeTarget {
            FakeTarget::new(base, (0..len).map(|i| (i % 256) as u8).collect())
        }

        fn calls(&self) -> Vec<(VmAddress, usize)> {
            self.calls.borrow().clone()
        }
    }

    impl CopyAddress for FakeTarget {
        fn copy_address(&self, addr: VmAddress, buf: &mut [u8]) -> io::Result<()> {
            self.calls.borrow_mut().push((addr, buf.len()));
            let start = match addr.checked_sub(self.base) {
                Some(start) if start <= self.bytes.len() as u64 => start as usize,
                _ => return Err(io::Error::new(io::ErrorKind::Other, "unmapped")),
            };
            match self.bytes.get(start..start + buf.len()) {
                Some(bytes) => {
                    buf.copy_from_slice(bytes);
                    Ok(())
                }
                None => Err(io::Error::new(io::ErrorKind::Other, "unmapped")),
            }
        }
    }

    const BASE: VmAddress = 0x1_0000;

    fn memory(target: FakeTarget, chunk_size: usize) -> ProcessMemory<FakeTarget> {
        ProcessMemory::with_chunk_size(target, NonZeroUsize::new(chunk_size).unwrap())
    }

    fn expected(offset: usize, len: usize) -> Vec<u8> {
        (offset..offset + len).map(|i| (i % 256) as u8).collect()
    }

    #[test]
    fn zero_length_read_touches_nothing() {
        let memory = memory(FakeTarget::pattern(BASE, 64), 16);
        let mut buf = [0x5Au8; 8];
        memory.read(0, &mut buf[..0]).unwrap();
        memory.read(u64::MAX, &mut buf[..0]).unwrap();
        assert_eq!(buf, [0x5A; 8]);
        assert!(memory.source().calls().is_empty());
        assert_eq!(memory.read_to_vec(0, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn read_splits_at_chunk_boundaries() {
        let memory = memory(FakeTarget::pattern(BASE, 64), 16);
        assert_eq!(memory.read_to_vec(BASE + 5, 30).unwrap(), expected(5, 30));
        assert_eq!(
            memory.source().calls(),
            vec![(BASE + 5, 11), (BASE + 16, 16), (BASE + 32, 3)]
        );
    }

    #[test]
    fn read_within_one_chunk() {
        let memory = memory(FakeTarget::pattern(BASE, 64), 16);
        assert_eq!(memory.read_to_vec(BASE + 3, 4).unwrap(), expected(3, 4));
        assert_eq!(memory.source().calls(), vec![(BASE + 3, 4)]);
    }

    #[test]
    fn read_two_chunks_starting_mid_chunk() {
        let memory = memory(FakeTarget::pattern(BASE, 64), 16);
        assert_eq!(memory.read_to_vec(BASE + 12, 8).unwrap(), expected(12, 8));
        assert_eq!(memory.source().calls(), vec![(BASE + 12, 4), (BASE + 16, 4)]);
    }

    #[test]
    fn read_exactly_one_aligned_chunk() {
        let memory = memory(FakeTarget::pattern(BASE, 64), 16);
        assert_eq!(memory.read_to_vec(BASE + 16, 16).unwrap(), expected(16, 16));
        assert_eq!(memory.source().calls(), vec![(BASE + 16, 16)]);
    }

    #[test]
    fn read_single_byte() {
        let memory = memory(FakeTarget::pattern(BASE, 64), 16);
        let mut buf = [0u8, b'J'];
        memory.read(BASE + 37, &mut buf[..1]).unwrap();
        assert_eq!(buf, [37, b'J']);
        assert_eq!(memory.source().calls(), vec![(BASE + 37, 1)]);
    }

    #[test]
    fn read_any_span_with_any_chunk_size() {
        for &chunk_size in &[1, 3, 7, 16, 64, 4096] {
            for &(offset, len) in &[(0, 64), (1, 63), (0, 63), (1, 62), (15, 2), (16, 16), (63, 1)] {
                let memory = memory(FakeTarget::pattern(BASE, 64), chunk_size);
                let bytes = memory.read_to_vec(BASE + offset as u64, len).unwrap();
                assert_eq!(bytes, expected(offset, len), "chunk {} at {}", chunk_size, offset);

                let mut next = BASE + offset as u64;
                for (addr, len) in memory.source().calls() {
                    assert_eq!(addr, next);
                    assert!(len <= chunk_size);
                    assert_eq!(addr / chunk_size as u64, (addr + len as u64 - 1) / chunk_size as u64);
                    next = addr + len as u64;
                }
                assert_eq!(next, BASE + (offset + len) as u64);
            }
        }
    }

    #[test]
    fn failing_chunk_aborts_read() {
        let memory = memory(FakeTarget::pattern(BASE, 32), 16);
        let mut buf = vec![0u8; 48];
        match memory.read(BASE + 8, &mut buf) {
            Err(Error::Read { address, length, .. }) => {
                assert_eq!(address, BASE + 32);
                assert_eq!(length, 16);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            memory.source().calls(),
            vec![(BASE + 8, 8), (BASE + 16, 16), (BASE + 32, 16)]
        );
    }

    #[test]
    fn read_at_mapping_edge() {
        let memory = memory(FakeTarget::pattern(BASE, 32), 16);
        assert_eq!(memory.read_to_vec(BASE + 31, 1).unwrap(), vec![31]);
        assert!(memory.read_to_vec(BASE + 32, 1).is_err());
        assert!(memory.read_to_vec(BASE + 31, 2).is_err());
    }

    #[test]
    fn read_wrapping_address_space_fails_without_reading() {
        let memory = memory(FakeTarget::pattern(BASE, 32), 16);
        let mut buf = [0u8; 8];
        assert!(matches!(
            memory.read(u64::MAX - 2, &mut buf),
            Err(Error::AddressOverflow { length: 8, .. })
        ));
        assert!(memory.source().calls().is_empty());
    }

    #[test]
    fn read_ending_at_top_of_address_space() {
        let base = u64::MAX - 15;
        let memory = memory(FakeTarget::pattern(base, 16), 16);
        assert_eq!(memory.read_to_vec(u64::MAX - 7, 8).unwrap(), expected(8, 8));
        assert_eq!(memory.read_to_vec(u64::MAX, 1).unwrap(), vec![15]);
        assert_eq!(memory.read_to_vec(base, 16).unwrap(), expected(0, 16));
        assert!(matches!(
            memory.read_to_vec(u64::MAX - 7, 9),
            Err(Error::AddressOverflow { length: 9, .. })
        ));
    }

    #[test]
    fn default_chunk_size_is_page_size() {
        let paged = ProcessMemory::new(FakeTarget::pattern(BASE, 16));
        assert_eq!(paged.chunk_size(), page_size());
        let odd = memory(FakeTarget::pattern(BASE, 16), 3);
        assert_eq!(odd.chunk_size(), 3);
    }

    #[test]
    fn read_through_borrowed_source() {
        let target = FakeTarget::pattern(BASE, 32);
        let memory = ProcessMemory::with_chunk_size(&target, NonZeroUsize::new(16).unwrap());
        assert_eq!(memory.read_to_vec(BASE + 14, 4).unwrap(), expected(14, 4));
        assert_eq!(target.calls(), vec![(BASE + 14, 2), (BASE + 16, 2)]);
    }

    fn strings(base: VmAddress, strings: &[(usize, &[u8])], len: usize) -> FakeTarget {
        let mut bytes = vec![b'x'; len];
        for &(offset, s) in strings {
            bytes[offset..offset + s.len()].copy_from_slice(s);
        }
        FakeTarget::new(base, bytes)
    }

    #[test]
    fn read_c_string_empty_and_short() {
        let target = strings(BASE, &[(0, b"\0"), (4, b"hello\0")], 32);
        let memory = memory(target, 16);
        assert_eq!(memory.read_c_string(BASE).unwrap(), b"");
        assert_eq!(memory.read_c_string(BASE + 4).unwrap(), b"hello");
        assert_eq!(memory.read_c_string(BASE + 6).unwrap(), b"llo");
    }

    #[test]
    fn read_c_string_across_chunk_boundary() {
        let target = strings(BASE, &[(13, b"boundary\0")], 32);
        let memory = memory(target, 16);
        assert_eq!(memory.read_c_string(BASE + 13).unwrap(), b"boundary");
        assert_eq!(memory.source().calls(), vec![(BASE + 13, 3), (BASE + 16, 16)]);
    }

    #[test]
    fn read_c_string_with_odd_chunk_size() {
        let target = strings(BASE, &[(5, b"a longer string\0")], 32);
        let memory = memory(target, 3);
        assert_eq!(memory.read_c_string(BASE + 5).unwrap(), b"a longer string");
    }

    #[test]
    fn read_c_string_into_unmapped_fails() {
        let target = strings(BASE, &[], 20);
        let memory = memory(target, 16);
        assert!(matches!(
            memory.read_c_string(BASE + 10),
            Err(Error::Read { address, .. }) if address == BASE + 16
        ));
        assert!(matches!(
            memory.read_c_string_size_limited(BASE + 10, 100),
            Err(Error::Read { .. })
        ));
    }

    #[test]
    fn read_c_string_terminated_before_unmapped_succeeds() {
        // The terminator is the last mapped byte.
        let target = strings(BASE, &[(10, b"abcde\0")], 16);
        let memory = memory(target, 16);
        assert_eq!(memory.read_c_string(BASE + 10).unwrap(), b"abcde");
        assert_eq!(memory.read_c_string_size_limited(BASE + 10, 6).unwrap(), b"abcde");
    }

    #[test]
    fn size_limited_bound_is_inclusive_of_terminator() {
        let target = strings(BASE, &[(2, b"twelve chars\0")], 64);
        let memory = memory(target, 8);
        assert_eq!(memory.read_c_string_size_limited(BASE + 2, 13).unwrap(), b"twelve chars");
        assert!(matches!(
            memory.read_c_string_size_limited(BASE + 2, 12),
            Err(Error::TerminatorNotFound { scanned: 12, .. })
        ));
    }

    #[test]
    fn size_limited_never_reads_past_limit() {
        let target = strings(BASE, &[], 64);
        let memory = memory(target, 16);
        assert!(memory.read_c_string_size_limited(BASE + 4, 20).is_err());
        assert_eq!(memory.source().calls(), vec![(BASE + 4, 12), (BASE + 16, 8)]);
    }

    #[test]
    fn size_limited_first_chunk_bounded_by_limit() {
        let target = strings(BASE, &[(1, b"ab\0")], 64);
        let memory = memory(target, 16);
        assert_eq!(memory.read_c_string_size_limited(BASE + 1, 3).unwrap(), b"ab");
        assert_eq!(memory.source().calls(), vec![(BASE + 1, 3)]);
    }

    #[test]
    fn size_limited_zero_fails_without_reading() {
        let target = strings(BASE, &[(0, b"\0")], 16);
        let memory = memory(target, 16);
        assert!(matches!(
            memory.read_c_string_size_limited(BASE, 0),
            Err(Error::TerminatorNotFound { scanned: 0, .. })
        ));
        assert!(memory.source().calls().is_empty());
    }

    #[test]
    fn read_c_string_stops_at_top_of_address_space() {
        let base = u64::MAX - 15;
        let memory = memory(strings(base, &[], 16), 8);
        assert!(matches!(
            memory.read_c_string(base),
            Err(Error::TerminatorNotFound { scanned: 16, .. })
        ));
        assert_eq!(memory.source().calls(), vec![(base, 8), (base + 8, 8)]);
    }

    #[test]
    fn chunks_clamp_at_top_with_odd_chunk_size() {
        let chunks = Chunks {
            address: u64::MAX - 1,
            remaining: usize::MAX,
            chunk_size: 3,
        };
        let total: usize = chunks.map(|(_, len)| len).sum();
        assert_eq!(total, 2);
    }
}
