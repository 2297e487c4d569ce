// This program is the target of the tests in tests/child_process.rs.
//
// It lays out some memory according to the mode in argv[1], prints the
// addresses the tests need (one value per line, hex), and waits for stdin to
// close before exiting.
use std::env;
use std::io::{self, Read};

static CONST_EMPTY: &[u8] = b"\0";
static CONST_SHORT: &[u8] = b"A short const char[]\0";

fn page_size() -> usize {
    process_memory_reader::page_size()
}

fn wait_for_eof() {
    let mut buf = vec![];
    io::stdin().read_to_end(&mut buf).unwrap();
}

fn region() {
    let region = (0..4 * page_size()).map(|i| i as u8).collect::<Vec<u8>>();
    println!("{:p}", region.as_ptr());
    println!("{:x}", region.len());
    wait_for_eof();
}

fn strings() {
    let local_empty = vec![0u8];
    let local_short = b"A short local variable char[]\0".to_vec();
    let mut long_string = (0..4 * page_size()).map(|i| (i % 255) as u8 + 1).collect::<Vec<u8>>();
    long_string.push(0);

    for s in &[CONST_EMPTY, CONST_SHORT, &local_empty[..], &local_short[..], &long_string[..]] {
        println!("{:p}", s.as_ptr());
    }
    wait_for_eof();
}

/// Maps two pages, fills them with `fill`, lets `edit` poke at them, then
/// unmaps the second page and prints the base address.
#[cfg(unix)]
fn half_mapped(fill: fn(usize) -> u8, edit: fn(&mut [u8], usize)) {
    let page = page_size();
    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            2 * page,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    assert_ne!(base, libc::MAP_FAILED);
    {
        let region = unsafe { std::slice::from_raw_parts_mut(base as *mut u8, 2 * page) };
        for (i, byte) in region.iter_mut().enumerate() {
            *byte = fill(i);
        }
        edit(region, page);
    }
    let rv = unsafe { libc::munmap((base as *mut u8).add(page) as *mut libc::c_void, page) };
    assert_eq!(rv, 0);

    println!("{:p}", base);
    wait_for_eof();
}

fn main() {
    let mode = env::args().nth(1).unwrap_or_default();
    match mode.as_str() {
        "region" => region(),
        "strings" => strings(),
        #[cfg(unix)]
        "unmapped-region" => half_mapped(|i| (i % 256) as u8, |_, _| {}),
        #[cfg(unix)]
        "unmapped-strings" => half_mapped(
            |i| 1 + (i % 255) as u8,
            |region, page| {
                // Strings of ten bytes at the start, ending just before the
                // unmapped page, crossing into it, and inside it.
                for &offset in &[0, page - 20, page - 9, page + 10] {
                    region[offset + 10] = 0;
                }
            },
        ),
        other => panic!("unknown mode {:?}", other),
    }
}
