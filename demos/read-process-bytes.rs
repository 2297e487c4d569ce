extern crate process_memory_reader;

use process_memory_reader::*;
use std::env;
use std::process;

fn bytes_to_hex(bytes: &[u8]) -> String {
    let hex_bytes: Vec<String> = bytes.iter()
        .map(|b| format!("{:02x}", b)).collect();
    hex_bytes.join("")
}

fn usage() -> ! {
    eprintln!("usage: read-process-bytes <pid> <hex address> <size>");
    eprintln!("       read-process-bytes <pid> <hex address> --cstring [max size]");
    process::exit(2)
}

fn run(args: &[String]) -> Result<()> {
    let pid = args[1].parse::<Pid>().unwrap_or_else(|_| usage());
    let addr = VmAddress::from_str_radix(args[2].trim_start_matches("0x"), 16).unwrap_or_else(|_| usage());
    let memory = ProcessMemory::initialize(pid)?;

    if args[3] == "--cstring" {
        let string = match args.get(4) {
            Some(max) => {
                let max = max.parse::<usize>().unwrap_or_else(|_| usage());
                memory.read_c_string_size_limited(addr, max)?
            }
            None => memory.read_c_string(addr)?,
        };
        println!("string at address {:x}:\n{}\n", addr, String::from_utf8_lossy(&string));
    } else {
        let size = args[3].parse::<usize>().unwrap_or_else(|_| usage());
        let bytes = memory.read_to_vec(addr, size)?;
        println!("{} bytes at address {:x}:\n{}\n", size, addr, bytes_to_hex(&bytes));
    }
    Ok(())
}

fn main() {
    let args = env::args().collect::<Vec<_>>();
    if args.len() < 4 {
        usage();
    }
    if let Err(e) = run(&args) {
        println!("Error: {}", e);
        process::exit(1);
    }
}
