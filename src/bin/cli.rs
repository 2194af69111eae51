use std::io::{self, Write, stdin};
use std::path::PathBuf;

use indexed_file::{IndexedFile, Options, RandomAccess, dump_index};
use tracing_subscriber::EnvFilter;

fn parse_u64(value: &str) -> Option<u64> {
    value.parse().ok()
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <file> [block-size]", args[0]);
        std::process::exit(1);
    }

    let path = PathBuf::from(&args[1]);

    let mut options = Options::default();
    if let Some(block_size) = args.get(2) {
        match parse_u64(block_size) {
            Some(block_size) => options = options.block_size(block_size),
            None => {
                eprintln!("Invalid block size: {block_size}");
                std::process::exit(1);
            }
        }
    }

    let file = match IndexedFile::new(path, options) {
        Ok(file) => file,

        Err(e) => {
            eprintln!("Failed to open file: {e}");
            std::process::exit(1);
        }
    };

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut cmd = String::new();
        if stdin().read_line(&mut cmd)? == 0 {
            return Ok(());
        }
        let cmd = cmd.trim();

        if cmd.is_empty() {
            continue;
        }

        let parts: Vec<&str> = cmd.split_whitespace().collect();

        match parts[0] {
            "exit" => {
                if let Err(e) = file.close() {
                    eprintln!("Failed to close file: {e}");
                }
                return Ok(());
            }

            "read" => {
                let (Some(offset), Some(len)) = (
                    parts.get(1).and_then(|v| parse_u64(v)),
                    parts.get(2).and_then(|v| parse_u64(v)),
                ) else {
                    eprintln!("Usage: read <offset> <length>");
                    continue;
                };

                match file.read(offset, len) {
                    Ok(data) => eprintln!("{}", String::from_utf8_lossy(&data)),
                    Err(e) => eprintln!("Failed to read: {e}"),
                }
            }

            "write" => {
                let Some(offset) = parts.get(1).and_then(|v| parse_u64(v)) else {
                    eprintln!("Usage: write <offset> <text>");
                    continue;
                };

                let text = parts[2..].join(" ");

                match file.write(offset, text.as_bytes()) {
                    Ok(()) => eprintln!("Wrote {} bytes", text.len()),
                    Err(e) => eprintln!("Failed to write: {e}"),
                }
            }

            "del" => {
                let (Some(offset), Some(len)) = (
                    parts.get(1).and_then(|v| parse_u64(v)),
                    parts.get(2).and_then(|v| parse_u64(v)),
                ) else {
                    eprintln!("Usage: del <offset> <length>");
                    continue;
                };

                match file.del(offset, len) {
                    Ok(()) => eprintln!("Deleted"),
                    Err(e) => eprintln!("Failed to delete: {e}"),
                }
            }

            "stat" => match file.stat() {
                Ok(stat) => eprintln!(
                    "size: {}, block size: {}, indexed: {}",
                    stat.size, stat.block_size, stat.indexed
                ),
                Err(e) => eprintln!("Failed to stat: {e}"),
            },

            "index" => match dump_index(file.index_path()) {
                Ok(dump) => {
                    eprintln!("block size: {}, cursor: {}", dump.block_size, dump.cursor);
                    for (block, base) in dump.blocks {
                        eprintln!("  block {block} -> {base}");
                    }
                }
                Err(e) => eprintln!("Failed to read index: {e}"),
            },

            "close" => match file.close() {
                Ok(()) => eprintln!("Closed"),
                Err(e) => eprintln!("Failed to close: {e}"),
            },

            cmd => {
                eprintln!("Unknown command: {cmd}");
            }
        }
    }
}
