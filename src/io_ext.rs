use std::fs::File;
use std::io;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Width of an encoded slot, in bytes.
pub const U48_LEN: usize = 6;

/// Largest value a slot can hold.
pub const MAX_U48: u64 = (1 << 48) - 1;

/// Encodes `value` as a 6-byte big-endian integer.
///
/// Fails with [`Error::ValueOutOfRange`] when the value needs more than 48 bits.
pub fn encode_u48(value: u64) -> Result<[u8; U48_LEN]> {
    if value > MAX_U48 {
        return Err(Error::ValueOutOfRange(value));
    }

    let mut buf = [0u8; U48_LEN];
    BigEndian::write_u48(&mut buf, value);
    Ok(buf)
}

pub fn decode_u48(buf: &[u8; U48_LEN]) -> u64 {
    BigEndian::read_u48(buf)
}

/// Positional read that does not move the file cursor. May return fewer bytes than asked for.
#[cfg(unix)]
pub fn read_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, pos)
}

#[cfg(windows)]
pub fn read_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, pos)
}

/// Positional write that does not move the file cursor. May write fewer bytes than given.
#[cfg(unix)]
pub fn write_at(file: &File, buf: &[u8], pos: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, pos)
}

#[cfg(windows)]
pub fn write_at(file: &File, buf: &[u8], pos: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, pos)
}

/// Reads until `buf` is full or end of file is reached.
///
/// Returns the number of bytes read, which is less than `buf.len()` only at end of file.
pub fn read_full_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        match read_at(file, &mut buf[filled..], pos + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(filled)
}
