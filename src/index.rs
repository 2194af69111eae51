//! Index file routines.
//!
//! The index is a flat array of 6-byte big-endian slots. Slot `k` lives at byte `k * 6`:
//!
//! | slot    | meaning                                                   |
//! |---------|-----------------------------------------------------------|
//! | 0       | block size                                                |
//! | 1       | next free physical offset in the content file (cursor)    |
//! | `n + 2` | physical base offset of logical block `n`, 0 = unassigned |
//!
//! Logical block 0 always lives at physical offset 0 and is never looked up, since a
//! stored 0 means "unassigned". A fresh index therefore starts its cursor at one block.
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::trace;

use crate::error::{Error, Result};
use crate::io_ext::{MAX_U48, U48_LEN, decode_u48, encode_u48, read_full_at, write_at};

const BLOCK_SIZE_SLOT: u64 = 0;
const CURSOR_SLOT: u64 = 1;
const HEADER_SLOTS: u64 = 2;

const HEADER_LEN: u64 = HEADER_SLOTS * U48_LEN as u64;

/// Where a logical offset lives in the content file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    /// Absolute position in the content file.
    pub file_offset: u64,
    /// Position within the block, `offset % block_size`.
    pub block_offset: u64,
}

impl Pointer {
    /// Identity mapping used when a dataset has no index.
    pub fn direct(offset: u64, block_size: u64) -> Pointer {
        Pointer {
            file_offset: offset,
            block_offset: offset % block_size,
        }
    }

    fn in_block(base: u64, offset: u64, block_size: u64) -> Pointer {
        let block_offset = offset % block_size;
        Pointer {
            file_offset: base + block_offset,
            block_offset,
        }
    }
}

/// Shared allocation cursor.
///
/// Reopening a dataset builds a new [`Index`] while requests may still hold the old one,
/// so both take the same lock. It serializes every resolve-or-allocate sequence.
pub(crate) type SharedCursor = Arc<Mutex<u64>>;

pub(crate) struct Index {
    file: File,
    block_size: u64,
    cursor: SharedCursor,
}

impl Index {
    /// Sets up an index over `file`.
    ///
    /// An index that already carries a header is loaded and its block size wins over
    /// `block_size`. Without a header, a fresh one is written with `block_size` and a
    /// cursor one block in, but only when `create` is set. Otherwise there is no index
    /// to speak of and `None` is returned with the file left untouched.
    ///
    /// On success `cursor` holds the persisted cursor.
    pub fn open(
        file: File,
        block_size: u64,
        cursor: SharedCursor,
        create: bool,
    ) -> Result<Option<Index>> {
        let mut guard = lock(&cursor);

        let block_size = if file.metadata()?.len() >= HEADER_LEN {
            load_header(&file, &mut guard)?
        } else if create {
            create_header(&file, block_size, &mut guard)?
        } else {
            return Ok(None);
        };

        drop(guard);

        Ok(Some(Index {
            file,
            block_size,
            cursor,
        }))
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn cursor(&self) -> u64 {
        *self.lock_cursor()
    }

    /// Looks up the pointer for `offset`. `None` means the block was never allocated.
    pub fn resolve(&self, offset: u64) -> Result<Option<Pointer>> {
        if offset < self.block_size {
            return Ok(Some(Pointer {
                file_offset: offset,
                block_offset: offset,
            }));
        }

        let base = read_slot(&self.file, block_slot(offset, self.block_size)?)?;
        if base == 0 {
            return Ok(None);
        }

        Ok(Some(Pointer::in_block(base, offset, self.block_size)))
    }

    /// Looks up the pointer for `offset`, allocating a block for it if there is none.
    ///
    /// The lookup and the allocation happen under one lock. Two writers racing on the
    /// same unassigned block would otherwise each claim a physical block for it.
    pub fn resolve_or_allocate(&self, offset: u64) -> Result<Pointer> {
        let mut cursor = self.lock_cursor();

        if let Some(pointer) = self.resolve(offset)? {
            return Ok(pointer);
        }

        self.allocate(&mut cursor, offset)
    }

    fn allocate(&self, cursor: &mut MutexGuard<'_, u64>, offset: u64) -> Result<Pointer> {
        let base = **cursor;
        let next = base
            .checked_add(self.block_size)
            .filter(|next| *next <= MAX_U48)
            .ok_or(Error::AddressSpaceExhausted)?;

        // Persist the cursor before the slot so a crash in between leaks a block
        // instead of handing it out twice.
        write_slot(&self.file, CURSOR_SLOT, next)?;
        **cursor = next;

        let slot = block_slot(offset, self.block_size)?;
        write_slot(&self.file, slot, base)?;

        trace!(offset, slot, base, "allocated block");

        Ok(Pointer::in_block(base, offset, self.block_size))
    }

    fn lock_cursor(&self) -> MutexGuard<'_, u64> {
        lock(&self.cursor)
    }
}

fn lock(cursor: &Mutex<u64>) -> MutexGuard<'_, u64> {
    // The cursor is persisted before it is bumped, so a poisoned value is still valid.
    cursor.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reads and checks an existing header. Returns the persisted block size.
fn load_header(file: &File, cursor: &mut u64) -> Result<u64> {
    let block_size = read_slot(file, BLOCK_SIZE_SLOT)?;
    let persisted = read_slot(file, CURSOR_SLOT)?;

    if block_size == 0 {
        return Err(Error::CorruptIndex("block size is 0".to_owned()));
    }

    if persisted < block_size || persisted % block_size != 0 {
        return Err(Error::CorruptIndex(format!(
            "cursor {persisted} is not a block boundary past block 0 (block size {block_size})"
        )));
    }

    *cursor = persisted;
    Ok(block_size)
}

/// Writes a fresh header with the cursor one block in.
fn create_header(file: &File, block_size: u64, cursor: &mut u64) -> Result<u64> {
    write_slot(file, BLOCK_SIZE_SLOT, block_size)?;
    write_slot(file, CURSOR_SLOT, block_size)?;

    *cursor = block_size;
    Ok(block_size)
}

/// Contents of an index file, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDump {
    pub block_size: u64,
    pub cursor: u64,
    /// `(logical block, physical base)` for every assigned slot, in logical order.
    pub blocks: Vec<(u64, u64)>,
}

/// Reads a whole index file without opening its dataset.
pub fn dump_index(path: &Path) -> Result<IndexDump> {
    let mut reader = BufReader::new(File::open(path)?);

    let block_size = reader.read_u48::<BigEndian>()?;
    let cursor = reader.read_u48::<BigEndian>()?;
    let mut blocks = Vec::new();

    for block in 0u64.. {
        match reader.read_u48::<BigEndian>() {
            Ok(0) => continue,
            Ok(base) => blocks.push((block, base)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(IndexDump {
        block_size,
        cursor,
        blocks,
    })
}

fn block_slot(offset: u64, block_size: u64) -> Result<u64> {
    let slot = offset / block_size + HEADER_SLOTS;

    // The slot has to be addressable as a byte position in the index file.
    match slot.checked_mul(U48_LEN as u64) {
        Some(_) => Ok(slot),
        None => Err(Error::Overflow { offset, len: 0 }),
    }
}

/// Reads a slot. Anything short of a full slot reads as 0.
fn read_slot(file: &File, slot: u64) -> Result<u64> {
    let mut buf = [0u8; U48_LEN];
    let read = read_full_at(file, &mut buf, slot * U48_LEN as u64)?;

    if read != U48_LEN {
        return Ok(0);
    }

    Ok(decode_u48(&buf))
}

fn write_slot(file: &File, slot: u64, value: u64) -> Result<()> {
    let buf = encode_u48(value)?;
    let written = write_at(file, &buf, slot * U48_LEN as u64)?;

    if written != U48_LEN {
        return Err(Error::IndexWrite { slot, written });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::{self, OpenOptions};
    use std::thread;

    use super::*;

    fn open_rw(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .unwrap()
    }

    fn open_index(path: &Path, block_size: u64) -> Index {
        Index::open(open_rw(path), block_size, SharedCursor::default(), true)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_create_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.index");

        let index = open_index(&path, 3);
        assert_eq!(index.block_size(), 3);
        assert_eq!(index.cursor(), 3);

        assert_eq!(fs::read(&path).unwrap(), vec![0, 0, 0, 0, 0, 3, 0, 0, 0, 0, 0, 3]);
    }

    #[test]
    fn test_open_keeps_persisted_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.index");

        let index = open_index(&path, 16);
        index.resolve_or_allocate(40).unwrap();
        drop(index);

        let index = open_index(&path, 4096);
        assert_eq!(index.block_size(), 16);
        assert_eq!(index.cursor(), 32);
    }

    #[test]
    fn test_headerless_index_is_left_alone_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.index");
        fs::write(&path, [0, 0, 0]).unwrap();

        let index = Index::open(open_rw(&path), 4, SharedCursor::default(), false).unwrap();
        assert!(index.is_none());
        assert_eq!(fs::read(&path).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn test_block_zero_maps_to_itself() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir.path().join("data.index"), 10);

        let pointer = index.resolve(7).unwrap().unwrap();
        assert_eq!(
            pointer,
            Pointer {
                file_offset: 7,
                block_offset: 7
            }
        );
        assert_eq!(index.resolve_or_allocate(7).unwrap(), pointer);
        assert_eq!(index.cursor(), 10);
    }

    #[test]
    fn test_unassigned_block_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir.path().join("data.index"), 10);

        // Past the end of the index file.
        assert_eq!(index.resolve(1_000).unwrap(), None);

        index.resolve_or_allocate(1_000).unwrap();
        // Inside the file, but a zero slot.
        assert_eq!(index.resolve(500).unwrap(), None);
    }

    #[test]
    fn test_allocation_appends_blocks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir.path().join("data.index"), 3);

        let first = index.resolve_or_allocate(9).unwrap();
        assert_eq!(
            first,
            Pointer {
                file_offset: 3,
                block_offset: 0
            }
        );

        let second = index.resolve_or_allocate(4).unwrap();
        assert_eq!(
            second,
            Pointer {
                file_offset: 7,
                block_offset: 1
            }
        );

        // Same block as `first`, no new allocation.
        let again = index.resolve_or_allocate(11).unwrap();
        assert_eq!(again.file_offset, 5);
        assert_eq!(index.cursor(), 9);

        assert_eq!(index.resolve(10).unwrap().unwrap().file_offset, 4);
    }

    #[test]
    fn test_cursor_at_end_of_address_space() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.index");

        let file = open_rw(&path);
        write_slot(&file, BLOCK_SIZE_SLOT, 1 << 20).unwrap();
        write_slot(&file, CURSOR_SLOT, MAX_U48 + 1 - (1 << 20)).unwrap();

        let index = Index::open(file, 1 << 20, SharedCursor::default(), false)
            .unwrap()
            .unwrap();
        assert!(matches!(
            index.resolve_or_allocate(1 << 21),
            Err(Error::AddressSpaceExhausted)
        ));
    }

    #[test]
    fn test_dump_lists_assigned_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.index");

        let index = open_index(&path, 4);
        index.resolve_or_allocate(21).unwrap();
        index.resolve_or_allocate(2).unwrap();
        index.resolve_or_allocate(9).unwrap();
        drop(index);

        let dump = dump_index(&path).unwrap();
        assert_eq!(dump.block_size, 4);
        assert_eq!(dump.cursor, 12);
        assert_eq!(dump.blocks, vec![(2, 8), (5, 4)]);
    }

    #[test]
    fn test_corrupt_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.index");

        fs::write(&path, [0u8; 12]).unwrap();
        assert!(matches!(
            Index::open(open_rw(&path), 3, SharedCursor::default(), true),
            Err(Error::CorruptIndex(_))
        ));

        fs::write(&path, [0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 6]).unwrap();
        assert!(matches!(
            Index::open(open_rw(&path), 3, SharedCursor::default(), true),
            Err(Error::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_reopened_index_shares_the_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.index");
        let cursor = SharedCursor::default();

        let old = Index::open(open_rw(&path), 8, cursor.clone(), true)
            .unwrap()
            .unwrap();
        let new = Index::open(open_rw(&path), 8, cursor, true)
            .unwrap()
            .unwrap();

        let a = old.resolve_or_allocate(16).unwrap();
        let b = new.resolve_or_allocate(24).unwrap();
        assert_ne!(a.file_offset, b.file_offset);
        assert_eq!(old.cursor(), 24);
        assert_eq!(new.resolve(16).unwrap(), Some(a));
    }

    #[test]
    fn test_concurrent_allocation_claims_one_block() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(open_index(&dir.path().join("data.index"), 64));

        let handles = (0..16)
            .map(|i| {
                let index = index.clone();
                thread::spawn(move || index.resolve_or_allocate(128 + i * 4).unwrap())
            })
            .collect::<Vec<_>>();

        for handle in handles {
            let pointer = handle.join().unwrap();
            assert_eq!(pointer.file_offset - pointer.block_offset, 64);
        }

        assert_eq!(index.cursor(), 128);
    }
}
