use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwapOption;
use tracing::debug;

use crate::config::{INDEX_SUFFIX, Mode, Options};
use crate::dir::{create_parent_dirs, remove_empty_parents};
use crate::error::{Error, Result};
use crate::index::{Index, Pointer, SharedCursor};
use crate::io_ext::{read_full_at, write_at};
use crate::request::{Request, Response, Stat};
use crate::storage::RandomAccess;

/// A randomly addressable byte space stored in a content file that only ever grows by
/// whole blocks, with a companion index file mapping logical blocks to physical ones.
///
/// A content file that already has data but no index is served as a plain file, with
/// logical offsets used as physical offsets. No index is ever created for it.
///
/// Requests may be issued from many threads at once. The dataset opens itself on the
/// first request that needs it, and reopens read-write when a write or delete arrives
/// on a read-only handle.
///
/// Two instances over the same files (in one process or several) are not coordinated.
pub struct IndexedFile {
    content_path: PathBuf,
    index_path: PathBuf,
    options: Options,

    handles: ArcSwapOption<Handles>,
    /// Outlives any one set of handles, so a reopen never runs two allocators.
    cursor: SharedCursor,
    /// Serializes open, close and destroy.
    lifecycle: Mutex<()>,
}

impl IndexedFile {
    pub fn new(path: impl AsRef<Path>, options: Options) -> Result<IndexedFile> {
        options.validate()?;

        let content_path = match &options.directory {
            Some(directory) => directory.join(path),
            None => path.as_ref().to_path_buf(),
        };

        let mut index_path = content_path.clone().into_os_string();
        index_path.push(INDEX_SUFFIX);

        Ok(IndexedFile {
            content_path,
            index_path: PathBuf::from(index_path),
            options,
            handles: ArcSwapOption::empty(),
            cursor: SharedCursor::default(),
            lifecycle: Mutex::new(()),
        })
    }

    pub fn content_path(&self) -> &Path {
        &self.content_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn is_open(&self) -> bool {
        self.handles.load().is_some()
    }

    pub fn mode(&self) -> Option<Mode> {
        self.handles.load().as_ref().map(|handles| handles.mode)
    }

    /// False when closed or when serving a legacy file without an index.
    pub fn is_indexed(&self) -> bool {
        self.handles
            .load()
            .as_ref()
            .is_some_and(|handles| handles.index.is_some())
    }

    /// Block size in effect: the persisted one once open, the requested one before.
    pub fn block_size(&self) -> u64 {
        match self.handles.load().as_ref() {
            Some(handles) => handles.block_size,
            None => self.options.block_size,
        }
    }

    /// Physical offset the next allocated block will get, if the dataset is open and indexed.
    pub fn allocation_cursor(&self) -> Option<u64> {
        self.handles
            .load()
            .as_ref()
            .and_then(|handles| handles.index.as_ref().map(Index::cursor))
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_mode(&self, mode: Mode) -> Result<Arc<Handles>> {
        let _guard = self.lock_lifecycle();
        self.open_locked(mode)
    }

    fn open_locked(&self, mode: Mode) -> Result<Arc<Handles>> {
        match self.open_handles(mode) {
            Ok(handles) => {
                let handles = Arc::new(handles);
                // The previous handles close once the last in-flight request lets go of them.
                self.handles.store(Some(handles.clone()));
                Ok(handles)
            }

            Err(e) => {
                self.handles.store(None);
                Err(e)
            }
        }
    }

    fn open_handles(&self, mode: Mode) -> Result<Handles> {
        if mode.is_writable() {
            create_parent_dirs(&self.content_path)?;
        }

        let content = open_options(mode, true).open(&self.content_path)?;
        let is_new = content.metadata()?.len() == 0;

        // Only a fresh dataset gets an index. A content file with data and no index is a
        // plain file written by someone else, and stays one.
        let index_file = match open_options(mode, is_new).open(&self.index_path) {
            Ok(file) => Some(file),
            Err(e) if is_new => return Err(e.into()),
            Err(e) => {
                debug!(
                    path = %self.content_path.display(),
                    error = %e,
                    "no usable index, serving file with direct offsets"
                );
                None
            }
        };

        // A header is only ever written for a fresh dataset opened read-write. Any other
        // index without one never had a block allocated, so direct offsets are exact.
        let create = is_new && mode.is_writable();
        let index = match index_file {
            Some(file) => {
                let index =
                    Index::open(file, self.options.block_size, self.cursor.clone(), create)?;
                if index.is_none() {
                    debug!(
                        path = %self.content_path.display(),
                        "index has no header, serving file with direct offsets"
                    );
                }
                index
            }
            None => None,
        };

        let block_size = index
            .as_ref()
            .map_or(self.options.block_size, Index::block_size);

        debug!(
            path = %self.content_path.display(),
            ?mode,
            is_new,
            indexed = index.is_some(),
            block_size,
            cursor = ?index.as_ref().map(Index::cursor),
            "opened dataset"
        );

        Ok(Handles {
            content,
            index,
            mode,
            block_size,
        })
    }

    /// Returns open handles able to serve the request, opening or upgrading as needed.
    fn ready(&self, writable: bool) -> Result<Arc<Handles>> {
        let usable = |handles: &Arc<Handles>| !writable || handles.mode.is_writable();

        if let Some(handles) = self.handles.load_full().filter(usable) {
            return Ok(handles);
        }

        let _guard = self.lock_lifecycle();

        // Another request may have opened the dataset while we waited.
        if let Some(handles) = self.handles.load_full().filter(usable) {
            return Ok(handles);
        }

        let mode = if writable {
            Mode::ReadWrite
        } else {
            self.options.preferred_mode()
        };

        match self.open_locked(mode) {
            Err(e) if mode == Mode::ReadOnly && e.is_not_found() => {
                debug!(path = %self.content_path.display(), "read-only open failed, opening read-write");
                self.open_locked(Mode::ReadWrite)
            }

            result => result,
        }
    }

    fn close_handles(&self) {
        let _guard = self.lock_lifecycle();

        if self.handles.swap(None).is_some() {
            debug!(path = %self.content_path.display(), "closed dataset");
        }
    }

    fn destroy_files(&self) -> Result<()> {
        let _guard = self.lock_lifecycle();
        self.handles.store(None);

        match fs::remove_file(&self.index_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        fs::remove_file(&self.content_path)?;

        debug!(path = %self.content_path.display(), "destroyed dataset");

        if self.options.rmdir {
            if let Some(root) = &self.options.directory {
                remove_empty_parents(&self.content_path, root);
            }
        }

        Ok(())
    }
}

impl RandomAccess for IndexedFile {
    fn handle(&self, request: Request) -> Result<Response> {
        let writable = request.needs_write();

        match request {
            Request::Open(mode) => self.open_mode(mode).map(|_| Response::Done),

            Request::Read { offset, len } => self
                .ready(writable)?
                .read(offset, len)
                .map(Response::Data),

            Request::Write { offset, data } => self
                .ready(writable)?
                .write(offset, &data)
                .map(|()| Response::Done),

            Request::Delete { offset, len } => self
                .ready(writable)?
                .delete(offset, len)
                .map(|()| Response::Done),

            Request::Stat => self.ready(writable)?.stat().map(Response::Stat),

            Request::Close => {
                self.close_handles();
                Ok(Response::Done)
            }

            Request::Destroy => self.destroy_files().map(|()| Response::Done),
        }
    }
}

fn open_options(mode: Mode, create: bool) -> OpenOptions {
    let mut options = OpenOptions::new();
    options
        .read(true)
        .write(mode.is_writable())
        .create(mode.is_writable() && create)
        .truncate(false);
    options
}

/// The open state of a dataset. Dropping it closes both files.
struct Handles {
    content: File,
    index: Option<Index>,
    mode: Mode,
    block_size: u64,
}

impl Handles {
    fn pointer(&self, offset: u64) -> Result<Option<Pointer>> {
        match &self.index {
            Some(index) => index.resolve(offset),
            None => Ok(Some(Pointer::direct(offset, self.block_size))),
        }
    }

    fn pointer_for_write(&self, offset: u64) -> Result<Pointer> {
        match &self.index {
            Some(index) => index.resolve_or_allocate(offset),
            None => Ok(Pointer::direct(offset, self.block_size)),
        }
    }

    /// Bytes left in the block `pointer` points into, capped at `remaining`.
    fn chunk_len(&self, pointer: Pointer, remaining: usize) -> usize {
        let in_block = self.block_size - pointer.block_offset;
        usize::try_from(in_block).map_or(remaining, |in_block| in_block.min(remaining))
    }

    fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }

        let size = offset
            .checked_add(len)
            .and_then(|_| usize::try_from(len).ok())
            .ok_or(Error::Overflow { offset, len })?;

        // Every logical byte has its own physical byte, so no read can outgrow the file.
        if len > self.content.metadata()?.len() {
            return Err(Error::RangeNotSatisfiable { offset, len });
        }

        let mut buf = vec![0u8; size];
        let mut filled = 0;

        while filled < size {
            let pointer = self
                .pointer(offset + filled as u64)?
                .ok_or(Error::RangeNotSatisfiable { offset, len })?;

            let chunk = self.chunk_len(pointer, size - filled);
            let read = read_full_at(
                &self.content,
                &mut buf[filled..filled + chunk],
                pointer.file_offset,
            )?;

            if read != chunk {
                return Err(Error::RangeNotSatisfiable { offset, len });
            }

            filled += read;
        }

        Ok(buf)
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let len = data.len() as u64;
        offset
            .checked_add(len)
            .ok_or(Error::Overflow { offset, len })?;

        let mut written = 0;

        // One block at a time, in offset order, so a failure leaves a written prefix.
        while written < data.len() {
            let pointer = self.pointer_for_write(offset + written as u64)?;
            let chunk = self.chunk_len(pointer, data.len() - written);

            match write_at(
                &self.content,
                &data[written..written + chunk],
                pointer.file_offset,
            ) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Truncates the content file when the range covers its tail. Anything else is kept.
    fn delete(&self, offset: u64, len: u64) -> Result<()> {
        let end = offset
            .checked_add(len)
            .ok_or(Error::Overflow { offset, len })?;
        let size = self.content.metadata()?.len();

        if end < size || offset >= size {
            return Ok(());
        }

        self.content.set_len(offset)?;
        Ok(())
    }

    fn stat(&self) -> Result<Stat> {
        Ok(Stat {
            size: self.content.metadata()?.len(),
            block_size: self.block_size,
            indexed: self.index.is_some(),
        })
    }
}
