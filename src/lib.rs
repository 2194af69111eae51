mod async_file;
mod config;
mod dir;
mod error;
mod index;
mod indexed_file;
mod io_ext;
mod request;
mod storage;

pub use async_file::{AsyncIndexedFile, AsyncRandomAccess};
pub use config::{DEFAULT_BLOCK_SIZE, INDEX_SUFFIX, Mode, Options};
pub use error::{Error, Result};
pub use index::{IndexDump, dump_index};
pub use indexed_file::IndexedFile;
pub use request::{Request, Response, Stat};
pub use storage::RandomAccess;
