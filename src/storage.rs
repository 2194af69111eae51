use crate::config::Mode;
use crate::error::Result;
use crate::request::{Request, Response, Stat};

/// A randomly addressable byte store.
///
/// Implementors route every operation through [`handle`](RandomAccess::handle); the other
/// methods are typed shorthands for building a [`Request`] and unpacking its [`Response`].
pub trait RandomAccess {
    fn handle(&self, request: Request) -> Result<Response>;

    /// Opens read-write, creating the dataset if it does not exist.
    fn open(&self) -> Result<()> {
        self.handle(Request::Open(Mode::ReadWrite))?.into_done()
    }

    fn open_readonly(&self) -> Result<()> {
        self.handle(Request::Open(Mode::ReadOnly))?.into_done()
    }

    fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.handle(Request::Read { offset, len })?.into_data()
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.handle(Request::Write {
            offset,
            data: data.to_vec(),
        })?
        .into_done()
    }

    fn del(&self, offset: u64, len: u64) -> Result<()> {
        self.handle(Request::Delete { offset, len })?.into_done()
    }

    fn stat(&self) -> Result<Stat> {
        self.handle(Request::Stat)?.into_stat()
    }

    fn close(&self) -> Result<()> {
        self.handle(Request::Close)?.into_done()
    }

    fn destroy(&self) -> Result<()> {
        self.handle(Request::Destroy)?.into_done()
    }
}
