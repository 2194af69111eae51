use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Mode;
use crate::error::{Error, Result};
use crate::indexed_file::IndexedFile;
use crate::request::{Request, Response, Stat};
use crate::storage::RandomAccess;

/// Async counterpart of [`RandomAccess`].
#[async_trait]
pub trait AsyncRandomAccess: Send + Sync {
    async fn handle(&self, request: Request) -> Result<Response>;

    async fn open(&self) -> Result<()> {
        self.handle(Request::Open(Mode::ReadWrite)).await?.into_done()
    }

    async fn open_readonly(&self) -> Result<()> {
        self.handle(Request::Open(Mode::ReadOnly)).await?.into_done()
    }

    async fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.handle(Request::Read { offset, len }).await?.into_data()
    }

    async fn write(&self, offset: u64, data: Vec<u8>) -> Result<()> {
        self.handle(Request::Write { offset, data }).await?.into_done()
    }

    async fn del(&self, offset: u64, len: u64) -> Result<()> {
        self.handle(Request::Delete { offset, len }).await?.into_done()
    }

    async fn stat(&self) -> Result<Stat> {
        self.handle(Request::Stat).await?.into_stat()
    }

    async fn close(&self) -> Result<()> {
        self.handle(Request::Close).await?.into_done()
    }

    async fn destroy(&self) -> Result<()> {
        self.handle(Request::Destroy).await?.into_done()
    }
}

/// Shares one [`IndexedFile`] between tasks, serving each request on tokio's blocking pool.
#[derive(Clone)]
pub struct AsyncIndexedFile {
    inner: Arc<IndexedFile>,
}

impl AsyncIndexedFile {
    pub fn new(file: IndexedFile) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    pub fn get_ref(&self) -> &IndexedFile {
        &self.inner
    }
}

#[async_trait]
impl AsyncRandomAccess for AsyncIndexedFile {
    #[tracing::instrument(
        level = "trace",
        skip(self, request),
        fields(path = %self.inner.content_path().display())
    )]
    async fn handle(&self, request: Request) -> Result<Response> {
        let inner = self.inner.clone();

        tokio::task::spawn_blocking(move || inner.handle(request))
            .await
            .map_err(|e| Error::Join(e.to_string()))?
    }
}
