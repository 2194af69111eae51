use crate::config::Mode;
use crate::error::{Error, Result};

/// Every operation a dataset understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Open(Mode),
    Read { offset: u64, len: u64 },
    Write { offset: u64, data: Vec<u8> },
    Delete { offset: u64, len: u64 },
    Stat,
    Close,
    Destroy,
}

impl Request {
    /// Whether serving the request needs a read-write handle.
    pub fn needs_write(&self) -> bool {
        matches!(
            self,
            Request::Open(Mode::ReadWrite) | Request::Write { .. } | Request::Delete { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Done,
    Data(Vec<u8>),
    Stat(Stat),
}

impl Response {
    pub fn into_done(self) -> Result<()> {
        match self {
            Response::Done => Ok(()),
            other => Err(Error::UnexpectedResponse(other.kind())),
        }
    }

    pub fn into_data(self) -> Result<Vec<u8>> {
        match self {
            Response::Data(data) => Ok(data),
            other => Err(Error::UnexpectedResponse(other.kind())),
        }
    }

    pub fn into_stat(self) -> Result<Stat> {
        match self {
            Response::Stat(stat) => Ok(stat),
            other => Err(Error::UnexpectedResponse(other.kind())),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Response::Done => "done",
            Response::Data(_) => "data",
            Response::Stat(_) => "stat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Physical size of the content file, not the logical high-water mark.
    pub size: u64,
    pub block_size: u64,
    /// False for legacy files opened without an index.
    pub indexed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_delete_need_a_writable_handle() {
        assert!(Request::Write { offset: 0, data: vec![1] }.needs_write());
        assert!(Request::Delete { offset: 0, len: 1 }.needs_write());
        assert!(Request::Open(Mode::ReadWrite).needs_write());
        assert!(!Request::Open(Mode::ReadOnly).needs_write());
        assert!(!Request::Read { offset: 0, len: 1 }.needs_write());
    }

    #[test]
    fn test_mismatched_response_is_an_error() {
        assert!(matches!(
            Response::Done.into_data(),
            Err(Error::UnexpectedResponse("done"))
        ));
        assert_eq!(Response::Data(vec![1, 2]).into_data().unwrap(), vec![1, 2]);
    }
}
