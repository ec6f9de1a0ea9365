use std::convert::From;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::result;
use std::{io, sync};

/// StatusCode describes various failure modes of memtable operations.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(dead_code)]
pub enum StatusCode {
    OK,

    AlreadyExists,
    Corruption,
    IOError,
    InvalidArgument,
    InvalidData,
    LockError,
    NotFound,
    NotSupported,
    Unknown,
}

/// Status encapsulates a `StatusCode` and an error message. It can be displayed, and also
/// implements `Error`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub code: StatusCode,
    pub err: String,
}

impl Default for Status {
    fn default() -> Status {
        Status {
            code: StatusCode::OK,
            err: String::new(),
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter) -> result::Result<(), fmt::Error> {
        fmt.write_str(&self.err)
    }
}

impl Error for Status {}

impl Status {
    pub fn new(code: StatusCode, msg: &str) -> Status {
        let err = if msg.is_empty() {
            format!("{:?}", code)
        } else {
            format!("{:?}: {}", code, msg)
        };
        Status { code, err }
    }

    pub fn ok() -> Status {
        Status::default()
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::OK
    }

    pub fn annotate<S: AsRef<str>>(self, msg: S) -> Status {
        Status {
            code: self.code,
            err: format!("{}: {}", msg.as_ref(), self.err),
        }
    }
}

/// This crate's result type.
pub type Result<T> = result::Result<T, Status>;

impl From<io::Error> for Status {
    fn from(e: io::Error) -> Status {
        let c = match e.kind() {
            io::ErrorKind::NotFound => StatusCode::NotFound,
            io::ErrorKind::InvalidData => StatusCode::Corruption,
            io::ErrorKind::InvalidInput => StatusCode::InvalidArgument,
            _ => StatusCode::IOError,
        };

        Status::new(c, &e.to_string())
    }
}

impl<T> From<sync::PoisonError<T>> for Status {
    fn from(_: sync::PoisonError<T>) -> Status {
        Status::new(StatusCode::LockError, "lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        let s = Status::new(StatusCode::Corruption, "truncated batch");
        assert_eq!(format!("{}", s), "Corruption: truncated batch");
        assert!(!s.is_ok());
        assert!(Status::ok().is_ok());
    }
}
