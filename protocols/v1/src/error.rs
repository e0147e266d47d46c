use crate::methods::MethodError;
use std::fmt;

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Method(MethodError),
    HexError(hex::FromHexError),
    /// A fixed width hex field had the wrong number of bytes.
    InvalidLength {
        expected: usize,
        actual: usize,
    },
    BadJson(serde_json::Error),
    InvalidJsonRpcMessageKind,
}

impl From<MethodError> for Error {
    fn from(inner: MethodError) -> Self {
        Error::Method(inner)
    }
}

impl From<hex::FromHexError> for Error {
    fn from(inner: hex::FromHexError) -> Self {
        Error::HexError(inner)
    }
}

impl From<serde_json::Error> for Error {
    fn from(inner: serde_json::Error) -> Self {
        Error::BadJson(inner)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Method(e) => write!(f, "Method error: `{e:?}`"),
            Error::HexError(e) => write!(f, "Bad hex encoding: `{e}`"),
            Error::InvalidLength { expected, actual } => {
                write!(f, "Invalid field length: expected {expected} bytes, got {actual}")
            }
            Error::BadJson(e) => write!(f, "Bad json: `{e}`"),
            Error::InvalidJsonRpcMessageKind => write!(f, "Invalid json-rpc message kind"),
        }
    }
}

impl std::error::Error for Error {}
