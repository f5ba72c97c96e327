//! Error type shared by every layer, from XDR decoding up to the file writer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The RPC layer rejected or could not decode a call
    #[error("RPC error: {0}")]
    Rpc(String),

    /// A VXI-11 operation returned a non-zero device error code
    #[error("device error {code} during {op}: {msg}")]
    Device { op: &'static str, code: i32, msg: &'static str },

    /// The instrument answered, but not in the shape we expected
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid parameter: {0}")]
    Parameter(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unable to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

pub(crate) fn protocol<S: Into<String>>(msg: S) -> Error { Error::Protocol(msg.into()) }

pub(crate) fn rpc<S: Into<String>>(msg: S) -> Error { Error::Rpc(msg.into()) }
