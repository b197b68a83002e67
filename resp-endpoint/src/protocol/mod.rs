//! RESP wire protocol
//!
//! Command framing ([`CommandArgs`]), the resumable reply decoder
//! ([`RespDecoder`]) and a value encoder for replies ([`RespEncoder`]).

pub mod args;
pub mod decoder;
pub mod encoder;

pub use args::{CommandArg, CommandArgs};
pub use decoder::RespDecoder;
pub use encoder::RespEncoder;
