use std::io;

use crate::bytes::DeserializeError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("channel {0} is out of range")]
    InvalidChannel(u8),
    #[error("channel {0} already set")]
    ChannelAlreadySet(u8),
    #[error("channel {0} has not been set up")]
    ChannelNotSet(u8),
    #[error("sub-packet of {0} bytes does not fit in a datagram")]
    SubPacketTooLarge(usize),
    #[error("message of {0} bytes is too large to send")]
    MessageTooLarge(usize),
    #[error("connection closed")]
    Closed,
    #[error("malformed datagram: {0}")]
    Decode(#[from] DeserializeError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
