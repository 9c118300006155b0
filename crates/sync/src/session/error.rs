use crate::bytes::DeserializeError;
use crate::entity::EntityError;
use crate::net::NetError;

use super::PeerId;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no free network ids left")]
    NetworkIdsExhausted,
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("malformed message: {0}")]
    Decode(#[from] DeserializeError),
    #[error(transparent)]
    Entity(#[from] EntityError),
    #[error(transparent)]
    Net(#[from] NetError),
}
