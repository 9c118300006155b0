use crate::bytes::{DeserializeError, Deserializer, Serializable, Serializer};

use super::{ClientSharedData, PeerId};

/// Leading byte of a session message that carries entity replication data.
pub(crate) const ENTITY_MESSAGE: u8 = 4;

/// Session management messages exchanged between a client and the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Hello { version: u32, name: String },
    Welcome { peer_id: PeerId, name: String },
    Reject { reason: String },
    SharedData(ClientSharedData),
    Disconnect,
}

impl ControlMessage {
    fn tag(&self) -> u8 {
        match self {
            ControlMessage::Hello { .. } => 0,
            ControlMessage::Welcome { .. } => 1,
            ControlMessage::Reject { .. } => 2,
            ControlMessage::SharedData(_) => 3,
            ControlMessage::Disconnect => 5,
        }
    }
}

impl Serializable for ControlMessage {
    fn serialize(&self, s: &mut Serializer) {
        s.write_u8(self.tag());
        match self {
            ControlMessage::Hello { version, name } => {
                s.write_u32(*version);
                s.write_str(name);
            }
            ControlMessage::Welcome { peer_id, name } => {
                s.write_u8(*peer_id);
                s.write_str(name);
            }
            ControlMessage::Reject { reason } => s.write_str(reason),
            ControlMessage::SharedData(data) => s.write(data),
            ControlMessage::Disconnect => {}
        }
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        match d.read_u8()? {
            0 => Ok(ControlMessage::Hello {
                version: d.read_u32()?,
                name: d.read_string()?,
            }),
            1 => Ok(ControlMessage::Welcome {
                peer_id: d.read_u8()?,
                name: d.read_string()?,
            }),
            2 => Ok(ControlMessage::Reject {
                reason: d.read_string()?,
            }),
            3 => Ok(ControlMessage::SharedData(d.read()?)),
            5 => Ok(ControlMessage::Disconnect),
            tag => Err(DeserializeError::InvalidTag {
                what: "session message",
                tag,
            }),
        }
    }
}

/// First header of an entity message, followed by the u16 network id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntityMessageType {
    Create = 0,
    Update = 1,
    Destroy = 2,
    KeepAlive = 3,
    ReadyToStart = 4,
}

impl TryFrom<u8> for EntityMessageType {
    type Error = DeserializeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => EntityMessageType::Create,
            1 => EntityMessageType::Update,
            2 => EntityMessageType::Destroy,
            3 => EntityMessageType::KeepAlive,
            4 => EntityMessageType::ReadyToStart,
            tag => {
                return Err(DeserializeError::InvalidTag {
                    what: "entity message",
                    tag,
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use glam::IVec2;

    use super::*;
    use crate::bytes::SerializerOptions;
    use crate::session::ViewRect;

    #[test]
    fn test_control_messages_roundtrip() {
        let options = SerializerOptions::new(1);
        let messages = [
            ControlMessage::Hello {
                version: 3,
                name: "alice".into(),
            },
            ControlMessage::SharedData(ClientSharedData {
                view_rect: Some(ViewRect::new(IVec2::new(-5, 0), IVec2::new(5, 10))),
            }),
            ControlMessage::Disconnect,
        ];
        for message in messages {
            let bytes = Serializer::to_bytes(&message, &options);
            assert_eq!(bytes[0], message.tag());
            let decoded: ControlMessage = Deserializer::from_bytes(&bytes, &options).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_entity_tag_is_not_a_control_message() {
        let options = SerializerOptions::new(1);
        let result = Deserializer::from_bytes::<ControlMessage>(&[ENTITY_MESSAGE], &options);
        assert!(matches!(result, Err(DeserializeError::InvalidTag { tag: 4, .. })));
        assert!(EntityMessageType::try_from(9).is_err());
    }
}
