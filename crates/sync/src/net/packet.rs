use crate::bytes::{DeserializeError, Deserializer, Serializable, Serializer, SerializerOptions};

/// Message being built for sending. Each layer prepends its own header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundPacket {
    data: Vec<u8>,
}

impl OutboundPacket {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn add_header(&mut self, header: &[u8]) {
        self.data.splice(0..0, header.iter().copied());
    }

    pub fn add_header_value<T: Serializable>(&mut self, header: &T, options: &SerializerOptions) {
        let bytes = Serializer::to_bytes(header, options);
        self.add_header(&bytes);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for OutboundPacket {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Received message. Headers are consumed from the front.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundPacket {
    data: Vec<u8>,
    pos: usize,
}

impl InboundPacket {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Unconsumed bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn extract_header<T: Serializable>(
        &mut self,
        options: &SerializerOptions,
    ) -> Result<T, DeserializeError> {
        let mut d = Deserializer::new(self.bytes(), options.clone());
        let header = d.read()?;
        self.pos += d.position();
        Ok(header)
    }
}

impl From<Vec<u8>> for InboundPacket {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_stack() {
        let options = SerializerOptions::new(1);
        let mut packet = OutboundPacket::new(b"body".to_vec());
        packet.add_header_value(&7u16, &options);
        packet.add_header_value(&3u8, &options);

        let mut inbound = InboundPacket::new(packet.into_bytes());
        assert_eq!(inbound.extract_header::<u8>(&options).unwrap(), 3);
        assert_eq!(inbound.extract_header::<u16>(&options).unwrap(), 7);
        assert_eq!(inbound.bytes(), b"body");
    }

    #[test]
    fn test_truncated_header() {
        let options = SerializerOptions::new(0);
        let mut inbound = InboundPacket::new(vec![1]);
        assert!(inbound.extract_header::<u32>(&options).is_err());
        assert_eq!(inbound.len(), 1);
    }
}
