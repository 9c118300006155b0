use std::collections::BTreeMap;
use std::sync::Arc;

use glam::{IVec2, Vec2};
use uuid::Uuid;

use super::{DeserializeError, SerializationDictionary};

/// Highest wire version understood by this build.
pub const CURRENT_VERSION: u8 = 1;

const MAX_DEPTH: usize = 128;

/// Version 0 writes integers fixed-width little-endian. Version 1 and above
/// writes them as variable-length integers. Blobs do not record the version.
#[derive(Debug, Clone, Default)]
pub struct SerializerOptions {
    pub version: u8,
    pub dictionary: Option<Arc<SerializationDictionary>>,
}

impl SerializerOptions {
    pub fn new(version: u8) -> Self {
        Self {
            version,
            dictionary: None,
        }
    }

    pub fn with_dictionary(mut self, dictionary: Arc<SerializationDictionary>) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    pub fn uses_var_ints(&self) -> bool {
        self.version >= 1
    }
}

pub trait Serializable: Sized {
    fn serialize(&self, s: &mut Serializer);
    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError>;
}

#[derive(Debug, Default)]
pub struct Serializer {
    buf: Vec<u8>,
    options: SerializerOptions,
}

impl Serializer {
    pub fn new(options: SerializerOptions) -> Self {
        Self {
            buf: Vec::new(),
            options,
        }
    }

    pub fn to_bytes<T: Serializable>(value: &T, options: &SerializerOptions) -> Vec<u8> {
        let mut s = Self::new(options.clone());
        value.serialize(&mut s);
        s.into_bytes()
    }

    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    pub fn version(&self) -> u8 {
        self.options.version
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write<T: Serializable>(&mut self, value: &T) {
        value.serialize(self);
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_unsigned(value as u64, 2);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_unsigned(value as u64, 4);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_unsigned(value, 8);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_signed(value as i64, 2);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_signed(value as i64, 4);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_signed(value, 8);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_len(&mut self, len: usize) {
        self.write_u32(len as u32);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_len(bytes.len());
        self.write_raw(bytes);
    }

    pub fn write_str(&mut self, value: &str) {
        let index = self
            .options
            .dictionary
            .as_ref()
            .map(|dict| dict.string_to_index(value));

        match index {
            Some(Some(index)) => self.write_u32(((index as u32) << 1) | 1),
            Some(None) => {
                self.write_u32((value.len() as u32) << 1);
                self.write_raw(value.as_bytes());
            }
            None => self.write_bytes(value.as_bytes()),
        }
    }

    fn write_unsigned(&mut self, value: u64, width: usize) {
        if self.options.uses_var_ints() {
            self.write_var_int(value, None);
        } else {
            self.buf.extend_from_slice(&value.to_le_bytes()[..width]);
        }
    }

    fn write_signed(&mut self, value: i64, width: usize) {
        if self.options.uses_var_ints() {
            // Negative values store !v, which is -(v + 1).
            let negative = value < 0;
            let magnitude = (if negative { !value } else { value }) as u64;
            self.write_var_int(magnitude, Some(negative));
        } else {
            self.buf
                .extend_from_slice(&(value as u64).to_le_bytes()[..width]);
        }
    }

    // First byte: bit 7 continues, bit 6 is the sign for signed values.
    fn write_var_int(&mut self, mut value: u64, sign: Option<bool>) {
        let (bits, mut first) = match sign {
            Some(true) => (6, 0x40u8),
            Some(false) => (6, 0),
            None => (7, 0),
        };

        first |= (value & ((1u64 << bits) - 1)) as u8;
        value >>= bits;
        if value != 0 {
            first |= 0x80;
        }
        self.buf.push(first);

        while value != 0 {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
        }
    }
}

#[derive(Debug)]
pub struct Deserializer<'a> {
    data: &'a [u8],
    pos: usize,
    options: SerializerOptions,
    depth: usize,
}

impl<'a> Deserializer<'a> {
    pub fn new(data: &'a [u8], options: SerializerOptions) -> Self {
        Self {
            data,
            pos: 0,
            options,
            depth: 0,
        }
    }

    pub fn from_bytes<T: Serializable>(
        data: &[u8],
        options: &SerializerOptions,
    ) -> Result<T, DeserializeError> {
        let mut d = Deserializer::new(data, options.clone());
        T::deserialize(&mut d)
    }

    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    pub fn version(&self) -> u8 {
        self.options.version
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read<T: Serializable>(&mut self) -> Result<T, DeserializeError> {
        T::deserialize(self)
    }

    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8], DeserializeError> {
        if len > self.remaining() {
            return Err(DeserializeError::UnexpectedEnd {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Consumes everything left in the buffer.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    pub fn read_u8(&mut self) -> Result<u8, DeserializeError> {
        Ok(self.read_raw(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, DeserializeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(DeserializeError::InvalidTag { what: "bool", tag }),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, DeserializeError> {
        let value = self.read_unsigned(2)?;
        u16::try_from(value).map_err(|_| DeserializeError::IntegerOverflow("u16"))
    }

    pub fn read_u32(&mut self) -> Result<u32, DeserializeError> {
        let value = self.read_unsigned(4)?;
        u32::try_from(value).map_err(|_| DeserializeError::IntegerOverflow("u32"))
    }

    pub fn read_u64(&mut self) -> Result<u64, DeserializeError> {
        self.read_unsigned(8)
    }

    pub fn read_i16(&mut self) -> Result<i16, DeserializeError> {
        let value = self.read_signed(2)?;
        i16::try_from(value).map_err(|_| DeserializeError::IntegerOverflow("i16"))
    }

    pub fn read_i32(&mut self) -> Result<i32, DeserializeError> {
        let value = self.read_signed(4)?;
        i32::try_from(value).map_err(|_| DeserializeError::IntegerOverflow("i32"))
    }

    pub fn read_i64(&mut self) -> Result<i64, DeserializeError> {
        self.read_signed(8)
    }

    pub fn read_f32(&mut self) -> Result<f32, DeserializeError> {
        let bytes = self.read_raw(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_f64(&mut self) -> Result<f64, DeserializeError> {
        let bytes = self.read_raw(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    /// Reads a container length and checks it against the bytes left, so a
    /// corrupt length cannot trigger a huge allocation.
    pub fn read_len(&mut self) -> Result<usize, DeserializeError> {
        let length = self.read_u32()? as usize;
        self.check_len(length)?;
        Ok(length)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, DeserializeError> {
        let len = self.read_len()?;
        Ok(self.read_raw(len)?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, DeserializeError> {
        let len = match self.options.dictionary.clone() {
            Some(dict) => {
                let header = self.read_u32()? as usize;
                if header & 1 == 1 {
                    let index = header >> 1;
                    return dict
                        .index_to_string(index)
                        .map(str::to_owned)
                        .ok_or(DeserializeError::UnknownDictionaryIndex(index));
                }
                let len = header >> 1;
                self.check_len(len)?;
                len
            }
            None => self.read_len()?,
        };

        let bytes = self.read_raw(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DeserializeError::InvalidUtf8)
    }

    /// Guards recursive structures against stack exhaustion. Pair with [`Self::leave`].
    pub fn enter(&mut self) -> Result<(), DeserializeError> {
        if self.depth >= MAX_DEPTH {
            return Err(DeserializeError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn check_len(&self, length: usize) -> Result<(), DeserializeError> {
        if length > self.remaining() {
            return Err(DeserializeError::LengthTooLarge {
                length,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    fn read_unsigned(&mut self, width: usize) -> Result<u64, DeserializeError> {
        if self.options.uses_var_ints() {
            let (value, _) = self.read_var_int(false)?;
            Ok(value)
        } else {
            let bytes = self.read_raw(width)?;
            let mut raw = [0u8; 8];
            raw[..width].copy_from_slice(bytes);
            Ok(u64::from_le_bytes(raw))
        }
    }

    fn read_signed(&mut self, width: usize) -> Result<i64, DeserializeError> {
        if self.options.uses_var_ints() {
            let (magnitude, negative) = self.read_var_int(true)?;
            let magnitude =
                i64::try_from(magnitude).map_err(|_| DeserializeError::IntegerOverflow("i64"))?;
            Ok(if negative { !magnitude } else { magnitude })
        } else {
            let bytes = self.read_raw(width)?;
            let mut raw = [0u8; 8];
            raw[..width].copy_from_slice(bytes);
            let shift = 64 - 8 * width as u32;
            Ok(((u64::from_le_bytes(raw) << shift) as i64) >> shift)
        }
    }

    fn read_var_int(&mut self, signed: bool) -> Result<(u64, bool), DeserializeError> {
        let first = self.read_u8()?;
        let bits: u32 = if signed { 6 } else { 7 };
        let negative = signed && first & 0x40 != 0;

        let mut value = (first & ((1u8 << bits) - 1)) as u64;
        let mut shift = bits;
        let mut more = first & 0x80 != 0;

        while more {
            if shift >= 64 {
                return Err(DeserializeError::VarIntOverflow);
            }
            let byte = self.read_u8()?;
            let chunk = (byte & 0x7F) as u64;
            if shift > 57 && chunk >> (64 - shift) != 0 {
                return Err(DeserializeError::VarIntOverflow);
            }
            value |= chunk << shift;
            shift += 7;
            more = byte & 0x80 != 0;
        }

        Ok((value, negative))
    }
}

macro_rules! impl_serializable_primitive {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        $(
            impl Serializable for $ty {
                fn serialize(&self, s: &mut Serializer) {
                    s.$write(*self);
                }

                fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
                    d.$read()
                }
            }
        )*
    };
}

impl_serializable_primitive! {
    bool => write_bool, read_bool;
    u8 => write_u8, read_u8;
    u16 => write_u16, read_u16;
    u32 => write_u32, read_u32;
    u64 => write_u64, read_u64;
    i16 => write_i16, read_i16;
    i32 => write_i32, read_i32;
    i64 => write_i64, read_i64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
}

impl Serializable for String {
    fn serialize(&self, s: &mut Serializer) {
        s.write_str(self);
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        d.read_string()
    }
}

impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, s: &mut Serializer) {
        s.write_len(self.len());
        for item in self {
            item.serialize(s);
        }
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        let len = d.read_len()?;
        let mut result = Vec::with_capacity(len);
        for _ in 0..len {
            result.push(T::deserialize(d)?);
        }
        Ok(result)
    }
}

impl<T: Serializable> Serializable for Option<T> {
    fn serialize(&self, s: &mut Serializer) {
        s.write_bool(self.is_some());
        if let Some(value) = self {
            value.serialize(s);
        }
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        if d.read_bool()? {
            Ok(Some(T::deserialize(d)?))
        } else {
            Ok(None)
        }
    }
}

impl<K: Serializable + Ord, V: Serializable> Serializable for BTreeMap<K, V> {
    fn serialize(&self, s: &mut Serializer) {
        s.write_len(self.len());
        for (key, value) in self {
            key.serialize(s);
            value.serialize(s);
        }
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        let len = d.read_len()?;
        let mut result = BTreeMap::new();
        for _ in 0..len {
            let key = K::deserialize(d)?;
            let value = V::deserialize(d)?;
            result.insert(key, value);
        }
        Ok(result)
    }
}

impl<A: Serializable, B: Serializable> Serializable for (A, B) {
    fn serialize(&self, s: &mut Serializer) {
        self.0.serialize(s);
        self.1.serialize(s);
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        Ok((A::deserialize(d)?, B::deserialize(d)?))
    }
}

impl Serializable for Vec2 {
    fn serialize(&self, s: &mut Serializer) {
        s.write_f32(self.x);
        s.write_f32(self.y);
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        Ok(Vec2::new(d.read_f32()?, d.read_f32()?))
    }
}

impl Serializable for IVec2 {
    fn serialize(&self, s: &mut Serializer) {
        s.write_i32(self.x);
        s.write_i32(self.y);
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        Ok(IVec2::new(d.read_i32()?, d.read_i32()?))
    }
}

impl Serializable for Uuid {
    fn serialize(&self, s: &mut Serializer) {
        s.write_raw(self.as_bytes());
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        let bytes = d.read_raw(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ok(Uuid::from_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v0() -> SerializerOptions {
        SerializerOptions::new(0)
    }

    fn v1() -> SerializerOptions {
        SerializerOptions::new(1)
    }

    #[test]
    fn test_fixed_width_little_endian() {
        assert_eq!(Serializer::to_bytes(&0x1234u16, &v0()), vec![0x34, 0x12]);
        assert_eq!(
            Serializer::to_bytes(&-2i32, &v0()),
            vec![0xFE, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(Deserializer::from_bytes::<i32>(&[0xFE, 0xFF, 0xFF, 0xFF], &v0()), Ok(-2));
    }

    #[test]
    fn test_var_int_unsigned_layout() {
        assert_eq!(Serializer::to_bytes(&5u32, &v1()), vec![5]);
        assert_eq!(Serializer::to_bytes(&300u32, &v1()), vec![0xAC, 0x02]);
        assert_eq!(Deserializer::from_bytes::<u32>(&[0xAC, 0x02], &v1()), Ok(300));
    }

    #[test]
    fn test_var_int_sign_flag() {
        assert_eq!(Serializer::to_bytes(&63i32, &v1()), vec![0x3F]);
        assert_eq!(Serializer::to_bytes(&64i32, &v1()), vec![0x80, 0x01]);
        assert_eq!(Serializer::to_bytes(&-1i32, &v1()), vec![0x40]);
        assert_eq!(Serializer::to_bytes(&-65i32, &v1()), vec![0xC0, 0x01]);
        assert_eq!(Deserializer::from_bytes::<i32>(&[0xC0, 0x01], &v1()), Ok(-65));
    }

    #[test]
    fn test_extreme_values() {
        for options in [v0(), v1()] {
            for value in [i64::MIN, -1, 0, 1, i64::MAX] {
                let bytes = Serializer::to_bytes(&value, &options);
                assert_eq!(Deserializer::from_bytes::<i64>(&bytes, &options), Ok(value));
            }
            let bytes = Serializer::to_bytes(&u64::MAX, &options);
            assert_eq!(Deserializer::from_bytes::<u64>(&bytes, &options), Ok(u64::MAX));
        }
    }

    #[test]
    fn test_narrowing_overflow() {
        let bytes = Serializer::to_bytes(&70_000u32, &v1());
        assert_eq!(
            Deserializer::from_bytes::<u16>(&bytes, &v1()),
            Err(DeserializeError::IntegerOverflow("u16"))
        );
    }

    #[test]
    fn test_truncated_input() {
        let result = Deserializer::from_bytes::<u32>(&[0x01, 0x02], &v0());
        assert_eq!(
            result,
            Err(DeserializeError::UnexpectedEnd {
                needed: 4,
                remaining: 2
            })
        );
        assert!(Deserializer::from_bytes::<u32>(&[0x80], &v1()).is_err());
    }

    #[test]
    fn test_length_sanity() {
        let mut s = Serializer::new(v1());
        s.write_u32(1000);
        s.write_raw(&[1, 2, 3]);
        let bytes = s.into_bytes();

        let result = Deserializer::from_bytes::<Vec<u8>>(&bytes, &v1());
        assert!(matches!(
            result,
            Err(DeserializeError::LengthTooLarge { length: 1000, .. })
        ));
    }

    #[test]
    fn test_var_int_overflow_rejected() {
        let bytes = [0xFF; 12];
        assert_eq!(
            Deserializer::from_bytes::<u64>(&bytes, &v1()),
            Err(DeserializeError::VarIntOverflow)
        );
    }

    #[test]
    fn test_containers() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), vec![1i32, -2, 3]);
        map.insert("b".to_string(), Vec::new());
        let value = (Some(Vec2::new(1.5, -2.0)), map);

        let bytes = Serializer::to_bytes(&value, &v1());
        let back: (Option<Vec2>, BTreeMap<String, Vec<i32>>) =
            Deserializer::from_bytes(&bytes, &v1()).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_dictionary_strings() {
        let mut dict = SerializationDictionary::new();
        dict.add_entry("Transform");
        let options = v1().with_dictionary(Arc::new(dict));

        let bytes = Serializer::to_bytes(&"Transform".to_string(), &options);
        assert_eq!(bytes, vec![0x01]);

        let bytes = Serializer::to_bytes(&"Sprite".to_string(), &options);
        assert_eq!(bytes[0], 6 << 1);
        assert_eq!(
            Deserializer::from_bytes::<String>(&bytes, &options).unwrap(),
            "Sprite"
        );

        assert_eq!(
            Deserializer::from_bytes::<String>(&[0x05], &options),
            Err(DeserializeError::UnknownDictionaryIndex(2))
        );
    }

    #[test]
    fn test_uuid_raw_bytes() {
        let id = Uuid::new_v4();
        let bytes = Serializer::to_bytes(&id, &v1());
        assert_eq!(bytes.len(), 16);
        assert_eq!(Deserializer::from_bytes::<Uuid>(&bytes, &v1()), Ok(id));
    }
}
