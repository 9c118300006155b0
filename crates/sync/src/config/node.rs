use std::collections::BTreeMap;
use std::fmt;

use glam::{IVec2, Vec2};

use crate::bytes::{DeserializeError, Deserializer, Serializable, Serializer};

pub type ConfigMap = BTreeMap<String, ConfigNode>;
pub type ConfigSequence = Vec<ConfigNode>;

/// Dynamically typed value tree holding entity state.
///
/// `DeltaSequence`, `DeltaMap`, `Noop`, `Idx` and `Del` only appear inside
/// deltas produced by [`crate::config::create_delta`]; a snapshot never holds them.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConfigNode {
    #[default]
    Undefined,
    String(String),
    Int(i32),
    Float(f32),
    Int2(IVec2),
    Float2(Vec2),
    Bytes(Vec<u8>),
    Sequence(ConfigSequence),
    Map(ConfigMap),
    DeltaSequence(ConfigSequence),
    DeltaMap(ConfigMap),
    Noop,
    /// Copies `len` elements of the source sequence starting at `start`. With
    /// `len == 0` the next entry is a delta to apply to element `start`.
    Idx {
        start: u32,
        len: u32,
    },
    Del,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigNodeType {
    Undefined = 0,
    String = 1,
    Sequence = 2,
    Map = 3,
    Int = 4,
    Float = 5,
    Int2 = 6,
    Float2 = 7,
    Bytes = 8,
    DeltaSequence = 9,
    DeltaMap = 10,
    Noop = 11,
    Idx = 12,
    Del = 13,
}

impl ConfigNodeType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Undefined,
            1 => Self::String,
            2 => Self::Sequence,
            3 => Self::Map,
            4 => Self::Int,
            5 => Self::Float,
            6 => Self::Int2,
            7 => Self::Float2,
            8 => Self::Bytes,
            9 => Self::DeltaSequence,
            10 => Self::DeltaMap,
            11 => Self::Noop,
            12 => Self::Idx,
            13 => Self::Del,
            _ => return None,
        })
    }

    pub fn is_delta_only(self) -> bool {
        matches!(
            self,
            Self::DeltaSequence | Self::DeltaMap | Self::Noop | Self::Idx | Self::Del
        )
    }
}

static UNDEFINED: ConfigNode = ConfigNode::Undefined;

impl ConfigNode {
    pub fn empty_map() -> Self {
        Self::Map(ConfigMap::new())
    }

    pub fn node_type(&self) -> ConfigNodeType {
        match self {
            Self::Undefined => ConfigNodeType::Undefined,
            Self::String(_) => ConfigNodeType::String,
            Self::Int(_) => ConfigNodeType::Int,
            Self::Float(_) => ConfigNodeType::Float,
            Self::Int2(_) => ConfigNodeType::Int2,
            Self::Float2(_) => ConfigNodeType::Float2,
            Self::Bytes(_) => ConfigNodeType::Bytes,
            Self::Sequence(_) => ConfigNodeType::Sequence,
            Self::Map(_) => ConfigNodeType::Map,
            Self::DeltaSequence(_) => ConfigNodeType::DeltaSequence,
            Self::DeltaMap(_) => ConfigNodeType::DeltaMap,
            Self::Noop => ConfigNodeType::Noop,
            Self::Idx { .. } => ConfigNodeType::Idx,
            Self::Del => ConfigNodeType::Del,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::Noop)
    }

    pub fn is_null_or_empty(&self) -> bool {
        match self {
            Self::Undefined => true,
            Self::Map(map) => map.is_empty(),
            Self::Sequence(seq) => seq.is_empty(),
            _ => false,
        }
    }

    /// True if neither this node nor any descendant is a delta-only tag.
    pub fn is_snapshot(&self) -> bool {
        match self {
            Self::Map(map) => map.values().all(Self::is_snapshot),
            Self::Sequence(seq) => seq.iter().all(Self::is_snapshot),
            other => !other.node_type().is_delta_only(),
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i32),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<Vec2> {
        match self {
            Self::Float2(v) => Some(*v),
            Self::Int2(v) => Some(v.as_vec2()),
            _ => None,
        }
    }

    pub fn as_ivec2(&self) -> Option<IVec2> {
        match self {
            Self::Int2(v) => Some(*v),
            Self::Float2(v) => Some(v.as_ivec2()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ConfigMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut ConfigMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&ConfigSequence> {
        match self {
            Self::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    pub fn as_sequence_mut(&mut self) -> Option<&mut ConfigSequence> {
        match self {
            Self::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    /// Map lookup that yields `Undefined` for missing keys and non-maps.
    /// Delta maps are searched too.
    pub fn get(&self, key: &str) -> &ConfigNode {
        match self {
            Self::Map(map) | Self::DeltaMap(map) => map.get(key).unwrap_or(&UNDEFINED),
            _ => &UNDEFINED,
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ConfigNode> {
        self.as_map_mut().and_then(|map| map.get_mut(key))
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.as_map().is_some_and(|map| map.contains_key(key))
    }

    /// Turns this node into a map if it is not one already.
    pub fn ensure_map(&mut self) -> &mut ConfigMap {
        if !matches!(self, Self::Map(_)) {
            *self = Self::empty_map();
        }
        match self {
            Self::Map(map) => map,
            _ => unreachable!(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConfigNode>) {
        self.ensure_map().insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigNode> {
        self.as_map_mut().and_then(|map| map.remove(key))
    }
}

impl From<i32> for ConfigNode {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for ConfigNode {
    fn from(value: bool) -> Self {
        Self::Int(value as i32)
    }
}

impl From<f32> for ConfigNode {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ConfigNode {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for ConfigNode {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec2> for ConfigNode {
    fn from(value: Vec2) -> Self {
        Self::Float2(value)
    }
}

impl From<IVec2> for ConfigNode {
    fn from(value: IVec2) -> Self {
        Self::Int2(value)
    }
}

impl From<ConfigMap> for ConfigNode {
    fn from(value: ConfigMap) -> Self {
        Self::Map(value)
    }
}

impl From<ConfigSequence> for ConfigNode {
    fn from(value: ConfigSequence) -> Self {
        Self::Sequence(value)
    }
}

impl<K: Into<String>, V: Into<ConfigNode>> FromIterator<(K, V)> for ConfigNode {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for ConfigNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "~"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Int2(v) => write!(f, "({}, {})", v.x, v.y),
            Self::Float2(v) => write!(f, "({}, {})", v.x, v.y),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Sequence(seq) | Self::DeltaSequence(seq) => {
                if matches!(self, Self::DeltaSequence(_)) {
                    write!(f, "Δ")?;
                }
                write!(f, "[")?;
                for (i, item) in seq.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) | Self::DeltaMap(map) => {
                if matches!(self, Self::DeltaMap(_)) {
                    write!(f, "Δ")?;
                }
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Noop => write!(f, "noop"),
            Self::Idx { start, len } => write!(f, "idx({start}, {len})"),
            Self::Del => write!(f, "del"),
        }
    }
}

impl Serializable for ConfigNode {
    fn serialize(&self, s: &mut Serializer) {
        s.write_u8(self.node_type() as u8);
        match self {
            Self::Undefined | Self::Noop | Self::Del => {}
            Self::String(v) => s.write_str(v),
            Self::Int(v) => s.write_i32(*v),
            Self::Float(v) => s.write_f32(*v),
            Self::Int2(v) => v.serialize(s),
            Self::Float2(v) => v.serialize(s),
            Self::Bytes(v) => s.write_bytes(v),
            Self::Sequence(seq) | Self::DeltaSequence(seq) => seq.serialize(s),
            Self::Map(map) | Self::DeltaMap(map) => map.serialize(s),
            Self::Idx { start, len } => {
                s.write_u32(*start);
                s.write_u32(*len);
            }
        }
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        let tag = d.read_u8()?;
        let node_type = ConfigNodeType::from_u8(tag)
            .ok_or(DeserializeError::InvalidTag { what: "config node", tag })?;

        Ok(match node_type {
            ConfigNodeType::Undefined => Self::Undefined,
            ConfigNodeType::Noop => Self::Noop,
            ConfigNodeType::Del => Self::Del,
            ConfigNodeType::String => Self::String(d.read_string()?),
            ConfigNodeType::Int => Self::Int(d.read_i32()?),
            ConfigNodeType::Float => Self::Float(d.read_f32()?),
            ConfigNodeType::Int2 => Self::Int2(d.read()?),
            ConfigNodeType::Float2 => Self::Float2(d.read()?),
            ConfigNodeType::Bytes => Self::Bytes(d.read_bytes()?),
            ConfigNodeType::Sequence => Self::Sequence(read_nested(d)?),
            ConfigNodeType::DeltaSequence => Self::DeltaSequence(read_nested(d)?),
            ConfigNodeType::Map => Self::Map(read_nested(d)?),
            ConfigNodeType::DeltaMap => Self::DeltaMap(read_nested(d)?),
            ConfigNodeType::Idx => Self::Idx {
                start: d.read_u32()?,
                len: d.read_u32()?,
            },
        })
    }
}

fn read_nested<T: Serializable>(d: &mut Deserializer<'_>) -> Result<T, DeserializeError> {
    d.enter()?;
    let result = T::deserialize(d);
    d.leave();
    result
}
