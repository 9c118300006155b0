use glam::IVec2;
use serde::{Deserialize, Serialize};

use crate::bytes::{DeserializeError, Deserializer, Serializable, Serializer};

/// Axis-aligned integer rectangle, `min` inclusive and `max` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewRect {
    pub min: IVec2,
    pub max: IVec2,
}

impl ViewRect {
    pub fn new(min: IVec2, max: IVec2) -> Self {
        Self { min, max }
    }

    pub fn from_center(center: IVec2, half_size: IVec2) -> Self {
        Self::new(center - half_size, center + half_size)
    }

    pub fn size(&self) -> IVec2 {
        self.max - self.min
    }

    pub fn grow(&self, amount: i32) -> Self {
        Self::new(self.min - IVec2::splat(amount), self.max + IVec2::splat(amount))
    }

    pub fn contains(&self, point: IVec2) -> bool {
        point.cmpge(self.min).all() && point.cmplt(self.max).all()
    }
}

impl Serializable for ViewRect {
    fn serialize(&self, s: &mut Serializer) {
        s.write(&self.min);
        s.write(&self.max);
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        Ok(Self {
            min: d.read()?,
            max: d.read()?,
        })
    }
}

/// State every client publishes to the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSharedData {
    /// Region the client wants entities replicated for. Nothing is sent to
    /// a client until it sets one.
    pub view_rect: Option<ViewRect>,
}

impl Serializable for ClientSharedData {
    fn serialize(&self, s: &mut Serializer) {
        s.write(&self.view_rect);
    }

    fn deserialize(d: &mut Deserializer<'_>) -> Result<Self, DeserializeError> {
        Ok(Self {
            view_rect: d.read()?,
        })
    }
}
