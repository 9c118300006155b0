mod dead_reckoning;
mod lerp;
mod quantize;
mod set;

pub use dead_reckoning::DeadReckoningInterpolator;
pub use lerp::LerpDataInterpolator;
pub use quantize::QuantizingDataInterpolator;
pub use set::{DataInterpolatorSet, DataInterpolatorSetRetriever};

use glam::Vec2;

use crate::config::ConfigNode;

/// Per-field strategy for how a replicated value is sent and how received
/// values reach the live entity.
pub trait DataInterpolator {
    /// Sender side. `Some(value)` replaces `to` before diffing; returning
    /// `from` suppresses the change.
    fn prepare_field_for_serialization(
        &self,
        _from: &ConfigNode,
        _to: &ConfigNode,
    ) -> Option<ConfigNode> {
        None
    }

    /// Receiver side. Returns the value to write now; `current` is what the
    /// entity holds, `incoming` is the newly received value.
    fn deserialize(&mut self, _current: &ConfigNode, incoming: &ConfigNode) -> ConfigNode {
        incoming.clone()
    }

    fn update(&mut self, _dt: f32, _value: &mut ConfigNode) {}
}

/// Field value types the built-in interpolators understand.
pub trait InterpolatedValue: Copy + PartialEq {
    fn from_node(node: &ConfigNode) -> Option<Self>;
    fn to_node(self) -> ConfigNode;
    fn lerp(self, other: Self, t: f32) -> Self;
    fn quantize(self, step: f32) -> Self;
}

fn quantize_scalar(value: f32, step: f32) -> f32 {
    if step > 0.0 {
        (value / step).round() * step
    } else {
        value
    }
}

impl InterpolatedValue for f32 {
    fn from_node(node: &ConfigNode) -> Option<Self> {
        node.as_float()
    }

    fn to_node(self) -> ConfigNode {
        ConfigNode::Float(self)
    }

    fn lerp(self, other: Self, t: f32) -> Self {
        self + (other - self) * t
    }

    fn quantize(self, step: f32) -> Self {
        quantize_scalar(self, step)
    }
}

impl InterpolatedValue for Vec2 {
    fn from_node(node: &ConfigNode) -> Option<Self> {
        node.as_vec2()
    }

    fn to_node(self) -> ConfigNode {
        ConfigNode::Float2(self)
    }

    fn lerp(self, other: Self, t: f32) -> Self {
        Vec2::lerp(self, other, t)
    }

    fn quantize(self, step: f32) -> Self {
        Vec2::new(quantize_scalar(self.x, step), quantize_scalar(self.y, step))
    }
}
