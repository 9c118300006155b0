use std::marker::PhantomData;

use crate::config::ConfigNode;

use super::{DataInterpolator, InterpolatedValue};

/// Ignores changes smaller than one quantization step, both when sending and
/// when receiving.
pub struct QuantizingDataInterpolator<T> {
    step: f32,
    _value: PhantomData<T>,
}

impl<T: InterpolatedValue> QuantizingDataInterpolator<T> {
    pub fn new(step: f32) -> Self {
        Self {
            step,
            _value: PhantomData,
        }
    }

    fn same_step(&self, a: &ConfigNode, b: &ConfigNode) -> bool {
        match (T::from_node(a), T::from_node(b)) {
            (Some(a), Some(b)) => a.quantize(self.step) == b.quantize(self.step),
            _ => false,
        }
    }
}

impl<T: InterpolatedValue> DataInterpolator for QuantizingDataInterpolator<T> {
    fn prepare_field_for_serialization(
        &self,
        from: &ConfigNode,
        to: &ConfigNode,
    ) -> Option<ConfigNode> {
        self.same_step(from, to).then(|| from.clone())
    }

    fn deserialize(&mut self, current: &ConfigNode, incoming: &ConfigNode) -> ConfigNode {
        if self.same_step(current, incoming) {
            current.clone()
        } else {
            incoming.clone()
        }
    }
}
