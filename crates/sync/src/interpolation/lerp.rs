use crate::config::ConfigNode;

use super::{DataInterpolator, InterpolatedValue};

/// Blends from the displayed value to each received value over `length`
/// seconds instead of snapping.
pub struct LerpDataInterpolator<T> {
    length: f32,
    from: Option<T>,
    to: Option<T>,
    elapsed: f32,
}

impl<T: InterpolatedValue> LerpDataInterpolator<T> {
    pub fn new(length: f32) -> Self {
        Self {
            length,
            from: None,
            to: None,
            elapsed: 0.0,
        }
    }

    pub fn is_blending(&self) -> bool {
        self.to.is_some()
    }
}

impl<T: InterpolatedValue> DataInterpolator for LerpDataInterpolator<T> {
    fn deserialize(&mut self, current: &ConfigNode, incoming: &ConfigNode) -> ConfigNode {
        let (Some(from), Some(to)) = (T::from_node(current), T::from_node(incoming)) else {
            self.to = None;
            return incoming.clone();
        };
        if self.length <= 0.0 {
            self.to = None;
            return incoming.clone();
        }

        self.from = Some(from);
        self.to = Some(to);
        self.elapsed = 0.0;
        current.clone()
    }

    fn update(&mut self, dt: f32, value: &mut ConfigNode) {
        let (Some(from), Some(to)) = (self.from, self.to) else {
            return;
        };
        self.elapsed = (self.elapsed + dt).min(self.length);
        let t = self.elapsed / self.length;
        *value = from.lerp(to, t).to_node();
        if t >= 1.0 {
            self.to = None;
        }
    }
}
