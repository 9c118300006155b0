use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec2;

use crate::config::ConfigNode;

use super::DataInterpolator;

#[derive(Debug, Default)]
struct Model {
    position: Vec2,
    velocity: Vec2,
    receiving: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Position,
    Velocity,
}

/// Extrapolates a position from its velocity between updates.
///
/// Created in pairs sharing one model: the position half goes on the
/// position field and the velocity half on the velocity field. The sender
/// runs the same model and only sends a position once the real one drifts
/// more than `threshold` away from the extrapolation.
pub struct DeadReckoningInterpolator {
    field: Field,
    threshold: f32,
    model: Rc<RefCell<Model>>,
}

impl DeadReckoningInterpolator {
    pub fn pair(threshold: f32) -> (Self, Self) {
        let model = Rc::new(RefCell::new(Model::default()));
        (
            Self {
                field: Field::Position,
                threshold,
                model: model.clone(),
            },
            Self {
                field: Field::Velocity,
                threshold,
                model,
            },
        )
    }

    pub fn model_position(&self) -> Vec2 {
        self.model.borrow().position
    }
}

impl DataInterpolator for DeadReckoningInterpolator {
    fn prepare_field_for_serialization(
        &self,
        from: &ConfigNode,
        to: &ConfigNode,
    ) -> Option<ConfigNode> {
        let value = to.as_vec2()?;
        let mut model = self.model.borrow_mut();
        match self.field {
            Field::Position => {
                if model.position.distance(value) <= self.threshold {
                    return Some(from.clone());
                }
                model.position = value;
            }
            Field::Velocity => model.velocity = value,
        }
        None
    }

    fn deserialize(&mut self, _current: &ConfigNode, incoming: &ConfigNode) -> ConfigNode {
        if let Some(value) = incoming.as_vec2() {
            let mut model = self.model.borrow_mut();
            match self.field {
                Field::Position => model.position = value,
                Field::Velocity => model.velocity = value,
            }
            model.receiving = true;
        }
        incoming.clone()
    }

    fn update(&mut self, dt: f32, value: &mut ConfigNode) {
        if self.field != Field::Position {
            return;
        }
        let mut model = self.model.borrow_mut();
        let velocity = model.velocity;
        model.position += velocity * dt;
        if model.receiving {
            *value = ConfigNode::Float2(model.position);
        }
    }
}
