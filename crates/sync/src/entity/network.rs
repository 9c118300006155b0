use crate::interpolation::DataInterpolatorSet;
use crate::session::PeerId;

/// Marks a root entity as replicated. Entities without it are never sent.
#[derive(Debug, Default)]
pub struct NetworkComponent {
    /// `None` for entities created by this session, otherwise the peer the
    /// entity was received from.
    pub owner: Option<PeerId>,
    pub interpolators: DataInterpolatorSet,
}

impl NetworkComponent {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn remote(owner: PeerId) -> Self {
        Self {
            owner: Some(owner),
            interpolators: DataInterpolatorSet::default(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.owner.is_some()
    }

    pub fn owner_or(&self, local: PeerId) -> PeerId {
        self.owner.unwrap_or(local)
    }
}
