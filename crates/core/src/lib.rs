//! Podline core: pod snapshot model and the STATUS resolver.

#![forbid(unsafe_code)]

pub mod model;
pub mod resolve;

pub use model::{
    ConditionStatus, ContainerState, ContainerStatus, InitContainerSpec, Phase, PodCondition, PodSnapshot, RestartPolicy,
};
pub use resolve::{explain, resolve, Resolution, RuleId, RULES};

pub mod prelude {
    pub use super::{
        explain, resolve, ConditionStatus, ContainerState, ContainerStatus, InitContainerSpec, Phase, PodCondition,
        PodSnapshot, Resolution, RuleId, SnapshotError,
    };
}

/// Failure to build a [`PodSnapshot`] from an external object. The resolver
/// itself never fails; these surface before it is invoked.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("expected kind Pod, got {kind}")]
    UnexpectedKind { kind: String },
    #[error("container {container} reports {count} states; expected exactly one")]
    AmbiguousState { container: String, count: usize },
    #[error("decoding pod object: {0}")]
    Decode(#[from] serde_json::Error),
}
