// src/topology/plan.rs

//! Creation order and per-worker spawn plans.

use crate::pipeline::PipelineSpec;
use crate::topology::registry::{PeerRef, WorkerRegistry};
use crate::types::Stage;

/// What the backend needs to start one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnPlan {
    pub stage: Stage,
    pub index: usize,
    pub next: Option<PeerRef>,
    pub after_next: Option<PeerRef>,
}

impl SpawnPlan {
    /// Resolve downstream peers against the workers that are live *now*.
    ///
    /// Peers are looked up at planning time rather than cached from the
    /// predecessor, so a restarted worker is wired to whichever downstream
    /// workers currently exist.
    pub fn resolve(stage: Stage, index: usize, registry: &WorkerRegistry) -> Self {
        let next_stage = stage.downstream();
        let next = next_stage
            .and_then(|s| registry.latest_of(s))
            .map(|w| w.as_peer());

        let after_next = match stage {
            Stage::Left => next_stage
                .and_then(Stage::downstream)
                .and_then(|s| registry.latest_of(s))
                .map(|w| w.as_peer()),
            Stage::Center | Stage::Right => None,
        };

        Self {
            stage,
            index,
            next,
            after_next,
        }
    }
}

/// The full initial creation sequence: every right worker, then every center
/// worker, then every left worker.
///
/// The order is load-bearing: downstream peers must already exist when an
/// upstream worker is wired.
pub fn creation_order(spec: &PipelineSpec) -> Vec<(Stage, usize)> {
    Stage::CREATION_ORDER
        .iter()
        .flat_map(|&stage| (0..spec.count_of(stage)).map(move |index| (stage, index)))
        .collect()
}
