#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Proximity-based discovery of live challenge instances.

use challenge_core::{
    ChallengeState, ChallengeView, Command, DefinitionCatalog, Vec3, Vec3Swizzles,
};
use tracing::trace;

/// Smallest radius at which an instance can be discovered.
pub const MIN_DISCOVERY_RADIUS: f32 = 5.0;

/// Pure system that emits [`Command::DiscoverChallenge`] for nearby instances.
#[derive(Debug, Default)]
pub struct Discovery;

impl Discovery {
    /// Creates a new discovery system.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Emits a discovery command for every undiscovered instance in range.
    ///
    /// Active instances and retryable failed instances qualify. Distances are
    /// measured on the ground plane.
    pub fn handle(
        &mut self,
        player_position: Vec3,
        view: &ChallengeView,
        catalog: &DefinitionCatalog,
        out: &mut Vec<Command>,
    ) {
        for snapshot in view.iter() {
            if snapshot.discovered {
                continue;
            }
            let discoverable = match snapshot.state {
                ChallengeState::Active => true,
                ChallengeState::Failed => snapshot.retryable,
                ChallengeState::Pending | ChallengeState::Completed | ChallengeState::Expired => {
                    false
                }
            };
            if !discoverable {
                continue;
            }
            let Some(definition) = catalog.get(snapshot.definition) else {
                continue;
            };

            let radius = definition.detection_radius.max(MIN_DISCOVERY_RADIUS);
            let distance = player_position.xz().distance(snapshot.position.xz());
            if distance <= radius {
                trace!(
                    target: "challenge::discovery",
                    instance = snapshot.id.get(),
                    distance,
                    "discovery.in_range"
                );
                out.push(Command::DiscoverChallenge {
                    instance: snapshot.id,
                });
            }
        }
    }
}
