// Error taxonomy shared by the pipeline crates.
//
// Transport and parse errors live next to the code that produces them
// (captain-llm, captain-fpl) because they never escape a request: the
// orchestrator turns them into a degraded result.

use thiserror::Error;

use crate::config::ConfigError;
use crate::model::{PipelineStage, PlayerId};

/// A raw record lacked a field the pipeline requires.
///
/// Whether the player is dropped or the request aborted is decided by
/// `IncompleteDataPolicy`, never here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("incomplete data for player {player}: missing `{field}`")]
pub struct IncompleteDataError {
    pub player_id: Option<PlayerId>,
    pub player: String,
    pub field: &'static str,
}

impl IncompleteDataError {
    pub fn new(player_id: Option<PlayerId>, player: impl Into<String>, field: &'static str) -> Self {
        Self {
            player_id,
            player: player.into(),
            field,
        }
    }
}

/// Errors that fail a recommendation request outright.
#[derive(Debug, Error)]
pub enum RecommendError {
    #[error(transparent)]
    IncompleteData(#[from] IncompleteDataError),

    #[error("no eligible captain candidates: all {excluded} players were excluded")]
    NoEligibleCandidates { excluded: usize },

    #[error("request cancelled at {stage}")]
    Cancelled { stage: PipelineStage },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
