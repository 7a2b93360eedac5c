// Request-scoped data model for captain recommendations.
//
// Every value here is built fresh for one recommendation call and dropped
// when the result is returned. Nothing is cached across requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// FPL element id.
pub type PlayerId = u32;

// ---------------------------------------------------------------------------
// Player identity and availability
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    Goalkeeper,
    Defender,
    Midfielder,
    Forward,
}

impl Position {
    /// Map the FPL `element_type` code (1..=4) to a position.
    pub fn from_element_type(code: u8) -> Option<Self> {
        match code {
            1 => Some(Position::Goalkeeper),
            2 => Some(Position::Defender),
            3 => Some(Position::Midfielder),
            4 => Some(Position::Forward),
            _ => None,
        }
    }

    pub fn display_str(&self) -> &'static str {
        match self {
            Position::Goalkeeper => "GKP",
            Position::Defender => "DEF",
            Position::Midfielder => "MID",
            Position::Forward => "FWD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    Doubtful,
    Injured,
    Suspended,
}

impl AvailabilityStatus {
    /// Map an FPL `status` code. `u` (unavailable) and `n` (not eligible)
    /// are folded into `Injured`, since both mean the player cannot play.
    pub fn from_fpl_code(code: &str) -> Option<Self> {
        match code {
            "a" => Some(AvailabilityStatus::Available),
            "d" => Some(AvailabilityStatus::Doubtful),
            "i" | "u" | "n" => Some(AvailabilityStatus::Injured),
            "s" => Some(AvailabilityStatus::Suspended),
            _ => None,
        }
    }

    /// Injured and suspended players are excluded from the candidate set.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            AvailabilityStatus::Injured | AvailabilityStatus::Suspended
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            AvailabilityStatus::Available => "available",
            AvailabilityStatus::Doubtful => "doubtful",
            AvailabilityStatus::Injured => "injured",
            AvailabilityStatus::Suspended => "suspended",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub status: AvailabilityStatus,
    /// Free-text reason ("Hamstring injury - 75% chance of playing").
    /// Empty when the player is fully available.
    pub reason: String,
    pub chance_of_playing: Option<u8>,
}

impl Availability {
    pub fn available() -> Self {
        Self {
            status: AvailabilityStatus::Available,
            reason: String::new(),
            chance_of_playing: None,
        }
    }
}

/// Immutable per-request snapshot of one squad player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    /// Short display name used by FPL ("Salah"); matched by the parser too.
    pub web_name: String,
    pub team: String,
    pub position: Position,
    /// Price in millions.
    pub price: f64,
    pub total_points: i32,
    pub points_per_game: f64,
    pub minutes: u32,
    /// Average points over the trailing form window.
    pub form: f64,
    pub availability: Availability,
    /// Percentage of managers owning the player (0..=100).
    pub ownership_pct: f64,
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opponent {
    pub team: String,
    pub is_home: bool,
    pub difficulty: u8,
    pub gameweek: u32,
}

/// Upcoming fixture context for one player's team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureContext {
    /// Opponents in the next gameweek the team plays (two in a double gameweek).
    pub opponents: Vec<Opponent>,
    /// Difficulty of the next fixture, 1 (easiest) ..= 5 (hardest).
    pub difficulty: u8,
    pub is_home: bool,
    /// Difficulties across the look-ahead window, in kickoff order.
    pub upcoming_difficulties: Vec<u8>,
    pub head_to_head: Option<String>,
}

pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 5;

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// A weighted scoring factor. The declaration order is the order factors are
/// reported in every `CandidateScore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Form,
    Fixture,
    #[serde(alias = "ppg", alias = "points_per_game")]
    Points,
    Minutes,
    #[serde(alias = "avail")]
    Availability,
    #[serde(alias = "diff")]
    Differential,
}

impl Factor {
    pub const ALL: [Factor; 6] = [
        Factor::Form,
        Factor::Fixture,
        Factor::Points,
        Factor::Minutes,
        Factor::Availability,
        Factor::Differential,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Factor::Form => "form",
            Factor::Fixture => "fixture",
            Factor::Points => "points",
            Factor::Minutes => "minutes",
            Factor::Availability => "availability",
            Factor::Differential => "differential",
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorContribution {
    pub factor: Factor,
    pub weight: f64,
    /// Value before normalization (form points, difficulty, ownership %, ...).
    pub raw: f64,
    /// Value on the [0, 1] scale.
    pub normalized: f64,
}

impl FactorContribution {
    /// Points this factor adds to the 0..=100 composite.
    pub fn points(&self) -> f64 {
        self.weight * self.normalized * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub player_id: PlayerId,
    /// Weighted sum of normalized factor values, scaled to [0, 100].
    pub composite: f64,
    pub factors: Vec<FactorContribution>,
}

impl CandidateScore {
    pub fn factor(&self, factor: Factor) -> Option<&FactorContribution> {
        self.factors.iter().find(|c| c.factor == factor)
    }
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferentialTier {
    Template,
    SemiDifferential,
    HighDifferential,
}

impl DifferentialTier {
    pub fn from_ownership(ownership_pct: f64) -> Self {
        if ownership_pct >= 25.0 {
            DifferentialTier::Template
        } else if ownership_pct >= 10.0 {
            DifferentialTier::SemiDifferential
        } else {
            DifferentialTier::HighDifferential
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DifferentialTier::Template => "Template",
            DifferentialTier::SemiDifferential => "Semi-differential",
            DifferentialTier::HighDifferential => "High differential",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Lenient parse of model output ("low", "Medium risk", "HIGH").
    /// A choice list such as "Low/Medium/High" is not a level.
    pub fn parse_loose(text: &str) -> Option<Self> {
        let lower = text.trim().to_ascii_lowercase();
        if lower.contains(['/', '|']) {
            None
        } else if lower.starts_with("low") {
            Some(RiskLevel::Low)
        } else if lower.starts_with("med") {
            Some(RiskLevel::Medium)
        } else if lower.starts_with("high") {
            Some(RiskLevel::High)
        } else {
            None
        }
    }
}

/// Where a recommendation entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Model,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// 1-based, contiguous within a result.
    pub rank: u8,
    pub player_id: PlayerId,
    pub player_name: String,
    /// Composite score of the player, 0..=100.
    pub score: f64,
    /// Model-reported confidence in [0, 1], when given.
    pub confidence: Option<f64>,
    pub rationale: String,
    pub key_factors: Vec<String>,
    pub risk_level: RiskLevel,
    pub differential: DifferentialTier,
    pub source: Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// Every model attempt failed or timed out.
    TransportExhausted,
    /// The model answered but nothing usable could be extracted.
    UnparseableResponse,
    /// Some model entries were valid; the rest came from the fallback ranking.
    PartialResponse,
    /// No candidate fit the context budget, so the model was not called.
    EmptyContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResultStatus {
    Succeeded,
    Degraded { reason: DegradedReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Model,
    Fallback,
    Mixed,
}

/// A player removed before scoring, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub player_id: Option<PlayerId>,
    pub player: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Top-K candidates in ranking order.
    pub considered: Vec<PlayerId>,
    /// Scored candidates that fell outside the top-K bound.
    pub beyond_top_k: Vec<PlayerId>,
    /// Top-K candidates dropped to fit the context budget.
    pub truncated: Vec<PlayerId>,
    pub excluded: Vec<Exclusion>,
    /// True when nobody was available and availability became a penalty.
    pub degraded_availability: bool,
    pub origin: Origin,
    pub model: String,
    pub attempts: u32,
    /// Human-readable notes: transport errors, rejected entries, fallback fills.
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub status: ResultStatus,
    pub recommendations: Vec<Recommendation>,
    /// Set when fewer than three candidates existed.
    pub insufficient_candidates: bool,
    pub general_advice: Option<String>,
    pub provenance: Provenance,
    pub generated_at: DateTime<Utc>,
}

impl RecommendationResult {
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, ResultStatus::Degraded { .. })
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    BuildingContext,
    AwaitingModel,
    Parsing,
    Succeeded,
    Degraded,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::BuildingContext => "BUILDING_CONTEXT",
            PipelineStage::AwaitingModel => "AWAITING_MODEL",
            PipelineStage::Parsing => "PARSING",
            PipelineStage::Succeeded => "SUCCEEDED",
            PipelineStage::Degraded => "DEGRADED",
            PipelineStage::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fpl_status_codes_map_to_availability() {
        assert_eq!(
            AvailabilityStatus::from_fpl_code("a"),
            Some(AvailabilityStatus::Available)
        );
        assert_eq!(
            AvailabilityStatus::from_fpl_code("d"),
            Some(AvailabilityStatus::Doubtful)
        );
        assert_eq!(
            AvailabilityStatus::from_fpl_code("u"),
            Some(AvailabilityStatus::Injured)
        );
        assert_eq!(
            AvailabilityStatus::from_fpl_code("s"),
            Some(AvailabilityStatus::Suspended)
        );
        assert_eq!(AvailabilityStatus::from_fpl_code("x"), None);
    }

    #[test]
    fn doubtful_players_stay_available() {
        assert!(!AvailabilityStatus::Doubtful.is_unavailable());
        assert!(AvailabilityStatus::Injured.is_unavailable());
        assert!(AvailabilityStatus::Suspended.is_unavailable());
    }

    #[test]
    fn differential_tier_thresholds() {
        assert_eq!(DifferentialTier::from_ownership(45.2), DifferentialTier::Template);
        assert_eq!(DifferentialTier::from_ownership(25.0), DifferentialTier::Template);
        assert_eq!(
            DifferentialTier::from_ownership(12.0),
            DifferentialTier::SemiDifferential
        );
        assert_eq!(
            DifferentialTier::from_ownership(3.1),
            DifferentialTier::HighDifferential
        );
    }

    #[test]
    fn risk_level_parses_loose_model_text() {
        assert_eq!(RiskLevel::parse_loose("Low"), Some(RiskLevel::Low));
        assert_eq!(RiskLevel::parse_loose(" medium risk"), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::parse_loose("HIGH"), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse_loose("Low/Medium/High"), None);
        assert_eq!(RiskLevel::parse_loose("low | high"), None);
        assert_eq!(RiskLevel::parse_loose("unknown"), None);
    }

    #[test]
    fn factor_aliases_deserialize() {
        let f: Factor = serde_json::from_str("\"avail\"").unwrap();
        assert_eq!(f, Factor::Availability);
        let f: Factor = serde_json::from_str("\"diff\"").unwrap();
        assert_eq!(f, Factor::Differential);
        let f: Factor = serde_json::from_str("\"points\"").unwrap();
        assert_eq!(f, Factor::Points);
    }

    #[test]
    fn status_serializes_with_reason() {
        let status = ResultStatus::Degraded {
            reason: DegradedReason::PartialResponse,
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["state"], "degraded");
        assert_eq!(json["reason"], "partial_response");
    }

    #[test]
    fn pipeline_stage_display() {
        assert_eq!(PipelineStage::AwaitingModel.to_string(), "AWAITING_MODEL");
    }
}
