// Recommendation orchestrator.
//
// Runs one request through BUILDING_CONTEXT -> AWAITING_MODEL -> PARSING and
// always ends in a result (succeeded or degraded) or a RecommendError. Model
// and parse failures never escape: they degrade to the deterministic
// fallback ranking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use captain_core::config::{validate, EngineConfig};
use captain_core::error::RecommendError;
use captain_core::model::{
    DegradedReason, Factor, Origin, PipelineStage, PlayerId, Provenance, Recommendation,
    RecommendationResult, ResultStatus, Source,
};
use captain_fpl::context::{build_context, PromptContext};
use captain_fpl::ingest::{resolve_squad, SquadSnapshot};
use captain_fpl::normalize::{normalize_squad, NormalizedSquad};
use captain_fpl::parse::{parse_response, ParseValidationError, ParsedEntry};
use captain_fpl::prompt::{build_recommendation_prompt, system_prompt, RECOMMENDATION_COUNT};
use captain_fpl::score::{rank_candidates, split_top_k, RankedCandidate};
use captain_llm::{Completion, CompletionRequest, TransportError};

/// Advice attached when no model entry made it into the result.
const FALLBACK_ADVICE: &str =
    "Model analysis was unavailable, so these picks follow the composite ranking.";

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation, checked at every stage boundary and between
/// model attempts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn checkpoint(&self, stage: PipelineStage) -> Result<(), RecommendError> {
        if self.is_cancelled() {
            warn!(%stage, "request cancelled");
            return Err(RecommendError::Cancelled { stage });
        }
        info!(%stage, "entering stage");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Recommender
// ---------------------------------------------------------------------------

/// Produces captain recommendations for squad snapshots.
///
/// Holds no per-request state, so one instance can serve concurrent
/// requests.
pub struct Recommender {
    config: EngineConfig,
    model: Arc<dyn Completion>,
}

/// Outcome of the model stage.
enum ModelOutcome {
    Answered(String),
    Exhausted,
}

impl Recommender {
    /// Validate `config` and build a recommender around `model`.
    pub fn new(config: EngineConfig, model: Arc<dyn Completion>) -> Result<Self, RecommendError> {
        validate(&config)?;
        Ok(Self { config, model })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn recommend(
        &self,
        snapshot: &SquadSnapshot,
    ) -> Result<RecommendationResult, RecommendError> {
        self.recommend_with_cancel(snapshot, &CancelFlag::new()).await
    }

    pub async fn recommend_with_cancel(
        &self,
        snapshot: &SquadSnapshot,
        cancel: &CancelFlag,
    ) -> Result<RecommendationResult, RecommendError> {
        match self.run(snapshot, cancel).await {
            Ok(result) => {
                let stage = if result.is_degraded() {
                    PipelineStage::Degraded
                } else {
                    PipelineStage::Succeeded
                };
                info!(
                    %stage,
                    picks = result.recommendations.len(),
                    attempts = result.provenance.attempts,
                    "recommendation finished"
                );
                Ok(result)
            }
            Err(e) => {
                error!(stage = %PipelineStage::Failed, "recommendation failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        snapshot: &SquadSnapshot,
        cancel: &CancelFlag,
    ) -> Result<RecommendationResult, RecommendError> {
        cancel.checkpoint(PipelineStage::BuildingContext)?;
        info!(gameweek = snapshot.gameweek, "building captain context");

        let squad = normalize_squad(resolve_squad(snapshot), &self.config)?;
        let ranked = rank_candidates(&squad, &self.config.scoring_weights);
        let (top, beyond) = split_top_k(&ranked, self.config.top_k_candidates);
        let context = build_context(top, self.config.context_size_budget);

        let mut run = RunState::new(&self.config, &squad, top, beyond, &context);

        if context.is_empty() {
            warn!(
                budget = self.config.context_size_budget,
                "no candidate fits the context budget, skipping model"
            );
            run.reasons
                .push("no candidate fit the context size budget".to_string());
            return Ok(run.finish(Vec::new(), None, DegradedReason::EmptyContext));
        }

        cancel.checkpoint(PipelineStage::AwaitingModel)?;
        let system = system_prompt();
        let prompt = build_recommendation_prompt(&context, snapshot.gameweek);
        let outcome = self.call_model(&system, &prompt, cancel, &mut run).await?;

        cancel.checkpoint(PipelineStage::Parsing)?;
        let text = match outcome {
            ModelOutcome::Answered(text) => text,
            ModelOutcome::Exhausted => {
                return Ok(run.finish(Vec::new(), None, DegradedReason::TransportExhausted));
            }
        };

        match parse_response(&text, &context.candidates, self.config.fuzzy_match_threshold) {
            Ok(parsed) => {
                for rejected in &parsed.rejected {
                    run.reasons.push(rejected.to_string());
                }
                Ok(run.finish(
                    parsed.entries,
                    parsed.general_advice,
                    DegradedReason::PartialResponse,
                ))
            }
            Err(e) => {
                warn!(error = %e, "model response unusable, using fallback ranking");
                if let ParseValidationError::NoUsableEntries { rejected } = &e {
                    run.reasons.extend(rejected.iter().map(ToString::to_string));
                }
                run.reasons.push(e.to_string());
                Ok(run.finish(Vec::new(), None, DegradedReason::UnparseableResponse))
            }
        }
    }

    /// Call the model up to `1 + max_retries` times with identical input.
    async fn call_model(
        &self,
        system: &str,
        prompt: &str,
        cancel: &CancelFlag,
        run: &mut RunState<'_>,
    ) -> Result<ModelOutcome, RecommendError> {
        let max_attempts = self.config.max_retries + 1;
        let timeout = self.config.model_timeout;

        for attempt in 1..=max_attempts {
            if attempt > 1 && cancel.is_cancelled() {
                return Err(RecommendError::Cancelled {
                    stage: PipelineStage::AwaitingModel,
                });
            }
            run.attempts = attempt;

            let request = CompletionRequest {
                system,
                prompt,
                model: &self.config.model,
                max_tokens: self.config.max_tokens,
                timeout,
            };
            info!(attempt, max_attempts, model = %self.config.model, "requesting captain picks");

            let outcome = tokio::time::timeout(timeout, self.model.complete(request))
                .await
                .unwrap_or(Err(TransportError::Timeout(timeout)));

            match outcome {
                Ok(text) => {
                    info!(attempt, chars = text.chars().count(), "model answered");
                    return Ok(ModelOutcome::Answered(text));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "model call failed");
                    run.reasons.push(format!("attempt {attempt}: {e}"));
                }
            }
        }

        warn!(attempts = max_attempts, "model attempts exhausted, using fallback ranking");
        Ok(ModelOutcome::Exhausted)
    }
}

// ---------------------------------------------------------------------------
// Result assembly
// ---------------------------------------------------------------------------

/// Everything known about a request once the context has been built.
struct RunState<'a> {
    model: &'a str,
    top: &'a [RankedCandidate],
    provenance_base: Provenance,
    insufficient: bool,
    attempts: u32,
    reasons: Vec<String>,
}

impl<'a> RunState<'a> {
    fn new(
        config: &'a EngineConfig,
        squad: &NormalizedSquad,
        top: &'a [RankedCandidate],
        beyond: &[RankedCandidate],
        context: &PromptContext,
    ) -> Self {
        let mut reasons = Vec::new();
        if squad.degraded_availability {
            reasons.push("no available players; availability applied as a penalty".to_string());
        }
        let insufficient = top.len() < RECOMMENDATION_COUNT;
        if insufficient {
            reasons.push(format!(
                "only {} eligible candidate(s), fewer than {RECOMMENDATION_COUNT}",
                top.len()
            ));
        }
        Self {
            model: &config.model,
            top,
            provenance_base: Provenance {
                considered: ids(top),
                beyond_top_k: ids(beyond),
                truncated: context.truncated.clone(),
                excluded: squad.excluded.clone(),
                degraded_availability: squad.degraded_availability,
                origin: Origin::Fallback,
                model: config.model.clone(),
                attempts: 0,
                reasons: Vec::new(),
            },
            insufficient,
            attempts: 0,
            reasons,
        }
    }

    /// Merge model entries with the fallback ranking.
    ///
    /// `partial_reason` is the degraded reason used when no model entry
    /// survives; a mix of model and fallback entries is always
    /// `PartialResponse`.
    fn finish(
        mut self,
        entries: Vec<ParsedEntry>,
        general_advice: Option<String>,
        partial_reason: DegradedReason,
    ) -> RecommendationResult {
        let target = self.top.len().min(RECOMMENDATION_COUNT);
        let mut recommendations: Vec<Recommendation> = Vec::with_capacity(target);

        for entry in entries {
            if recommendations.len() == target {
                break;
            }
            if let Some(candidate) = self.top.iter().find(|c| c.id() == entry.player_id) {
                let rank = recommendations.len() + 1;
                recommendations.push(model_recommendation(rank, candidate, entry));
            }
        }
        let from_model = recommendations.len();

        for candidate in self.top {
            if recommendations.len() == target {
                break;
            }
            if recommendations.iter().any(|r| r.player_id == candidate.id()) {
                continue;
            }
            let rank = recommendations.len() + 1;
            if from_model > 0 {
                self.reasons
                    .push(format!("rank {rank} filled from fallback ranking"));
            }
            recommendations.push(fallback_recommendation(rank, candidate));
        }

        let (status, origin) = if from_model > 0 && from_model == recommendations.len() {
            (ResultStatus::Succeeded, Origin::Model)
        } else if from_model > 0 {
            (
                ResultStatus::Degraded {
                    reason: DegradedReason::PartialResponse,
                },
                Origin::Mixed,
            )
        } else {
            (
                ResultStatus::Degraded {
                    reason: partial_reason,
                },
                Origin::Fallback,
            )
        };

        let general_advice = match origin {
            Origin::Fallback => Some(FALLBACK_ADVICE.to_string()),
            Origin::Model | Origin::Mixed => general_advice,
        };

        info!(model = self.model, from_model, total = recommendations.len(), ?origin, "assembled result");

        RecommendationResult {
            status,
            recommendations,
            insufficient_candidates: self.insufficient,
            general_advice,
            provenance: Provenance {
                origin,
                attempts: self.attempts,
                reasons: self.reasons,
                ..self.provenance_base
            },
            generated_at: Utc::now(),
        }
    }
}

fn ids(candidates: &[RankedCandidate]) -> Vec<PlayerId> {
    candidates.iter().map(RankedCandidate::id).collect()
}

fn model_recommendation(rank: usize, candidate: &RankedCandidate, entry: ParsedEntry) -> Recommendation {
    let rationale = if entry.rationale.trim().is_empty() {
        fallback_rationale(candidate)
    } else {
        entry.rationale
    };
    let key_factors = if entry.key_factors.is_empty() {
        derived_key_factors(candidate)
    } else {
        entry.key_factors
    };
    Recommendation {
        rank: rank_u8(rank),
        player_id: candidate.id(),
        player_name: candidate.name().to_string(),
        score: candidate.score.composite,
        confidence: entry.confidence,
        rationale,
        key_factors,
        risk_level: entry.risk_level.unwrap_or_else(|| candidate.risk_level()),
        differential: candidate.differential(),
        source: Source::Model,
    }
}

fn fallback_recommendation(rank: usize, candidate: &RankedCandidate) -> Recommendation {
    Recommendation {
        rank: rank_u8(rank),
        player_id: candidate.id(),
        player_name: candidate.name().to_string(),
        score: candidate.score.composite,
        confidence: None,
        rationale: fallback_rationale(candidate),
        key_factors: derived_key_factors(candidate),
        risk_level: candidate.risk_level(),
        differential: candidate.differential(),
        source: Source::Fallback,
    }
}

// Ranks never exceed RECOMMENDATION_COUNT.
fn rank_u8(rank: usize) -> u8 {
    u8::try_from(rank).unwrap_or(u8::MAX)
}

/// Deterministic rationale citing the factors that drove the composite.
pub fn fallback_rationale(candidate: &RankedCandidate) -> String {
    let drivers: Vec<String> = candidate
        .top_factors(2)
        .iter()
        .map(|f| describe_factor(candidate, f.factor))
        .collect();
    let fixture = &candidate.player.fixture;
    let opponents: Vec<String> = fixture
        .opponents
        .iter()
        .map(|o| format!("{} ({})", o.team, if o.is_home { "H" } else { "A" }))
        .collect();

    let mut text = format!(
        "Composite score {:.1}/100, driven by {}.",
        candidate.score.composite,
        drivers.join(" and ")
    );
    if !opponents.is_empty() {
        text.push_str(&format!(
            " Next: {}, difficulty {}.",
            opponents.join(" + "),
            fixture.difficulty
        ));
    }
    let availability = &candidate.player.record.availability;
    if !availability.reason.is_empty() {
        text.push_str(&format!(" Note: {}.", availability.reason));
    }
    text
}

fn derived_key_factors(candidate: &RankedCandidate) -> Vec<String> {
    candidate
        .top_factors(3)
        .iter()
        .map(|f| describe_factor(candidate, f.factor))
        .collect()
}

fn describe_factor(candidate: &RankedCandidate, factor: Factor) -> String {
    let record = &candidate.player.record;
    match factor {
        Factor::Form => format!("form {:.1}", record.form),
        Factor::Fixture => format!("fixture difficulty {}", candidate.player.fixture.difficulty),
        Factor::Points => format!("{:.1} points per game", record.points_per_game),
        Factor::Minutes => format!("{} minutes played", record.minutes),
        Factor::Availability => match record.availability.chance_of_playing {
            Some(c) => format!("{c}% chance of playing"),
            None => record.availability.status.label().to_string(),
        },
        Factor::Differential => format!(
            "{:.1}% ownership ({})",
            record.ownership_pct,
            candidate.differential().label()
        ),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
