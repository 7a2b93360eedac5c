// Feature normalization: squad members to [0, 1] feature vectors.

use tracing::{info, warn};

use captain_core::config::{EngineConfig, IncompleteDataPolicy};
use captain_core::error::{IncompleteDataError, RecommendError};
use captain_core::model::{
    Availability, AvailabilityStatus, Exclusion, Factor, FixtureContext, PlayerRecord,
    MAX_DIFFICULTY, MIN_DIFFICULTY,
};

use crate::ingest::SquadMember;

// ---------------------------------------------------------------------------
// Range statistics
// ---------------------------------------------------------------------------

/// Minimum and maximum of one raw feature across the squad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeStats {
    pub min: f64,
    pub max: f64,
}

/// Threshold below which a range is treated as zero width.
const RANGE_EPSILON: f64 = 1e-9;

/// Value used for every player when a feature does not vary across the squad.
pub const FLAT_RANGE_VALUE: f64 = 0.5;

/// Compute the range of a slice of values.
///
/// Returns `RangeStats { min: 0.0, max: 0.0 }` for an empty slice.
pub fn compute_range(values: &[f64]) -> RangeStats {
    if values.is_empty() {
        return RangeStats { min: 0.0, max: 0.0 };
    }
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let min = finite.clone().fold(f64::INFINITY, f64::min);
    let max = finite.fold(f64::NEG_INFINITY, f64::max);
    if min > max {
        return RangeStats { min: 0.0, max: 0.0 };
    }
    RangeStats { min, max }
}

/// Min-max scale `value` into [0, 1]. A zero-width range yields
/// `FLAT_RANGE_VALUE`; a non-finite value yields 0.
pub fn min_max(value: f64, range: &RangeStats) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let width = range.max - range.min;
    if !width.is_finite() {
        return FLAT_RANGE_VALUE;
    }
    if width < RANGE_EPSILON {
        return FLAT_RANGE_VALUE;
    }
    ((value - range.min) / width).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Per-feature mappings
// ---------------------------------------------------------------------------

/// Fixture ease: difficulty 1 maps to 1.0, difficulty 5 to 0.0.
pub fn fixture_ease(difficulty: u8) -> f64 {
    let d = difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
    f64::from(MAX_DIFFICULTY - d) / f64::from(MAX_DIFFICULTY - MIN_DIFFICULTY)
}

/// Likelihood of playing. Doubtful players without a stated chance get 0.5.
pub fn availability_value(availability: &Availability) -> f64 {
    match availability.status {
        AvailabilityStatus::Available => 1.0,
        AvailabilityStatus::Doubtful => availability
            .chance_of_playing
            .map(|c| (f64::from(c) / 100.0).clamp(0.0, 1.0))
            .unwrap_or(0.5),
        AvailabilityStatus::Injured | AvailabilityStatus::Suspended => 0.0,
    }
}

/// Inverse ownership: 0% owned is 1.0, 100% owned is 0.0.
pub fn differential_value(ownership_pct: f64) -> f64 {
    if !ownership_pct.is_finite() {
        return 0.0;
    }
    (1.0 - ownership_pct / 100.0).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Normalized output
// ---------------------------------------------------------------------------

/// One value per `Factor`, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub form: f64,
    pub fixture: f64,
    pub points: f64,
    pub minutes: f64,
    pub availability: f64,
    pub differential: f64,
}

impl FeatureVector {
    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Form => self.form,
            Factor::Fixture => self.fixture,
            Factor::Points => self.points,
            Factor::Minutes => self.minutes,
            Factor::Availability => self.availability,
            Factor::Differential => self.differential,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerFeatures {
    pub record: PlayerRecord,
    pub fixture: FixtureContext,
    pub features: FeatureVector,
}

impl PlayerFeatures {
    /// Raw value behind a factor, as reported in score breakdowns.
    pub fn raw(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Form => self.record.form,
            Factor::Fixture => f64::from(self.fixture.difficulty),
            Factor::Points => self.record.points_per_game,
            Factor::Minutes => f64::from(self.record.minutes),
            Factor::Availability => self
                .record
                .availability
                .chance_of_playing
                .map(f64::from)
                .unwrap_or_else(|| self.features.availability * 100.0),
            Factor::Differential => self.record.ownership_pct,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedSquad {
    pub candidates: Vec<PlayerFeatures>,
    pub excluded: Vec<Exclusion>,
    /// Every player was injured or suspended and the configuration allowed
    /// keeping them with an availability penalty.
    pub degraded_availability: bool,
}

/// Normalize a resolved squad into feature vectors.
///
/// Incomplete records follow the configured `IncompleteDataPolicy`. Injured
/// and suspended players are excluded unless nobody is left, in which case
/// either `NoEligibleCandidates` is returned or, with
/// `allow_unavailable_fallback`, everyone is kept at availability 0.
/// Ranges are taken over the whole resolved squad.
pub fn normalize_squad(
    members: Vec<Result<SquadMember, IncompleteDataError>>,
    config: &EngineConfig,
) -> Result<NormalizedSquad, RecommendError> {
    let mut excluded = Vec::new();
    let mut complete = Vec::with_capacity(members.len());

    for member in members {
        match member {
            Ok(m) => complete.push(m),
            Err(e) => match config.incomplete_data {
                IncompleteDataPolicy::Abort => {
                    warn!(player = %e.player, field = e.field, "aborting on incomplete record");
                    return Err(e.into());
                }
                IncompleteDataPolicy::Exclude => {
                    warn!(player = %e.player, field = e.field, "excluding incomplete record");
                    excluded.push(Exclusion {
                        player_id: e.player_id,
                        player: e.player.clone(),
                        reason: e.to_string(),
                    });
                }
            },
        }
    }

    let form_range = compute_range(&complete.iter().map(|m| m.record.form).collect::<Vec<_>>());
    let points_range = compute_range(
        &complete
            .iter()
            .map(|m| m.record.points_per_game)
            .collect::<Vec<_>>(),
    );
    let minutes_range = compute_range(
        &complete
            .iter()
            .map(|m| f64::from(m.record.minutes))
            .collect::<Vec<_>>(),
    );

    let any_available = complete
        .iter()
        .any(|m| !m.record.availability.status.is_unavailable());

    let mut degraded_availability = false;
    let eligible: Vec<SquadMember> = if any_available {
        let (keep, drop): (Vec<_>, Vec<_>) = complete
            .into_iter()
            .partition(|m| !m.record.availability.status.is_unavailable());
        for m in drop {
            excluded.push(unavailable_exclusion(&m.record));
        }
        keep
    } else if !complete.is_empty() && config.allow_unavailable_fallback {
        warn!(
            players = complete.len(),
            "no available players; keeping unavailable players with a penalty"
        );
        degraded_availability = true;
        complete
    } else {
        for m in &complete {
            excluded.push(unavailable_exclusion(&m.record));
        }
        warn!(excluded = excluded.len(), "no eligible captain candidates");
        return Err(RecommendError::NoEligibleCandidates {
            excluded: excluded.len(),
        });
    };

    let candidates: Vec<PlayerFeatures> = eligible
        .into_iter()
        .map(|m| {
            let features = FeatureVector {
                form: min_max(m.record.form, &form_range),
                fixture: fixture_ease(m.fixture.difficulty),
                points: min_max(m.record.points_per_game, &points_range),
                minutes: min_max(f64::from(m.record.minutes), &minutes_range),
                availability: availability_value(&m.record.availability),
                differential: differential_value(m.record.ownership_pct),
            };
            PlayerFeatures {
                record: m.record,
                fixture: m.fixture,
                features,
            }
        })
        .collect();

    info!(
        candidates = candidates.len(),
        excluded = excluded.len(),
        degraded_availability,
        "normalized squad"
    );

    Ok(NormalizedSquad {
        candidates,
        excluded,
        degraded_availability,
    })
}

fn unavailable_exclusion(record: &PlayerRecord) -> Exclusion {
    let status = record.availability.status.label();
    let reason = if record.availability.reason.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", record.availability.reason)
    };
    Exclusion {
        player_id: Some(record.id),
        player: record.name.clone(),
        reason,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use captain_core::model::{Opponent, Position};

    const EPS: f64 = 1e-9;

    pub(crate) fn record(id: u32, name: &str, form: f64, ownership: f64) -> PlayerRecord {
        let web = name.rsplit(' ').next().unwrap_or(name).to_string();
        PlayerRecord {
            id,
            name: name.to_string(),
            web_name: web,
            team: "Arsenal".to_string(),
            position: Position::Midfielder,
            price: 8.0,
            total_points: 60,
            points_per_game: form * 0.8,
            minutes: 900,
            form,
            availability: Availability::available(),
            ownership_pct: ownership,
        }
    }

    pub(crate) fn fixture(difficulty: u8) -> FixtureContext {
        FixtureContext {
            opponents: vec![Opponent {
                team: "BOU".to_string(),
                is_home: true,
                difficulty,
                gameweek: 10,
            }],
            difficulty,
            is_home: true,
            upcoming_difficulties: vec![difficulty, 3, 3],
            head_to_head: None,
        }
    }

    pub(crate) fn member(id: u32, name: &str, form: f64, difficulty: u8, ownership: f64) -> SquadMember {
        SquadMember {
            record: record(id, name, form, ownership),
            fixture: fixture(difficulty),
        }
    }

    fn with_status(mut m: SquadMember, status: AvailabilityStatus) -> SquadMember {
        m.record.availability.status = status;
        m
    }

    #[test]
    fn min_max_scales_and_handles_flat_range() {
        let range = compute_range(&[2.0, 4.0, 6.0]);
        assert!((min_max(2.0, &range) - 0.0).abs() < EPS);
        assert!((min_max(4.0, &range) - 0.5).abs() < EPS);
        assert!((min_max(6.0, &range) - 1.0).abs() < EPS);

        let flat = compute_range(&[3.0, 3.0]);
        assert!((min_max(3.0, &flat) - FLAT_RANGE_VALUE).abs() < EPS);
        assert_eq!(compute_range(&[]), RangeStats { min: 0.0, max: 0.0 });
    }

    #[test]
    fn non_finite_values_never_leave_the_unit_interval() {
        let range = compute_range(&[2.0, f64::NAN, 6.0, f64::INFINITY]);
        assert_eq!(range, RangeStats { min: 2.0, max: 6.0 });
        assert_eq!(min_max(f64::NAN, &range), 0.0);
        assert_eq!(min_max(f64::INFINITY, &range), 0.0);
        assert_eq!(compute_range(&[f64::NAN]), RangeStats { min: 0.0, max: 0.0 });
        assert_eq!(differential_value(f64::NAN), 0.0);
    }

    #[test]
    fn fixture_ease_is_inverted_difficulty() {
        assert!((fixture_ease(1) - 1.0).abs() < EPS);
        assert!((fixture_ease(3) - 0.5).abs() < EPS);
        assert!((fixture_ease(5) - 0.0).abs() < EPS);
        // Out-of-range values clamp.
        assert!((fixture_ease(0) - 1.0).abs() < EPS);
        assert!((fixture_ease(9) - 0.0).abs() < EPS);
    }

    #[test]
    fn availability_value_uses_chance_of_playing() {
        let mut a = Availability::available();
        assert!((availability_value(&a) - 1.0).abs() < EPS);
        a.status = AvailabilityStatus::Doubtful;
        assert!((availability_value(&a) - 0.5).abs() < EPS);
        a.chance_of_playing = Some(75);
        assert!((availability_value(&a) - 0.75).abs() < EPS);
        a.status = AvailabilityStatus::Suspended;
        assert!((availability_value(&a) - 0.0).abs() < EPS);
    }

    #[test]
    fn differential_inverts_ownership() {
        assert!((differential_value(0.0) - 1.0).abs() < EPS);
        assert!((differential_value(60.0) - 0.4).abs() < EPS);
        assert!((differential_value(120.0) - 0.0).abs() < EPS);
    }

    #[test]
    fn every_feature_is_in_unit_interval() {
        let members = vec![
            Ok(member(1, "Mohamed Salah", 8.2, 2, 45.0)),
            Ok(member(2, "Bukayo Saka", 5.5, 4, 30.0)),
            Ok(member(3, "Cole Palmer", 6.1, 1, 3.0)),
        ];
        let squad = normalize_squad(members, &EngineConfig::default()).unwrap();
        assert_eq!(squad.candidates.len(), 3);
        for c in &squad.candidates {
            for factor in Factor::ALL {
                let v = c.features.get(factor);
                assert!((0.0..=1.0).contains(&v), "{factor} = {v}");
            }
        }
        assert!((squad.candidates[0].features.form - 1.0).abs() < EPS);
        assert!((squad.candidates[1].features.form - 0.0).abs() < EPS);
    }

    #[test]
    fn injured_and_suspended_are_excluded() {
        let members = vec![
            Ok(member(1, "Mohamed Salah", 8.2, 2, 45.0)),
            Ok(with_status(member(2, "Bukayo Saka", 5.5, 4, 30.0), AvailabilityStatus::Injured)),
            Ok(with_status(member(3, "Cole Palmer", 6.1, 1, 3.0), AvailabilityStatus::Suspended)),
        ];
        let squad = normalize_squad(members, &EngineConfig::default()).unwrap();
        assert_eq!(squad.candidates.len(), 1);
        assert_eq!(squad.excluded.len(), 2);
        assert_eq!(squad.excluded[0].reason, "injured");
        assert!(!squad.degraded_availability);
    }

    #[test]
    fn all_unavailable_is_an_error_by_default() {
        let members = (1..=15)
            .map(|id| {
                Ok(with_status(
                    member(id, &format!("Player {id}"), 3.0, 3, 5.0),
                    AvailabilityStatus::Injured,
                ))
            })
            .collect();
        let err = normalize_squad(members, &EngineConfig::default()).unwrap_err();
        match err {
            RecommendError::NoEligibleCandidates { excluded } => assert_eq!(excluded, 15),
            other => panic!("expected NoEligibleCandidates, got: {other:?}"),
        }
    }

    #[test]
    fn all_unavailable_kept_with_penalty_when_allowed() {
        let config = EngineConfig {
            allow_unavailable_fallback: true,
            ..EngineConfig::default()
        };
        let members = vec![
            Ok(with_status(member(1, "Mohamed Salah", 8.2, 2, 45.0), AvailabilityStatus::Injured)),
            Ok(with_status(member(2, "Bukayo Saka", 5.5, 4, 30.0), AvailabilityStatus::Suspended)),
        ];
        let squad = normalize_squad(members, &config).unwrap();
        assert!(squad.degraded_availability);
        assert_eq!(squad.candidates.len(), 2);
        assert!(squad.candidates.iter().all(|c| c.features.availability == 0.0));
    }

    #[test]
    fn incomplete_records_follow_policy() {
        let err = IncompleteDataError::new(Some(9), "Erling Haaland", "form");
        let members = vec![Ok(member(1, "Mohamed Salah", 8.2, 2, 45.0)), Err(err.clone())];
        let squad = normalize_squad(members, &EngineConfig::default()).unwrap();
        assert_eq!(squad.candidates.len(), 1);
        assert_eq!(squad.excluded[0].player_id, Some(9));
        assert!(squad.excluded[0].reason.contains("`form`"));

        let config = EngineConfig {
            incomplete_data: IncompleteDataPolicy::Abort,
            ..EngineConfig::default()
        };
        let members = vec![Ok(member(1, "Mohamed Salah", 8.2, 2, 45.0)), Err(err)];
        match normalize_squad(members, &config).unwrap_err() {
            RecommendError::IncompleteData(e) => assert_eq!(e.field, "form"),
            other => panic!("expected IncompleteData, got: {other:?}"),
        }
    }

    #[test]
    fn empty_squad_has_no_candidates() {
        let err = normalize_squad(Vec::new(), &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, RecommendError::NoEligibleCandidates { excluded: 0 }));
    }
}
