// Candidate scoring and ranking.
//
// composite = 100 * sum(weight * normalized) over every factor, so the
// result always lands in [0, 100] when the weights sum to 1.

use std::cmp::Ordering;

use tracing::debug;

use captain_core::config::ScoringWeights;
use captain_core::model::{
    AvailabilityStatus, CandidateScore, DifferentialTier, Factor, FactorContribution, PlayerId,
    RiskLevel,
};

use crate::normalize::{NormalizedSquad, PlayerFeatures};

/// A scored candidate together with the features it was scored from.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub score: CandidateScore,
    pub player: PlayerFeatures,
}

impl RankedCandidate {
    pub fn id(&self) -> PlayerId {
        self.player.record.id
    }

    pub fn name(&self) -> &str {
        &self.player.record.name
    }

    pub fn differential(&self) -> DifferentialTier {
        DifferentialTier::from_ownership(self.player.record.ownership_pct)
    }

    /// The `n` factors adding the most to the composite, largest first.
    /// Zero-weight factors never appear.
    pub fn top_factors(&self, n: usize) -> Vec<&FactorContribution> {
        let mut factors: Vec<&FactorContribution> = self
            .score
            .factors
            .iter()
            .filter(|f| f.weight > 0.0)
            .collect();
        factors.sort_by(|a, b| b.points().total_cmp(&a.points()).then(a.factor.cmp(&b.factor)));
        factors.truncate(n);
        factors
    }

    /// Risk from availability and the next fixture's difficulty.
    pub fn risk_level(&self) -> RiskLevel {
        let availability = &self.player.record.availability;
        match availability.status {
            AvailabilityStatus::Injured | AvailabilityStatus::Suspended => RiskLevel::High,
            AvailabilityStatus::Doubtful => match availability.chance_of_playing {
                Some(c) if c <= 25 => RiskLevel::High,
                _ => RiskLevel::Medium,
            },
            AvailabilityStatus::Available if self.player.fixture.difficulty >= 4 => RiskLevel::Medium,
            AvailabilityStatus::Available => RiskLevel::Low,
        }
    }
}

/// Score a single candidate. Every factor in `Factor::ALL` is reported, with
/// weight 0 for factors missing from the table.
pub fn score_candidate(player: &PlayerFeatures, weights: &ScoringWeights) -> CandidateScore {
    let factors: Vec<FactorContribution> = Factor::ALL
        .iter()
        .map(|&factor| FactorContribution {
            factor,
            weight: weights.get(factor),
            raw: player.raw(factor),
            normalized: unit(player.features.get(factor)),
        })
        .collect();
    let composite = factors.iter().map(FactorContribution::points).sum::<f64>();
    let composite = if composite.is_finite() {
        composite.clamp(0.0, 100.0)
    } else {
        0.0
    };
    CandidateScore {
        player_id: player.record.id,
        composite,
        factors,
    }
}

/// Clamp a feature into [0, 1]; non-finite features count as 0.
fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Total order used for ranking: composite descending, then higher form,
/// easier next fixture, higher ownership, and finally lower id.
pub fn compare_candidates(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.score
        .composite
        .total_cmp(&a.score.composite)
        .then_with(|| b.player.record.form.total_cmp(&a.player.record.form))
        .then_with(|| a.player.fixture.difficulty.cmp(&b.player.fixture.difficulty))
        .then_with(|| {
            b.player
                .record
                .ownership_pct
                .total_cmp(&a.player.record.ownership_pct)
        })
        .then_with(|| a.id().cmp(&b.id()))
}

/// Score and rank every candidate. Deterministic for identical input.
pub fn rank_candidates(squad: &NormalizedSquad, weights: &ScoringWeights) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = squad
        .candidates
        .iter()
        .map(|player| RankedCandidate {
            score: score_candidate(player, weights),
            player: player.clone(),
        })
        .collect();
    ranked.sort_by(compare_candidates);

    for (i, c) in ranked.iter().enumerate() {
        debug!(rank = i + 1, player = c.name(), composite = c.score.composite, "ranked");
    }
    ranked
}

/// Split a ranking at the top-K bound: (top K, beyond top K).
pub fn split_top_k(ranked: &[RankedCandidate], k: usize) -> (&[RankedCandidate], &[RankedCandidate]) {
    ranked.split_at(k.min(ranked.len()))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_squad;
    use crate::normalize::tests::member;
    use captain_core::config::EngineConfig;

    fn ranked(members: Vec<crate::ingest::SquadMember>, weights: &ScoringWeights) -> Vec<RankedCandidate> {
        let squad = normalize_squad(members.into_iter().map(Ok).collect(), &EngineConfig::default()).unwrap();
        rank_candidates(&squad, weights)
    }

    #[test]
    fn composite_is_weighted_sum_times_100() {
        let weights = ScoringWeights::new([(Factor::Form, 0.5), (Factor::Fixture, 0.5)]);
        let r = ranked(
            vec![
                member(1, "Mohamed Salah", 8.0, 1, 40.0),
                member(2, "Bukayo Saka", 4.0, 5, 20.0),
            ],
            &weights,
        );
        // Salah: form 1.0, fixture 1.0 -> 100. Saka: 0.0 and 0.0 -> 0.
        assert_eq!(r[0].id(), 1);
        assert!((r[0].score.composite - 100.0).abs() < 1e-9);
        assert!((r[1].score.composite - 0.0).abs() < 1e-9);
    }

    #[test]
    fn factors_are_reported_in_fixed_order() {
        let r = ranked(
            vec![member(1, "Mohamed Salah", 8.0, 2, 40.0)],
            &ScoringWeights::default(),
        );
        let order: Vec<Factor> = r[0].score.factors.iter().map(|f| f.factor).collect();
        assert_eq!(order, Factor::ALL.to_vec());
        let minutes = r[0].score.factor(Factor::Minutes).unwrap();
        assert_eq!(minutes.weight, 0.0);
        assert_eq!(minutes.raw, 900.0);
    }

    #[test]
    fn composite_stays_in_range() {
        let r = ranked(
            vec![
                member(1, "Mohamed Salah", 9.0, 1, 0.0),
                member(2, "Bukayo Saka", 1.0, 5, 100.0),
                member(3, "Cole Palmer", 5.0, 3, 50.0),
            ],
            &ScoringWeights::default(),
        );
        for c in &r {
            assert!((0.0..=100.0).contains(&c.score.composite));
        }
    }

    #[test]
    fn non_finite_features_score_as_zero() {
        let mut squad = normalize_squad(
            vec![
                Ok(member(1, "Mohamed Salah", 8.0, 2, 40.0)),
                Ok(member(2, "Bukayo Saka", 6.0, 3, 30.0)),
            ],
            &EngineConfig::default(),
        )
        .unwrap();
        squad.candidates[0].features.form = f64::NAN;
        squad.candidates[0].features.points = f64::INFINITY;
        let r = rank_candidates(&squad, &ScoringWeights::default());
        for c in &r {
            assert!((0.0..=100.0).contains(&c.score.composite), "{}", c.score.composite);
            assert!(c.score.factors.iter().all(|f| f.normalized.is_finite()));
        }
        let salah = r.iter().find(|c| c.id() == 1).unwrap();
        assert_eq!(salah.score.factor(Factor::Form).unwrap().normalized, 0.0);
    }

    #[test]
    fn ties_break_on_form_then_fixture_then_ownership_then_id() {
        // Only differential is weighted, and all share ownership, so the
        // composite ties and the secondary keys decide.
        let weights = ScoringWeights::new([(Factor::Differential, 1.0)]);
        let r = ranked(
            vec![
                member(5, "Player E", 6.0, 3, 20.0),
                member(4, "Player D", 6.0, 3, 20.0),
                member(3, "Player C", 6.0, 2, 20.0),
                member(2, "Player B", 7.0, 5, 20.0),
            ],
            &weights,
        );
        let ids: Vec<PlayerId> = r.iter().map(RankedCandidate::id).collect();
        assert_eq!(ids, vec![2, 3, 4, 5]);
    }

    #[test]
    fn ownership_breaks_remaining_ties() {
        let weights = ScoringWeights::new([(Factor::Form, 1.0)]);
        let r = ranked(
            vec![member(1, "Player A", 6.0, 3, 10.0), member(2, "Player B", 6.0, 3, 30.0)],
            &weights,
        );
        assert_eq!(r[0].id(), 2);
    }

    #[test]
    fn ranking_is_deterministic() {
        let members = vec![
            member(1, "Mohamed Salah", 8.2, 2, 45.0),
            member(2, "Bukayo Saka", 5.5, 4, 30.0),
            member(3, "Cole Palmer", 6.1, 1, 3.0),
        ];
        let a = ranked(members.clone(), &ScoringWeights::default());
        let b = ranked(members, &ScoringWeights::default());
        assert_eq!(a, b);
    }

    #[test]
    fn split_top_k_bounds() {
        let r = ranked(
            vec![
                member(1, "Player A", 8.0, 2, 45.0),
                member(2, "Player B", 5.0, 4, 30.0),
                member(3, "Player C", 6.0, 1, 3.0),
            ],
            &ScoringWeights::default(),
        );
        let (top, rest) = split_top_k(&r, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(rest.len(), 1);
        let (top, rest) = split_top_k(&r, 8);
        assert_eq!(top.len(), 3);
        assert!(rest.is_empty());
    }

    #[test]
    fn risk_and_top_factors() {
        let mut r = ranked(
            vec![member(1, "Mohamed Salah", 8.0, 4, 40.0), member(2, "Bukayo Saka", 4.0, 2, 20.0)],
            &ScoringWeights::default(),
        );
        let salah = r.iter().find(|c| c.id() == 1).unwrap();
        assert_eq!(salah.risk_level(), RiskLevel::Medium);
        let top = salah.top_factors(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].factor, Factor::Form);

        let saka = r.iter_mut().find(|c| c.id() == 2).unwrap();
        assert_eq!(saka.risk_level(), RiskLevel::Low);
        saka.player.record.availability.status = AvailabilityStatus::Doubtful;
        saka.player.record.availability.chance_of_playing = Some(25);
        assert_eq!(saka.risk_level(), RiskLevel::High);
    }
}
