// Stage-to-stage checks over a realistic FPL snapshot.

use captain_core::config::EngineConfig;
use captain_core::model::{AvailabilityStatus, Factor};
use captain_fpl::context::build_context;
use captain_fpl::ingest::{resolve_squad, SquadSnapshot};
use captain_fpl::normalize::normalize_squad;
use captain_fpl::parse::parse_response;
use captain_fpl::prompt::build_recommendation_prompt;
use captain_fpl::score::{rank_candidates, split_top_k};

const SNAPSHOT: &str = r#"{
    "gameweek": 20,
    "picks": [
        {"element": 10, "multiplier": 1}, {"element": 11, "multiplier": 2},
        {"element": 12, "multiplier": 1}, {"element": 13, "multiplier": 1},
        {"element": 14, "multiplier": 1}, {"element": 15, "multiplier": 0}
    ],
    "elements": [
        {"id": 10, "first_name": "Mohamed", "second_name": "Salah", "web_name": "M.Salah",
         "team": 1, "element_type": 3, "now_cost": 132, "total_points": 160,
         "points_per_game": "8.0", "form": "9.1", "selected_by_percent": "62.3",
         "minutes": 1710, "status": "a", "news": "", "chance_of_playing_next_round": null},
        {"id": 11, "first_name": "Erling", "second_name": "Haaland", "web_name": "Haaland",
         "team": 2, "element_type": 4, "now_cost": 148, "total_points": 140,
         "points_per_game": "7.4", "form": "6.5", "selected_by_percent": "48.0",
         "minutes": 1620, "status": "d", "news": "Knock - 75% chance of playing",
         "chance_of_playing_next_round": 75},
        {"id": 12, "first_name": "Bryan", "second_name": "Mbeumo", "web_name": "Mbeumo",
         "team": 3, "element_type": 3, "now_cost": 80, "total_points": 120,
         "points_per_game": "6.3", "form": "7.0", "selected_by_percent": "21.5",
         "minutes": 1700, "status": "a", "news": ""},
        {"id": 13, "first_name": "Chris", "second_name": "Wood", "web_name": "Wood",
         "team": 4, "element_type": 4, "now_cost": 70, "total_points": 110,
         "points_per_game": "5.8", "form": "5.0", "selected_by_percent": "8.2",
         "minutes": 1500, "status": "a", "news": ""},
        {"id": 14, "first_name": "Gabriel", "second_name": "dos Santos Magalhães", "web_name": "Gabriel",
         "team": 5, "element_type": 2, "now_cost": 62, "total_points": 90,
         "points_per_game": "4.7", "form": "3.2", "selected_by_percent": "30.0",
         "minutes": 1650, "status": "s", "news": "Suspended until GW22"},
        {"id": 15, "first_name": "Jordan", "second_name": "Pickford", "web_name": "Pickford",
         "team": 6, "element_type": 1, "now_cost": 50, "total_points": 80,
         "points_per_game": "4.2", "form": "4.0", "selected_by_percent": "15.0",
         "minutes": 1710, "status": "a", "news": ""}
    ],
    "teams": [
        {"id": 1, "name": "Liverpool", "short_name": "LIV"},
        {"id": 2, "name": "Man City", "short_name": "MCI"},
        {"id": 3, "name": "Brentford", "short_name": "BRE"},
        {"id": 4, "name": "Nott'm Forest", "short_name": "NFO"},
        {"id": 5, "name": "Arsenal", "short_name": "ARS"},
        {"id": 6, "name": "Everton", "short_name": "EVE"}
    ],
    "fixtures": [
        {"event": 20, "team_h": 1, "team_a": 6, "team_h_difficulty": 2, "team_a_difficulty": 5},
        {"event": 20, "team_h": 3, "team_a": 2, "team_h_difficulty": 4, "team_a_difficulty": 3},
        {"event": 20, "team_h": 4, "team_a": 5, "team_h_difficulty": 4, "team_a_difficulty": 3},
        {"event": 21, "team_h": 2, "team_a": 1, "team_h_difficulty": 4, "team_a_difficulty": 4},
        {"event": 21, "team_h": 5, "team_a": 3, "team_h_difficulty": 2, "team_a_difficulty": 4},
        {"event": 21, "team_h": 6, "team_a": 4, "team_h_difficulty": 3, "team_a_difficulty": 3}
    ],
    "head_to_head": [
        {"team": 1, "opponent": 6, "summary": "Won the last four meetings"}
    ]
}"#;

fn snapshot() -> SquadSnapshot {
    serde_json::from_str(SNAPSHOT).unwrap()
}

#[test]
fn starters_are_resolved_and_unavailable_excluded() {
    let config = EngineConfig::default();
    let squad = normalize_squad(resolve_squad(&snapshot()), &config).unwrap();

    // Pickford is benched; Gabriel is suspended.
    let ids: Vec<u32> = squad.candidates.iter().map(|c| c.record.id).collect();
    assert_eq!(ids, vec![10, 11, 12, 13]);
    assert_eq!(squad.excluded.len(), 1);
    assert_eq!(squad.excluded[0].player_id, Some(14));
    assert!(squad.excluded[0].reason.starts_with("suspended"));

    let haaland = &squad.candidates[1];
    assert_eq!(haaland.record.availability.status, AvailabilityStatus::Doubtful);
    assert!((haaland.features.availability - 0.75).abs() < 1e-9);
}

#[test]
fn ranking_and_context_are_reproducible() {
    let config = EngineConfig::default();
    let build = || {
        let squad = normalize_squad(resolve_squad(&snapshot()), &config).unwrap();
        let ranked = rank_candidates(&squad, &config.scoring_weights);
        let (top, _) = split_top_k(&ranked, config.top_k_candidates);
        build_context(top, config.context_size_budget)
    };
    let a = build();
    let b = build();
    assert_eq!(a.text, b.text);
    assert_eq!(a.candidate_ids(), b.candidate_ids());
    assert!(a.size() <= config.context_size_budget);

    // Salah leads on form, points and fixture.
    assert_eq!(a.candidate_ids()[0], 10);
    assert!(a.text.contains("head_to_head: Won the last four meetings"));
    assert!(a.text.contains("availability: doubtful - Injury risk: 75%; Knock - 75% chance of playing"));
}

#[test]
fn scores_stay_bounded_and_explain_themselves() {
    let config = EngineConfig::default();
    let squad = normalize_squad(resolve_squad(&snapshot()), &config).unwrap();
    let ranked = rank_candidates(&squad, &config.scoring_weights);
    for c in &ranked {
        assert!((0.0..=100.0).contains(&c.score.composite));
        let total: f64 = c.score.factors.iter().map(|f| f.weight).sum();
        assert!((total - 1.0).abs() < 1e-6);
        let recomputed: f64 = Factor::ALL
            .iter()
            .filter_map(|f| c.score.factor(*f))
            .map(|f| f.points())
            .sum();
        assert!((recomputed - c.score.composite).abs() < 1e-9);
    }
    let composites: Vec<f64> = ranked.iter().map(|c| c.score.composite).collect();
    assert!(composites.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn model_answer_round_trips_through_the_parser() {
    let config = EngineConfig::default();
    let squad = normalize_squad(resolve_squad(&snapshot()), &config).unwrap();
    let ranked = rank_candidates(&squad, &config.scoring_weights);
    let context = build_context(&ranked, config.context_size_budget);
    let prompt = build_recommendation_prompt(&context, 20);
    assert!(prompt.contains(&context.text));

    let answer = "Sure! Here is my analysis.\n```json\n{\"recommendations\": [\
        {\"rank\": 1, \"player_id\": 10, \"player_name\": \"Mohamed Salah\", \"reasoning\": \"Home to Everton\"},\
        {\"rank\": 2, \"player_name\": \"Mbeumo\", \"reasoning\": \"Form\"},\
        {\"rank\": 3, \"player_name\": \"Gabriel\", \"reasoning\": \"Set pieces\"}\
    ], \"general_advice\": \"Salah is the safe armband.\"}\n```";
    let parsed = parse_response(answer, &context.candidates, config.fuzzy_match_threshold).unwrap();

    let ids: Vec<u32> = parsed.entries.iter().map(|e| e.player_id).collect();
    // Gabriel was excluded before scoring, so the parser cannot accept him.
    assert_eq!(ids, vec![10, 12]);
    assert_eq!(parsed.rejected.len(), 1);
    assert_eq!(parsed.general_advice.as_deref(), Some("Salah is the safe armband."));
}

#[test]
fn non_finite_stats_are_excluded_not_ranked_first() {
    let json = SNAPSHOT
        .replace(r#""form": "9.1""#, r#""form": "NaN""#)
        .replace(r#""points_per_game": "7.4""#, r#""points_per_game": "inf""#);
    let snapshot: SquadSnapshot = serde_json::from_str(&json).unwrap();
    let config = EngineConfig::default();
    let squad = normalize_squad(resolve_squad(&snapshot), &config).unwrap();

    let ids: Vec<u32> = squad.candidates.iter().map(|c| c.record.id).collect();
    assert_eq!(ids, vec![12, 13]);
    let excluded: Vec<Option<u32>> = squad.excluded.iter().map(|e| e.player_id).collect();
    assert!(excluded.contains(&Some(10)));
    assert!(excluded.contains(&Some(11)));

    let ranked = rank_candidates(&squad, &config.scoring_weights);
    assert!(ranked
        .iter()
        .all(|c| (0.0..=100.0).contains(&c.score.composite)));
}
