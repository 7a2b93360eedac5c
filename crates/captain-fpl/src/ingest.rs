// Raw FPL data boundary.
//
// Deserializes the already-fetched FPL bootstrap shapes (elements, teams,
// fixtures, picks) and converts them into strongly typed `PlayerRecord` and
// `FixtureContext` values. Nothing past this module sees raw FPL records.

use std::collections::{HashMap, HashSet};

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use captain_core::error::IncompleteDataError;
use captain_core::model::{
    Availability, AvailabilityStatus, FixtureContext, Opponent, PlayerId, PlayerRecord, Position,
    MAX_DIFFICULTY, MIN_DIFFICULTY,
};

/// Gameweeks of fixtures carried into each player's context, starting at the
/// current gameweek.
pub const FIXTURE_WINDOW: u32 = 3;

// ---------------------------------------------------------------------------
// Raw serde structs
// ---------------------------------------------------------------------------

/// One request's worth of FPL data for a manager's squad.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SquadSnapshot {
    pub gameweek: u32,
    /// The manager's picks. Empty means "consider every element".
    #[serde(default)]
    pub picks: Vec<Pick>,
    pub elements: Vec<RawElement>,
    pub teams: Vec<RawTeam>,
    #[serde(default)]
    pub fixtures: Vec<RawFixture>,
    #[serde(default)]
    pub head_to_head: Vec<HeadToHead>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pick {
    pub element: PlayerId,
    /// 0 for bench, 1 for starters, 2+ for the current captain.
    #[serde(default = "default_multiplier")]
    pub multiplier: u8,
}

fn default_multiplier() -> u8 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTeam {
    pub id: u32,
    pub name: String,
    pub short_name: String,
}

/// FPL `elements[]` entry. Every field is optional so that a malformed record
/// surfaces as an `IncompleteDataError` naming the field, not a serde failure
/// for the whole snapshot. FPL encodes several decimals as strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawElement {
    #[serde(default, deserialize_with = "lenient_u32")]
    pub id: Option<PlayerId>,
    pub first_name: Option<String>,
    pub second_name: Option<String>,
    pub web_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub team: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u8")]
    pub element_type: Option<u8>,
    /// Price in tenths of a million.
    #[serde(default, deserialize_with = "lenient_u32")]
    pub now_cost: Option<u32>,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub total_points: Option<i32>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub points_per_game: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub form: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub selected_by_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub minutes: Option<u32>,
    pub status: Option<String>,
    #[serde(default)]
    pub news: Option<String>,
    #[serde(default, deserialize_with = "lenient_u8")]
    pub chance_of_playing_next_round: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFixture {
    pub event: Option<u32>,
    pub team_h: u32,
    pub team_a: u32,
    pub team_h_difficulty: u8,
    pub team_a_difficulty: u8,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub kickoff_time: Option<String>,
}

/// Free-text summary of recent meetings between two teams.
#[derive(Debug, Clone, Deserialize)]
pub struct HeadToHead {
    pub team: u32,
    pub opponent: u32,
    pub summary: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
    Other(IgnoredAny),
}

/// Read a finite number from a number or numeric string. Anything else
/// (`""`, `"abc"`, `"NaN"`, `"inf"`, objects) reads as missing.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(NumberOrString::Number(n)) => Some(n),
        Some(NumberOrString::Text(s)) => s.trim().parse::<f64>().ok(),
        Some(NumberOrString::Other(_)) | None => None,
    };
    Ok(value.filter(|v| v.is_finite()))
}

/// Whole number within `[min, max]`, as read by `lenient_number`.
fn lenient_integer<'de, D>(deserializer: D, min: f64, max: f64) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_number(deserializer)?.filter(|v| v.fract() == 0.0 && (min..=max).contains(v)))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_number(deserializer)
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_integer(deserializer, 0.0, f64::from(u32::MAX))?.map(|v| v as u32))
}

fn lenient_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_integer(deserializer, f64::from(i32::MIN), f64::from(i32::MAX))?.map(|v| v as i32))
}

fn lenient_u8<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_integer(deserializer, 0.0, f64::from(u8::MAX))?.map(|v| v as u8))
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// A squad player with the context the pipeline needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SquadMember {
    pub record: PlayerRecord,
    pub fixture: FixtureContext,
}

/// Resolve every captain-eligible squad player, one result per player.
///
/// With picks present, only starters (`multiplier >= 1`) are eligible and the
/// pick order is kept; otherwise every element is used in snapshot order.
/// Duplicate ids are resolved once.
pub fn resolve_squad(snapshot: &SquadSnapshot) -> Vec<Result<SquadMember, IncompleteDataError>> {
    let teams: HashMap<u32, &RawTeam> = snapshot.teams.iter().map(|t| (t.id, t)).collect();
    let by_id: HashMap<PlayerId, &RawElement> = snapshot
        .elements
        .iter()
        .filter_map(|e| e.id.map(|id| (id, e)))
        .collect();

    let mut seen = HashSet::new();
    let mut out = Vec::new();

    if snapshot.picks.is_empty() {
        for element in &snapshot.elements {
            if let Some(id) = element.id {
                if !seen.insert(id) {
                    continue;
                }
            }
            out.push(resolve_member(element, snapshot, &teams));
        }
    } else {
        for pick in snapshot.picks.iter().filter(|p| p.multiplier >= 1) {
            if !seen.insert(pick.element) {
                continue;
            }
            match by_id.get(&pick.element) {
                Some(element) => out.push(resolve_member(element, snapshot, &teams)),
                None => {
                    warn!(element = pick.element, "pick references unknown element");
                    out.push(Err(IncompleteDataError::new(
                        Some(pick.element),
                        format!("#{}", pick.element),
                        "element",
                    )));
                }
            }
        }
    }

    debug!(resolved = out.len(), gameweek = snapshot.gameweek, "resolved squad");
    out
}

fn resolve_member(
    element: &RawElement,
    snapshot: &SquadSnapshot,
    teams: &HashMap<u32, &RawTeam>,
) -> Result<SquadMember, IncompleteDataError> {
    let record = to_record(element, teams)?;
    // to_record has already checked the team id.
    let team_id = element.team.unwrap_or_default();
    let fixture = fixture_context(team_id, snapshot, teams)
        .ok_or_else(|| IncompleteDataError::new(Some(record.id), record.name.clone(), "fixture"))?;
    Ok(SquadMember { record, fixture })
}

/// Display label for error messages, using whatever identity fields exist.
fn element_label(element: &RawElement) -> String {
    if let Some(web) = &element.web_name {
        return web.clone();
    }
    match (&element.first_name, &element.second_name) {
        (Some(first), Some(second)) => format!("{first} {second}"),
        (None, Some(second)) => second.clone(),
        _ => element
            .id
            .map(|id| format!("#{id}"))
            .unwrap_or_else(|| "<unknown>".to_string()),
    }
}

/// Convert one raw element into a `PlayerRecord`.
pub fn to_record(
    element: &RawElement,
    teams: &HashMap<u32, &RawTeam>,
) -> Result<PlayerRecord, IncompleteDataError> {
    let label = element_label(element);
    let missing = |field: &'static str| IncompleteDataError::new(element.id, label.clone(), field);

    let id = element.id.ok_or_else(|| missing("id"))?;
    let name = match (&element.first_name, &element.second_name) {
        (Some(first), Some(second)) => format!("{first} {second}"),
        _ => element.web_name.clone().ok_or_else(|| missing("name"))?,
    };
    let web_name = element.web_name.clone().unwrap_or_else(|| name.clone());

    let team = element
        .team
        .and_then(|t| teams.get(&t))
        .ok_or_else(|| missing("team"))?;
    let position = element
        .element_type
        .and_then(Position::from_element_type)
        .ok_or_else(|| missing("element_type"))?;
    let now_cost = element.now_cost.ok_or_else(|| missing("now_cost"))?;
    let total_points = element.total_points.ok_or_else(|| missing("total_points"))?;
    let points_per_game = element.points_per_game.ok_or_else(|| missing("points_per_game"))?;
    let form = element.form.ok_or_else(|| missing("form"))?;
    let ownership_pct = element
        .selected_by_percent
        .ok_or_else(|| missing("selected_by_percent"))?;
    let minutes = element.minutes.ok_or_else(|| missing("minutes"))?;
    let status = element
        .status
        .as_deref()
        .and_then(AvailabilityStatus::from_fpl_code)
        .ok_or_else(|| missing("status"))?;

    Ok(PlayerRecord {
        id,
        name,
        web_name,
        team: team.name.clone(),
        position,
        price: now_cost as f64 / 10.0,
        total_points,
        points_per_game,
        minutes,
        form,
        availability: availability(status, element),
        ownership_pct: ownership_pct.clamp(0.0, 100.0),
    })
}

fn availability(status: AvailabilityStatus, element: &RawElement) -> Availability {
    let chance = element.chance_of_playing_next_round;
    let mut notes = Vec::new();
    if let Some(c) = chance.filter(|c| *c < 100) {
        notes.push(format!("Injury risk: {c}%"));
    }
    if let Some(news) = element.news.as_deref().filter(|n| !n.trim().is_empty()) {
        notes.push(news.trim().to_string());
    }
    Availability {
        status,
        reason: notes.join("; "),
        chance_of_playing: chance,
    }
}

/// Build the fixture context for `team_id`, or `None` when the team has no
/// unfinished fixture inside the window.
pub fn fixture_context(
    team_id: u32,
    snapshot: &SquadSnapshot,
    teams: &HashMap<u32, &RawTeam>,
) -> Option<FixtureContext> {
    let first_gw = snapshot.gameweek;
    let last_gw = first_gw + FIXTURE_WINDOW - 1;

    let mut upcoming: Vec<(u32, &RawFixture)> = snapshot
        .fixtures
        .iter()
        .filter(|f| !f.finished && (f.team_h == team_id || f.team_a == team_id))
        .filter_map(|f| f.event.map(|gw| (gw, f)))
        .filter(|(gw, _)| (first_gw..=last_gw).contains(gw))
        .collect();
    // Stable: fixtures within a gameweek keep kickoff order when given.
    upcoming.sort_by(|(ga, fa), (gb, fb)| ga.cmp(gb).then_with(|| fa.kickoff_time.cmp(&fb.kickoff_time)));

    let (next_gw, first) = upcoming.first().copied()?;

    let opponents: Vec<Opponent> = upcoming
        .iter()
        .filter(|(gw, _)| *gw == next_gw)
        .map(|(gw, f)| {
            let (is_home, opponent_id, difficulty) = side_of(f, team_id);
            Opponent {
                team: teams
                    .get(&opponent_id)
                    .map(|t| t.short_name.clone())
                    .unwrap_or_else(|| format!("#{opponent_id}")),
                is_home,
                difficulty,
                gameweek: *gw,
            }
        })
        .collect();

    let (is_home, first_opponent, difficulty) = side_of(first, team_id);
    let head_to_head = snapshot
        .head_to_head
        .iter()
        .find(|h| h.team == team_id && h.opponent == first_opponent)
        .map(|h| h.summary.clone());

    Some(FixtureContext {
        opponents,
        difficulty,
        is_home,
        upcoming_difficulties: upcoming.iter().map(|(_, f)| side_of(f, team_id).2).collect(),
        head_to_head,
    })
}

/// (is_home, opponent team id, difficulty for `team_id`), difficulty clamped to 1..=5.
fn side_of(fixture: &RawFixture, team_id: u32) -> (bool, u32, u8) {
    let (is_home, opponent, difficulty) = if fixture.team_h == team_id {
        (true, fixture.team_a, fixture.team_h_difficulty)
    } else {
        (false, fixture.team_h, fixture.team_a_difficulty)
    };
    (is_home, opponent, difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
