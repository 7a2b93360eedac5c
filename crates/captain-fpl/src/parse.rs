// Response parser: free-form model text to validated captain picks.
//
// Structured JSON is preferred (fenced or bare). When none is found, a
// numbered-list reading of the text is attempted. Every entry must resolve to
// a candidate that was actually in the prompt context: by id when one is
// given, otherwise by an exact name or a close, unambiguous full name.

use serde_json::{Map, Value};
use strsim::{jaro_winkler, levenshtein};
use thiserror::Error;
use tracing::{debug, warn};

use captain_core::model::{PlayerId, RiskLevel};

use crate::prompt::RECOMMENDATION_COUNT;
use crate::score::RankedCandidate;

/// Two fuzzy matches closer than this are treated as ambiguous.
pub const AMBIGUITY_MARGIN: f64 = 0.02;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a response, or one entry of it, could not be used.
///
/// `entry` is the 1-based position of the entry in the model's output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseValidationError {
    #[error("response contained no recognizable recommendations")]
    NoStructuredContent,

    #[error("entry {entry}: {reference} is not a candidate")]
    UnknownPlayer { entry: usize, reference: String },

    #[error("entry {entry}: name `{name}` matches several candidates {candidates:?}")]
    AmbiguousName {
        entry: usize,
        name: String,
        candidates: Vec<PlayerId>,
    },

    #[error("entry {entry}: repeats player {player_id}")]
    DuplicatePlayer { entry: usize, player_id: PlayerId },

    #[error("entry {entry}: names no player")]
    MissingReference { entry: usize },

    #[error("no valid recommendations could be recovered ({} entries rejected)", .rejected.len())]
    NoUsableEntries { rejected: Vec<ParseValidationError> },
}

// ---------------------------------------------------------------------------
// Parsed output
// ---------------------------------------------------------------------------

/// A model pick resolved to a context candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    pub player_id: PlayerId,
    pub rationale: String,
    pub key_factors: Vec<String>,
    pub risk_level: Option<RiskLevel>,
    /// In [0, 1].
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedResponse {
    /// Valid picks in rank order, at most `RECOMMENDATION_COUNT`.
    pub entries: Vec<ParsedEntry>,
    /// Entries that were dropped, with the reason.
    pub rejected: Vec<ParseValidationError>,
    pub general_advice: Option<String>,
}

/// An entry as read from the text, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
struct RawEntry {
    position: usize,
    rank: Option<u32>,
    player_id: Option<u32>,
    player_name: Option<String>,
    rationale: String,
    key_factors: Vec<String>,
    risk_level: Option<RiskLevel>,
    confidence: Option<f64>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Parse and validate a model response against the candidates that were sent.
///
/// Entries are ordered by their stated rank (appearance order breaks ties and
/// orders unranked entries last), repeats are dropped, and ranks are made
/// contiguous by position in the returned list.
pub fn parse_response(
    raw: &str,
    candidates: &[RankedCandidate],
    fuzzy_threshold: f64,
) -> Result<ParsedResponse, ParseValidationError> {
    let (mut raw_entries, general_advice) = match structured_entries(raw) {
        Some((entries, advice)) if !entries.is_empty() => (entries, advice),
        _ => {
            debug!("no structured JSON in response, reading numbered list");
            (text_entries(raw), None)
        }
    };
    if raw_entries.is_empty() {
        warn!(chars = raw.chars().count(), "response had no recognizable entries");
        return Err(ParseValidationError::NoStructuredContent);
    }

    raw_entries.sort_by_key(|e| (e.rank.unwrap_or(u32::MAX), e.position));

    let mut entries: Vec<ParsedEntry> = Vec::new();
    let mut rejected = Vec::new();
    for raw_entry in raw_entries {
        if entries.len() == RECOMMENDATION_COUNT {
            debug!(entry = raw_entry.position, "ignoring entry past the pick count");
            continue;
        }
        let player_id = match resolve(&raw_entry, candidates, fuzzy_threshold) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "rejected model entry");
                rejected.push(e);
                continue;
            }
        };
        if entries.iter().any(|e| e.player_id == player_id) {
            let e = ParseValidationError::DuplicatePlayer {
                entry: raw_entry.position,
                player_id,
            };
            warn!(error = %e, "rejected model entry");
            rejected.push(e);
            continue;
        }
        entries.push(ParsedEntry {
            player_id,
            rationale: raw_entry.rationale,
            key_factors: raw_entry.key_factors,
            risk_level: raw_entry.risk_level,
            confidence: raw_entry.confidence,
        });
    }

    if entries.is_empty() {
        return Err(ParseValidationError::NoUsableEntries { rejected });
    }

    Ok(ParsedResponse {
        entries,
        rejected,
        general_advice,
    })
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Pull a JSON document out of model text: a ```json fence, any fence, a bare
/// document, or the outermost `{ ... }` span.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let body = &text[start + 7..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        // Skip a language tag on the fence line.
        let body = after.find('\n').map(|i| &after[i + 1..]).unwrap_or(after);
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }

    let trimmed = text.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        return Some(trimmed);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&trimmed[start..=end])
}

fn structured_entries(raw: &str) -> Option<(Vec<RawEntry>, Option<String>)> {
    let json = extract_json(raw)?;
    let value: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "extracted JSON did not parse");
            return None;
        }
    };

    let (items, advice) = match value {
        Value::Array(items) => (items, None),
        Value::Object(mut map) => {
            let advice = map
                .get("general_advice")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            let items = ["recommendations", "captains", "picks"]
                .iter()
                .find_map(|key| match map.remove(*key) {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                })?;
            (items, advice)
        }
        _ => return None,
    };

    let entries = items
        .iter()
        .enumerate()
        .map(|(i, item)| entry_from_value(i + 1, item))
        .collect();
    Some((entries, advice))
}

fn entry_from_value(position: usize, item: &Value) -> RawEntry {
    let obj = match item {
        Value::Object(obj) => obj,
        Value::String(name) => {
            return RawEntry {
                position,
                player_name: Some(name.clone()),
                ..RawEntry::default()
            }
        }
        _ => return RawEntry { position, ..RawEntry::default() },
    };

    RawEntry {
        position,
        rank: field(obj, &["rank"]).and_then(value_u32),
        player_id: field(obj, &["player_id", "id", "element"]).and_then(value_u32),
        player_name: field(obj, &["player_name", "name", "player"])
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        rationale: field(obj, &["reasoning", "rationale", "reason"])
            .map(value_text)
            .unwrap_or_default(),
        key_factors: field(obj, &["key_factors", "factors"])
            .map(value_list)
            .unwrap_or_default(),
        risk_level: field(obj, &["risk_level", "risk"])
            .and_then(Value::as_str)
            .and_then(RiskLevel::parse_loose),
        confidence: field(obj, &["confidence"]).and_then(value_confidence),
    }
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

/// Accept `328`, `328.0`, `"328"` and `"#328"`.
fn value_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().trim_start_matches('#').parse().ok(),
        _ => None,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

fn value_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Confidence in [0, 1]. Percentages (1 < c <= 100) are scaled down.
fn value_confidence(value: &Value) -> Option<f64> {
    let c = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok()?,
        _ => return None,
    };
    if !c.is_finite() || c < 0.0 {
        return None;
    }
    let c = if c > 1.0 { c / 100.0 } else { c };
    Some(c.min(1.0))
}

// ---------------------------------------------------------------------------
// Numbered-list fallback
// ---------------------------------------------------------------------------

/// Read top-level numbered lines such as `1. Mohamed Salah (id: 328) - reason`.
fn text_entries(raw: &str) -> Vec<RawEntry> {
    raw.lines()
        .filter(|line| !line.starts_with(char::is_whitespace))
        .filter_map(numbered_line)
        .enumerate()
        .map(|(i, mut e)| {
            e.position = i + 1;
            e
        })
        .collect()
}

fn numbered_line(line: &str) -> Option<RawEntry> {
    let line = line.trim_start_matches(|c: char| matches!(c, '#' | '*' | '-' | '>' | ' '));
    let digits_end = line.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let rank: u32 = line[..digits_end].parse().ok()?;
    let rest = line[digits_end..].strip_prefix(['.', ')', ':'])?;
    let rest = rest.replace("**", "");
    let rest = rest.trim();

    let (head, rationale) = split_head(rest);

    let name = head
        .split(['(', '['])
        .next()
        .unwrap_or(head)
        .trim()
        .trim_end_matches(',')
        .to_string();

    Some(RawEntry {
        position: 0,
        rank: Some(rank),
        player_id: find_id(head),
        player_name: Some(name).filter(|n| !n.is_empty()),
        rationale: rationale.to_string(),
        ..RawEntry::default()
    })
}

/// Split `Name (id: 1) - rationale` at the first separator outside brackets.
fn split_head(rest: &str) -> (&str, &str) {
    const SEPARATORS: [&str; 4] = [" - ", " \u{2013} ", " \u{2014} ", ": "];
    let mut depth = 0usize;
    for (i, c) in rest.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => {
                if let Some(sep) = SEPARATORS.iter().find(|s| rest[i..].starts_with(**s)) {
                    return (&rest[..i], rest[i + sep.len()..].trim());
                }
            }
            _ => {}
        }
    }
    (rest, "")
}

/// Find an id written as `id: 328`, `ID 328`, `player_id=328` or `#328`.
fn find_id(text: &str) -> Option<u32> {
    let lower = text.to_ascii_lowercase();
    let bytes = lower.as_bytes();

    let digits_at = |from: usize| -> Option<u32> {
        let tail = lower[from..].trim_start_matches(|c: char| matches!(c, ' ' | ':' | '=' | '#'));
        let end = tail.find(|c: char| !c.is_ascii_digit()).unwrap_or(tail.len());
        tail[..end].parse().ok()
    };

    let mut search = 0;
    while let Some(offset) = lower[search..].find("id") {
        let at = search + offset;
        let boundary = at == 0 || !bytes[at - 1].is_ascii_alphanumeric();
        if boundary {
            if let Some(id) = digits_at(at + 2) {
                return Some(id);
            }
        }
        search = at + 2;
    }

    lower.find('#').and_then(|at| digits_at(at + 1))
}

// ---------------------------------------------------------------------------
// Candidate resolution
// ---------------------------------------------------------------------------

fn resolve(
    entry: &RawEntry,
    candidates: &[RankedCandidate],
    threshold: f64,
) -> Result<PlayerId, ParseValidationError> {
    match (entry.player_id, &entry.player_name) {
        (Some(id), _) if candidates.iter().any(|c| c.id() == id) => Ok(id),
        (Some(id), _) => Err(ParseValidationError::UnknownPlayer {
            entry: entry.position,
            reference: format!("player_id {id}"),
        }),
        (None, Some(name)) => match_name(entry.position, name, candidates, threshold),
        (None, None) => Err(ParseValidationError::MissingReference {
            entry: entry.position,
        }),
    }
}

/// Lowercase, punctuation stripped, whitespace collapsed.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized names a candidate can be referred to by.
struct NameKeys {
    full: String,
    web: String,
    surname: String,
}

impl NameKeys {
    fn of(candidate: &RankedCandidate) -> Self {
        let record = &candidate.player.record;
        let full = normalize_name(&record.name);
        let web = normalize_name(&record.web_name);
        let surname = full.rsplit(' ').next().unwrap_or(&full).to_string();
        Self { full, web, surname }
    }

    fn exact(&self, query: &str) -> bool {
        query == self.full || query == self.web || query == self.surname
    }

    /// Fuzzy similarity for multi-word queries. The query's last word must be
    /// within one edit of the surname, otherwise 0.
    fn similarity(&self, query: &str) -> f64 {
        let last = query.rsplit(' ').next().unwrap_or(query);
        if levenshtein(last, &self.surname) > 1 {
            return 0.0;
        }
        jaro_winkler(query, &self.full).max(jaro_winkler(query, &self.web))
    }
}

/// Resolve a free-text name. Exact matches on full, display or surname win;
/// single words are never fuzzy matched.
fn match_name(
    position: usize,
    name: &str,
    candidates: &[RankedCandidate],
    threshold: f64,
) -> Result<PlayerId, ParseValidationError> {
    let query = normalize_name(name);
    if query.is_empty() {
        return Err(ParseValidationError::MissingReference { entry: position });
    }

    let keys: Vec<(PlayerId, NameKeys)> =
        candidates.iter().map(|c| (c.id(), NameKeys::of(c))).collect();

    let exact: Vec<PlayerId> = keys
        .iter()
        .filter(|(_, k)| k.exact(&query))
        .map(|(id, _)| *id)
        .collect();
    match exact.as_slice() {
        [id] => return Ok(*id),
        [] => {}
        many => {
            return Err(ParseValidationError::AmbiguousName {
                entry: position,
                name: name.to_string(),
                candidates: many.to_vec(),
            })
        }
    }

    let unknown = || ParseValidationError::UnknownPlayer {
        entry: position,
        reference: format!("`{name}`"),
    };
    if !query.contains(' ') {
        return Err(unknown());
    }

    let mut scored: Vec<(PlayerId, f64)> = keys
        .iter()
        .map(|(id, k)| (*id, k.similarity(&query)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let &(best_id, best) = scored.first().ok_or_else(unknown)?;
    if best < threshold {
        return Err(unknown());
    }
    if let Some(&(second_id, second)) = scored.get(1) {
        if second >= threshold && best - second < AMBIGUITY_MARGIN {
            return Err(ParseValidationError::AmbiguousName {
                entry: position,
                name: name.to_string(),
                candidates: vec![best_id, second_id],
            });
        }
    }
    debug!(name, player_id = best_id, similarity = best, "matched name");
    Ok(best_id)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
