// Context builder: ranked candidates to a bounded prompt block.
//
// Each candidate is written in a fixed labeled layout, in ranking order.
// When the block exceeds the size budget, candidates are dropped from the
// bottom of the ranking until it fits; the retained set is always a prefix.

use tracing::{debug, warn};

use captain_core::model::PlayerId;

use crate::score::RankedCandidate;

/// The serialized candidate block sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    /// Included candidates, in ranking order.
    pub candidates: Vec<RankedCandidate>,
    /// Ids dropped to fit the budget, in ranking order.
    pub truncated: Vec<PlayerId>,
    pub text: String,
}

impl PromptContext {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Size of the block in characters, the unit the budget is measured in.
    pub fn size(&self) -> usize {
        self.text.chars().count()
    }

    pub fn candidate_ids(&self) -> Vec<PlayerId> {
        self.candidates.iter().map(RankedCandidate::id).collect()
    }
}

/// Build the candidate block from an already-ranked top-K list.
pub fn build_context(ranked: &[RankedCandidate], budget: usize) -> PromptContext {
    let blocks: Vec<String> = ranked
        .iter()
        .enumerate()
        .map(|(i, c)| format_candidate(i + 1, c))
        .collect();

    let mut text = String::new();
    let mut used = 0usize;
    let mut included = 0usize;
    for block in &blocks {
        // Blocks are joined by a blank line.
        let separator = if included == 0 { 0 } else { 1 };
        let size = block.chars().count() + separator;
        if used + size > budget {
            break;
        }
        if separator == 1 {
            text.push('\n');
        }
        text.push_str(block);
        used += size;
        included += 1;
    }

    let truncated: Vec<PlayerId> = ranked[included..].iter().map(RankedCandidate::id).collect();
    if !truncated.is_empty() {
        warn!(
            budget,
            included,
            dropped = truncated.len(),
            "context truncated to fit size budget"
        );
    }
    debug!(chars = used, included, "built prompt context");

    PromptContext {
        candidates: ranked[..included].to_vec(),
        truncated,
        text,
    }
}

/// One candidate in the fixed labeled layout. Ends with a newline.
pub fn format_candidate(ordinal: usize, candidate: &RankedCandidate) -> String {
    let record = &candidate.player.record;
    let fixture = &candidate.player.fixture;
    let mut out = String::new();

    out.push_str(&format!("CANDIDATE {ordinal}\n"));
    out.push_str(&format!("player_id: {}\n", record.id));
    out.push_str(&format!("name: {} ({})\n", record.name, record.web_name));
    out.push_str(&format!(
        "team: {} | position: {} | price: {:.1}m\n",
        record.team,
        record.position.display_str(),
        record.price
    ));
    out.push_str(&format!("composite_score: {:.1}\n", candidate.score.composite));
    out.push_str(&format!(
        "form: {:.1} | points_per_game: {:.1} | total_points: {} | minutes: {}\n",
        record.form, record.points_per_game, record.total_points, record.minutes
    ));
    out.push_str(&format!(
        "ownership: {:.1}% ({})\n",
        record.ownership_pct,
        candidate.differential().label()
    ));

    let opponents: Vec<String> = fixture
        .opponents
        .iter()
        .map(|o| {
            format!(
                "{} ({}) difficulty {}",
                o.team,
                if o.is_home { "H" } else { "A" },
                o.difficulty
            )
        })
        .collect();
    let upcoming: Vec<String> = fixture
        .upcoming_difficulties
        .iter()
        .map(u8::to_string)
        .collect();
    out.push_str(&format!(
        "next_fixture: {} | upcoming_difficulty: {}\n",
        opponents.join(" + "),
        upcoming.join(", ")
    ));
    if let Some(h2h) = &fixture.head_to_head {
        out.push_str(&format!("head_to_head: {h2h}\n"));
    }

    let availability = &record.availability;
    if availability.reason.is_empty() {
        out.push_str(&format!("availability: {}\n", availability.status.label()));
    } else {
        out.push_str(&format!(
            "availability: {} - {}\n",
            availability.status.label(),
            availability.reason
        ));
    }

    let factors: Vec<String> = candidate
        .score
        .factors
        .iter()
        .filter(|f| f.weight > 0.0)
        .map(|f| format!("{} {:.2}", f.factor, f.normalized))
        .collect();
    out.push_str(&format!("factors: {}\n", factors.join(", ")));
    out
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
