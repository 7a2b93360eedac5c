// Prompt templates for captain recommendations.
//
// The candidate block from `context` is embedded verbatim; everything else
// here is fixed instruction text and sits outside the size budget.

use crate::context::PromptContext;

/// Number of captain picks requested from the model.
pub const RECOMMENDATION_COUNT: usize = 3;

// ---------------------------------------------------------------------------
// System prompt
// ---------------------------------------------------------------------------

/// Return the static system prompt for all captain recommendation calls.
pub fn system_prompt() -> String {
    "You are an expert Fantasy Premier League analyst choosing a captain.\n\
     \n\
     The captain scores double points, so the pick should maximize expected points \
     while weighing the risk of a blank.\n\
     \n\
     Weigh these factors:\n\
     - Recent form and season points per game\n\
     - Fixture difficulty and home advantage\n\
     - Minutes security and injury news\n\
     - Ownership: a template pick protects rank, a differential gains it\n\
     \n\
     Use the pre-computed scores I provide and do NOT invent players or statistics. \
     Only recommend players from the candidate list, identified by their player_id. \
     Respond with JSON only."
        .to_string()
}

// ---------------------------------------------------------------------------
// Recommendation prompt
// ---------------------------------------------------------------------------

/// Build the user prompt around an already-bounded candidate block.
pub fn build_recommendation_prompt(context: &PromptContext, gameweek: u32) -> String {
    format!(
        "## Gameweek {gameweek} captain decision\n\
         \n\
         Candidates are listed best first by composite score (0-100).\n\
         \n\
         {candidates}\n\
         ## Task\n\
         Recommend the top {count} captain choices, best first.\n\
         \n\
         Respond with JSON in exactly this shape:\n\
         {{\n\
         \x20 \"recommendations\": [\n\
         \x20   {{\n\
         \x20     \"rank\": 1,\n\
         \x20     \"player_id\": 123,\n\
         \x20     \"player_name\": \"Player Name\",\n\
         \x20     \"reasoning\": \"Why this player is a strong captain pick\",\n\
         \x20     \"key_factors\": [\"factor 1\", \"factor 2\", \"factor 3\"],\n\
         \x20     \"risk_level\": \"Low/Medium/High\",\n\
         \x20     \"differential_potential\": \"Template/Semi-differential/High differential\",\n\
         \x20     \"confidence\": 0.0\n\
         \x20   }}\n\
         \x20 ],\n\
         \x20 \"general_advice\": \"Overall captaincy advice for this gameweek\"\n\
         }}\n\
         \n\
         confidence is between 0 and 1.",
        candidates = context.text,
        count = RECOMMENDATION_COUNT,
    )
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn context(text: &str) -> PromptContext {
        PromptContext {
            candidates: Vec::new(),
            truncated: Vec::new(),
            text: text.to_string(),
        }
    }

    #[test]
    fn system_prompt_demands_json_and_known_players() {
        let prompt = system_prompt();
        assert!(prompt.contains("Fantasy Premier League"));
        assert!(prompt.contains("player_id"));
        assert!(prompt.contains("JSON only"));
    }

    #[test]
    fn recommendation_prompt_embeds_context_verbatim() {
        let block = "CANDIDATE 1\nplayer_id: 328\nname: Mohamed Salah (Salah)\n";
        let prompt = build_recommendation_prompt(&context(block), 12);
        assert!(prompt.contains("## Gameweek 12 captain decision"));
        assert!(prompt.contains(block));
        assert!(prompt.contains("top 3 captain choices"));
        assert!(prompt.contains("\"general_advice\""));
        assert!(prompt.contains("  \"recommendations\": ["));
    }
}
