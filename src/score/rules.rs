// src/score/rules.rs
// Deterministic keyword scoring: the correctness floor under the model path.
// Total (never fails) and bounded: the rendered edit summary it scans is
// already capped upstream, independent of page size.

use crate::types::{ChangeCategory, ScoreOrigin, ScoreResult};

/// Score assigned when no keyword matches.
pub const DEFAULT_SCORE: u8 = 30;

/// keyword -> (score, category); the highest-scoring match wins.
const KEYWORD_SCORES: &[(&str, u8, ChangeCategory)] = &[
    ("price", 85, ChangeCategory::Pricing),
    ("pricing", 85, ChangeCategory::Pricing),
    ("cost", 80, ChangeCategory::Pricing),
    ("discount", 80, ChangeCategory::Pricing),
    ("launch", 75, ChangeCategory::Product),
    ("product", 70, ChangeCategory::Product),
    ("new", 60, ChangeCategory::Product),
    ("feature", 50, ChangeCategory::Product),
    ("ceo", 80, ChangeCategory::Team),
    ("founder", 75, ChangeCategory::Team),
    ("executive", 70, ChangeCategory::Team),
    ("leadership", 70, ChangeCategory::Team),
    ("mission", 45, ChangeCategory::Messaging),
    ("vision", 45, ChangeCategory::Messaging),
    ("brand", 40, ChangeCategory::Messaging),
    ("values", 40, ChangeCategory::Messaging),
];

/// Rule-based significance of a rendered edit summary.
pub fn fallback_score(edit_summary: &str) -> ScoreResult {
    let haystack = edit_summary.to_lowercase();

    let mut score = DEFAULT_SCORE;
    let mut category = ChangeCategory::Other;
    let mut matched: Vec<&str> = Vec::new();

    for (word, word_score, word_category) in KEYWORD_SCORES {
        if haystack.contains(word) {
            matched.push(word);
            if *word_score > score {
                score = *word_score;
                category = *word_category;
            }
        }
    }

    ScoreResult {
        score,
        category,
        summary: "Website changes detected".to_string(),
        justification: format!("Rule-based analysis: detected keywords {matched:?}"),
        recommended_action: "Monitor competitor closely".to_string(),
        origin: ScoreOrigin::Fallback,
    }
}
