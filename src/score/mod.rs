// src/score/mod.rs
// Significance scoring: model-first with a deterministic rule fallback.
// The contract is total — score() always returns a ScoreResult, whatever
// the model does. The model path is best-effort; the fallback is the floor.

pub mod model;
pub mod rules;

use std::sync::Arc;

use crate::config::Settings;
use crate::types::{ChangeCategory, Delta, EditKind, ScoreOrigin, ScoreResult};

pub use model::{ChatModelClient, ModelAssessment, ModelClient, ModelRequest};

/// Edits rendered into the model prompt / fallback haystack.
const RENDERED_EDITS: usize = 5;
/// Per-fragment clip inside a rendered line.
const RENDER_CLIP_CHARS: usize = 100;
/// Old/new content excerpt length handed to the model.
const EXCERPT_CHARS: usize = 1000;

/// One line per edit, first five only. The same rendering feeds both the
/// model prompt and the keyword fallback, so the two paths see the same
/// evidence.
pub fn render_edit_summary(edits: &[crate::types::Edit]) -> String {
    let mut lines = Vec::new();
    for edit in edits.iter().take(RENDERED_EDITS) {
        let old = clip(edit.old_fragment.trim(), RENDER_CLIP_CHARS);
        let new = clip(edit.new_fragment.trim(), RENDER_CLIP_CHARS);
        match edit.kind {
            EditKind::Replace if !old.is_empty() && !new.is_empty() => {
                lines.push(format!("Replaced '{old}' with '{new}'"));
            }
            EditKind::Delete if !old.is_empty() => {
                lines.push(format!("Removed: '{old}'"));
            }
            EditKind::Insert if !new.is_empty() => {
                lines.push(format!("Added: '{new}'"));
            }
            _ => {}
        }
    }
    if lines.is_empty() {
        "Minor text changes detected".to_string()
    } else {
        lines.join("\n")
    }
}

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

pub struct Scorer {
    model: Option<Arc<dyn ModelClient>>,
}

impl Scorer {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model: Some(model) }
    }

    /// Fallback-only scorer (no API key configured, or tests).
    pub fn disabled() -> Self {
        Self { model: None }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        match ChatModelClient::from_settings(settings) {
            Some(client) => Self::new(Arc::new(client)),
            None => {
                tracing::info!("no model API key configured; scoring runs rule-based only");
                Self::disabled()
            }
        }
    }

    /// Assess the business significance of a delta. Never fails: a model
    /// error degrades to the rule-based path and is recorded in `origin`.
    pub async fn score(
        &self,
        target_name: &str,
        old_text: &str,
        new_text: &str,
        delta: &Delta,
    ) -> ScoreResult {
        let edit_summary = render_edit_summary(&delta.edits);

        if let Some(model) = &self.model {
            let request = ModelRequest {
                target_name: target_name.to_string(),
                old_excerpt: clip(old_text, EXCERPT_CHARS),
                new_excerpt: clip(new_text, EXCERPT_CHARS),
                edit_summary: edit_summary.clone(),
            };
            match model.assess(&request).await {
                Ok(assessment) => return validated(assessment),
                Err(e) => {
                    metrics::counter!("sitewatch_score_fallback_total").increment(1);
                    tracing::warn!(target = %target_name, error = %e, "model scoring failed, using fallback");
                }
            }
        }

        rules::fallback_score(&edit_summary)
    }
}

/// Clamp and coerce a raw model answer into the fixed enumeration.
fn validated(assessment: ModelAssessment) -> ScoreResult {
    ScoreResult {
        score: assessment.score.clamp(0, 100) as u8,
        category: ChangeCategory::from_str_lossy(&assessment.category),
        summary: assessment.summary,
        justification: assessment.justification,
        recommended_action: assessment.recommended_action,
        origin: ScoreOrigin::Model,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Edit;

    fn make_edit(kind: EditKind, old: &str, new: &str) -> Edit {
        Edit {
            kind,
            old_fragment: old.to_string(),
            new_fragment: new.to_string(),
            old_context: String::new(),
            new_context: String::new(),
        }
    }

    #[test]
    fn renders_each_kind() {
        let edits = vec![
            make_edit(EditKind::Replace, "old text", "new text"),
            make_edit(EditKind::Delete, "gone", ""),
            make_edit(EditKind::Insert, "", "added"),
        ];
        let summary = render_edit_summary(&edits);
        assert_eq!(
            summary,
            "Replaced 'old text' with 'new text'\nRemoved: 'gone'\nAdded: 'added'"
        );
    }

    #[test]
    fn renders_at_most_five_edits() {
        let edits: Vec<Edit> = (0..8)
            .map(|i| make_edit(EditKind::Insert, "", &format!("line {i}")))
            .collect();
        let summary = render_edit_summary(&edits);
        assert_eq!(summary.lines().count(), 5);
        assert!(summary.contains("line 4"));
        assert!(!summary.contains("line 5"));
    }

    #[test]
    fn empty_edit_list_renders_placeholder() {
        assert_eq!(render_edit_summary(&[]), "Minor text changes detected");
        // Fragments that clip to nothing also fall through to the placeholder.
        let blank = vec![make_edit(EditKind::Replace, "   ", "")];
        assert_eq!(render_edit_summary(&blank), "Minor text changes detected");
    }

    #[test]
    fn rendered_fragments_are_clipped() {
        let long = "z".repeat(400);
        let summary = render_edit_summary(&[make_edit(EditKind::Delete, &long, "")]);
        // "Removed: '" + 100 chars + "'"
        assert_eq!(summary.chars().count(), 10 + 100 + 1);
    }

    #[test]
    fn model_answer_is_clamped_and_coerced() {
        let out = validated(ModelAssessment {
            score: 250,
            category: "PRICING".to_string(),
            justification: "j".to_string(),
            recommended_action: "r".to_string(),
            summary: "s".to_string(),
        });
        assert_eq!(out.score, 100);
        assert_eq!(out.category, ChangeCategory::Pricing);
        assert_eq!(out.origin, ScoreOrigin::Model);

        let out = validated(ModelAssessment {
            score: -5,
            category: "miscellaneous".to_string(),
            justification: String::new(),
            recommended_action: String::new(),
            summary: String::new(),
        });
        assert_eq!(out.score, 0);
        assert_eq!(out.category, ChangeCategory::Other);
    }
}
