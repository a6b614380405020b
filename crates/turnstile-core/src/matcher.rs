//! Similarity matching of a live probe embedding against enrolled templates.

use thiserror::Error;

use crate::types::{Embedding, MatchResult, Template};

/// Default match threshold in unit-interval score space.
pub const DEFAULT_THRESHOLD: f32 = 0.58;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("threshold {0} outside the open interval (0, 1)")]
    InvalidThreshold(f32),
}

/// Strategy for comparing a probe embedding against enrolled templates.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        templates: &[Template],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Cosine similarity matcher.
///
/// An identity's score is the maximum over its templates (best frame wins —
/// enrollment frames vary in pose and lighting quality), and the candidate
/// is the globally best-scoring identity. Taking the global per-template
/// maximum yields both at once. Every template is visited; no early exit.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        templates: &[Template],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        // The negated range check also rejects NaN.
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(MatchError::InvalidThreshold(threshold));
        }

        let mut best_score = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, template) in templates.iter().enumerate() {
            let score = probe.score(&template.embedding);
            if score > best_score {
                best_score = score;
                best_idx = Some(i);
            }
        }

        let result = match best_idx {
            // Boundary inclusive: score == threshold is a match.
            Some(idx) if best_score >= threshold => MatchResult {
                matched: true,
                identity: Some(templates[idx].identity.clone()),
                score: best_score,
                threshold_used: threshold,
            },
            Some(_) => MatchResult {
                matched: false,
                identity: None,
                score: best_score,
                threshold_used: threshold,
            },
            None => MatchResult {
                matched: false,
                identity: None,
                score: 0.0,
                threshold_used: threshold,
            },
        };

        tracing::debug!(
            matched = result.matched,
            score = result.score,
            threshold,
            candidates = templates.len(),
            "match complete"
        );
        Ok(result)
    }
}
