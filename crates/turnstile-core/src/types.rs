use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Embedding dimension produced by the w600k_r50 ArcFace model.
pub const EMBEDDING_DIM: usize = 512;

/// Face embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    /// Always processes all dimensions; no early exit.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine similarity mapped onto the unit interval: `(cos + 1) / 2`.
    ///
    /// This is the score space every threshold in the system lives in.
    pub fn score(&self, other: &Embedding) -> f32 {
        ((self.similarity(other) + 1.0) / 2.0).clamp(0.0, 1.0)
    }
}

/// One stored embedding belonging to an enrolled identity.
///
/// Templates are immutable: enrollment only appends (or replaces the whole
/// set for an identity); nothing ever mutates a stored embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub identity: String,
    pub embedding: Embedding,
    pub created_at: DateTime<Utc>,
}

/// Result of matching a probe embedding against the enrolled population.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Identity code of the match. `None` when below threshold or when no
    /// templates are enrolled.
    pub identity: Option<String>,
    /// Best score in [0, 1]; 0 when no templates exist.
    pub score: f32,
    pub threshold_used: f32,
}

/// Machine-readable reason attached to every geofence result and verdict.
///
/// Kept as a tagged enum (not strings) so priority ordering between reasons
/// is enforced in one place and testable without geometry or scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Ok,
    GpsAccuracyPoor,
    NoSitesConfigured,
    OutsideRadius,
    FaceNotMatched,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Ok => "ok",
            Reason::GpsAccuracyPoor => "gps_accuracy_poor",
            Reason::NoSitesConfigured => "no_sites_configured",
            Reason::OutsideRadius => "outside_radius",
            Reason::FaceNotMatched => "face_not_matched",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating a location fix against the site registry.
#[derive(Debug, Clone, Serialize)]
pub struct GeofenceResult {
    pub within: bool,
    /// Name of the nearest configured site, when any exist and the fix was
    /// precise enough to measure against.
    pub nearest_site: Option<String>,
    /// Distance in meters to the nearest site's center.
    pub distance_m: Option<f64>,
    pub reason: Reason,
}

/// Final admit/deny outcome of a recognize call.
///
/// Carries both sub-results in full — callers render a precise reason to
/// the operator, which is an audit requirement, so neither signal is ever
/// short-circuited away.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub admitted: bool,
    pub identity: Option<String>,
    pub score: f32,
    pub threshold_used: f32,
    pub geofence: GeofenceResult,
    pub reason: Reason,
}

impl Verdict {
    /// Fuse the two sub-results. Admission is a strict AND — never an OR,
    /// never inferred from one signal alone.
    pub fn fuse(face: MatchResult, geofence: GeofenceResult) -> Verdict {
        let admitted = face.matched && geofence.within;
        let reason = if admitted {
            Reason::Ok
        } else if !geofence.within {
            geofence.reason
        } else {
            Reason::FaceNotMatched
        };

        Verdict {
            admitted,
            identity: face.identity,
            score: face.score,
            threshold_used: face.threshold_used,
            geofence,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding { values, model_version: None }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(vec![1.0, 0.0, 0.0]);
        let b = emb(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = emb(vec![0.0, 0.0]);
        let b = emb(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_score_maps_to_unit_interval() {
        let a = emb(vec![1.0, 0.0]);
        let same = emb(vec![1.0, 0.0]);
        let opposite = emb(vec![-1.0, 0.0]);
        let orthogonal = emb(vec![0.0, 1.0]);
        assert!((a.score(&same) - 1.0).abs() < 1e-6);
        assert!(a.score(&opposite).abs() < 1e-6);
        assert!((a.score(&orthogonal) - 0.5).abs() < 1e-6);
    }

    fn face(matched: bool) -> MatchResult {
        MatchResult {
            matched,
            identity: matched.then(|| "E001".to_string()),
            score: if matched { 0.91 } else { 0.30 },
            threshold_used: 0.58,
        }
    }

    fn fence(within: bool) -> GeofenceResult {
        GeofenceResult {
            within,
            nearest_site: Some("HQ".to_string()),
            distance_m: Some(12.0),
            reason: if within { Reason::Ok } else { Reason::OutsideRadius },
        }
    }

    #[test]
    fn test_fusion_truth_table() {
        // admitted iff matched AND within, across all four combinations
        for (matched, within, admitted) in [
            (true, true, true),
            (true, false, false),
            (false, true, false),
            (false, false, false),
        ] {
            let v = Verdict::fuse(face(matched), fence(within));
            assert_eq!(v.admitted, admitted, "matched={matched} within={within}");
        }
    }

    #[test]
    fn test_fusion_reason_priority() {
        // admitted → ok
        assert_eq!(Verdict::fuse(face(true), fence(true)).reason, Reason::Ok);
        // geofence failure wins over face failure
        assert_eq!(
            Verdict::fuse(face(false), fence(false)).reason,
            Reason::OutsideRadius
        );
        // face failure only surfaces when geofence passed
        assert_eq!(
            Verdict::fuse(face(false), fence(true)).reason,
            Reason::FaceNotMatched
        );
    }

    #[test]
    fn test_reason_wire_names() {
        assert_eq!(Reason::GpsAccuracyPoor.as_str(), "gps_accuracy_poor");
        assert_eq!(
            serde_json::to_string(&Reason::NoSitesConfigured).unwrap(),
            "\"no_sites_configured\""
        );
    }
}
