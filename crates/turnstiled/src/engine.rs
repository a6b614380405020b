//! The decision engine: orchestrates enroll and recognize end-to-end.
//!
//! Recognize fuses two independently computed signals — facial similarity
//! and geofence containment — with a strict AND. Both sub-results are always
//! computed and returned, never short-circuited, so callers can render a
//! precise reason.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use turnstile_core::{
    CosineMatcher, Embedder, Embedding, EnrollError, EnrollMode, GeofencePolicy, LocationFix,
    MatchError, Matcher, TemplateSink, TemplateStore, Verdict,
};

use crate::attendance::{AttendanceLog, AttendanceRecord};
use crate::sites::SiteRegistry;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The embedding model could not process the image (or timed out).
    /// Fatal for a recognize call; never retried internally.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),
    #[error("no usable frames: every submitted image failed to embed")]
    NoUsableFrames,
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Result of an enrollment: how many frames made it in, how many were
/// dropped because they failed to embed.
#[derive(Debug, Clone, Copy)]
pub struct EnrollOutcome {
    pub enrolled: usize,
    pub dropped: usize,
}

/// Operator policy the engine reads at call time.
#[derive(Debug, Clone, Copy)]
pub struct EnginePolicy {
    pub default_threshold: f32,
    pub geofence: GeofencePolicy,
    pub embed_timeout: Duration,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        EnginePolicy {
            default_threshold: turnstile_core::DEFAULT_THRESHOLD,
            geofence: GeofencePolicy::default(),
            embed_timeout: Duration::from_secs(10),
        }
    }
}

pub struct Engine<S> {
    store: Arc<TemplateStore<S>>,
    sites: Arc<SiteRegistry>,
    embedder: Arc<dyn Embedder>,
    attendance: Arc<AttendanceLog>,
    policy: EnginePolicy,
}

impl<S: TemplateSink + 'static> Engine<S> {
    pub fn new(
        store: Arc<TemplateStore<S>>,
        sites: Arc<SiteRegistry>,
        embedder: Arc<dyn Embedder>,
        attendance: Arc<AttendanceLog>,
        policy: EnginePolicy,
    ) -> Self {
        Engine { store, sites, embedder, attendance, policy }
    }

    /// Run the embedder on the blocking pool under the configured timeout.
    /// Never called while holding the template store's write lock.
    async fn embed(&self, image: Vec<u8>) -> Result<Embedding, EngineError> {
        let embedder = Arc::clone(&self.embedder);
        let task = tokio::task::spawn_blocking(move || embedder.embed(&image));

        match tokio::time::timeout(self.policy.embed_timeout, task).await {
            Err(_) => Err(EngineError::EmbeddingFailed(format!(
                "timed out after {:?}",
                self.policy.embed_timeout
            ))),
            Ok(Err(join)) => Err(EngineError::EmbeddingFailed(format!(
                "embedding task aborted: {join}"
            ))),
            Ok(Ok(result)) => result.map_err(|e| EngineError::EmbeddingFailed(e.to_string())),
        }
    }

    /// Enroll an identity from captured frames.
    ///
    /// Frames that fail to embed are dropped, not fatal — the call fails
    /// only when every frame fails, or when the survivors fall below the
    /// configured minimum sample count.
    pub async fn enroll(
        &self,
        identity: &str,
        images: Vec<Vec<u8>>,
        mode: EnrollMode,
    ) -> Result<EnrollOutcome, EngineError> {
        let total = images.len();
        let mut embeddings = Vec::with_capacity(total);

        for (frame, image) in images.into_iter().enumerate() {
            match self.embed(image).await {
                Ok(embedding) => embeddings.push(embedding),
                Err(e) => {
                    tracing::warn!(identity, frame, error = %e, "enroll frame dropped");
                }
            }
        }

        if total > 0 && embeddings.is_empty() {
            return Err(EngineError::NoUsableFrames);
        }

        let enrolled = self.store.enroll(identity, embeddings, mode).await?;
        let outcome = EnrollOutcome { enrolled, dropped: total - enrolled };
        tracing::info!(
            identity,
            enrolled = outcome.enrolled,
            dropped = outcome.dropped,
            ?mode,
            "enrollment complete"
        );
        Ok(outcome)
    }

    /// Recognize a live capture at a reported location and return the fused
    /// verdict. Admitted verdicts are appended to the attendance log.
    pub async fn recognize(
        &self,
        image: Vec<u8>,
        fix: LocationFix,
        kind: &str,
        threshold_override: Option<f32>,
    ) -> Result<Verdict, EngineError> {
        // Resolve and validate the threshold before paying for inference.
        let threshold = threshold_override.unwrap_or(self.policy.default_threshold);
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(MatchError::InvalidThreshold(threshold).into());
        }
        if threshold < self.policy.default_threshold {
            tracing::warn!(
                threshold,
                default = self.policy.default_threshold,
                "per-call threshold weaker than configured default"
            );
        }

        let embedding = self.embed(image).await?;

        // Open-set match against the whole enrolled population.
        let templates = self.store.all_templates().await;
        let face = CosineMatcher.compare(&embedding, &templates, threshold)?;

        let sites = self.sites.snapshot().await;
        let geofence = self.policy.geofence.evaluate(&fix, &sites);

        let verdict = Verdict::fuse(face, geofence);
        tracing::info!(
            admitted = verdict.admitted,
            identity = verdict.identity.as_deref(),
            score = verdict.score,
            reason = %verdict.reason,
            kind,
            "recognize verdict"
        );

        if verdict.admitted {
            let record = AttendanceRecord {
                // admitted implies a matched identity
                code: verdict.identity.clone().unwrap_or_default(),
                kind: kind.to_string(),
                score: verdict.score,
                lat: fix.coord.lat,
                lng: fix.coord.lng,
                distance_m: verdict.geofence.distance_m,
                reason: verdict.reason,
            };
            if let Err(e) = self.attendance.append(&record).await {
                tracing::error!(error = %e, "attendance append failed");
            }
        }

        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::{
        Coordinate, EmbedError, NullSink, Reason, Site, DEFAULT_MIN_SAMPLES, EMBEDDING_DIM,
    };

    /// Deterministic embedder: the first byte of the image selects a unit
    /// basis vector, so identical first bytes score 1.0 and differing ones
    /// score 0.5 (orthogonal). Images starting with "bad" fail.
    struct StubEmbedder;

    impl Embedder for StubEmbedder {
        fn embed(&self, image: &[u8]) -> Result<Embedding, EmbedError> {
            if image.starts_with(b"bad") {
                return Err(EmbedError::BadImage("stub failure".to_string()));
            }
            let mut values = vec![0.0f32; EMBEDDING_DIM];
            values[*image.first().unwrap_or(&0) as usize % EMBEDDING_DIM] = 1.0;
            Ok(Embedding { values, model_version: None })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: Engine<NullSink>,
        attendance_path: std::path::PathBuf,
        sites: Arc<SiteRegistry>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let attendance_path = dir.path().join("attendance.csv");
        let sites = Arc::new(SiteRegistry::open(&dir.path().join("sites.toml")).unwrap());
        let engine = Engine::new(
            Arc::new(TemplateStore::new(NullSink, DEFAULT_MIN_SAMPLES)),
            Arc::clone(&sites),
            Arc::new(StubEmbedder),
            Arc::new(AttendanceLog::new(attendance_path.clone())),
            EnginePolicy::default(),
        );
        Fixture { _dir: dir, engine, attendance_path, sites }
    }

    fn site(lat: f64, lng: f64, radius_m: f64) -> Site {
        Site {
            name: "HQ".to_string(),
            center: Coordinate::new(lat, lng).unwrap(),
            radius_m,
        }
    }

    fn fix(lat: f64, lng: f64, accuracy_m: f64) -> LocationFix {
        LocationFix::new(Coordinate::new(lat, lng).unwrap(), accuracy_m)
    }

    fn frames(byte: u8, n: usize) -> Vec<Vec<u8>> {
        vec![vec![byte, 1, 2, 3]; n]
    }

    #[tokio::test]
    async fn test_admit_at_site_center() {
        let f = fixture().await;
        f.sites.replace(vec![site(14.0, 100.0, 100.0)]).await.unwrap();
        f.engine.enroll("E001", frames(b'A', 5), EnrollMode::Append).await.unwrap();

        let verdict = f
            .engine
            .recognize(vec![b'A'], fix(14.0, 100.0, 5.0), "checkin", Some(0.58))
            .await
            .unwrap();

        assert!(verdict.admitted);
        assert_eq!(verdict.identity.as_deref(), Some("E001"));
        assert!((verdict.score - 1.0).abs() < 1e-5);
        assert!(verdict.geofence.within);
        assert_eq!(verdict.geofence.reason, Reason::Ok);
        assert_eq!(verdict.reason, Reason::Ok);
    }

    #[tokio::test]
    async fn test_matched_but_outside_radius() {
        let f = fixture().await;
        // Site radius 100 m; fix ~500 m east.
        f.sites.replace(vec![site(0.0, 0.0, 100.0)]).await.unwrap();
        f.engine.enroll("E001", frames(b'A', 5), EnrollMode::Append).await.unwrap();

        let verdict = f
            .engine
            .recognize(vec![b'A'], fix(0.0, 0.0045, 5.0), "checkin", None)
            .await
            .unwrap();

        assert!(!verdict.admitted);
        assert!(verdict.identity.is_some(), "face matched");
        assert!(!verdict.geofence.within);
        assert_eq!(verdict.reason, Reason::OutsideRadius);
        let d = verdict.geofence.distance_m.unwrap();
        assert!((d - 500.0).abs() < 5.0, "got {d}");
    }

    #[tokio::test]
    async fn test_fusion_truth_table_end_to_end() {
        // (same face?, inside fence?) → admitted
        for (face_byte, inside, admitted) in [
            (b'A', true, true),
            (b'A', false, false),
            (b'Z', true, false),
            (b'Z', false, false),
        ] {
            let f = fixture().await;
            f.engine.enroll("E001", frames(b'A', 3), EnrollMode::Append).await.unwrap();
            f.sites.replace(vec![site(0.0, 0.0, 100.0)]).await.unwrap();

            let location = if inside { fix(0.0, 0.0, 5.0) } else { fix(0.0, 0.0045, 5.0) };
            let verdict = f
                .engine
                .recognize(vec![face_byte], location, "checkin", None)
                .await
                .unwrap();
            assert_eq!(verdict.admitted, admitted, "face={face_byte} inside={inside}");
        }
    }

    #[tokio::test]
    async fn test_both_signals_reported_on_double_failure() {
        let f = fixture().await;
        f.sites.replace(vec![site(0.0, 0.0, 100.0)]).await.unwrap();
        f.engine.enroll("E001", frames(b'A', 3), EnrollMode::Append).await.unwrap();

        // Unknown face AND outside the fence: geofence reason wins, but the
        // face score is still present for auditing.
        let verdict = f
            .engine
            .recognize(vec![b'Z'], fix(0.0, 0.0045, 5.0), "checkin", None)
            .await
            .unwrap();
        assert_eq!(verdict.reason, Reason::OutsideRadius);
        assert!((verdict.score - 0.5).abs() < 1e-5);
        assert!(verdict.geofence.distance_m.is_some());
    }

    #[tokio::test]
    async fn test_no_sites_denies_matched_face() {
        let f = fixture().await;
        f.engine.enroll("E001", frames(b'A', 3), EnrollMode::Append).await.unwrap();

        let verdict = f
            .engine
            .recognize(vec![b'A'], fix(0.0, 0.0, 5.0), "checkin", None)
            .await
            .unwrap();
        assert!(!verdict.admitted);
        assert_eq!(verdict.reason, Reason::NoSitesConfigured);
    }

    #[tokio::test]
    async fn test_poor_accuracy_denies_at_center() {
        let f = fixture().await;
        f.sites.replace(vec![site(0.0, 0.0, 100.0)]).await.unwrap();
        f.engine.enroll("E001", frames(b'A', 3), EnrollMode::Append).await.unwrap();

        let verdict = f
            .engine
            .recognize(vec![b'A'], fix(0.0, 0.0, 100.0), "checkin", None)
            .await
            .unwrap();
        assert!(!verdict.admitted);
        assert_eq!(verdict.reason, Reason::GpsAccuracyPoor);
    }

    #[tokio::test]
    async fn test_enroll_drops_bad_frames_but_succeeds() {
        let f = fixture().await;
        let mut images = frames(b'A', 3);
        images.push(b"bad1".to_vec());
        images.push(b"bad2".to_vec());

        let outcome = f.engine.enroll("E001", images, EnrollMode::Append).await.unwrap();
        assert_eq!(outcome.enrolled, 3);
        assert_eq!(outcome.dropped, 2);
    }

    #[tokio::test]
    async fn test_enroll_below_minimum_after_drops() {
        let f = fixture().await;
        let mut images = frames(b'A', 2);
        images.push(b"bad".to_vec());

        let err = f.engine.enroll("E001", images, EnrollMode::Append).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Enroll(EnrollError::TooFewSamples { got: 2, min: 3 })
        ));
    }

    #[tokio::test]
    async fn test_enroll_all_frames_bad() {
        let f = fixture().await;
        let err = f
            .engine
            .enroll("E001", vec![b"bad1".to_vec(), b"bad2".to_vec()], EnrollMode::Append)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoUsableFrames));
    }

    #[tokio::test]
    async fn test_recognize_embedding_failure_is_fatal() {
        let f = fixture().await;
        let err = f
            .engine
            .recognize(b"bad".to_vec(), fix(0.0, 0.0, 5.0), "checkin", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingFailed(_)));
    }

    #[tokio::test]
    async fn test_recognize_rejects_invalid_override() {
        let f = fixture().await;
        for t in [0.0f32, 1.0, -0.5, 2.0] {
            let err = f
                .engine
                .recognize(vec![b'A'], fix(0.0, 0.0, 5.0), "checkin", Some(t))
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::Match(MatchError::InvalidThreshold(_))));
        }
    }

    #[tokio::test]
    async fn test_empty_population_scores_zero() {
        let f = fixture().await;
        f.sites.replace(vec![site(0.0, 0.0, 100.0)]).await.unwrap();
        let verdict = f
            .engine
            .recognize(vec![b'A'], fix(0.0, 0.0, 5.0), "checkin", None)
            .await
            .unwrap();
        assert!(!verdict.admitted);
        assert!(verdict.identity.is_none());
        assert_eq!(verdict.score, 0.0);
        assert_eq!(verdict.reason, Reason::FaceNotMatched);
    }

    #[tokio::test]
    async fn test_admission_appends_attendance_row() {
        let f = fixture().await;
        f.sites.replace(vec![site(0.0, 0.0, 100.0)]).await.unwrap();
        f.engine.enroll("E001", frames(b'A', 3), EnrollMode::Append).await.unwrap();

        f.engine
            .recognize(vec![b'A'], fix(0.0, 0.0, 5.0), "checkout", None)
            .await
            .unwrap();

        let csv = std::fs::read_to_string(&f.attendance_path).unwrap();
        assert!(csv.contains(",E001,checkout,"), "csv was: {csv}");
    }

    #[tokio::test]
    async fn test_denial_does_not_log_attendance() {
        let f = fixture().await;
        f.engine.enroll("E001", frames(b'A', 3), EnrollMode::Append).await.unwrap();

        f.engine
            .recognize(vec![b'A'], fix(0.0, 0.0, 5.0), "checkin", None)
            .await
            .unwrap();
        assert!(!f.attendance_path.exists());
    }
}
