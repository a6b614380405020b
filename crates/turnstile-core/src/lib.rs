//! turnstile-core — decision primitives for geofenced face verification.
//!
//! Matching compares ArcFace-style 512-dimensional embeddings by cosine
//! similarity; geofencing measures haversine distance against a registry of
//! circular sites. The two signals are fused into a single admit/deny
//! verdict by the daemon's decision engine.

pub mod embedder;
pub mod geo;
pub mod geofence;
pub mod matcher;
pub mod templates;
pub mod types;

pub use embedder::{EmbedError, Embedder, OnnxEmbedder};
pub use geo::{distance_meters, Coordinate, GeoError};
pub use geofence::{GeofencePolicy, LocationFix, Site};
pub use matcher::{CosineMatcher, MatchError, Matcher, DEFAULT_THRESHOLD};
pub use templates::{
    EnrollError, EnrollMode, NullSink, TemplateSink, TemplateStore, DEFAULT_MIN_SAMPLES,
};
pub use types::{Embedding, GeofenceResult, MatchResult, Reason, Template, Verdict, EMBEDDING_DIM};
