//! In-memory template store with per-identity enrollment serialization.
//!
//! Reads take whole-map snapshots under a read lock, so recognize calls
//! never block each other. Concurrent enrolls for the same identity are
//! serialized by a per-identity mutex; enrolls for different identities do
//! not contend. Embedding extraction happens before [`TemplateStore::enroll`]
//! is called, never under the store's write lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::types::{Embedding, Template, EMBEDDING_DIM};

/// Default minimum number of usable samples per enrollment. Multi-frame
/// enrollment exists to average out single-frame noise (blur, blink, angle).
pub const DEFAULT_MIN_SAMPLES: usize = 3;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("no embeddings supplied for enrollment")]
    EmptyEnrollment,
    #[error("only {got} usable samples, need at least {min}")]
    TooFewSamples { got: usize, min: usize },
    #[error("embedding has {got} dimensions, expected {expected}")]
    WrongDimension { got: usize, expected: usize },
    #[error("template persistence failed: {0}")]
    Sink(String),
}

/// How an enrollment interacts with an identity's existing templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollMode {
    /// Add to whatever is already enrolled.
    Append,
    /// Drop every existing template for the identity first (re-enrollment).
    ReplaceAll,
}

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Mirror of committed template state, so a persistence layer stays in sync
/// with the in-memory store. Called with the per-identity lock held, before
/// the in-memory commit: a sink failure leaves memory untouched.
pub trait TemplateSink: Send + Sync {
    fn persist(
        &self,
        identity: &str,
        templates: &[Template],
        mode: EnrollMode,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Drop every persisted template.
    fn clear(&self) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// No-op sink for tests and memory-only deployments.
pub struct NullSink;

impl TemplateSink for NullSink {
    async fn persist(
        &self,
        _identity: &str,
        _templates: &[Template],
        _mode: EnrollMode,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

pub struct TemplateStore<S> {
    templates: RwLock<HashMap<String, Vec<Template>>>,
    enroll_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    sink: S,
    min_samples: usize,
}

impl<S: TemplateSink> TemplateStore<S> {
    pub fn new(sink: S, min_samples: usize) -> Self {
        TemplateStore {
            templates: RwLock::new(HashMap::new()),
            enroll_locks: Mutex::new(HashMap::new()),
            sink,
            min_samples,
        }
    }

    /// Hydrate the store from previously persisted templates. Does not call
    /// the sink. Intended for startup, before any requests are served.
    pub async fn hydrate(&self, templates: Vec<Template>) {
        let mut map = self.templates.write().await;
        for t in templates {
            map.entry(t.identity.clone()).or_default().push(t);
        }
    }

    /// Append (or replace) templates for an identity, one per embedding.
    ///
    /// Returns the number of templates enrolled. Validation happens before
    /// any state is touched; nothing is ever partially applied.
    pub async fn enroll(
        &self,
        identity: &str,
        embeddings: Vec<Embedding>,
        mode: EnrollMode,
    ) -> Result<usize, EnrollError> {
        if embeddings.is_empty() {
            return Err(EnrollError::EmptyEnrollment);
        }
        for e in &embeddings {
            if e.values.len() != EMBEDDING_DIM {
                return Err(EnrollError::WrongDimension {
                    got: e.values.len(),
                    expected: EMBEDDING_DIM,
                });
            }
        }
        if embeddings.len() < self.min_samples {
            return Err(EnrollError::TooFewSamples {
                got: embeddings.len(),
                min: self.min_samples,
            });
        }

        let lock = self.identity_lock(identity).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let new: Vec<Template> = embeddings
            .into_iter()
            .map(|embedding| Template {
                id: Uuid::new_v4(),
                identity: identity.to_string(),
                embedding,
                created_at: now,
            })
            .collect();

        self.sink
            .persist(identity, &new, mode)
            .await
            .map_err(|e| EnrollError::Sink(e.to_string()))?;

        let count = new.len();
        let mut map = self.templates.write().await;
        match mode {
            EnrollMode::Append => map.entry(identity.to_string()).or_default().extend(new),
            EnrollMode::ReplaceAll => {
                map.insert(identity.to_string(), new);
            }
        }
        drop(map);

        tracing::info!(identity, count, ?mode, "templates enrolled");
        Ok(count)
    }

    /// Templates for one identity (claimed-identity matching).
    pub async fn templates_for(&self, identity: &str) -> Vec<Template> {
        self.templates
            .read()
            .await
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every template (open-set matching).
    pub async fn all_templates(&self) -> Vec<Template> {
        self.templates
            .read()
            .await
            .values()
            .flat_map(|v| v.iter().cloned())
            .collect()
    }

    /// Sorted list of enrolled identity codes.
    pub async fn identities(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.templates.read().await.keys().cloned().collect();
        codes.sort();
        codes
    }

    pub async fn is_empty(&self) -> bool {
        self.templates.read().await.is_empty()
    }

    /// Drop every template, in memory and in the sink.
    pub async fn clear(&self) -> Result<(), EnrollError> {
        self.sink
            .clear()
            .await
            .map_err(|e| EnrollError::Sink(e.to_string()))?;
        self.templates.write().await.clear();
        // Locks held by in-flight enrolls stay valid through their Arc.
        self.enroll_locks.lock().await.clear();
        tracing::info!("template store cleared");
        Ok(())
    }

    async fn identity_lock(&self, identity: &str) -> Arc<Mutex<()>> {
        let mut locks = self.enroll_locks.lock().await;
        locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
