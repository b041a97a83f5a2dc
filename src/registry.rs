use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::backend::ProjectStore;
use crate::openai_api_types::{ModelCard, ModelList};

pub const MODEL_NAMESPACE: &str = "openspg";

/// A backend project exposed as a selectable model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRef {
    pub name: String,
    pub id: String,
}

impl ProjectRef {
    pub fn model_id(&self) -> String {
        format!("{}/{}", MODEL_NAMESPACE, self.name)
    }
}

#[derive(Debug, Default)]
struct ProjectSnapshot {
    projects: Vec<ProjectRef>,
    scanned_at: u64,
}

/// Read-mostly view of the backend's projects.
///
/// The store is scanned once at startup (and again on an explicit
/// `reload`); listing and resolution are pure lookups on an immutable
/// snapshot that is swapped atomically, never mutated in place, so
/// concurrent readers can never observe a torn state.
pub struct ModelRegistry {
    store: Arc<dyn ProjectStore>,
    snapshot: RwLock<Arc<ProjectSnapshot>>,
}

impl ModelRegistry {
    pub async fn new(store: Arc<dyn ProjectStore>) -> Self {
        let registry = ModelRegistry {
            store,
            snapshot: RwLock::new(Arc::new(ProjectSnapshot::default())),
        };
        registry.reload().await;
        registry
    }

    /// Rebuild the snapshot from the store. A store failure keeps the
    /// previous snapshot; an empty store yields an empty model list, which
    /// is a normal result rather than an error.
    pub async fn reload(&self) {
        match self.store.get_projects().await {
            Ok(projects) => {
                info!("loaded {} projects from backend", projects.len());
                let snapshot = Arc::new(ProjectSnapshot {
                    projects,
                    scanned_at: chrono::Utc::now().timestamp() as u64,
                });
                *self
                    .snapshot
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = snapshot;
            }
            Err(e) => {
                warn!("project scan failed, keeping previous snapshot: {}", e);
            }
        }
    }

    fn current(&self) -> Arc<ProjectSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Render the model list fresh from the snapshot. Fields are stable per
    /// id for the lifetime of the snapshot; the returned list is owned by
    /// the caller and never shared.
    pub fn list_models(&self) -> ModelList {
        let snapshot = self.current();
        ModelList {
            object: "list".to_string(),
            data: snapshot
                .projects
                .iter()
                .map(|p| ModelCard {
                    id: p.model_id(),
                    object: "model".to_string(),
                    created: snapshot.scanned_at,
                    owned_by: MODEL_NAMESPACE.to_string(),
                })
                .collect(),
        }
    }

    /// Look up a project by name or by backend id.
    pub fn find_by_name(&self, name_or_id: &str) -> Option<ProjectRef> {
        self.current()
            .projects
            .iter()
            .find(|p| p.name == name_or_id || p.id == name_or_id)
            .cloned()
    }
}
