//! Document Type Configuration
//!
//! One YAML file per document type binds a workflow definition, approval
//! rules, and a calculation policy under a `doc_type` key. Loaded files are
//! validated up front and published as immutable snapshots; a transition in
//! flight keeps the snapshot it started with even if a newer one is
//! installed mid-flight.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::approval::ApprovalRules;
use crate::calculator::CalculationPolicy;
use crate::definition::WorkflowDefinition;
use crate::error::{EngineError, EngineResult};

/// Everything the engine knows about one document type
#[derive(Debug, Clone, Deserialize)]
pub struct DocTypeConfig {
    /// Key documents reference via `Document::doc_type`
    pub doc_type: String,
    /// State graph for this document type
    pub workflow: WorkflowDefinition,
    /// Approval tiers and routing thresholds
    #[serde(default)]
    pub approval: ApprovalRules,
    /// How line items roll up into totals
    #[serde(default)]
    pub calculation: CalculationPolicy,
}

/// Immutable view of all configured document types
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    /// Bumped on every install, for log correlation
    pub version: u64,
    doc_types: HashMap<String, DocTypeConfig>,
}

impl ConfigSnapshot {
    pub fn new(doc_types: HashMap<String, DocTypeConfig>) -> Self {
        Self {
            version: 1,
            doc_types,
        }
    }

    /// Configuration for a document type
    pub fn doc_type(&self, doc_type: &str) -> EngineResult<&DocTypeConfig> {
        self.doc_types.get(doc_type).ok_or_else(|| {
            EngineError::configuration(format!(
                "no configuration for document type '{doc_type}'"
            ))
        })
    }

    /// Workflow definition for a document type
    pub fn workflow(&self, doc_type: &str) -> EngineResult<&WorkflowDefinition> {
        Ok(&self.doc_type(doc_type)?.workflow)
    }

    /// Approval rules for a document type
    pub fn approval_rules(&self, doc_type: &str) -> EngineResult<&ApprovalRules> {
        Ok(&self.doc_type(doc_type)?.approval)
    }

    /// Calculation policy for a document type
    pub fn calculation(&self, doc_type: &str) -> EngineResult<&CalculationPolicy> {
        Ok(&self.doc_type(doc_type)?.calculation)
    }

    /// Names of all configured document types
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.doc_types.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Loader for document type configuration
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load all document type configs from a directory into a snapshot
    ///
    /// Only `.yaml`/`.yml` files are read. A missing directory yields an
    /// empty snapshot.
    pub fn load_from_dir(dir: &Path) -> EngineResult<ConfigSnapshot> {
        let mut doc_types = HashMap::new();

        if !dir.exists() {
            return Ok(ConfigSnapshot::new(doc_types));
        }

        let entries = std::fs::read_dir(dir).map_err(|e| {
            EngineError::configuration(format!("cannot read {}: {}", dir.display(), e))
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                EngineError::configuration(format!("cannot read {}: {}", dir.display(), e))
            })?;
            let path = entry.path();

            if path
                .extension()
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false)
            {
                let config = Self::load_from_file(&path)?;
                if doc_types.contains_key(&config.doc_type) {
                    return Err(EngineError::configuration(format!(
                        "duplicate configuration for document type '{}'",
                        config.doc_type
                    )));
                }
                doc_types.insert(config.doc_type.clone(), config);
            }
        }

        Ok(ConfigSnapshot::new(doc_types))
    }

    /// Load a single document type config from a file
    pub fn load_from_file(path: &Path) -> EngineResult<DocTypeConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::load_from_str(&content)
    }

    /// Load from a YAML string
    pub fn load_from_str(yaml: &str) -> EngineResult<DocTypeConfig> {
        let mut config: DocTypeConfig = serde_yaml::from_str(yaml).map_err(|e| {
            EngineError::configuration(format!("invalid document type config: {e}"))
        })?;

        config.workflow.validate()?;
        config.approval.validate()?;

        Ok(config)
    }
}

/// Source of the current configuration snapshot
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn snapshot(&self) -> Arc<ConfigSnapshot>;
}

/// Config provider that swaps whole snapshots atomically
pub struct SnapshotProvider {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl SnapshotProvider {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Install a new snapshot, bumping the published version
    ///
    /// Readers that already hold the previous snapshot are unaffected.
    pub async fn install(&self, mut snapshot: ConfigSnapshot) -> u64 {
        let mut current = self.current.write().await;
        snapshot.version = current.version + 1;
        let version = snapshot.version;
        *current = Arc::new(snapshot);
        version
    }
}

#[async_trait]
impl ConfigProvider for SnapshotProvider {
    async fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.read().await.clone()
    }
}
