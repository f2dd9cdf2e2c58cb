//! Scoring stages and the startup-built stage registry.
//!
//! Each stage maps a fixed-order feature vector to a duration in seconds.
//! The registry is populated once at startup and then shared read-only
//! (`Arc`) by every request; nothing mutates it afterwards.

pub mod xgboost;

use std::{collections::HashMap, fmt, path::Path, sync::Arc};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::ModelConfig;

pub use xgboost::XgbStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Cooking,
    Allocation,
    Delivery,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [
        StageKind::Cooking,
        StageKind::Allocation,
        StageKind::Delivery,
    ];

    /// Feature names in the exact order the stage consumes them.
    pub fn feature_names(&self) -> &'static [&'static str] {
        match self {
            StageKind::Cooking => &[
                "items_count",
                "cuisine_complexity",
                "hour_of_day",
                "day_of_week",
            ],
            StageKind::Allocation => &["rider_supply_index", "hour_of_day", "day_of_week"],
            StageKind::Delivery => &[
                "osrm_distance",
                "osrm_duration",
                "traffic_factor",
                "hour_of_day",
            ],
        }
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.feature_names().len()
    }

    /// Key under which the model manifest lists this stage.
    pub fn experiment_name(&self) -> &'static str {
        match self {
            StageKind::Cooking => "ETA_Cooking_Prediction",
            StageKind::Allocation => "ETA_Allocation_Prediction",
            StageKind::Delivery => "ETA_LastMile_Prediction",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Cooking => "cooking",
            StageKind::Allocation => "allocation",
            StageKind::Delivery => "delivery",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call scoring failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    Arity {
        stage: StageKind,
        expected: usize,
        got: usize,
    },
    NonFinite {
        stage: StageKind,
    },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arity {
                stage,
                expected,
                got,
            } => write!(f, "{} stage takes {} features, got {}", stage, expected, got),
            Self::NonFinite { stage } => write!(f, "{} stage produced a non-finite value", stage),
        }
    }
}

impl std::error::Error for ModelError {}

/// A loaded duration model. Implementations must be immutable after load.
pub trait ScoringStage: Send + Sync {
    fn kind(&self) -> StageKind;

    fn predict(&self, features: &[f32]) -> std::result::Result<f32, ModelError>;
}

#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<StageKind, Arc<dyn ScoringStage>>,
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("loaded", &self.loaded())
            .finish()
    }
}

impl StageRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a stage while the registry is still being assembled.
    pub fn with_stage(mut self, stage: Arc<dyn ScoringStage>) -> Self {
        self.stages.insert(stage.kind(), stage);
        self
    }

    pub fn get(&self, kind: StageKind) -> Option<&Arc<dyn ScoringStage>> {
        self.stages.get(&kind)
    }

    pub fn loaded(&self) -> Vec<StageKind> {
        StageKind::ALL
            .into_iter()
            .filter(|k| self.stages.contains_key(k))
            .collect()
    }

    pub fn missing(&self) -> Vec<StageKind> {
        StageKind::ALL
            .into_iter()
            .filter(|k| !self.stages.contains_key(k))
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        self.missing().is_empty()
    }

    /// Load all three stages from the manifest and per-stage overrides.
    ///
    /// Any stage that can't be resolved or parsed is an error unless
    /// `allow_missing` is set, in which case it is logged and left absent.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let manifest = read_manifest(Path::new(&config.manifest_path))?;
        let mut registry = Self::empty();

        for kind in StageKind::ALL {
            let override_path = match kind {
                StageKind::Cooking => config.cooking_path.as_deref(),
                StageKind::Allocation => config.allocation_path.as_deref(),
                StageKind::Delivery => config.delivery_path.as_deref(),
            };
            let path = override_path
                .map(str::to_string)
                .or_else(|| manifest.get(kind.experiment_name()).cloned())
                .map(|p| p.replace('\\', "/"));

            let result = match path {
                Some(p) => XgbStage::load(kind, Path::new(&p)).map(|stage| {
                    info!(
                        stage = %kind,
                        path = %p,
                        trees = stage.num_trees(),
                        "✅ Model loaded"
                    );
                    stage
                }),
                None => Err(anyhow::anyhow!(
                    "no model path for {} ({} not in manifest)",
                    kind,
                    kind.experiment_name()
                )),
            };

            match result {
                Ok(stage) => registry = registry.with_stage(Arc::new(stage)),
                Err(e) if config.allow_missing => {
                    error!(stage = %kind, error = %format!("{:#}", e), "❌ Model not loaded");
                }
                Err(e) => return Err(e),
            }
        }

        if !registry.is_ready() {
            warn!(
                missing = ?registry.missing(),
                "Serving without all models; /predict returns 503"
            );
        }
        Ok(registry)
    }
}

/// Experiment name -> model path. A missing manifest is an empty map so
/// per-stage overrides alone are enough to start.
fn read_manifest(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        warn!(path = %path.display(), "⚠️ Model manifest not found");
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let manifest: HashMap<String, String> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid manifest {}", path.display()))?;
    if manifest.is_empty() {
        bail!("Model manifest {} is empty", path.display());
    }
    Ok(manifest)
}
