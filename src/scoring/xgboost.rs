//! XGBoost JSON model evaluator.
//!
//! Reads the `save_model("model.json")` format of a `gbtree` booster and
//! evaluates it in-process. Only identity-link regression objectives are
//! accepted, which covers every duration model this service serves.

use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Deserializer};

use super::{ModelError, ScoringStage, StageKind};

const IDENTITY_OBJECTIVES: &[&str] = &[
    "reg:squarederror",
    "reg:linear",
    "reg:absoluteerror",
    "reg:pseudohubererror",
];

#[derive(Deserialize)]
struct ModelFile {
    learner: Learner,
}

#[derive(Deserialize)]
struct Learner {
    learner_model_param: LearnerModelParam,
    gradient_booster: GradientBooster,
    objective: Objective,
}

#[derive(Deserialize)]
struct LearnerModelParam {
    base_score: String,
    #[serde(default)]
    num_feature: Option<String>,
}

#[derive(Deserialize)]
struct GradientBooster {
    name: String,
    model: GbTreeModel,
}

#[derive(Deserialize)]
struct GbTreeModel {
    trees: Vec<RawTree>,
}

#[derive(Deserialize)]
struct Objective {
    name: String,
}

#[derive(Deserialize)]
struct RawTree {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<u32>,
    split_conditions: Vec<f32>,
    #[serde(deserialize_with = "bool_or_int_vec")]
    default_left: Vec<bool>,
}

/// Older releases write `default_left` as booleans, newer ones as 0/1.
fn bool_or_int_vec<'de, D>(deserializer: D) -> std::result::Result<Vec<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    let flags = Vec::<Flag>::deserialize(deserializer)?;
    Ok(flags
        .into_iter()
        .map(|f| match f {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        })
        .collect())
}

/// One regression tree in flattened array form. Leaves carry their value in
/// `split_conditions`, as XGBoost itself stores them.
#[derive(Debug, Clone)]
struct Tree {
    left: Vec<i32>,
    right: Vec<i32>,
    feature: Vec<u32>,
    threshold: Vec<f32>,
    default_left: Vec<bool>,
}

impl Tree {
    fn from_raw(raw: RawTree, arity: usize) -> Result<Self> {
        let n = raw.left_children.len();
        ensure!(n > 0, "empty tree");
        ensure!(
            raw.right_children.len() == n
                && raw.split_indices.len() == n
                && raw.split_conditions.len() == n
                && raw.default_left.len() == n,
            "tree arrays have mismatched lengths"
        );
        for i in 0..n {
            let (l, r) = (raw.left_children[i], raw.right_children[i]);
            if l == -1 {
                continue;
            }
            ensure!(
                l > i as i32 && r > i as i32 && (l as usize) < n && (r as usize) < n,
                "node {} has invalid children ({}, {})",
                i,
                l,
                r
            );
            ensure!(
                (raw.split_indices[i] as usize) < arity,
                "node {} splits on feature {} but the stage takes {} features",
                i,
                raw.split_indices[i],
                arity
            );
        }
        Ok(Self {
            left: raw.left_children,
            right: raw.right_children,
            feature: raw.split_indices,
            threshold: raw.split_conditions,
            default_left: raw.default_left,
        })
    }

    #[inline]
    fn leaf_value(&self, features: &[f32]) -> f32 {
        let mut node = 0usize;
        loop {
            let left = self.left[node];
            if left == -1 {
                return self.threshold[node];
            }
            let x = features[self.feature[node] as usize];
            let go_left = if x.is_nan() {
                self.default_left[node]
            } else {
                x < self.threshold[node]
            };
            let next = if go_left { left } else { self.right[node] };
            node = next as usize;
        }
    }
}

fn parse_base_score(raw: &str) -> Result<f32> {
    let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
    trimmed
        .parse::<f32>()
        .with_context(|| format!("invalid base_score {:?}", raw))
}

/// Boosted tree ensemble bound to one stage.
#[derive(Debug, Clone)]
pub struct XgbStage {
    kind: StageKind,
    base_score: f32,
    trees: Vec<Tree>,
}

impl XgbStage {
    pub fn from_json(kind: StageKind, json: &str) -> Result<Self> {
        let file: ModelFile = serde_json::from_str(json).context("not an XGBoost JSON model")?;
        let learner = file.learner;

        if !IDENTITY_OBJECTIVES.contains(&learner.objective.name.as_str()) {
            bail!("unsupported objective {}", learner.objective.name);
        }
        if learner.gradient_booster.name != "gbtree" {
            bail!("unsupported booster {}", learner.gradient_booster.name);
        }

        let arity = kind.arity();
        if let Some(n) = learner
            .learner_model_param
            .num_feature
            .as_deref()
            .and_then(|s| s.trim().parse::<usize>().ok())
        {
            ensure!(
                n == arity,
                "{} model expects {} features, stage provides {}",
                kind,
                n,
                arity
            );
        }

        let base_score = parse_base_score(&learner.learner_model_param.base_score)?;
        let trees = learner
            .gradient_booster
            .model
            .trees
            .into_iter()
            .enumerate()
            .map(|(i, t)| Tree::from_raw(t, arity).with_context(|| format!("tree {}", i)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            kind,
            base_score,
            trees,
        })
    }

    pub fn load(kind: StageKind, path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {} model {}", kind, path.display()))?;
        Self::from_json(kind, &json)
            .with_context(|| format!("Failed to load {} model {}", kind, path.display()))
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }
}

impl ScoringStage for XgbStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn predict(&self, features: &[f32]) -> std::result::Result<f32, ModelError> {
        let arity = self.kind.arity();
        if features.len() != arity {
            return Err(ModelError::Arity {
                stage: self.kind,
                expected: arity,
                got: features.len(),
            });
        }
        let margin = self
            .trees
            .iter()
            .fold(self.base_score, |acc, t| acc + t.leaf_value(features));
        if !margin.is_finite() {
            return Err(ModelError::NonFinite { stage: self.kind });
        }
        Ok(margin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Two stumps on the allocation stage (3 features):
    ///   tree 0: rider_supply_index < 1.0 ? 120 : 30   (NaN goes left)
    ///   tree 1: hour_of_day < 12 ? -10 : 20           (NaN goes right)
    const ALLOCATION_MODEL: &str = r#"{
      "learner": {
        "attributes": {},
        "feature_names": [],
        "feature_types": [],
        "gradient_booster": {
          "model": {
            "gbtree_model_param": { "num_parallel_tree": "1", "num_trees": "2" },
            "tree_info": [0, 0],
            "trees": [
              {
                "base_weights": [0.0, 120.0, 30.0],
                "default_left": [1, 0, 0],
                "id": 0,
                "left_children": [1, -1, -1],
                "right_children": [2, -1, -1],
                "split_conditions": [1.0, 120.0, 30.0],
                "split_indices": [0, 0, 0],
                "split_type": [0, 0, 0]
              },
              {
                "base_weights": [0.0, -10.0, 20.0],
                "default_left": [false, false, false],
                "id": 1,
                "left_children": [1, -1, -1],
                "right_children": [2, -1, -1],
                "split_conditions": [12.0, -10.0, 20.0],
                "split_indices": [1, 0, 0],
                "split_type": [0, 0, 0]
              }
            ]
          },
          "name": "gbtree"
        },
        "learner_model_param": {
          "base_score": "[1E2]",
          "num_class": "0",
          "num_feature": "3",
          "num_target": "1"
        },
        "objective": { "name": "reg:squarederror", "reg_loss_param": { "scale_pos_weight": "1" } }
      },
      "version": [2, 0, 3]
    }"#;

    fn stage() -> XgbStage {
        XgbStage::from_json(StageKind::Allocation, ALLOCATION_MODEL).unwrap()
    }

    #[test]
    fn test_evaluates_ensemble() {
        let s = stage();
        assert_eq!(s.num_trees(), 2);
        // 100 + 120 - 10
        assert_eq!(s.predict(&[0.8, 9.0, 1.0]).unwrap(), 210.0);
        // 100 + 30 + 20
        assert_eq!(s.predict(&[1.5, 18.0, 1.0]).unwrap(), 150.0);
        // Split is strict: x == threshold goes right.
        assert_eq!(s.predict(&[1.0, 12.0, 1.0]).unwrap(), 150.0);
    }

    #[test]
    fn test_missing_values_follow_default_branch() {
        assert_eq!(stage().predict(&[f32::NAN, f32::NAN, 1.0]).unwrap(), 240.0);
    }

    #[test]
    fn test_wrong_arity_is_an_error() {
        let err = stage().predict(&[1.0, 9.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(err, ModelError::Arity { expected: 3, got: 4, .. }));
    }

    #[test]
    fn test_feature_count_must_match_stage() {
        let err = XgbStage::from_json(StageKind::Cooking, ALLOCATION_MODEL).unwrap_err();
        assert!(format!("{:#}", err).contains("expects 3 features"));
    }

    #[test]
    fn test_rejects_non_identity_objective() {
        let json = ALLOCATION_MODEL.replace("reg:squarederror", "binary:logistic");
        assert!(XgbStage::from_json(StageKind::Allocation, &json).is_err());
    }

    #[test]
    fn test_plain_base_score() {
        assert_eq!(parse_base_score("5E-1").unwrap(), 0.5);
        assert_eq!(parse_base_score("[3.5E2]").unwrap(), 350.0);
        assert!(parse_base_score("abc").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ALLOCATION_MODEL.as_bytes()).unwrap();
        let s = XgbStage::load(StageKind::Allocation, file.path()).unwrap();
        assert_eq!(s.kind(), StageKind::Allocation);
    }
}
