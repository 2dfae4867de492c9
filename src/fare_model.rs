use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::Deserialize;
use std::path::Path;

use crate::features::{self, FEATURE_COUNT, FeatureVector};

/// Regression model mapping a feature row to a fare
pub trait FareModel: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<f64>;
}

/// Reflect negative predictions and raise anything below the minimum fare
pub fn finalize_fare(raw: f64, minimum: f64) -> f64 {
    raw.abs().max(minimum)
}

// Subset of the XGBoost JSON model format we need
#[derive(Deserialize)]
struct XgbDocument {
    learner: Learner,
}

#[derive(Deserialize)]
struct Learner {
    #[serde(default)]
    feature_names: Vec<String>,
    gradient_booster: GradientBooster,
    learner_model_param: LearnerModelParam,
    objective: Objective,
}

#[derive(Deserialize)]
struct GradientBooster {
    name: String,
    model: Option<GbTreeModel>,
}

#[derive(Deserialize)]
struct GbTreeModel {
    trees: Vec<RawTree>,
}

#[derive(Deserialize)]
struct LearnerModelParam {
    base_score: String,
    #[serde(default)]
    num_feature: Option<String>,
}

#[derive(Deserialize)]
struct Objective {
    name: String,
}

// Older releases store default_left as booleans, newer ones as 0/1
#[derive(Deserialize, Clone, Copy)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

#[derive(Deserialize)]
struct RawTree {
    left_children: Vec<i64>,
    right_children: Vec<i64>,
    split_indices: Vec<i64>,
    split_conditions: Vec<f64>,
    default_left: Vec<Flag>,
}

#[derive(Debug, Clone)]
enum TreeNode {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
        default_left: bool,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<TreeNode>,
}

impl Tree {
    fn compile(raw: &RawTree, tree_id: usize) -> Result<Self> {
        let n = raw.left_children.len();
        if [
            raw.right_children.len(),
            raw.split_indices.len(),
            raw.split_conditions.len(),
            raw.default_left.len(),
        ]
        .iter()
        .any(|&len| len != n)
            || n == 0
        {
            bail!("Tree {} has inconsistent node arrays", tree_id);
        }

        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            let left = raw.left_children[i];
            if left < 0 {
                nodes.push(TreeNode::Leaf(raw.split_conditions[i]));
                continue;
            }

            let right = raw.right_children[i];
            let feature = raw.split_indices[i];
            // children always follow their parent, which also rules out cycles
            let child_ok = |c: i64| c > i as i64 && (c as usize) < n;
            if !child_ok(left) || !child_ok(right) {
                bail!("Tree {} node {} has invalid children", tree_id, i);
            }
            if feature < 0 || feature as usize >= FEATURE_COUNT {
                bail!(
                    "Tree {} node {} splits on unknown feature {}",
                    tree_id,
                    i,
                    feature
                );
            }

            nodes.push(TreeNode::Split {
                feature: feature as usize,
                threshold: raw.split_conditions[i] as f32,
                left: left as usize,
                right: right as usize,
                default_left: raw.default_left[i].is_set(),
            });
        }
        Ok(Self { nodes })
    }

    fn leaf_value(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf(value) => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                } => {
                    let value = row[*feature];
                    idx = if value.is_nan() {
                        if *default_left { *left } else { *right }
                    } else if (value as f32) < *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

/// Inverse link of the training objective
#[derive(Debug, Clone, Copy, PartialEq)]
enum Link {
    Identity,
    Exp,
}

impl Link {
    fn for_objective(name: &str) -> Result<Self> {
        match name {
            "reg:squarederror" | "reg:linear" | "reg:absoluteerror" | "reg:pseudohubererror"
            | "reg:squaredlogerror" => Ok(Link::Identity),
            "reg:gamma" | "reg:tweedie" | "count:poisson" => Ok(Link::Exp),
            other => bail!("Unsupported objective for fare regression: {}", other),
        }
    }

    fn base_margin(self, base_score: f64) -> Result<f64> {
        match self {
            Link::Identity => Ok(base_score),
            Link::Exp if base_score > 0.0 => Ok(base_score.ln()),
            Link::Exp => bail!("Base score {} is invalid for a log-link objective", base_score),
        }
    }

    fn apply(self, margin: f64) -> f64 {
        match self {
            Link::Identity => margin,
            Link::Exp => margin.exp(),
        }
    }
}

/// Gradient boosted tree ensemble saved by XGBoost as JSON
#[derive(Debug, Clone)]
pub struct XgbFareModel {
    trees: Vec<Tree>,
    base_margin: f64,
    link: Link,
}

impl XgbFareModel {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model {}", path.display()))?;
        let model = Self::from_json(&contents)
            .with_context(|| format!("Invalid model {}", path.display()))?;
        info!(
            "Fare model loaded from {} ({} trees)",
            path.display(),
            model.tree_count()
        );
        Ok(model)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let document: XgbDocument = serde_json::from_str(json)?;
        let learner = document.learner;

        if let Some(num_feature) = &learner.learner_model_param.num_feature {
            let count: usize = num_feature
                .trim()
                .parse()
                .with_context(|| format!("Invalid num_feature {}", num_feature))?;
            if count != FEATURE_COUNT {
                return Err(crate::error::PipelineError::FeatureSchemaMismatch {
                    expected: FEATURE_COUNT,
                    actual: count,
                }
                .into());
            }
        }
        if !learner.feature_names.is_empty() {
            features::check_schema(&learner.feature_names[..])?;
        }

        if learner.gradient_booster.name != "gbtree" {
            bail!(
                "Unsupported booster {}, expected gbtree",
                learner.gradient_booster.name
            );
        }
        let model = learner
            .gradient_booster
            .model
            .ok_or_else(|| anyhow!("Booster has no tree model"))?;

        let trees = model
            .trees
            .iter()
            .enumerate()
            .map(|(id, raw)| Tree::compile(raw, id))
            .collect::<Result<Vec<_>>>()?;

        let link = Link::for_objective(&learner.objective.name)?;
        let base_score = parse_base_score(&learner.learner_model_param.base_score)?;
        let base_margin = link.base_margin(base_score)?;
        debug!(
            "Objective {} with base score {}",
            learner.objective.name, base_score
        );

        Ok(Self {
            trees,
            base_margin,
            link,
        })
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let leaves: f64 = self.trees.iter().map(|t| t.leaf_value(row)).sum();
        self.link.apply(self.base_margin + leaves)
    }

    /// Score several rows at once; every row must be [`FEATURE_COUNT`] wide
    pub fn predict_batch(&self, rows: ArrayView2<f64>) -> Result<Array1<f64>> {
        if rows.ncols() != FEATURE_COUNT {
            return Err(crate::error::PipelineError::FeatureSchemaMismatch {
                expected: FEATURE_COUNT,
                actual: rows.ncols(),
            }
            .into());
        }
        Ok(rows.outer_iter().map(|row| self.predict_row(row)).collect())
    }
}

impl FareModel for XgbFareModel {
    fn predict(&self, features: &FeatureVector) -> Result<f64> {
        let rows = features.to_row()?.insert_axis(Axis(0));
        let prediction = self
            .predict_batch(rows.view())?
            .first()
            .copied()
            .ok_or_else(|| anyhow!("Model returned no prediction"))?;
        if !prediction.is_finite() {
            bail!("Model produced a non-finite prediction: {}", prediction);
        }
        Ok(prediction)
    }
}

/// XGBoost writes the base score as `"5E-1"`, newer releases as `"[5E-1]"`
fn parse_base_score(value: &str) -> Result<f64> {
    let first = value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .next()
        .unwrap_or_default()
        .trim();
    first
        .parse::<f64>()
        .with_context(|| format!("Invalid base_score {}", value))
}
