//! Bootstrap-aggregated regression trees for biomass density
//!
//! Each tree owns a ChaCha8 stream seeded with `seed + tree_index` and the
//! ensemble mean is taken in tree order, so a parallel build produces the
//! same model, bit for bit, as a sequential one.

use super::tree::{RegressionTree, TrainingData, TreeParams};
use crate::maybe_rayon::*;
use forestcarb_core::{Error, FeatureSample, FeatureSchema, MultiBandRaster, Raster, Result, Stage};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Number of features examined at each split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// Every feature (plain bagging)
    #[default]
    All,
    /// `ceil(sqrt(n_features))`
    Sqrt,
    /// `ceil(n_features / 3)`
    Third,
    /// A fixed count, capped at the number of features
    Count(usize),
}

impl MaxFeatures {
    fn resolve(self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => (n_features as f64).sqrt().ceil() as usize,
            MaxFeatures::Third => n_features.div_ceil(3),
            MaxFeatures::Count(k) => k,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Parameters for forest training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    /// Ensemble size (default: 100)
    pub n_trees: usize,
    /// Maximum tree depth (default: unlimited)
    pub max_depth: Option<usize>,
    /// Minimum samples needed to split a node (default: 2)
    pub min_samples_split: usize,
    /// Minimum samples in each leaf (default: 1)
    pub min_samples_leaf: usize,
    /// Features considered per split (default: all)
    pub max_features: MaxFeatures,
    /// Base seed; tree `i` uses `seed + i` (default: 42)
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            seed: 42,
        }
    }
}

impl ForestParams {
    fn validate(&self) -> Result<()> {
        let invalid = |name: &'static str, value: usize, reason: &str| Error::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.to_string(),
        };
        if self.n_trees == 0 {
            return Err(invalid("n_trees", self.n_trees, "at least one tree is required"));
        }
        if self.min_samples_split < 2 {
            return Err(invalid("min_samples_split", self.min_samples_split, "must be >= 2"));
        }
        if self.min_samples_leaf == 0 {
            return Err(invalid("min_samples_leaf", self.min_samples_leaf, "must be >= 1"));
        }
        if let Some(0) = self.max_depth {
            return Err(invalid("max_depth", 0, "must be >= 1"));
        }
        Ok(())
    }
}

/// Trains [`BiomassModel`]s
#[derive(Debug, Clone, Default)]
pub struct BiomassEstimator {
    params: ForestParams,
}

impl BiomassEstimator {
    pub fn new(params: ForestParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Fit a forest on per-unit features and measured biomass densities.
    ///
    /// All samples must expose the same feature names. Samples with a
    /// missing feature or a non-finite target are dropped before fitting.
    ///
    /// # Errors
    /// - length mismatch if `features` and `targets` differ in length
    /// - empty training set if no samples are given or none survive filtering
    /// - schema mismatch if the feature names differ between samples
    pub fn train(&self, features: &[FeatureSample], targets: &[f64]) -> Result<BiomassModel> {
        const STAGE: Stage = Stage::Training;

        if features.len() != targets.len() {
            return Err(Error::LengthMismatch {
                stage: STAGE,
                left: features.len(),
                right: targets.len(),
            });
        }
        let first = features
            .first()
            .ok_or(Error::EmptyTrainingSet { stage: STAGE })?;
        self.params.validate()?;

        let schema = FeatureSchema::of(first, STAGE)?;
        let n_features = schema.len();

        let mut x = Vec::with_capacity(features.len() * n_features);
        let mut y = Vec::with_capacity(features.len());
        for (i, (sample, &target)) in features.iter().zip(targets).enumerate() {
            if !schema.matches(sample) {
                let found: Vec<&str> = sample.names().collect();
                return Err(Error::schema(
                    STAGE,
                    format!(
                        "sample {} has features [{}], expected [{}]",
                        i,
                        found.join(", "),
                        schema
                    ),
                ));
            }
            if let Some(values) = schema.project(sample, STAGE)? {
                if target.is_finite() {
                    x.extend_from_slice(&values);
                    y.push(target);
                }
            }
        }

        let dropped = features.len() - y.len();
        if dropped > 0 {
            warn!(dropped, total = features.len(), "dropped incomplete training samples");
        }
        if y.is_empty() {
            return Err(Error::EmptyTrainingSet { stage: STAGE });
        }

        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: self.params.max_features.resolve(n_features),
        };
        let data = TrainingData {
            x: &x,
            y: &y,
            n_features,
        };
        let seed = self.params.seed;

        let trees: Vec<RegressionTree> = (0..self.params.n_trees)
            .into_par_iter()
            .map(|i| RegressionTree::fit_bootstrap(&data, &tree_params, seed.wrapping_add(i as u64)))
            .collect();

        info!(
            trees = trees.len(),
            samples = y.len(),
            features = %schema,
            "trained biomass model"
        );

        Ok(BiomassModel {
            schema,
            trees,
            training_samples: y.len(),
        })
    }

    /// Predict biomass density for each sample with `model`.
    ///
    /// See [`BiomassModel::predict`].
    pub fn predict(&self, model: &BiomassModel, features: &[FeatureSample]) -> Result<Vec<Option<f64>>> {
        model.predict(features)
    }
}

/// A fitted forest and the feature schema it was trained on
///
/// Deserialization checks the trees against the schema, so a loaded model
/// cannot index past its features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredModel")]
pub struct BiomassModel {
    schema: FeatureSchema,
    trees: Vec<RegressionTree>,
    training_samples: usize,
}

/// Unchecked serialized form of [`BiomassModel`]
#[derive(Deserialize)]
struct StoredModel {
    schema: FeatureSchema,
    trees: Vec<RegressionTree>,
    training_samples: usize,
}

impl TryFrom<StoredModel> for BiomassModel {
    type Error = Error;

    fn try_from(stored: StoredModel) -> Result<Self> {
        let schema = FeatureSchema::new(stored.schema.names().iter().cloned(), Stage::Prediction)
            .map_err(|e| Error::InvalidModel(e.to_string()))?;
        if schema != stored.schema {
            return Err(Error::InvalidModel(format!(
                "feature names [{}] are not sorted and unique",
                stored.schema
            )));
        }
        if stored.trees.is_empty() {
            return Err(Error::InvalidModel("model has no trees".into()));
        }
        for (i, tree) in stored.trees.iter().enumerate() {
            tree.check(schema.len())
                .map_err(|reason| Error::InvalidModel(format!("tree {}: {}", i, reason)))?;
        }
        Ok(Self {
            schema,
            trees: stored.trees,
            training_samples: stored.training_samples,
        })
    }
}

impl BiomassModel {
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Samples that survived filtering at training time
    pub fn training_samples(&self) -> usize {
        self.training_samples
    }

    /// Predict biomass density for each sample.
    ///
    /// Every sample must expose exactly the trained feature names. A sample
    /// with a missing value yields `None` at its position; values are never
    /// imputed.
    ///
    /// # Errors
    /// Schema mismatch if any sample's feature names differ from the model's.
    pub fn predict(&self, features: &[FeatureSample]) -> Result<Vec<Option<f64>>> {
        let rows = features
            .iter()
            .map(|s| self.schema.project(s, Stage::Prediction))
            .collect::<Result<Vec<_>>>()?;

        let out: Vec<Option<f64>> = rows
            .into_par_iter()
            .map(|row| row.map(|values| self.predict_values(&values)))
            .collect();

        let missing = out.iter().filter(|p| p.is_none()).count();
        debug!(samples = out.len(), missing, "predicted biomass");
        Ok(out)
    }

    /// Predict a single sample
    pub fn predict_one(&self, sample: &FeatureSample) -> Result<Option<f64>> {
        Ok(self
            .schema
            .project(sample, Stage::Prediction)?
            .map(|values| self.predict_values(&values)))
    }

    /// Ensemble mean, summed in tree order
    fn predict_values(&self, values: &[f64]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict(values)).sum();
        sum / self.trees.len() as f64
    }

    /// Mean squared-error decrease per feature, normalized to sum to 1.
    ///
    /// All zeros when no tree made a split.
    pub fn feature_importances(&self) -> Vec<(String, f64)> {
        let mut totals = vec![0.0; self.schema.len()];
        for tree in &self.trees {
            for (t, v) in totals.iter_mut().zip(tree.importances()) {
                *t += v;
            }
        }
        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            totals.iter_mut().for_each(|t| *t /= sum);
        }
        self.schema.names().iter().cloned().zip(totals).collect()
    }
}

/// Biomass density map from a raster whose bands are the model's features.
///
/// Pixels with any NaN feature are NaN in the output.
///
/// # Errors
/// Schema mismatch if the band names differ from the model's features.
pub fn predict_raster(model: &BiomassModel, raster: &MultiBandRaster) -> Result<Raster> {
    let mut bands: Vec<&str> = raster.band_names().iter().map(String::as_str).collect();
    bands.sort_unstable();
    if !bands.iter().copied().eq(model.schema.names().iter().map(String::as_str)) {
        return Err(Error::schema(
            Stage::Prediction,
            format!(
                "raster bands [{}] do not match model features [{}]",
                raster.band_names().join(", "),
                model.schema
            ),
        ));
    }

    // Band index of each schema feature
    let order: Vec<usize> = model
        .schema
        .names()
        .iter()
        .filter_map(|name| raster.band_index(name))
        .collect();
    let (rows, cols) = raster.shape();
    let data = raster.data();

    let values: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            let mut features = vec![0.0; order.len()];
            for (col, out) in row_data.iter_mut().enumerate() {
                let mut complete = true;
                for (slot, &b) in features.iter_mut().zip(&order) {
                    *slot = data[(b, row, col)];
                    complete &= slot.is_finite();
                }
                if complete {
                    *out = model.predict_values(&features);
                }
            }
            row_data
        })
        .collect();

    let array = Array2::from_shape_vec((rows, cols), values).map_err(|e| Error::Other(e.to_string()))?;
    let mut out = Raster::from_array(array);
    out.set_transform(*raster.transform());
    out.set_crs(raster.crs().cloned());
    info!(rows, cols, "predicted biomass raster");
    Ok(out)
}
