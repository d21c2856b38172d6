//! Plot-level estimation workflow
//!
//! Split labelled plots into train and hold-out sets, fit the forest,
//! validate on the hold-out plots and convert predicted biomass to carbon.

use crate::acquisition::PlotTable;
use crate::carbon::CarbonSummary;
use crate::regression::{train_test_split, BiomassEstimator, BiomassModel, ForestParams};
use crate::validation::{validate_predictions, ValidationReport};
use forestcarb_core::{Error, Result, Stage};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Workflow configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowParams {
    pub forest: ForestParams,
    /// Share of labelled plots held out for validation (default: 0.2)
    pub test_fraction: f64,
    /// Seed of the hold-out shuffle (default: 42)
    pub split_seed: u64,
}

impl Default for WorkflowParams {
    fn default() -> Self {
        Self {
            forest: ForestParams::default(),
            test_fraction: 0.2,
            split_seed: 42,
        }
    }
}

/// Outcome of [`run_plot_workflow`]
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub model: BiomassModel,
    pub train_plots: usize,
    pub test_plots: usize,
    /// Hold-out accuracy
    pub validation: ValidationReport,
    /// Carbon over the hold-out predictions; `None` if all were missing
    pub carbon: Option<CarbonSummary>,
}

/// Train and validate a biomass model on field plots.
///
/// Plots without a measured biomass are ignored.
pub fn run_plot_workflow(plots: &PlotTable, params: &WorkflowParams) -> Result<WorkflowReport> {
    let (features, targets) = plots.labelled();
    if features.is_empty() {
        return Err(Error::EmptyTrainingSet {
            stage: Stage::Training,
        });
    }

    let (train_idx, test_idx) = train_test_split(features.len(), params.test_fraction, params.split_seed)?;
    let pick = |idx: &[usize]| {
        let f: Vec<_> = idx.iter().map(|&i| features[i].clone()).collect();
        let t: Vec<_> = idx.iter().map(|&i| targets[i]).collect();
        (f, t)
    };
    let (train_x, train_y) = pick(&train_idx);
    let (test_x, test_y) = pick(&test_idx);

    let model = BiomassEstimator::new(params.forest.clone()).train(&train_x, &train_y)?;
    let predictions = model.predict(&test_x)?;
    let validation = validate_predictions(&predictions, &test_y)?;
    let carbon = CarbonSummary::from_densities(predictions.iter().copied());

    info!(
        train = train_idx.len(),
        test = test_idx.len(),
        %validation,
        "plot workflow complete"
    );

    Ok(WorkflowReport {
        model,
        train_plots: train_idx.len(),
        test_plots: test_idx.len(),
        validation,
        carbon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use forestcarb_core::FeatureSample;

    fn plots(n: usize) -> PlotTable {
        let mut features = Vec::new();
        let mut targets = Vec::new();
        for i in 0..n {
            let height = 4.0 + (i % 30) as f64;
            let ndvi = 0.2 + 0.025 * (i % 23) as f64;
            features.push(FeatureSample::new().with("NDVI", ndvi).with("Canopy_Height", height));
            targets.push(if i % 10 == 9 { None } else { Some(9.0 * height + 30.0 * ndvi) });
        }
        PlotTable::new(features, targets, "agb").unwrap()
    }

    fn quick() -> WorkflowParams {
        WorkflowParams {
            forest: ForestParams {
                n_trees: 25,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_workflow_end_to_end() {
        let report = run_plot_workflow(&plots(100), &quick()).unwrap();
        // 90 labelled plots, 20% held out
        assert_eq!(report.test_plots, 18);
        assert_eq!(report.train_plots, 72);
        assert_eq!(report.validation.n, 18);
        assert!(report.validation.r2.unwrap() > 0.8, "{}", report.validation);

        let carbon = report.carbon.unwrap();
        assert!((carbon.mean_carbon - 0.5 * carbon.mean_biomass).abs() < 1e-9);
    }

    #[test]
    fn test_workflow_reproducible() {
        let a = run_plot_workflow(&plots(60), &quick()).unwrap();
        let b = run_plot_workflow(&plots(60), &quick()).unwrap();
        assert_eq!(a.model, b.model);
        assert_eq!(a.validation, b.validation);
    }

    #[test]
    fn test_params_from_partial_json() {
        let params: WorkflowParams =
            serde_json::from_str(r#"{ "test_fraction": 0.3, "forest": { "n_trees": 10 } }"#).unwrap();
        assert_eq!(params.test_fraction, 0.3);
        assert_eq!(params.forest.n_trees, 10);
        assert_eq!(params.forest.seed, 42);
        assert_eq!(params.split_seed, 42);
    }

    #[test]
    fn test_unlabelled_table() {
        let table = PlotTable::new(
            vec![FeatureSample::new().with("NDVI", 0.5)],
            vec![None],
            "agb",
        )
        .unwrap();
        assert!(matches!(
            run_plot_workflow(&table, &quick()),
            Err(Error::EmptyTrainingSet { .. })
        ));
    }
}
