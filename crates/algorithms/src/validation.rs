//! Accuracy of biomass predictions against field measurements

use forestcarb_core::{Error, Result, Stage};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Error metrics over paired predictions and measurements
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Pairs evaluated
    pub n: usize,
    pub rmse: f64,
    pub mae: f64,
    /// Coefficient of determination; `None` when the measurements have
    /// zero variance
    pub r2: Option<f64>,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n={} rmse={:.4} mae={:.4} r2=", self.n, self.rmse, self.mae)?;
        match self.r2 {
            Some(r2) => write!(f, "{:.4}", r2),
            None => f.write_str("undefined"),
        }
    }
}

/// Compare predictions with ground truth.
///
/// `RMSE = sqrt(mean((p - t)^2))`, `R² = 1 - SS_res / SS_tot`.
///
/// # Errors
/// Length mismatch if the sequences differ in length or are empty, and a
/// non-finite error if any value is NaN or infinite.
pub fn validate(predictions: &[f64], ground_truth: &[f64]) -> Result<ValidationReport> {
    if predictions.len() != ground_truth.len() || predictions.is_empty() {
        return Err(Error::LengthMismatch {
            stage: Stage::Validation,
            left: predictions.len(),
            right: ground_truth.len(),
        });
    }

    for (what, values) in [("prediction", predictions), ("ground truth", ground_truth)] {
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(Error::NonFinite {
                stage: Stage::Validation,
                reason: format!("{} {} is {}", what, i, values[i]),
            });
        }
    }

    let n = predictions.len() as f64;
    let mean_truth = ground_truth.iter().sum::<f64>() / n;

    let mut ss_res = 0.0;
    let mut abs_sum = 0.0;
    let mut ss_tot = 0.0;
    for (&p, &t) in predictions.iter().zip(ground_truth) {
        let residual = p - t;
        ss_res += residual * residual;
        abs_sum += residual.abs();
        ss_tot += (t - mean_truth) * (t - mean_truth);
    }

    // Identical measurements leave rounding residue in ss_tot
    let constant = ground_truth.iter().all(|&t| t == ground_truth[0]);
    let r2 = if constant || ss_tot <= 0.0 {
        None
    } else {
        Some(1.0 - ss_res / ss_tot)
    };

    let report = ValidationReport {
        n: predictions.len(),
        rmse: (ss_res / n).sqrt(),
        mae: abs_sum / n,
        r2,
    };
    info!(%report, "validated predictions");
    Ok(report)
}

/// [`validate`] over model output where some predictions may be missing.
///
/// Pairs with a missing prediction are dropped; at least one must remain.
pub fn validate_predictions(
    predictions: &[Option<f64>],
    ground_truth: &[f64],
) -> Result<ValidationReport> {
    if predictions.len() != ground_truth.len() {
        return Err(Error::LengthMismatch {
            stage: Stage::Validation,
            left: predictions.len(),
            right: ground_truth.len(),
        });
    }
    let (p, t): (Vec<f64>, Vec<f64>) = predictions
        .iter()
        .zip(ground_truth)
        .filter_map(|(p, &t)| p.map(|p| (p, t)))
        .unzip();

    let dropped = predictions.len() - p.len();
    if dropped > 0 {
        warn!(dropped, total = predictions.len(), "skipped missing predictions");
    }
    validate(&p, &t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_perfect_predictions() {
        let report = validate(&[200.0, 150.0, 250.0], &[200.0, 150.0, 250.0]).unwrap();
        assert_eq!(report.rmse, 0.0);
        assert_eq!(report.mae, 0.0);
        assert_eq!(report.r2, Some(1.0));
    }

    #[test]
    fn test_known_metrics() {
        let report = validate(&[110.0, 190.0, 300.0], &[100.0, 200.0, 300.0]).unwrap();
        // Residuals 10, -10, 0
        assert_relative_eq!(report.rmse, (200.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(report.mae, 20.0 / 3.0, epsilon = 1e-12);
        // SS_tot = 20000
        assert_relative_eq!(report.r2.unwrap(), 1.0 - 200.0 / 20000.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_variance_r2_undefined() {
        let report = validate(&[1.0, 2.0], &[5.0, 5.0]).unwrap();
        assert_eq!(report.r2, None);
        assert!(report.rmse > 0.0);
        assert!(report.to_string().ends_with("r2=undefined"));
    }

    #[test]
    fn test_inexact_constant_truth_r2_undefined() {
        // mean of three 0.1s is not exactly 0.1
        let report = validate(&[0.2, 0.2, 0.2], &[0.1, 0.1, 0.1]).unwrap();
        assert_eq!(report.r2, None);
        assert_relative_eq!(report.rmse, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_rejected() {
        let err = validate(&[1.0, 2.0], &[1.0, f64::NAN]).unwrap_err();
        assert!(matches!(err, Error::NonFinite { stage: Stage::Validation, .. }));
        assert_eq!(err.stage(), Some(Stage::Validation));

        let err = validate(&[f64::INFINITY, 2.0], &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, Error::NonFinite { .. }));

        let err = validate_predictions(&[Some(1.0), None], &[f64::NAN, 2.0]).unwrap_err();
        assert!(matches!(err, Error::NonFinite { .. }));
    }

    #[test]
    fn test_length_mismatch() {
        let err = validate(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::LengthMismatch { stage: Stage::Validation, left: 2, right: 1 }
        ));
        assert!(matches!(validate(&[], &[]), Err(Error::LengthMismatch { .. })));
    }

    #[test]
    fn test_missing_predictions_dropped() {
        let report =
            validate_predictions(&[Some(100.0), None, Some(300.0)], &[100.0, 999.0, 300.0]).unwrap();
        assert_eq!(report.n, 2);
        assert_eq!(report.rmse, 0.0);

        assert!(matches!(
            validate_predictions(&[None], &[1.0]),
            Err(Error::LengthMismatch { .. })
        ));
    }
}
