use linfa::DatasetBase;
use linfa::traits::{Fit, Predict};
use linfa_reduction::Pca;
use ndarray::{Array2, Axis};

use super::{COMPONENTS, VisualizationError};

/// PCA coordinates plus the variance share of each component.
#[derive(Debug, Clone, PartialEq)]
pub struct PcaOutput {
    pub coords: Array2<f32>,
    pub explained_variance_ratio: Vec<f32>,
}

/// Zero mean, unit variance per column using population statistics.
///
/// Constant columns are only centered.
pub fn standardize(features: &Array2<f32>) -> Array2<f64> {
    let data = features.mapv(f64::from);
    let rows = data.nrows().max(1) as f64;
    let Some(mean) = data.mean_axis(Axis(0)) else {
        return data;
    };
    let mut centered = data - &mean;
    let std = centered
        .map_axis(Axis(0), |column| {
            (column.iter().map(|value| value * value).sum::<f64>() / rows).sqrt()
        })
        .mapv(|std| if std > f64::EPSILON { std } else { 1.0 });
    centered /= &std;
    centered
}

/// Standardize, fit PCA and project to [`COMPONENTS`] columns.
///
/// When rank limits the number of components (few rows or features), the
/// missing axes are zero.
pub(super) fn fit_transform(features: &Array2<f32>) -> Result<PcaOutput, VisualizationError> {
    let standardized = standardize(features);
    let rows = standardized.nrows();
    let fitted_components = COMPONENTS
        .min(rows.saturating_sub(1))
        .min(standardized.ncols())
        .max(1);
    let dataset = DatasetBase::from(standardized.clone());
    let pca = Pca::params(fitted_components)
        .fit(&dataset)
        .map_err(|err| VisualizationError::Pca(err.to_string()))?;
    let projected: Array2<f64> = pca.predict(&standardized);
    let ratio = pca.explained_variance_ratio();

    let mut coords = Array2::<f32>::zeros((rows, COMPONENTS));
    for ((row, col), value) in projected.indexed_iter() {
        if col < COMPONENTS {
            coords[(row, col)] = *value as f32;
        }
    }
    let mut explained_variance_ratio = vec![0.0_f32; COMPONENTS];
    for (slot, value) in explained_variance_ratio.iter_mut().zip(ratio.iter()) {
        *slot = *value as f32;
    }
    Ok(PcaOutput {
        coords,
        explained_variance_ratio,
    })
}
