use linfa::traits::Transformer;
use linfa_tsne::TSneParams;
use ndarray::Array2;
use rand_08::SeedableRng;
use rand_08::rngs::StdRng;
use tracing::debug;

use super::{COMPONENTS, VisualizationError};
use crate::config::TsneSettings;

/// Largest perplexity Barnes-Hut t-SNE accepts for `rows` points.
pub(super) fn effective_perplexity(requested: f64, rows: usize) -> f64 {
    let limit = rows.saturating_sub(1) as f64 / 3.0;
    requested.min(limit).max(f64::EPSILON)
}

pub(super) fn fit_transform(
    input: &Array2<f32>,
    settings: &TsneSettings,
) -> Result<Array2<f32>, VisualizationError> {
    let perplexity = effective_perplexity(settings.perplexity, input.nrows());
    if perplexity < settings.perplexity {
        debug!(
            "Clamped t-SNE perplexity from {} to {perplexity:.3} for {} points",
            settings.perplexity,
            input.nrows()
        );
    }
    let rng = match settings.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let embedded = TSneParams::embedding_size_with_rng(COMPONENTS, rng)
        .perplexity(perplexity)
        .approx_threshold(settings.approx_threshold)
        .max_iter(settings.max_iter.max(1))
        .transform(input.mapv(f64::from))
        .map_err(|err| VisualizationError::Tsne(err.to_string()))?;
    Ok(embedded.mapv(|value| value as f32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perplexity_is_clamped_for_small_sets() {
        assert_eq!(effective_perplexity(30.0, 10), 3.0);
        assert_eq!(effective_perplexity(5.0, 1000), 5.0);
        assert!(effective_perplexity(30.0, 1) > 0.0);
    }

    #[test]
    fn seeded_run_has_three_columns() {
        let input = Array2::from_shape_fn((24, 3), |(row, col)| {
            ((row / 8) as f32 * 5.0) + (row * 3 + col) as f32 * 0.01
        });
        let settings = TsneSettings {
            perplexity: 5.0,
            approx_threshold: 0.5,
            max_iter: 250,
            seed: Some(7),
        };
        let coords = fit_transform(&input, &settings).unwrap();
        assert_eq!(coords.shape(), &[24, 3]);
        assert!(coords.iter().all(|v| v.is_finite()));
    }
}
