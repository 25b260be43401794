use hnsw_rs::prelude::*;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{COMPONENTS, UmapMetric, VisualizationError};
use crate::config::UmapSettings;

pub(super) fn fit_transform(
    input: &Array2<f32>,
    settings: &UmapSettings,
) -> Result<Array2<f32>, VisualizationError> {
    let n_samples = input.nrows();
    if n_samples < 2 {
        return Err(VisualizationError::TooFewRows(n_samples));
    }
    let n_neighbors = settings
        .n_neighbors
        .min(n_samples.saturating_sub(1))
        .max(1);
    let matrix = input.as_standard_layout().into_owned();
    let (knn_indices, knn_dists) = match settings.metric {
        UmapMetric::Euclidean => build_knn_graph(&matrix, n_neighbors, n_neighbors * 2, DistL2 {}),
        UmapMetric::Cosine => {
            build_knn_graph(&matrix, n_neighbors, n_neighbors * 2, DistCosine {})
        }
    }?;
    let init = random_init(n_samples, COMPONENTS, settings.seed);

    let mut config = umap_rs::UmapConfig::default();
    config.n_components = COMPONENTS;
    config.graph.n_neighbors = n_neighbors;
    config.manifold.min_dist = settings.min_dist;
    let umap = umap_rs::Umap::new(config);
    let fitted = umap.fit(
        matrix.view(),
        knn_indices.view(),
        knn_dists.view(),
        init.view(),
    );
    let coords = fitted.embedding();
    if coords.ncols() != COMPONENTS || coords.nrows() != n_samples {
        return Err(VisualizationError::Umap(format!(
            "layout has shape {:?}, expected [{n_samples}, {COMPONENTS}]",
            coords.shape()
        )));
    }
    Ok(coords.to_owned())
}

fn build_knn_graph<D>(
    matrix: &Array2<f32>,
    n_neighbors: usize,
    ef_search: usize,
    distance: D,
) -> Result<(Array2<u32>, Array2<f32>), VisualizationError>
where
    D: Distance<f32> + Send + Sync,
{
    let n_samples = matrix.nrows();
    let max_elements = n_samples.max(1024);
    let hnsw = Hnsw::new(16, max_elements, 16, 200, distance);
    let not_contiguous = || VisualizationError::Umap("coordinates not contiguous".to_string());
    for (idx, row) in matrix.rows().into_iter().enumerate() {
        hnsw.insert((row.to_slice().ok_or_else(not_contiguous)?, idx));
    }

    let mut knn_indices = Array2::<u32>::zeros((n_samples, n_neighbors));
    let mut knn_dists = Array2::<f32>::zeros((n_samples, n_neighbors));
    for (row_idx, row) in matrix.rows().into_iter().enumerate() {
        let neighbours = hnsw.search(
            row.to_slice().ok_or_else(not_contiguous)?,
            n_neighbors + 1,
            ef_search.max(n_neighbors + 1),
        );
        let mut filled = 0usize;
        for neighbour in neighbours {
            if neighbour.d_id == row_idx {
                continue;
            }
            if filled >= n_neighbors {
                break;
            }
            knn_indices[(row_idx, filled)] = neighbour.d_id as u32;
            knn_dists[(row_idx, filled)] = neighbour.distance;
            filled += 1;
        }
        if filled < n_neighbors {
            return Err(VisualizationError::Umap(format!(
                "nearest-neighbour search found {filled} of {n_neighbors} neighbours for row {row_idx}"
            )));
        }
    }
    Ok((knn_indices, knn_dists))
}

fn random_init(n_samples: usize, n_components: usize, seed: Option<u64>) -> Array2<f32> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    Array2::from_shape_fn((n_samples, n_components), |_| rng.random::<f32>() * 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clusters() -> Array2<f32> {
        Array2::from_shape_fn((30, 3), |(row, col)| {
            let centre = (row % 3) as f32 * 20.0;
            centre + ((row * 5 + col * 3) % 7) as f32 * 0.1
        })
    }

    #[test]
    fn knn_graph_excludes_self() {
        let (indices, dists) = build_knn_graph(&clusters(), 4, 8, DistL2 {}).unwrap();
        assert_eq!(indices.shape(), &[30, 4]);
        for (row, neighbours) in indices.rows().into_iter().enumerate() {
            assert!(neighbours.iter().all(|n| *n as usize != row));
        }
        assert!(dists.iter().all(|d| d.is_finite() && *d >= 0.0));
    }

    #[test]
    fn seeded_init_is_reproducible() {
        assert_eq!(random_init(5, 3, Some(9)), random_init(5, 3, Some(9)));
    }

    #[test]
    fn layout_has_one_row_per_point() {
        let settings = UmapSettings {
            n_neighbors: 5,
            min_dist: 0.1,
            metric: UmapMetric::Euclidean,
            seed: Some(3),
        };
        let coords = fit_transform(&clusters(), &settings).unwrap();
        assert_eq!(coords.shape(), &[30, 3]);
    }
}
