//! K-Means user segmentation over standardized feature vectors

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::features::{FeatureSet, FEATURE_COUNT};
use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument};

/// Column-wise standardization fitted on the current input
#[derive(Debug, Clone)]
pub struct StandardScaler {
    pub means: Array1<f64>,
    pub stds: Array1<f64>,
}

impl StandardScaler {
    /// Fit per-column mean and population standard deviation (divide by n).
    ///
    /// Constant columns get a unit divisor so they scale to zero instead of NaN.
    pub fn fit(features: &Array2<f64>) -> Self {
        let n_features = features.ncols();
        let means = features
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let stds = if features.nrows() > 0 {
            features
                .std_axis(Axis(0), 0.0)
                .mapv(|s| if s.is_finite() && s > f64::EPSILON { s } else { 1.0 })
        } else {
            Array1::ones(n_features)
        };
        Self { means, stds }
    }

    pub fn transform(&self, features: &Array2<f64>) -> Array2<f64> {
        (features - &self.means) / &self.stds
    }

    /// Scale a single raw feature vector
    pub fn transform_one(&self, values: &[f64]) -> crate::Result<Array1<f64>> {
        if values.len() != self.means.len() {
            return Err(PipelineError::config(format!(
                "feature vector must have exactly {} dimensions, got {}",
                self.means.len(),
                values.len()
            )));
        }
        Ok((&ArrayView1::from(values) - &self.means) / &self.stds)
    }
}

/// K-Means parameters taken from the pipeline config
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentParams {
    pub clusters: usize,
    pub seed: u64,
    pub max_iters: u64,
    pub tolerance: f64,
}

impl From<&PipelineConfig> for SegmentParams {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            clusters: config.clusters,
            seed: config.seed,
            max_iters: config.max_iters,
            tolerance: config.tolerance,
        }
    }
}

impl Default for SegmentParams {
    fn default() -> Self {
        SegmentParams::from(&PipelineConfig::default())
    }
}

/// Fitted K-Means model with its training assignments
#[derive(Debug)]
pub struct SegmentModel {
    pub model: KMeans<f64, L2Dist>,
    pub n_clusters: usize,
    /// Cluster per training row
    pub labels: Array1<usize>,
    /// Centroids in standardized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl SegmentModel {
    /// Nearest centroid for an already standardized vector
    pub fn predict(&self, features: &Array1<f64>) -> crate::Result<usize> {
        if features.len() != self.centroids.ncols() {
            return Err(PipelineError::config(format!(
                "feature vector must have exactly {} dimensions",
                self.centroids.ncols()
            )));
        }

        let mut min_distance = f64::INFINITY;
        let mut closest_cluster = 0;
        for (cluster_idx, centroid) in self.centroids.outer_iter().enumerate() {
            let distance = euclidean_distance(&features.view(), &centroid);
            if distance < min_distance {
                min_distance = distance;
                closest_cluster = cluster_idx;
            }
        }

        Ok(closest_cluster)
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Mean silhouette coefficient over the first `sample_size` rows
    pub fn silhouette_sample(&self, features: &Array2<f64>, sample_size: usize) -> f64 {
        let n_samples = features.nrows().min(sample_size);
        if n_samples < 2 {
            return 0.0;
        }

        let mut silhouette_sum = 0.0;
        for i in 0..n_samples {
            let point = features.row(i);
            let own_label = self.labels[i];

            let mut same_cluster = Vec::new();
            let mut other_clusters: Vec<Vec<f64>> = vec![Vec::new(); self.n_clusters];
            for j in (0..n_samples).filter(|&j| j != i) {
                let distance = euclidean_distance(&point, &features.row(j));
                let other_label = self.labels[j];
                if other_label == own_label {
                    same_cluster.push(distance);
                } else if other_label < self.n_clusters {
                    other_clusters[other_label].push(distance);
                }
            }

            let a_i = mean(&same_cluster).unwrap_or(0.0);
            let b_i = other_clusters
                .iter()
                .filter_map(|distances| mean(distances))
                .fold(f64::INFINITY, f64::min);

            if !(b_i.is_infinite() || (a_i == 0.0 && b_i == 0.0)) {
                silhouette_sum += (b_i - a_i) / a_i.max(b_i);
            }
        }

        silhouette_sum / n_samples as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentAssignment {
    pub user_id: i64,
    pub cluster_id: usize,
}

/// Size and mean raw features of one cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterProfile {
    pub cluster_id: usize,
    pub size: usize,
    pub mean_features: [f64; FEATURE_COUNT],
}

/// Output of a segmentation run
#[derive(Debug)]
pub struct Segmentation {
    pub assignments: Vec<SegmentAssignment>,
    pub model: SegmentModel,
    pub scaler: StandardScaler,
    /// Standardized matrix the model was fitted on
    pub scaled: Array2<f64>,
    /// Raw matrix in the same row order
    pub raw: Array2<f64>,
}

impl Segmentation {
    pub fn cluster_profiles(&self) -> Vec<ClusterProfile> {
        (0..self.model.n_clusters)
            .map(|cluster_id| {
                let rows: Vec<usize> = self
                    .model
                    .labels
                    .iter()
                    .enumerate()
                    .filter(|(_, &label)| label == cluster_id)
                    .map(|(row, _)| row)
                    .collect();

                let mut mean_features = [0.0; FEATURE_COUNT];
                if !rows.is_empty() {
                    for &row in &rows {
                        for (acc, value) in mean_features.iter_mut().zip(self.raw.row(row)) {
                            *acc += value;
                        }
                    }
                    mean_features.iter_mut().for_each(|v| *v /= rows.len() as f64);
                }

                ClusterProfile {
                    cluster_id,
                    size: rows.len(),
                    mean_features,
                }
            })
            .collect()
    }

    /// Assign a new user's raw feature values to the nearest cluster
    pub fn assign(&self, raw_values: &[f64]) -> crate::Result<usize> {
        let scaled = self.scaler.transform_one(raw_values)?;
        self.model.predict(&scaled)
    }

    pub fn silhouette(&self, sample_size: usize) -> f64 {
        self.model.silhouette_sample(&self.scaled, sample_size)
    }
}

/// Standardize the feature matrix and partition users with K-Means.
///
/// Fails with [`PipelineError::InsufficientData`] when there are fewer
/// distinct users than clusters.
#[instrument(skip_all, fields(users = features.len(), k = params.clusters))]
pub fn segment_users(features: &FeatureSet, params: &SegmentParams) -> crate::Result<Segmentation> {
    if params.clusters < 2 {
        return Err(PipelineError::config(format!(
            "cluster count must be at least 2, got {}",
            params.clusters
        )));
    }

    let distinct_users = features
        .vectors
        .iter()
        .map(|v| v.user_id)
        .collect::<BTreeSet<_>>()
        .len();
    if distinct_users < params.clusters {
        return Err(PipelineError::InsufficientData {
            stage: "segmentation",
            required: params.clusters,
            available: distinct_users,
        });
    }

    let raw = features.matrix();
    let scaler = StandardScaler::fit(&raw);
    let scaled = scaler.transform(&raw);
    debug!(means = ?scaler.means, stds = ?scaler.stds, "features standardized");

    let n_samples = scaled.nrows();
    let targets: Array1<usize> = Array1::zeros(n_samples);
    let dataset = Dataset::new(scaled.clone(), targets);

    let rng = StdRng::seed_from_u64(params.seed);
    let model = KMeans::params_with(params.clusters, rng, L2Dist)
        .max_n_iterations(params.max_iters)
        .tolerance(params.tolerance)
        .fit(&dataset)
        .map_err(|e| PipelineError::Clustering {
            message: e.to_string(),
        })?;

    let labels: Array1<usize> = model.predict(&scaled);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(&scaled, &labels, &centroids);

    let assignments = features
        .vectors
        .iter()
        .zip(labels.iter())
        .map(|(vector, &cluster_id)| SegmentAssignment {
            user_id: vector.user_id,
            cluster_id,
        })
        .collect();

    let model = SegmentModel {
        model,
        n_clusters: params.clusters,
        labels,
        centroids,
        inertia,
    };
    info!(
        inertia = model.inertia,
        sizes = ?model.cluster_sizes(),
        "users segmented"
    );

    Ok(Segmentation {
        assignments,
        model,
        scaler,
        scaled,
        raw,
    })
}

fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| {
            features
                .row(i)
                .iter()
                .zip(centroids.row(cluster).iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
        })
        .sum()
}

fn euclidean_distance(point1: &ArrayView1<f64>, point2: &ArrayView1<f64>) -> f64 {
    point1
        .iter()
        .zip(point2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}
