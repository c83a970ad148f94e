//! K-means over unit-length sparse vectors.
//!
//! Seeding is k-means++ driven by a seeded ChaCha RNG, so a frozen document
//! set always yields the same partition. Empty clusters are refilled with the
//! point farthest from its centroid, which keeps every cluster non-empty as
//! long as there are at least `k` points.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::math::vector::math::{dot, squared_euclidean_distance};
use crate::utils::math::vector::SparseVector;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansParams {
    pub num_clusters: usize,
    pub max_iterations: usize,
    /// Stop when the summed squared centroid shift falls below this.
    pub tolerance: f64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// Cluster index per point
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub iterations: usize,
    /// Sum of squared distances to assigned centroids
    pub inertia: f64,
}

#[inline]
fn squared_distance(point: &SparseVector, point_norm_sq: f64, centroid: &[f64], centroid_norm_sq: f64) -> f64 {
    (point_norm_sq + centroid_norm_sq - 2.0 * point.dot_dense(centroid)).max(0.0)
}

fn norm_sq(dense: &[f64]) -> f64 {
    dot(dense, dense)
}

fn to_dense(point: &SparseVector, dim: usize) -> Vec<f64> {
    let mut dense = vec![0.0; dim];
    point.add_to_dense(&mut dense);
    dense
}

/// Nearest centroid and squared distance for every point.
fn assign(points: &[SparseVector], point_norms: &[f64], centroids: &[Vec<f64>]) -> Vec<(usize, f64)> {
    let centroid_norms: Vec<f64> = centroids.iter().map(|c| norm_sq(c)).collect();
    points
        .par_iter()
        .zip(point_norms.par_iter())
        .map(|(point, &pn)| {
            centroids
                .iter()
                .zip(&centroid_norms)
                .enumerate()
                .map(|(idx, (c, &cn))| (idx, squared_distance(point, pn, c, cn)))
                .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
        })
        .collect()
}

/// k-means++ seeding
fn seed_centroids(points: &[SparseVector], point_norms: &[f64], dim: usize, k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut chosen = vec![false; n];
    let first = rng.gen_range(0..n);
    chosen[first] = true;
    let mut centroids = vec![to_dense(&points[first], dim)];
    let mut nearest: Vec<f64> = {
        let c = &centroids[0];
        let cn = norm_sq(c);
        points
            .iter()
            .zip(point_norms)
            .map(|(p, &pn)| squared_distance(p, pn, c, cn))
            .collect()
    };

    while centroids.len() < k {
        let total: f64 = nearest.iter().enumerate().filter(|(i, _)| !chosen[*i]).map(|(_, d)| d).sum();
        let next = if total > 0.0 {
            let mut target = rng.gen_range(0.0..total);
            let mut pick = None;
            for (i, &d) in nearest.iter().enumerate() {
                if chosen[i] {
                    continue;
                }
                pick = Some(i);
                target -= d;
                if target <= 0.0 {
                    break;
                }
            }
            pick
        } else {
            // every remaining point sits on a centroid
            chosen.iter().position(|c| !c)
        };
        let Some(next) = next else { break };
        chosen[next] = true;
        let centroid = to_dense(&points[next], dim);
        let cn = norm_sq(&centroid);
        for (i, (p, &pn)) in points.iter().zip(point_norms).enumerate() {
            let d = squared_distance(p, pn, &centroid, cn);
            if d < nearest[i] {
                nearest[i] = d;
            }
        }
        centroids.push(centroid);
    }
    centroids
}

/// Move the farthest points of multi-member clusters into empty clusters.
fn fill_empty_clusters(assigned: &mut [(usize, f64)], k: usize) {
    let mut sizes = vec![0usize; k];
    for (c, _) in assigned.iter() {
        sizes[*c] += 1;
    }
    for empty in 0..k {
        if sizes[empty] > 0 {
            continue;
        }
        let donor = assigned
            .iter()
            .enumerate()
            .filter(|(_, (c, _))| sizes[*c] > 1)
            .max_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
            .map(|(i, _)| i);
        if let Some(i) = donor {
            sizes[assigned[i].0] -= 1;
            sizes[empty] += 1;
            assigned[i] = (empty, 0.0);
        }
    }
}

fn update_centroids(points: &[SparseVector], assigned: &[(usize, f64)], dim: usize, k: usize) -> Vec<Vec<f64>> {
    let mut sums = vec![vec![0.0; dim]; k];
    let mut counts = vec![0usize; k];
    for (point, (c, _)) in points.iter().zip(assigned) {
        point.add_to_dense(&mut sums[*c]);
        counts[*c] += 1;
    }
    for (sum, count) in sums.iter_mut().zip(counts) {
        if count > 0 {
            sum.iter_mut().for_each(|v| *v /= count as f64);
        }
    }
    sums
}

/// Partition `points` into `params.num_clusters` groups.
///
/// # Arguments
/// * `points` - feature vectors
/// * `dim` - dimensionality of the feature space
/// * `params` - cluster count, iteration cap, tolerance and seed
///
/// Requires `points.len() >= params.num_clusters >= 1`.
pub fn kmeans(points: &[SparseVector], dim: usize, params: &KMeansParams) -> KMeansResult {
    let k = params.num_clusters.min(points.len()).max(1);
    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let point_norms: Vec<f64> = points.iter().map(|p| p.norm().powi(2)).collect();

    let mut centroids = seed_centroids(points, &point_norms, dim, k, &mut rng);
    let mut assigned = Vec::new();
    let mut iterations = 0;

    for iteration in 0..params.max_iterations.max(1) {
        iterations = iteration + 1;
        assigned = assign(points, &point_norms, &centroids);
        fill_empty_clusters(&mut assigned, centroids.len());
        let updated = update_centroids(points, &assigned, dim, centroids.len());
        let shift: f64 = centroids
            .iter()
            .zip(&updated)
            .map(|(old, new)| squared_euclidean_distance(old.as_slice(), new.as_slice()))
            .sum();
        centroids = updated;
        debug!(iteration = iterations, shift, "k-means iteration");
        if shift <= params.tolerance {
            break;
        }
    }

    let centroid_norms: Vec<f64> = centroids.iter().map(|c| norm_sq(c)).collect();
    let inertia = points
        .iter()
        .zip(&point_norms)
        .zip(&assigned)
        .map(|((p, &pn), (c, _))| squared_distance(p, pn, &centroids[*c], centroid_norms[*c]))
        .sum();

    KMeansResult {
        assignments: assigned.into_iter().map(|(c, _)| c).collect(),
        centroids,
        iterations,
        inertia,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(k: usize) -> KMeansParams {
        KMeansParams {
            num_clusters: k,
            max_iterations: 50,
            tolerance: 1e-9,
            seed: 7,
        }
    }

    fn blobs() -> Vec<SparseVector> {
        let mut points = Vec::new();
        for i in 0..10 {
            let jitter = i as f64 * 0.01;
            points.push(SparseVector::from_dense(&[1.0, jitter, 0.0]).normalized());
            points.push(SparseVector::from_dense(&[0.0, jitter, 1.0]).normalized());
        }
        points
    }

    #[test]
    fn separates_two_blobs() {
        let points = blobs();
        let result = kmeans(&points, 3, &params(2));
        let a = result.assignments[0];
        let b = result.assignments[1];
        assert_ne!(a, b);
        for (i, &c) in result.assignments.iter().enumerate() {
            assert_eq!(c, if i % 2 == 0 { a } else { b });
        }
        assert!(result.inertia < 0.05);
    }

    #[test]
    fn same_seed_same_partition() {
        let points = blobs();
        let first = kmeans(&points, 3, &params(4));
        let second = kmeans(&points, 3, &params(4));
        assert_eq!(first.assignments, second.assignments);
    }

    #[test]
    fn identical_points_still_fill_every_cluster() {
        let points: Vec<SparseVector> = (0..6).map(|_| SparseVector::from_dense(&[1.0, 0.0])).collect();
        let result = kmeans(&points, 2, &params(3));
        for c in 0..3 {
            assert!(result.assignments.contains(&c), "cluster {c} is empty");
        }
    }
}
