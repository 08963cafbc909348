//! Topic clustering over indexed messages.
//!
//! K-means with k-means++ seeding in cosine space. All randomness comes from
//! a `StdRng` seeded with [`ClusterParams::seed`], so the same vectors and
//! parameters always produce the same clusters.
//!
//! Output is normalised for stability: empty clusters are dropped and the
//! survivors are numbered `0..` in order of their smallest member slot.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::ClusteringConfig;
use crate::semantic::index::{dot, l2_norm, VectorIndex};
use crate::semantic::keywords::top_terms;

/// Centroids closer than this (mean cosine distance) count as converged.
const CONVERGENCE_TOLERANCE: f32 = 1e-6;

const EPSILON: f32 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterParams {
    /// Requested cluster count; fewer are returned when the corpus can't support it
    pub clusters: usize,
    pub seed: u64,
    pub keywords_per_cluster: usize,
    pub max_iterations: usize,
}

impl From<&ClusteringConfig> for ClusterParams {
    fn from(config: &ClusteringConfig) -> Self {
        Self {
            clusters: config.clusters,
            seed: config.seed,
            keywords_per_cluster: config.keywords_per_cluster,
            max_iterations: config.max_iterations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: usize,
    pub keywords: Vec<String>,
    /// Ascending
    pub member_slots: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    pub clusters: Vec<Cluster>,
    /// Cluster id for every slot
    pub assignments: Vec<usize>,
    pub iterations: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ClusteringError {
    #[error("Invalid cluster count: {0}")]
    InvalidClusterCount(usize),

    #[error("Got {texts} texts for {vectors} vectors")]
    LengthMismatch { vectors: usize, texts: usize },
}

/// Partition every slot of `index` into topic clusters.
///
/// `contents[slot]` is the text used for keyword labels.
pub fn cluster_messages(
    index: &VectorIndex,
    contents: &[&str],
    params: &ClusterParams,
) -> Result<Clustering, ClusteringError> {
    if params.clusters == 0 {
        return Err(ClusteringError::InvalidClusterCount(0));
    }
    if contents.len() != index.len() {
        return Err(ClusteringError::LengthMismatch {
            vectors: index.len(),
            texts: contents.len(),
        });
    }
    if index.is_empty() {
        return Ok(Clustering {
            clusters: vec![],
            assignments: vec![],
            iterations: 0,
        });
    }

    let vectors: Vec<&[f32]> = index.iter().map(|(_, v)| v).collect();
    let k = params.clusters.min(vectors.len());
    let mut rng = StdRng::seed_from_u64(params.seed);

    let mut centroids = seed_centroids(&vectors, k, &mut rng);
    if centroids.len() < params.clusters {
        log::info!(
            "Corpus supports {} distinct clusters, {} requested",
            centroids.len(),
            params.clusters
        );
    }

    let mut assignments = assign(&vectors, &centroids);
    let mut iterations = 1;

    while iterations < params.max_iterations.max(1) {
        let updated = update_centroids(&vectors, &assignments, &centroids);
        let movement = centroid_movement(&centroids, &updated);
        centroids = updated;

        let next = assign(&vectors, &centroids);
        iterations += 1;
        let stable = next == assignments;
        assignments = next;

        if stable || movement < CONVERGENCE_TOLERANCE {
            break;
        }
    }
    log::debug!("k-means finished after {iterations} iterations");

    Ok(finalize(assignments, centroids.len(), contents, params, iterations))
}

/// k-means++: first centroid uniform, the rest weighted by squared cosine
/// distance to the nearest chosen centroid. Stops early when every point
/// already coincides with a centroid, which is how small or repetitive corpora
/// end up with fewer clusters.
fn seed_centroids(vectors: &[&[f32]], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(vectors[rng.random_range(0..vectors.len())].to_vec());

    while centroids.len() < k {
        let distances: Vec<f32> = vectors
            .iter()
            .map(|v| {
                let nearest = centroids
                    .iter()
                    .map(|c| (1.0 - dot(v, c)).max(0.0))
                    .fold(f32::MAX, f32::min);
                nearest * nearest
            })
            .collect();
        let total: f32 = distances.iter().sum();
        if total < EPSILON {
            break;
        }

        let target = rng.random::<f32>() * total;
        let mut cumulative = 0.0;
        let mut chosen = None;
        for (i, &d) in distances.iter().enumerate() {
            cumulative += d;
            if d > 0.0 && cumulative >= target {
                chosen = Some(i);
                break;
            }
        }
        // rounding can leave target just above the final sum
        let chosen = chosen.or_else(|| distances.iter().rposition(|&d| d > 0.0));
        match chosen {
            Some(i) => centroids.push(vectors[i].to_vec()),
            None => break,
        }
    }

    centroids
}

/// Nearest centroid per vector; ties go to the lowest centroid index.
fn assign(vectors: &[&[f32]], centroids: &[Vec<f32>]) -> Vec<usize> {
    vectors
        .iter()
        .map(|v| {
            let mut best = 0;
            let mut best_similarity = f32::NEG_INFINITY;
            for (i, c) in centroids.iter().enumerate() {
                let similarity = dot(v, c);
                if similarity > best_similarity {
                    best_similarity = similarity;
                    best = i;
                }
            }
            best
        })
        .collect()
}

/// Normalized mean of each cluster's members. A cluster that lost all members
/// keeps its previous centroid.
fn update_centroids(vectors: &[&[f32]], assignments: &[usize], previous: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let dimensions = previous.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0f32; dimensions]; previous.len()];
    let mut sizes = vec![0usize; previous.len()];

    for (v, &cluster) in vectors.iter().zip(assignments) {
        for (acc, value) in sums[cluster].iter_mut().zip(v.iter()) {
            *acc += value;
        }
        sizes[cluster] += 1;
    }

    sums.into_iter()
        .zip(sizes)
        .zip(previous)
        .map(|((sum, size), old)| {
            let norm = l2_norm(&sum);
            if size == 0 || norm < EPSILON {
                old.clone()
            } else {
                sum.into_iter().map(|x| x / norm).collect()
            }
        })
        .collect()
}

fn centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    if old.is_empty() {
        return 0.0;
    }
    old.iter()
        .zip(new)
        .map(|(a, b)| 1.0 - dot(a, b))
        .sum::<f32>()
        / old.len() as f32
}

fn finalize(
    raw_assignments: Vec<usize>,
    centroid_count: usize,
    contents: &[&str],
    params: &ClusterParams,
    iterations: usize,
) -> Clustering {
    let mut groups: Vec<Vec<usize>> = vec![vec![]; centroid_count];
    for (slot, &cluster) in raw_assignments.iter().enumerate() {
        groups[cluster].push(slot);
    }

    // slots were pushed in ascending order, so first() is the smallest member
    let mut groups: Vec<Vec<usize>> = groups.into_iter().filter(|g| !g.is_empty()).collect();
    groups.sort_by_key(|g| g[0]);

    let mut assignments = vec![0; raw_assignments.len()];
    let clusters = groups
        .into_iter()
        .enumerate()
        .map(|(cluster_id, member_slots)| {
            for &slot in &member_slots {
                assignments[slot] = cluster_id;
            }
            let keywords = top_terms(
                member_slots.iter().map(|&slot| contents[slot]),
                params.keywords_per_cluster,
            );
            Cluster {
                cluster_id,
                keywords,
                member_slots,
            }
        })
        .collect();

    Clustering {
        clusters,
        assignments,
        iterations,
    }
}
