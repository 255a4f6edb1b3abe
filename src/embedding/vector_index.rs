/// Flat and inverted-file vector indexes
///
/// Both structures are rebuilt together from one vector matrix; neither is
/// updated in place. The flat index keeps every vector in insertion order
/// for exact reconstruction by offset. The IVF index partitions vectors
/// with spherical k-means and searches only the lists of the closest
/// centroids. Scores are inner products (vectors are unit length).
use crate::config::IndexingConfig;
use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use std::cmp::Ordering;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Offset {offset} out of range for index of {len} vectors")]
    OutOfRange { offset: usize, len: usize },

    #[error("Index build failed: {0}")]
    Build(String),
}

/// Search hit: offset into the indexed matrix and its inner-product score
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: usize,
    pub score: f32,
}

/// Descending score, ascending id on ties
fn rank(results: &mut Vec<SearchResult>, top_k: usize) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    results.truncate(top_k);
}

/// Exact inner-product index
#[derive(Debug, Clone)]
pub struct FlatIndex {
    vectors: Array2<f32>,
}

impl FlatIndex {
    pub fn new(vectors: Array2<f32>) -> Self {
        Self { vectors }
    }

    pub fn len(&self) -> usize {
        self.vectors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn search(&self, query: ArrayView1<f32>, top_k: usize) -> Vec<SearchResult> {
        let scores = self.vectors.dot(&query);
        let mut results: Vec<SearchResult> = scores
            .iter()
            .enumerate()
            .map(|(id, &score)| SearchResult { id, score })
            .collect();
        rank(&mut results, top_k);
        results
    }

    pub fn reconstruct(&self, offset: usize) -> Option<Vec<f32>> {
        (offset < self.len()).then(|| self.vectors.row(offset).to_vec())
    }
}

/// One inverted list: original offsets and their vectors
#[derive(Debug, Clone)]
struct InvertedList {
    ids: Vec<usize>,
    vectors: Array2<f32>,
}

/// Inverted-file index with a k-means coarse quantizer
#[derive(Debug, Clone)]
pub struct IvfIndex {
    centroids: Array2<f32>,
    lists: Vec<InvertedList>,
    nprobe: usize,
}

impl IvfIndex {
    /// Train `nlist` centroids on `vectors`, then assign every vector to the
    /// list of its closest centroid
    pub fn train(vectors: &Array2<f32>, nlist: usize, iterations: usize) -> Self {
        let n = vectors.nrows();
        let nlist = nlist.clamp(1, n.max(1));

        // Evenly spaced seeds keep training deterministic
        let seeds: Vec<usize> = (0..nlist).map(|i| i * n / nlist).collect();
        let mut centroids = vectors.select(Axis(0), &seeds);

        let mut assignment = assign(vectors, &centroids);
        for _ in 0..iterations {
            let updated = update_centroids(vectors, &assignment, &centroids);
            let reassigned = assign(vectors, &updated);
            centroids = updated;
            let converged = reassigned == assignment;
            assignment = reassigned;
            if converged {
                break;
            }
        }

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); nlist];
        for (id, &list) in assignment.iter().enumerate() {
            members[list].push(id);
        }
        let lists = members
            .into_iter()
            .map(|ids| InvertedList {
                vectors: vectors.select(Axis(0), &ids),
                ids,
            })
            .collect();

        Self {
            centroids,
            lists,
            nprobe: 1,
        }
    }

    pub fn nlist(&self) -> usize {
        self.centroids.nrows()
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    pub fn set_nprobe(&mut self, nprobe: usize) {
        self.nprobe = nprobe.clamp(1, self.nlist());
    }

    /// Sizes of the inverted lists
    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(|l| l.ids.len()).collect()
    }

    pub fn search(&self, query: ArrayView1<f32>, top_k: usize) -> Vec<SearchResult> {
        let centroid_scores = self.centroids.dot(&query);
        let mut probes: Vec<SearchResult> = centroid_scores
            .iter()
            .enumerate()
            .map(|(id, &score)| SearchResult { id, score })
            .collect();
        rank(&mut probes, self.nprobe);

        let mut results = Vec::new();
        for probe in probes {
            let list = &self.lists[probe.id];
            if list.ids.is_empty() {
                continue;
            }
            let scores = list.vectors.dot(&query);
            results.extend(
                list.ids
                    .iter()
                    .zip(scores.iter())
                    .map(|(&id, &score)| SearchResult { id, score }),
            );
        }
        rank(&mut results, top_k);
        results
    }
}

/// Closest centroid per vector; lowest index wins ties
fn assign(vectors: &Array2<f32>, centroids: &Array2<f32>) -> Vec<usize> {
    vectors
        .outer_iter()
        .map(|v| nearest(&centroids.dot(&v)))
        .collect()
}

fn nearest(scores: &Array1<f32>) -> usize {
    let mut best = 0;
    for (i, &score) in scores.iter().enumerate() {
        if score > scores[best] {
            best = i;
        }
    }
    best
}

/// Mean of each cluster, renormalised. Empty clusters keep their centroid.
fn update_centroids(
    vectors: &Array2<f32>,
    assignment: &[usize],
    previous: &Array2<f32>,
) -> Array2<f32> {
    let mut sums = Array2::<f32>::zeros(previous.raw_dim());
    let mut counts = vec![0usize; previous.nrows()];

    for (row, &list) in vectors.outer_iter().zip(assignment) {
        let mut target = sums.row_mut(list);
        target += &row;
        counts[list] += 1;
    }

    for (i, count) in counts.into_iter().enumerate() {
        let mut centroid = sums.row_mut(i);
        if count == 0 {
            centroid.assign(&previous.row(i));
            continue;
        }
        let norm = centroid.dot(&centroid).sqrt();
        if norm > f32::EPSILON {
            centroid /= norm;
        }
    }
    sums
}

/// Owns the flat and IVF indexes and rebuilds them together
pub struct VectorIndexManager {
    config: IndexingConfig,
    flat: Option<FlatIndex>,
    ivf: Option<IvfIndex>,
}

impl VectorIndexManager {
    pub fn new(config: IndexingConfig) -> Self {
        Self {
            config,
            flat: None,
            ivf: None,
        }
    }

    /// Cluster count for a corpus of `n` vectors
    pub fn choose_nlist(&self, n: usize) -> usize {
        let c = &self.config;
        let nlist = if n < c.small_corpus_threshold {
            1
        } else if n < c.large_corpus_threshold {
            (n / c.medium_vectors_per_cluster.max(1)).max(1)
        } else {
            (n / c.large_vectors_per_cluster.max(1)).max(c.min_large_clusters)
        };
        nlist.min(n.max(1))
    }

    /// Replace both indexes with ones built from `vectors`.
    /// An empty matrix leaves both unset.
    pub fn build(&mut self, vectors: &Array2<f32>) -> Result<(), VectorIndexError> {
        self.flat = None;
        self.ivf = None;

        let n = vectors.nrows();
        if n == 0 {
            debug!("Vector index cleared (empty corpus)");
            return Ok(());
        }
        if vectors.ncols() == 0 {
            return Err(VectorIndexError::Build(
                "Vectors have zero dimensions".to_string(),
            ));
        }

        let nlist = self.choose_nlist(n);
        let mut ivf = IvfIndex::train(vectors, nlist, self.config.train_iterations);
        ivf.set_nprobe(nlist.min(self.config.max_nprobe));

        debug!(
            "Built vector index: {} vectors, nlist={}, nprobe={}",
            n,
            ivf.nlist(),
            ivf.nprobe()
        );

        self.flat = Some(FlatIndex::new(vectors.to_owned()));
        self.ivf = Some(ivf);
        Ok(())
    }

    /// At most `top_k` hits by descending inner product
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>, VectorIndexError> {
        let (Some(flat), Some(ivf)) = (&self.flat, &self.ivf) else {
            return Ok(Vec::new());
        };
        if query.len() != flat.dimension() {
            return Err(VectorIndexError::InvalidDimension {
                expected: flat.dimension(),
                actual: query.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }
        Ok(ivf.search(ArrayView1::from(query), top_k))
    }

    /// Exact search over the flat index
    pub fn search_exact(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>, VectorIndexError> {
        let Some(flat) = &self.flat else {
            return Ok(Vec::new());
        };
        if query.len() != flat.dimension() {
            return Err(VectorIndexError::InvalidDimension {
                expected: flat.dimension(),
                actual: query.len(),
            });
        }
        Ok(flat.search(ArrayView1::from(query), top_k))
    }

    /// Vector stored at `offset`, from the flat index
    pub fn reconstruct(&self, offset: usize) -> Result<Vec<f32>, VectorIndexError> {
        let len = self.len();
        self.flat
            .as_ref()
            .and_then(|f| f.reconstruct(offset))
            .ok_or(VectorIndexError::OutOfRange { offset, len })
    }

    /// Rows `start..start + count` of the flat index
    pub fn reconstruct_range(
        &self,
        start: usize,
        count: usize,
    ) -> Result<Array2<f32>, VectorIndexError> {
        let len = self.len();
        let end = start
            .checked_add(count)
            .filter(|&end| end <= len)
            .ok_or(VectorIndexError::OutOfRange {
                offset: start.saturating_add(count),
                len,
            })?;
        match &self.flat {
            Some(flat) => Ok(flat.vectors.slice(s![start..end, ..]).to_owned()),
            None => Err(VectorIndexError::OutOfRange { offset: start, len }),
        }
    }

    pub fn len(&self) -> usize {
        self.flat.as_ref().map(FlatIndex::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> Option<usize> {
        self.flat.as_ref().map(FlatIndex::dimension)
    }

    pub fn nlist(&self) -> usize {
        self.ivf.as_ref().map(IvfIndex::nlist).unwrap_or(0)
    }

    pub fn nprobe(&self) -> usize {
        self.ivf.as_ref().map(IvfIndex::nprobe).unwrap_or(0)
    }
}
