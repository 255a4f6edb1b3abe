//! Retrieval building blocks exercised through the public API

mod common;

use common::ScriptedCrossEncoder;
use docsift::chunking::Chunk;
use docsift::config::IndexingConfig;
use docsift::embedding::{normalize, VectorIndexManager};
use docsift::retrieval::{weighted_fusion, FusionConfig, Reranker, ScoredChunk};
use ndarray::Array2;

/// Deterministic pseudo-random unit vectors
fn random_vectors(n: usize, dims: usize, seed: u64) -> Array2<f32> {
    let mut state = seed;
    let mut values = Vec::with_capacity(n * dims);
    for _ in 0..n {
        let mut row: Vec<f32> = (0..dims)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5
            })
            .collect();
        normalize(&mut row);
        values.extend(row);
    }
    Array2::from_shape_vec((n, dims), values).unwrap()
}

#[test]
fn test_every_vector_finds_itself() {
    for n in [1usize, 5, 99, 100, 250, 1000] {
        let vectors = random_vectors(n, 16, n as u64 + 7);
        let mut index = VectorIndexManager::new(IndexingConfig::default());
        index.build(&vectors).unwrap();
        assert_eq!(index.len(), n);
        assert!(index.nlist() >= 1);

        for (i, row) in vectors.outer_iter().enumerate() {
            let query: Vec<f32> = row.to_vec();
            let hits = index.search(&query, 1).unwrap();
            assert_eq!(hits.len(), 1, "n={} i={}", n, i);
            assert_eq!(hits[0].id, i, "n={} i={}", n, i);
            assert!((hits[0].score - 1.0).abs() < 1e-3);
        }
        println!("✓ n={} nlist={} nprobe={}", n, index.nlist(), index.nprobe());
    }
}

#[test]
fn test_empty_index_returns_nothing() {
    let mut index = VectorIndexManager::new(IndexingConfig::default());
    index.build(&Array2::<f32>::zeros((0, 16))).unwrap();
    assert!(index.is_empty());
    assert!(index.search(&[0.0; 16], 5).unwrap().is_empty());
}

#[test]
fn test_dimension_mismatch_is_an_error() {
    let mut index = VectorIndexManager::new(IndexingConfig::default());
    index.build(&random_vectors(10, 8, 1)).unwrap();
    assert!(index.search(&[1.0; 4], 3).is_err());
}

#[test]
fn test_fusion_is_monotone_in_each_leg() {
    let config = FusionConfig::default();
    let dense = vec![(0, 0.9), (1, 0.5), (2, 0.4)];
    let lexical = vec![(1, 0.2), (2, 1.0)];
    let base = weighted_fusion(&dense, &lexical, &config);
    let score_of = |fused: &[(usize, f32)], id: usize| {
        fused.iter().find(|(i, _)| *i == id).map(|(_, s)| *s).unwrap()
    };

    // Raising one candidate's lexical score never lowers its fused score
    let raised = weighted_fusion(&dense, &[(1, 0.8), (2, 1.0)], &config);
    assert!(score_of(&raised, 1) >= score_of(&base, 1));
    assert_eq!(score_of(&raised, 0), score_of(&base, 0));

    // Same for the dense leg
    let raised = weighted_fusion(&[(0, 0.9), (1, 0.5), (2, 0.9)], &lexical, &config);
    assert!(score_of(&raised, 2) > score_of(&base, 2));

    for pair in base.windows(2) {
        assert!(pair[0].1 >= pair[1].1);
    }
}

#[test]
fn test_fusion_keeps_lexical_only_candidates() {
    let config = FusionConfig::new(0.5, 0.5).unwrap();
    let fused = weighted_fusion(&[(0, 1.0)], &[(7, 1.0)], &config);
    assert_eq!(fused.len(), 2);
    assert!(fused.iter().any(|(id, s)| *id == 7 && (*s - 0.5).abs() < 1e-6));
}

fn candidates(n: usize) -> Vec<ScoredChunk> {
    (0..n)
        .map(|i| {
            let chunk = Chunk::from_parts(
                vec![format!("document number {}", i)],
                &format!("doc{}.txt", i),
                "text",
                "hash",
            )
            .remove(0);
            ScoredChunk::new(chunk, 1.0 / (i as f32 + 1.0))
        })
        .collect()
}

#[test]
fn test_reranker_failure_is_never_fatal() {
    let reranker = Reranker::new(
        Some(Box::new(ScriptedCrossEncoder::failing())),
        Some(Box::new(ScriptedCrossEncoder::failing())),
        2,
    );

    let results = reranker.rerank("query", candidates(5), 3);
    let paths: Vec<&str> = results.iter().map(|r| r.chunk.file_path.as_str()).collect();
    assert_eq!(paths, vec!["doc0.txt", "doc1.txt", "doc2.txt"]);

    // Fewer candidates than requested
    assert_eq!(reranker.rerank("query", candidates(2), 10).len(), 2);
}

#[test]
fn test_cpu_encoder_used_after_gpu_failure() {
    let reranker = Reranker::new(None, Some(Box::new(ScriptedCrossEncoder::preferring("4"))), 3)
        .with_gpu(Box::new(ScriptedCrossEncoder::failing()));

    let results = reranker.rerank("query", candidates(5), 2);
    assert_eq!(results[0].chunk.file_path, "doc4.txt");
    assert_eq!(results.len(), 2);
}

#[test]
fn test_both_legs_beat_one_leg() {
    let config = FusionConfig::default();
    // Same dense score; only id 1 also matches lexically
    let fused = weighted_fusion(&[(0, 0.6), (1, 0.6)], &[(1, 0.4)], &config);
    assert_eq!(fused[0].0, 1);
    assert!(fused[0].1 > fused[1].1);
}
