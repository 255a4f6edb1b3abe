//! Cache store persistence across reopen, garbage collection and stats

use docsift::chunking::Chunk;
use docsift::storage::{CacheMiss, CacheStore};
use docsift::SiftError;
use ndarray::{array, Array2};
use tempfile::TempDir;

fn chunks(path: &str, hash: &str) -> Vec<Chunk> {
    Chunk::from_parts(
        vec!["First part.".to_string(), "Second part.".to_string()],
        path,
        "text",
        hash,
    )
}

fn vectors() -> Array2<f32> {
    array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
}

#[test]
fn test_cache_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join(".docsift");

    {
        let store = CacheStore::open(&data_dir).unwrap();
        store
            .save_file("notes/a.md", "hash-a", 24, &chunks("notes/a.md", "hash-a"), &vectors())
            .unwrap();
        store
            .save_file("b.txt", "hash-b", 24, &chunks("b.txt", "hash-b"), &vectors())
            .unwrap();
    }

    let store = CacheStore::open(&data_dir).unwrap();
    let manifest = store.manifest().unwrap();
    assert_eq!(manifest.len(), 2);
    assert_eq!(manifest["notes/a.md"], "hash-a");

    let snapshot = store.load_on_startup().unwrap();
    assert!(snapshot.dropped.is_empty());
    assert_eq!(snapshot.chunks.len(), 4);
    assert_eq!(snapshot.vectors.dim(), (4, 3));

    let (loaded, matrix) = store.load_file("b.txt").unwrap();
    assert_eq!(loaded, chunks("b.txt", "hash-b"));
    assert_eq!(matrix, vectors());
}

#[test]
fn test_mismatched_vectors_are_dropped_on_load() {
    let temp = TempDir::new().unwrap();
    let store = CacheStore::open(temp.path()).unwrap();
    store
        .save_file("a.txt", "h", 10, &chunks("a.txt", "h"), &vectors())
        .unwrap();
    store
        .save_file("b.txt", "h", 10, &chunks("b.txt", "h"), &vectors())
        .unwrap();

    // One row for two chunks
    store.save_vectors("a.txt", &array![[1.0, 0.0, 0.0]]).unwrap();
    assert!(matches!(
        store.load_file("a.txt"),
        Err(CacheMiss::CountMismatch { chunks: 2, vectors: 1 })
    ));

    let snapshot = store.load_on_startup().unwrap();
    assert_eq!(snapshot.dropped, vec!["a.txt".to_string()]);
    assert_eq!(snapshot.chunks.len(), 2);
    assert!(!store.manifest().unwrap().contains_key("a.txt"));
}

#[test]
fn test_save_rejects_misaligned_rows() {
    let temp = TempDir::new().unwrap();
    let store = CacheStore::open(temp.path()).unwrap();
    let result = store.save_file(
        "a.txt",
        "h",
        10,
        &chunks("a.txt", "h"),
        &array![[1.0, 0.0, 0.0]],
    );
    assert!(matches!(result, Err(SiftError::Cache(_))));
    assert!(store.manifest().unwrap().is_empty());
}

#[test]
fn test_delete_gc_and_stats() {
    let temp = TempDir::new().unwrap();
    let store = CacheStore::open(temp.path()).unwrap();
    for path in ["a.txt", "b.txt", "c.txt"] {
        store
            .save_file(path, "h", 10, &chunks(path, "h"), &vectors())
            .unwrap();
    }

    let stats = store.stats().unwrap();
    assert_eq!(stats.files, 3);
    assert_eq!(stats.chunks, 6);
    assert!(stats.disk_bytes > 0);

    store.delete_file("c.txt").unwrap();
    assert!(matches!(store.load_chunks("c.txt"), Err(CacheMiss::MissingChunks)));
    assert!(!store.has_vectors("c.txt"));
    assert!(store.has_vectors("a.txt"));

    // Nothing unreferenced remains after an explicit delete
    let gc = store.gc().unwrap();
    assert_eq!(gc.deleted_entries, 0);

    let stats = store.stats().unwrap();
    assert_eq!(stats.files, 2);
    assert_eq!(stats.chunks, 4);
}
