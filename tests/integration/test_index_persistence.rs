//! Build, persist and reload the IVF-PQ index.

use embedscope::IndexBuilder;
use embedscope::ann::{ComputeDevice, IndexMetadata, NORMALIZATION_L2, load_index, save_index};
use embedscope::storage::EmbeddingMatrix;
use embedscope::vector::{VectorDimension, l2_norm, l2_normalize, l2_normalized};

use crate::common::{Snapshot, random_rows, small_index_config};

#[test]
fn test_reloaded_index_answers_identically() {
    let snapshot = Snapshot::new();
    let dim = 8;
    let rows = random_rows(64, dim, 3);
    let matrix =
        EmbeddingMatrix::from_flat(VectorDimension::new(dim).unwrap(), rows.clone()).unwrap();

    let (index, report) = IndexBuilder::new(small_index_config()).build(matrix).unwrap();
    let metadata = IndexMetadata::describe(&index, report.training_rows, ComputeDevice::Cpu);
    save_index(&snapshot.paths.index_file, &index, &metadata).unwrap();

    let (loaded_meta, loaded) = load_index(&snapshot.paths.index_file).unwrap();
    assert_eq!(loaded_meta.ntotal, 64);
    assert_eq!(loaded_meta.dimension, dim);
    assert_eq!(loaded_meta.normalization, NORMALIZATION_L2);
    assert_eq!(loaded.ntotal(), index.ntotal());

    for row in [0usize, 7, 31, 63] {
        let query = l2_normalized(&rows[row * dim..(row + 1) * dim]);
        let before = index.search(&query, 5).unwrap();
        let after = loaded.search(&query, 5).unwrap();
        assert_eq!(before, after, "results differ for row {row}");
    }
}

#[test]
fn test_build_from_store_persists_atomically() {
    let snapshot = Snapshot::new();
    let rows = random_rows(64, 8, 5);
    snapshot.write_store(&rows, 8, 20);

    let builder = IndexBuilder::new(small_index_config());
    let report = builder.build_from_store(&snapshot.paths).unwrap();
    assert_eq!(report.rows, 64);
    assert_eq!(report.index_path.as_deref(), Some(snapshot.paths.index_file.as_path()));

    // Rebuilding replaces the file in place and leaves no temporary files behind
    builder.build_from_store(&snapshot.paths).unwrap();
    let index_dir = snapshot.paths.index_file.parent().unwrap();
    let entries: Vec<_> = std::fs::read_dir(index_dir).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn test_normalization_is_idempotent() {
    let mut vector = vec![3.0f32, -4.0, 12.0, 0.5];
    l2_normalize(&mut vector);
    let once = vector.clone();
    l2_normalize(&mut vector);

    assert!((l2_norm(&vector) - 1.0).abs() < 1e-6);
    for (a, b) in once.iter().zip(&vector) {
        assert!((a - b).abs() < 1e-6);
    }

    let mut zero = vec![0.0f32; 4];
    l2_normalize(&mut zero);
    assert!(zero.iter().all(|&x| x == 0.0));
}
