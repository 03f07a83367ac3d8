//! End-to-end persistence: create → populate → save → load → verify.

use orion_db::{Config, Database, Metadata, MetadataValue};
use tempfile::tempdir;

fn meta(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), MetadataValue::from(*v)))
        .collect()
}

#[test]
fn save_then_load_answers_like_the_original() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pets.orion");

    {
        let db = Database::create(&path, Config::with_max_elements(2, 16)).unwrap();
        assert!(db.add(
            1,
            vec![0.1, 0.1],
            meta(&[("type", "animal"), ("color", "red")])
        ));
        assert!(db.add(
            2,
            vec![0.2, 0.2],
            meta(&[("type", "plant"), ("color", "green")])
        ));
        assert!(db.add(
            3,
            vec![0.9, 0.9],
            meta(&[("type", "animal"), ("color", "blue")])
        ));
        assert_eq!(db.count(), 3);
        assert!(db.save());
    }

    let db = Database::load(&path).unwrap();
    assert_eq!(db.count(), 3);

    // The blue animal lives at [0.9, 0.9]; the query is 0.1 away on both
    // axes, so its squared distance is 2 × 0.1² = 0.02.
    let results = db.query_filtered(&[0.8, 0.8], 1, &meta(&[("type", "animal"), ("color", "blue")]));
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, 3);
    assert!(
        (results[0].distance - 0.02).abs() < 1e-4,
        "distance was {}",
        results[0].distance
    );
}

#[test]
fn load_equals_pre_save_handle() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.orion");

    let db = Database::create(&path, Config::with_max_elements(4, 64)).unwrap();
    for i in 0..40u64 {
        let x = i as f32 * 0.05;
        let mut m = Metadata::new();
        m.insert("i".into(), MetadataValue::Int(i as i64));
        m.insert(
            "parity".into(),
            MetadataValue::from(if i % 2 == 0 { "even" } else { "odd" }),
        );
        assert!(db.add(i, vec![x, -x, x * 0.5, 1.0 - x], m));
    }
    assert!(db.save());

    let reloaded = Database::load(&path).unwrap();
    assert_eq!(reloaded.count(), db.count());

    for i in 0..40u64 {
        let (vector, metadata) = reloaded.get(i).expect("record lost across save/load");
        let (orig_vector, orig_metadata) = db.get(i).unwrap();
        assert_eq!(vector, orig_vector);
        assert_eq!(metadata, orig_metadata);
    }

    // The serialized graph is lossless, so unfiltered results match exactly,
    // ordering included.
    for probe in [[0.0f32, 0.0, 0.0, 1.0], [1.9, -1.9, 0.95, -0.9]] {
        assert_eq!(db.query(&probe, 10), reloaded.query(&probe, 10));
    }
}

#[test]
fn loading_garbage_fails_without_a_handle() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("noise");
    std::fs::write(&path, b"definitely not a snapshot").unwrap();
    assert!(Database::load(&path).is_err());

    assert!(Database::load(dir.path().join("does-not-exist")).is_err());
}

#[test]
fn truncated_snapshot_fails_to_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.orion");
    let db = Database::create(&path, Config::new(2)).unwrap();
    db.add(1, vec![0.3, 0.4], Metadata::new());
    assert!(db.save());
    drop(db);

    let mut bytes = std::fs::read(&path).unwrap();
    bytes.truncate(bytes.len() / 2);
    std::fs::write(&path, bytes).unwrap();
    assert!(Database::load(&path).is_err());
}

#[test]
fn save_survives_multiple_cycles() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.orion");

    let db = Database::create(&path, Config::new(2)).unwrap();
    db.add(1, vec![0.1, 0.1], meta(&[("gen", "first")]));
    assert!(db.save());
    drop(db);

    let db = Database::load(&path).unwrap();
    db.add(2, vec![0.2, 0.2], meta(&[("gen", "second")]));
    db.remove(1);
    assert!(db.save());
    drop(db);

    let db = Database::load(&path).unwrap();
    assert_eq!(db.count(), 1);
    assert!(db.get(1).is_none());
    assert_eq!(db.get(2).unwrap().1["gen"], MetadataValue::from("second"));
    assert!(db
        .query_filtered(&[0.0, 0.0], 10, &meta(&[("gen", "first")]))
        .is_empty());
}
