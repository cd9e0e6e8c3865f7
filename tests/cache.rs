mod common;

use common::{collect_ns, counting, numbered_sample};
use samplepipe::{Error, Pipeline, Registry, from_list};
use serde_json::json;
use std::fs;
use std::sync::atomic::Ordering;

#[test]
fn memory_cache_computes_each_index_exactly_once() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let (seq, calls) = counting(&p, 10);
    let cached = seq.cache(None, false)?;

    assert_eq!(collect_ns(&cached)?, (0..10).collect::<Vec<_>>());
    assert_eq!(calls.load(Ordering::SeqCst), 10);

    // Second full pass reads the stored form only.
    assert_eq!(collect_ns(&cached)?, (0..10).collect::<Vec<_>>());
    assert_eq!(calls.load(Ordering::SeqCst), 10);
    Ok(())
}

#[test]
fn disk_cache_computes_each_index_exactly_once() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let folder = dir.path().join("cache");

    let p = Pipeline::default();
    let (seq, calls) = counting(&p, 6);
    let cached = seq.cache(Some(folder.clone()), false)?;

    assert_eq!(collect_ns(&cached)?, (0..6).collect::<Vec<_>>());
    assert_eq!(collect_ns(&cached)?, (0..6).collect::<Vec<_>>());
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    // One serialized entry per index, plus the generation marker.
    assert!(folder.join("cache.marker").exists());
    for idx in 0..6 {
        assert!(folder.join(format!("{idx}.json")).exists());
    }
    Ok(())
}

#[test]
fn an_existing_cache_without_reuse_fails_before_any_sample() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let folder = dir.path().join("cache");

    let p = Pipeline::default();
    let (seq, calls) = counting(&p, 4);
    let cached = seq.cache(Some(folder.clone()), false)?;
    let _ = cached.get_sample(0)?;

    let (fresh, fresh_calls) = counting(&p, 4);
    let err = fresh.cache(Some(folder), false).unwrap_err();
    assert!(matches!(err, Error::CacheExists(_)));
    assert_eq!(fresh_calls.load(Ordering::SeqCst), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn reuse_cache_skips_recomputation_entirely() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let folder = dir.path().join("cache");

    // First generation populates the folder.
    let p = Pipeline::default();
    let (seq, _) = counting(&p, 5);
    let first = seq.cache(Some(folder.clone()), false)?;
    assert_eq!(collect_ns(&first)?, (0..5).collect::<Vec<_>>());

    // A new pipeline reuses the entries without touching its upstream.
    let p2 = Pipeline::default();
    let (seq2, calls2) = counting(&p2, 5);
    let reused = seq2.cache(Some(folder), true)?;
    assert_eq!(collect_ns(&reused)?, (0..5).collect::<Vec<_>>());
    assert_eq!(calls2.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn cached_entries_preserve_item_types_and_payloads() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let folder = dir.path().join("cache");

    let p = Pipeline::default();
    let sample = numbered_sample(3)
        .set_item("name", samplepipe::TxtItem::new(json!("three"), true));
    let seq = from_list(&p, vec![sample]).cache(Some(folder), false)?;

    let first = seq.get_sample(0)?;
    let second = seq.get_sample(0)?;
    assert_eq!(second.to_dict(), first.to_dict());
    assert_eq!(second.get("name")?.type_name(), "txt");
    assert!(second.get("name")?.is_shared());
    Ok(())
}

#[test]
fn an_empty_folder_counts_as_a_fresh_generation() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let folder = dir.path().join("cache");
    fs::create_dir_all(&folder)?;

    let p = Pipeline::default();
    let (seq, _) = counting(&p, 3);
    let cached = seq.cache(Some(folder), false)?;
    assert_eq!(collect_ns(&cached)?, vec![0, 1, 2]);
    Ok(())
}

#[test]
fn cache_specs_round_trip_and_honor_reuse() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let folder = dir.path().join("cache");

    let p = Pipeline::default();
    let seq = samplepipe::toy_dataset(&p, 4, Some(9), "*").cache(Some(folder.clone()), false)?;
    let spec = seq.to_pipe(true);
    assert_eq!(spec.last().unwrap().name, "cache");

    // Rebuilding the same spec now hits the populated folder.
    let _ = seq.get_sample(0)?;
    let p2 = Pipeline::default();
    let err = Registry::with_defaults().build_pipe_entries(&p2, &spec, None);
    assert!(matches!(err, Err(Error::CacheExists(_))));
    Ok(())
}

#[test]
fn concurrent_grabs_still_deliver_consistent_samples() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let folder = dir.path().join("cache");

    let p = Pipeline::default();
    let (seq, _) = counting(&p, 32);
    let cached = seq.cache(Some(folder), false)?;

    let grabber = samplepipe::Grabber { num_workers: 4, keep_order: true, ..Default::default() };
    let mut ns = Vec::new();
    grabber.grab_all(
        &cached,
        samplepipe::GrabAll {
            sample_fn: samplepipe::SampleFn::each(|s| {
                ns.push(common::n_of(&s));
                Ok(())
            }),
            ..Default::default()
        },
    )?;
    assert_eq!(ns, (0..32).collect::<Vec<_>>());
    Ok(())
}
