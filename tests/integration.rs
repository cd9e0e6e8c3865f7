mod common;

use common::{collect_ns, n_of, numbered};
use samplepipe::{GrabAll, Grabber, Pipeline, Registry, SampleFn, toy_dataset};
use serde_json::json;

#[test]
fn spec_built_pipeline_grabs_through_workers() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let registry = Registry::with_defaults();

    let seq = registry.build_pipe(
        &p,
        &json!([
            { "toy_dataset": { "length": 50, "seed": 123 } },
            { "shuffle": { "seed": 7 } },
            { "slice": { "stop": 20 } },
            { "enumerate": { "idx_key": "~idx" } },
        ]),
        None,
    )?;
    assert_eq!(seq.size()?, 20);

    let grabber = Grabber { num_workers: 4, keep_order: true, ..Grabber::default() };
    let mut labels = Vec::new();
    grabber.grab_all(
        &seq,
        GrabAll {
            sample_fn: SampleFn::indexed(|idx, sample| {
                assert_eq!(sample.get("~idx")?.value(), json!(idx));
                labels.push(sample.deep_get("label", json!(-1)));
                Ok(())
            }),
            ..GrabAll::default()
        },
    )?;
    assert_eq!(labels.len(), 20);

    // The pipeline is a multi-pass view: a second grab sees the same data.
    let mut again = Vec::new();
    grabber.grab_all(
        &seq,
        GrabAll {
            sample_fn: SampleFn::each(|sample| {
                again.push(sample.deep_get("label", json!(-1)));
                Ok(())
            }),
            ..GrabAll::default()
        },
    )?;
    assert_eq!(labels, again);
    Ok(())
}

#[test]
fn toy_dataset_is_deterministic_per_seed() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let a = toy_dataset(&p, 10, Some(5), "*");
    let b = toy_dataset(&p, 10, Some(5), "*");

    for idx in 0..10 {
        assert_eq!(a.get_sample(idx)?.to_dict(), b.get_sample(idx)?.to_dict());
    }

    let keyed = toy_dataset(&p, 2, Some(5), "toy_*");
    let keys: Vec<String> = keyed.get_sample(0)?.keys().map(str::to_string).collect();
    assert_eq!(keys, vec!["toy_id", "toy_label", "toy_values"]);
    Ok(())
}

#[test]
fn cached_tail_of_a_mapped_pipeline_survives_a_parallel_grab() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let p = Pipeline::default();

    let seq = numbered(&p, 20)
        .map_fn(|s| {
            let n = n_of(&s);
            Ok(s.set_value("n", json!(n * n))?)
        })
        .cache(Some(dir.path().join("squares")), false)?;

    seq.run(&Grabber { num_workers: 4, ..Grabber::default() }, SampleFn::Ignore)?;
    assert_eq!(collect_ns(&seq)?, (0..20).map(|n| n * n).collect::<Vec<_>>());
    Ok(())
}
