mod common;

use common::{collect_ns, n_of, numbered, numbered_sample};
use samplepipe::{Error, MapCondition, Pipeline, Sample, StageFn, from_list};
use serde_json::json;

#[test]
fn map_applies_lazily_on_every_access() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let seq = numbered(&p, 4).map_fn(|s| {
        let n = s.deep_get("n", json!(0)).as_i64().unwrap_or(0);
        Ok(s.set_value("n", json!(n * 10))?)
    });

    assert_eq!(collect_ns(&seq)?, vec![0, 10, 20, 30]);
    assert_eq!(n_of(&seq.get_sample(2)?), 20);
    Ok(())
}

#[test]
fn map_stage_errors_propagate_verbatim() {
    let p = Pipeline::default();
    let seq = numbered(&p, 3).map_fn(|_| anyhow::bail!("stage exploded"));

    let err = seq.get_sample(0).unwrap_err();
    assert!(matches!(&err, Error::Stage(_)));
    assert_eq!(err.to_string(), "stage exploded");
}

#[test]
fn map_if_only_touches_matching_samples() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let negate = StageFn::new(|s: Sample| {
        let n = s.deep_get("n", json!(0)).as_i64().unwrap_or(0);
        Ok(s.set_value("n", json!(-n))?)
    });

    let seq = numbered(&p, 6).map_if(negate, MapCondition::index_range(1, Some(5), 2));
    assert_eq!(collect_ns(&seq)?, vec![0, -1, 2, -3, 4, 5]);
    Ok(())
}

#[test]
fn map_if_custom_condition_sees_index_and_sample() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let bump = StageFn::new(|s: Sample| Ok(s.set_value("n", json!(100))?));
    let seq = numbered(&p, 4).map_if(
        bump,
        MapCondition::Custom(std::sync::Arc::new(|idx, s| idx == 0 || n_of(s) == 3)),
    );
    assert_eq!(collect_ns(&seq)?, vec![100, 1, 2, 100]);
    Ok(())
}

#[test]
fn filter_compacts_indices() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let even = numbered(&p, 10).filter(|s| n_of(s) % 2 == 0, false);

    assert_eq!(even.size()?, 5);
    assert_eq!(collect_ns(&even)?, vec![0, 2, 4, 6, 8]);
    Ok(())
}

#[test]
fn filter_with_empty_samples_preserves_alignment() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let even = numbered(&p, 6).filter(|s| n_of(s) % 2 == 0, true);

    assert_eq!(even.size()?, 6);
    for idx in 0..6 {
        let sample = even.get_sample(idx)?;
        if idx % 2 == 0 {
            assert_eq!(n_of(&sample), idx as i64);
        } else {
            assert!(sample.is_empty());
        }
    }
    Ok(())
}

#[test]
fn sort_is_stable() -> anyhow::Result<()> {
    let p = Pipeline::default();
    // Keys collide modulo 3: ties must keep source order.
    let seq = numbered(&p, 9).sort(|s| n_of(s) % 3);

    assert_eq!(collect_ns(&seq)?, vec![0, 3, 6, 1, 4, 7, 2, 5, 8]);
    Ok(())
}

#[test]
fn shuffle_with_a_seed_is_reproducible_across_instances() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let source = numbered(&p, 32);

    let a = collect_ns(&source.shuffle(Some(42)))?;
    let b = collect_ns(&source.shuffle(Some(42)))?;
    let c = collect_ns(&source.shuffle(Some(43)))?;

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_ne!(a, collect_ns(&source)?);

    let mut sorted = a.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..32).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn select_extracts_in_the_given_order() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let seq = numbered(&p, 5);

    let picked = seq.select(vec![3, 1, 3], false)?;
    assert_eq!(collect_ns(&picked)?, vec![3, 1, 3]);
    Ok(())
}

#[test]
fn select_negate_takes_the_complement() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let seq = numbered(&p, 5);

    let complement = seq.select(vec![1, 3], true)?;
    assert_eq!(collect_ns(&complement)?, vec![0, 2, 4]);
    Ok(())
}

#[test]
fn select_out_of_range_fails_eagerly() {
    let p = Pipeline::default();
    let seq = numbered(&p, 5);

    assert!(matches!(
        seq.select(vec![0, 5], false),
        Err(Error::InvalidIndexes { idx: 5, len: 5 })
    ));
    assert!(matches!(seq.select(vec![-1], true), Err(Error::InvalidIndexes { .. })));
}

#[test]
fn repeat_interleaved_spreads_the_remainder_up_front() -> anyhow::Result<()> {
    let p = Pipeline::default();
    // [A, B, C, D] repeated 2.5 times: A and B three times, C and D twice.
    let seq = numbered(&p, 4).repeat(2.5, true)?;

    assert_eq!(seq.size()?, 10);
    assert_eq!(collect_ns(&seq)?, vec![0, 0, 0, 1, 1, 1, 2, 2, 3, 3]);
    Ok(())
}

#[test]
fn repeat_contiguous_ends_with_a_partial_pass() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let seq = numbered(&p, 4).repeat(2.5, false)?;

    assert_eq!(seq.size()?, 10);
    assert_eq!(collect_ns(&seq)?, vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1]);
    Ok(())
}

#[test]
fn repeat_whole_counts_and_zero() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let seq = numbered(&p, 3);

    assert_eq!(collect_ns(&seq.repeat(2.0, false)?)?, vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(collect_ns(&seq.repeat(2.0, true)?)?, vec![0, 0, 1, 1, 2, 2]);
    assert_eq!(seq.repeat(0.0, false)?.size()?, 0);
    assert!(seq.repeat(-1.0, false).is_err());
    Ok(())
}

#[test]
fn enumerate_injects_the_position() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let seq = numbered(&p, 3).shuffle(Some(1)).enumerate("~idx", "json")?;

    for idx in 0..3 {
        let sample = seq.get_sample(idx)?;
        assert_eq!(sample.get("~idx")?.value(), json!(idx));
        assert_eq!(sample.get("~idx")?.type_name(), "json");
    }
    Ok(())
}

#[test]
fn enumerate_with_unknown_codec_fails_at_construction() {
    let p = Pipeline::default();
    let seq = numbered(&p, 3);
    assert!(matches!(
        seq.enumerate("~idx", "nope"),
        Err(Error::UnknownItemType(_))
    ));
}

#[test]
fn pipes_compose() -> anyhow::Result<()> {
    let p = Pipeline::default();
    let head = from_list(&p, (0..20).map(numbered_sample).collect());

    let seq = head
        .filter(|s| n_of(s) % 2 == 0, false) // 0, 2, ..., 18
        .sort(|s| std::cmp::Reverse(n_of(s))) // 18, 16, ..., 0
        .slice(None, Some(4), None)? // 18, 16, 14, 12
        .repeat(1.5, false)?; // plus 18, 16

    assert_eq!(collect_ns(&seq)?, vec![18, 16, 14, 12, 18, 16]);
    Ok(())
}
