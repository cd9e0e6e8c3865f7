use samplepipe::{Error, JsonItem, Sample, TxtItem};
use serde_json::json;

fn base_sample() -> Sample {
    Sample::default()
        .set_item("a", JsonItem::new(json!(1), false))
        .set_item("b", JsonItem::new(json!({"x": [10, 20]}), false))
        .set_item("c", TxtItem::new(json!("hello"), true))
}

#[test]
fn set_value_leaves_the_receiver_untouched() -> anyhow::Result<()> {
    let s = base_sample();
    let s2 = s.set_value("a", json!(42))?;

    assert_eq!(s2.get("a")?.value(), json!(42));
    assert_eq!(s.get("a")?.value(), json!(1));
    Ok(())
}

#[test]
fn unaffected_items_are_shared_between_old_and_new() -> anyhow::Result<()> {
    let s = base_sample();
    let s2 = s.set_value("a", json!(2))?;

    assert!(std::sync::Arc::ptr_eq(s.get("b")?, s2.get("b")?));
    assert!(!std::sync::Arc::ptr_eq(s.get("a")?, s2.get("a")?));
    Ok(())
}

#[test]
fn get_missing_key_fails() {
    let s = base_sample();
    assert!(matches!(s.get("nope"), Err(Error::MissingKey(k)) if k == "nope"));
}

#[test]
fn set_value_as_inherits_type_and_sharing() -> anyhow::Result<()> {
    let s = base_sample();

    // `c` is a shared txt item; the derived item keeps both traits.
    let s2 = s.set_value_as("c2", "c", json!("bye"), None)?;
    let c2 = s2.get("c2")?;
    assert_eq!(c2.type_name(), "txt");
    assert!(c2.is_shared());

    // Explicit override of the sharing flag.
    let s3 = s.set_value_as("c3", "c", json!("bye"), Some(false))?;
    assert!(!s3.get("c3")?.is_shared());
    Ok(())
}

#[test]
fn set_value_as_missing_reference_fails() {
    let s = base_sample();
    assert!(matches!(
        s.set_value_as("t", "nope", json!(0), None),
        Err(Error::MissingKey(_))
    ));
}

#[test]
fn deep_set_without_subpath_behaves_as_set_value() -> anyhow::Result<()> {
    let s = base_sample();
    let s2 = s.deep_set("a", json!(2))?;
    assert_eq!(s2.get("a")?.value(), json!(2));
    Ok(())
}

#[test]
fn deep_set_mutates_a_copy_of_the_nested_value() -> anyhow::Result<()> {
    let s = base_sample();
    let s2 = s.deep_set("b.x[1]", json!(99))?;

    assert_eq!(s2.get("b")?.value(), json!({"x": [10, 99]}));
    assert_eq!(s.get("b")?.value(), json!({"x": [10, 20]}));
    Ok(())
}

#[test]
fn deep_set_creates_intermediate_containers() -> anyhow::Result<()> {
    let s = base_sample();
    let s2 = s.deep_set("b.y.z[2]", json!(7))?;
    assert_eq!(
        s2.get("b")?.value(),
        json!({"x": [10, 20], "y": {"z": [null, null, 7]}})
    );
    Ok(())
}

#[test]
fn deep_set_missing_key_fails() {
    let s = base_sample();
    assert!(matches!(s.deep_set("nope.x", json!(1)), Err(Error::MissingKey(_))));
}

#[test]
fn deep_get_resolves_nested_paths_and_defaults() {
    let s = base_sample();

    assert_eq!(s.deep_get("b.x[0]", json!(-1)), json!(10));
    assert_eq!(s.deep_get("a", json!(-1)), json!(1));
    assert_eq!(s.deep_get("missing.path", json!(-1)), json!(-1));
    assert_eq!(s.deep_get("b.x[5]", json!(-1)), json!(-1));
    assert_eq!(s.deep_get("b.nope", json!(-1)), json!(-1));
}

#[test]
fn escaped_dots_address_literal_keys() -> anyhow::Result<()> {
    let s = Sample::default()
        .set_item("j.names", JsonItem::new(json!(["Jo", "Jane"]), false));

    assert_eq!(s.deep_get(r"j\.names[1]", json!(null)), json!("Jane"));
    let s2 = s.deep_set(r"j\.names[1]", json!("Jane Doe"))?;
    assert_eq!(s2.get("j.names")?.value(), json!(["Jo", "Jane Doe"]));
    Ok(())
}

#[test]
fn rename_and_duplicate_never_overwrite() -> anyhow::Result<()> {
    let s = base_sample();

    // Target already exists: no-op.
    let same = s.rename_key("a", "b");
    assert_eq!(same.get("a")?.value(), json!(1));
    assert_eq!(same.get("b")?.value(), json!({"x": [10, 20]}));

    // Missing source: no-op.
    let same = s.duplicate_key("nope", "d");
    assert!(!same.contains_key("d"));

    let renamed = s.rename_key("a", "z");
    assert!(!renamed.contains_key("a"));
    assert_eq!(renamed.get("z")?.value(), json!(1));

    let dup = s.duplicate_key("a", "a2");
    assert_eq!(dup.get("a")?.value(), json!(1));
    assert_eq!(dup.get("a2")?.value(), json!(1));
    Ok(())
}

#[test]
fn remove_and_extract_keys_are_partial_on_missing() {
    let s = base_sample();

    let removed = s.remove_keys(&["a", "nope"]);
    assert_eq!(removed.keys().collect::<Vec<_>>(), vec!["b", "c"]);

    let extracted = s.extract_keys(&["c", "a", "nope"]);
    assert_eq!(extracted.keys().collect::<Vec<_>>(), vec!["a", "c"]);
}

#[test]
fn merge_is_last_wins() -> anyhow::Result<()> {
    let s = base_sample();
    let other = Sample::default()
        .set_item("a", JsonItem::new(json!("other"), false))
        .set_item("d", JsonItem::new(json!(4), false));

    let merged = s.merge(&other);
    assert_eq!(merged.get("a")?.value(), json!("other"));
    assert_eq!(merged.get("d")?.value(), json!(4));
    assert_eq!(merged.len(), 4);
    Ok(())
}

#[test]
fn to_dict_forces_every_value() {
    let s = base_sample();
    let d = s.to_dict();
    assert_eq!(d["a"], json!(1));
    assert_eq!(d["c"], json!("hello"));
    assert_eq!(d.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
}

#[test]
fn to_schema_names_the_codecs() {
    let s = base_sample();
    let schema = s.to_schema();
    assert_eq!(schema["a"], "json");
    assert_eq!(schema["c"], "txt");
}
