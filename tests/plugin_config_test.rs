use async_trait::async_trait;
use hestia::error::HestiaError;
use hestia::plugin::{
    Config, Context, IntSetter, OptionalConfig, Plugin, Registry, Setter, setter_fn,
};
use std::sync::{Arc, Mutex};

/// Int sink recording written values
#[derive(Clone, Default)]
struct Sink(Arc<Mutex<Vec<i64>>>);

#[async_trait]
impl IntSetter for Sink {
    async fn int_setter(&self, _param: &str) -> hestia::Result<Setter<i64>> {
        let values = self.0.clone();
        Ok(setter_fn(move |v: i64| {
            values.lock().unwrap().push(v);
            async { Ok(()) }
        }))
    }
}

hestia::impl_plugin!(Sink, IntSetter);

fn context_with_sink(sink: &Sink) -> Context {
    let mut r = Registry::builtin().unwrap();
    let sink = sink.clone();
    r.add("sink", move |_| Ok(Box::new(sink.clone()) as Box<dyn Plugin>))
        .unwrap();
    Context::new(Arc::new(r))
}

#[tokio::test]
async fn config_errors() {
    let ctx = Context::builtin().unwrap();

    let cc = Config::default();
    let errs = [
        cc.string_getter(&ctx).await.err(),
        cc.float_getter(&ctx).await.err(),
        cc.int_getter(&ctx).await.err(),
        cc.bool_getter(&ctx).await.err(),
        cc.string_setter(&ctx, "x").await.err(),
        cc.float_setter(&ctx, "x").await.err(),
        cc.int_setter(&ctx, "x").await.err(),
        cc.bool_setter(&ctx, "x").await.err(),
        cc.bytes_setter(&ctx, "x").await.err(),
    ];
    for err in errs {
        assert!(matches!(err, Some(HestiaError::MissingSource)));
    }

    let cc = Config::from_yaml("source: teleport").unwrap();
    let err = cc.float_getter(&ctx).await.err().unwrap();
    assert!(matches!(err, HestiaError::UnknownSource { .. }));
    assert!(err.to_string().contains("teleport"));

    // const has no setter
    let cc = Config::from_yaml("source: const\nvalue: 1").unwrap();
    let err = cc.int_setter(&ctx, "x").await.err().unwrap();
    assert!(matches!(err, HestiaError::Unsupported { .. }));
    assert!(err.is_setup());

    let none: Option<Config> = None;
    assert!(none.float_getter(&ctx).await.unwrap().is_none());
}

#[test]
fn registry_rejects_duplicates() {
    let mut r = Registry::builtin().unwrap();
    let err = r
        .add("const", |_| Err(HestiaError::config("unused")))
        .unwrap_err();
    assert!(matches!(err, HestiaError::DuplicatePlugin { .. }));
}

#[tokio::test]
async fn calc_division_by_zero_is_zero() {
    let ctx = Context::builtin().unwrap();
    let cc = Config::from_yaml(
        "source: calc\ndiv: [{source: const, value: 10}, {source: const, value: 0}]",
    )
    .unwrap();

    let g = cc.float_getter(&ctx).await.unwrap();
    assert_eq!(g().await.unwrap(), 0.0);
    let g = cc.int_getter(&ctx).await.unwrap();
    assert_eq!(g().await.unwrap(), 0);
}

#[tokio::test]
async fn switch_duplicate_case_fails_at_construction() {
    let ctx = Context::builtin().unwrap();
    let cc = Config::from_yaml(
        r#"
source: switch
switch:
  - case: "1"
    set: {source: sleep, duration: 1ms}
  - case: "1"
    set: {source: sleep, duration: 1ms}
"#,
    )
    .unwrap();

    let err = cc.plugin(&ctx).await.err().unwrap();
    assert!(err.to_string().contains("duplicate case"));
}

#[tokio::test]
async fn map_round_trip() {
    let sink = Sink::default();
    let ctx = context_with_sink(&sink);
    let cc = Config::from_yaml(
        r#"
source: map
values: {1: 10, 2: 20}
get: {source: const, value: 1}
set: {source: sink}
"#,
    )
    .unwrap();

    let g = cc.int_getter(&ctx).await.unwrap();
    assert_eq!(g().await.unwrap(), 10);

    let set = cc.int_setter(&ctx, "mode").await.unwrap();
    set(20).await.unwrap();
    assert_eq!(*sink.0.lock().unwrap(), vec![2]);

    let err = set(99).await.unwrap_err();
    assert!(err.to_string().contains("value not found"));
}

#[tokio::test]
async fn snmp_empty_oid_is_static_zero() {
    let ctx = Context::builtin().unwrap();
    let cc = Config::from_yaml("source: snmp\noid: ''").unwrap();

    let g = cc.string_getter(&ctx).await.unwrap();
    assert_eq!(g().await.unwrap(), "0");
}

#[tokio::test]
async fn nested_compositions() {
    let sink = Sink::default();
    let ctx = context_with_sink(&sink);
    let cc = Config::from_yaml(
        r#"
source: sequence
set:
  - source: map
    values: {3: 1}
    set: {source: sink}
  - source: sink
"#,
    )
    .unwrap();
    let set = cc.int_setter(&ctx, "phases").await.unwrap();
    set(1).await.unwrap();
    assert_eq!(*sink.0.lock().unwrap(), vec![3, 1]);
}
