//! End-to-end lookup join node tests.
//!
//! Each test wires a node to a registry holding a [`MockLookupSource`],
//! drives it through its input channel and inspects what comes out of the
//! output and fatal error channels.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use laminar_lookup::error::LookupJoinError;
use laminar_lookup::lookup::RegistryError;
use laminar_lookup::testing::MockLookupSource;
use laminar_lookup::{
    InputItem, JoinTuples, KeyExpr, LookupJoinNode, LookupJoinType, LookupRegistry, NodeOptions,
    NodeOutput, RunningNode, SourceOptions, Tuple, WindowRange, WindowTuples,
};

const NODE: &str = "customers";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn obj(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        _ => panic!("expected object"),
    }
}

fn row(id: Value) -> Tuple {
    Tuple::new("orders", obj(json!({ "customer_id": id })), 1_000)
}

fn customers() -> MockLookupSource {
    MockLookupSource::new().with_rows(vec![
        obj(json!({"id": 1, "name": "alice"})),
        obj(json!({"id": 2, "name": "bob"})),
        obj(json!({"id": 4, "name": "dave"})),
        obj(json!({"id": 7, "name": "x"})),
    ])
}

fn build_node(join_type: LookupJoinType, lookup: Value) -> LookupJoinNode {
    let opts = SourceOptions::new("memory").with_props(obj(json!({ "lookup": lookup })));
    LookupJoinNode::new(
        NODE,
        vec!["name".into()],
        vec!["id".into()],
        join_type,
        vec![Box::new(KeyExpr::field("customer_id"))],
        &opts,
        NodeOptions { buffer_length: 8 },
    )
    .expect("valid node")
}

fn start(source: &MockLookupSource, node: LookupJoinNode) -> (LookupRegistry, RunningNode) {
    init_tracing();
    let registry = LookupRegistry::new();
    registry
        .register_instance(NODE, "memory", Box::new(source.clone()))
        .expect("register");
    let running = node.start(registry.clone(), CancellationToken::new());
    (registry, running)
}

async fn roundtrip(running: &mut RunningNode, item: impl Into<InputItem>) -> NodeOutput {
    running.input.send(item.into()).await.expect("node input open");
    running.output.recv().await.expect("node output open")
}

fn expect_batch(output: NodeOutput) -> JoinTuples {
    match output {
        NodeOutput::Batch(b) => b,
        NodeOutput::Error(e) => panic!("expected batch, got error: {e}"),
    }
}

fn expect_error(output: NodeOutput) -> LookupJoinError {
    match output {
        NodeOutput::Error(e) => e,
        NodeOutput::Batch(b) => panic!("expected error, got batch of {}", b.len()),
    }
}

#[tokio::test]
async fn test_row_enriched_with_lookup_record() {
    let source = customers();
    let (_registry, mut running) = start(&source, build_node(LookupJoinType::Inner, json!({})));

    let before = chrono::Utc::now().timestamp_millis();
    let batch = expect_batch(roundtrip(&mut running, row(json!(7))).await);
    let after = chrono::Utc::now().timestamp_millis();

    assert!(batch.window_range.is_none());
    assert_eq!(batch.len(), 1);
    let joined = &batch.content[0];
    assert_eq!(joined.row(), Some(&row(json!(7))));

    let matched = joined.matched().expect("matched record");
    assert_eq!(matched.emitter, NODE);
    assert_eq!(matched.message, obj(json!({"name": "x"})));
    assert!(matched.timestamp >= before && matched.timestamp <= after);
    assert_eq!(joined.value("name", None), Some(&json!("x")));
    assert_eq!(source.requests(), vec![vec![json!(7)]]);

    running.handle.stop().await;
}

#[tokio::test]
async fn test_left_join_emits_unmatched_row() {
    let source = customers();
    let (_registry, mut running) =
        start(&source, build_node(LookupJoinType::LeftOuter, json!({})));

    let batch = expect_batch(roundtrip(&mut running, row(json!(99))).await);
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.content[0].tuples, vec![row(json!(99))]);

    let batch = expect_batch(roundtrip(&mut running, row(Value::Null)).await);
    assert_eq!(batch.len(), 1);
    assert!(batch.content[0].matched().is_none());
    assert_eq!(source.call_count(), 1, "null key must not reach the source");

    running.handle.stop().await;
}

#[tokio::test]
async fn test_inner_join_emits_empty_batch_on_miss() {
    let source = customers();
    let (_registry, mut running) = start(&source, build_node(LookupJoinType::Inner, json!({})));

    let batch = expect_batch(roundtrip(&mut running, row(json!(99))).await);
    assert!(batch.is_empty());

    running.handle.stop().await;
}

#[tokio::test]
async fn test_cache_hit_skips_source() {
    let source = customers();
    let (_registry, mut running) = start(
        &source,
        build_node(LookupJoinType::Inner, json!({"cache": true, "cacheTtl": 60_000})),
    );

    for _ in 0..3 {
        let batch = expect_batch(roundtrip(&mut running, row(json!(1))).await);
        assert_eq!(batch.len(), 1);
    }
    assert_eq!(source.call_count(), 1);

    // Same digits, different type: a separate cache entry.
    let batch = expect_batch(roundtrip(&mut running, row(json!("1"))).await);
    assert!(batch.is_empty());
    assert_eq!(source.call_count(), 2);

    running.handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_cache_entry_expires_after_ttl() {
    let source = customers();
    let (_registry, mut running) = start(
        &source,
        build_node(LookupJoinType::Inner, json!({"cache": true, "cacheTtl": 1_000})),
    );

    expect_batch(roundtrip(&mut running, row(json!(2))).await);
    tokio::time::advance(Duration::from_millis(500)).await;
    expect_batch(roundtrip(&mut running, row(json!(2))).await);
    assert_eq!(source.call_count(), 1);

    tokio::time::advance(Duration::from_millis(600)).await;
    let batch = expect_batch(roundtrip(&mut running, row(json!(2))).await);
    assert_eq!(batch.len(), 1);
    assert_eq!(source.call_count(), 2);

    running.handle.stop().await;
}

#[tokio::test]
async fn test_missing_keys_not_cached_when_disabled() {
    let source = customers();
    let (_registry, mut running) = start(
        &source,
        build_node(
            LookupJoinType::LeftOuter,
            json!({"cache": true, "cacheMissingKey": false}),
        ),
    );

    for _ in 0..2 {
        expect_batch(roundtrip(&mut running, row(json!(42))).await);
    }
    assert_eq!(source.call_count(), 2);
    running.handle.stop().await;

    // Empty results are not cached unless asked for.
    let source = customers();
    let (_registry, mut running) = start(
        &source,
        build_node(LookupJoinType::LeftOuter, json!({"cache": true})),
    );
    for _ in 0..2 {
        expect_batch(roundtrip(&mut running, row(json!(42))).await);
    }
    assert_eq!(source.call_count(), 2);
    running.handle.stop().await;

    let source = customers();
    let (_registry, mut running) = start(
        &source,
        build_node(
            LookupJoinType::LeftOuter,
            json!({"cache": true, "cacheMissingKey": true}),
        ),
    );
    for _ in 0..2 {
        expect_batch(roundtrip(&mut running, row(json!(42))).await);
    }
    assert_eq!(source.call_count(), 1);
    running.handle.stop().await;
}

#[tokio::test]
async fn test_window_joined_in_order() {
    let source = customers();
    let (_registry, mut running) = start(&source, build_node(LookupJoinType::Inner, json!({})));

    let window = WindowTuples::new(
        vec![row(json!(1)), row(json!(99)), row(json!(2))],
        WindowRange::new(0, 10),
    );
    let batch = expect_batch(roundtrip(&mut running, window).await);

    assert_eq!(batch.window_range, Some(WindowRange::new(0, 10)));
    let names: Vec<_> = batch
        .content
        .iter()
        .map(|jt| jt.value("name", Some(NODE)).cloned())
        .collect();
    assert_eq!(names, vec![Some(json!("alice")), Some(json!("bob"))]);

    running.handle.stop().await;
}

#[tokio::test]
async fn test_window_aborts_on_first_failure() {
    let source = customers().fail_on(json!(5));
    let (_registry, mut running) =
        start(&source, build_node(LookupJoinType::LeftOuter, json!({})));

    let window = WindowTuples::new(
        vec![
            row(json!(1)),
            row(json!(2)),
            row(json!(5)),
            row(json!(4)),
            row(json!(7)),
        ],
        WindowRange::new(0, 100),
    );
    let err = expect_error(roundtrip(&mut running, window).await);
    assert!(matches!(err, LookupJoinError::Lookup(_)));
    assert_eq!(source.call_count(), 3, "rows after the failure are not looked up");

    // The node keeps running after a per-item failure.
    let batch = expect_batch(roundtrip(&mut running, row(json!(4))).await);
    assert_eq!(batch.len(), 1);

    running.handle.stop().await;
}

#[tokio::test]
async fn test_outputs_follow_input_order() {
    let source = customers();
    let (_registry, mut running) = start(&source, build_node(LookupJoinType::Inner, json!({})));

    for id in [1, 2, 4] {
        running.input.send(row(json!(id)).into()).await.unwrap();
    }
    let mut names = Vec::new();
    for _ in 0..3 {
        let batch = expect_batch(running.output.recv().await.unwrap());
        names.push(batch.content[0].value("name", Some(NODE)).cloned());
    }
    assert_eq!(
        names,
        vec![Some(json!("alice")), Some(json!("bob")), Some(json!("dave"))]
    );

    running.handle.stop().await;
}

#[tokio::test]
async fn test_invalid_and_upstream_items() {
    let source = customers();
    let (_registry, mut running) = start(&source, build_node(LookupJoinType::Inner, json!({})));

    let err = expect_error(roundtrip(&mut running, InputItem::Joined(JoinTuples::new())).await);
    assert_eq!(err, LookupJoinError::InvalidInput("JoinTuples(len=0)".into()));
    assert!(err.to_string().contains("invalid input type"));

    let upstream = LookupJoinError::Upstream("decoder failed".into());
    let err = expect_error(roundtrip(&mut running, InputItem::Error(upstream.clone())).await);
    assert_eq!(err, upstream);
    assert_eq!(source.call_count(), 0);

    expect_batch(roundtrip(&mut running, row(json!(1))).await);
    running.handle.stop().await;
}

#[tokio::test]
async fn test_metrics_track_items() {
    let source = customers();
    let (_registry, mut running) = start(&source, build_node(LookupJoinType::Inner, json!({})));

    expect_batch(roundtrip(&mut running, row(json!(1))).await);
    expect_batch(roundtrip(&mut running, row(json!(99))).await);
    expect_error(roundtrip(&mut running, InputItem::Joined(JoinTuples::new())).await);
    expect_error(
        roundtrip(
            &mut running,
            InputItem::Error(LookupJoinError::Upstream("x".into())),
        )
        .await,
    );

    let snap = running.handle.metrics.snapshot();
    assert_eq!(snap.records_in, 3);
    assert_eq!(snap.records_out, 2);
    assert_eq!(snap.messages_processed, 1);
    assert_eq!(snap.exceptions, 2);
    assert!(running
        .handle
        .metrics
        .last_exception()
        .is_some_and(|m| m.contains("LDB-8005")));

    running.handle.stop().await;
}

#[tokio::test]
async fn test_attach_failure_is_fatal() {
    init_tracing();
    let registry = LookupRegistry::new();
    let mut running = build_node(LookupJoinType::Inner, json!({}))
        .start(registry.clone(), CancellationToken::new());

    let err = running.errors.recv().await.expect("fatal error");
    assert_eq!(
        err,
        LookupJoinError::Registry(RegistryError::NotFound(NODE.into()))
    );
    assert!(err.is_fatal());
    assert!(running.output.recv().await.is_none());
    running.handle.join.await.unwrap();
}

#[tokio::test]
async fn test_cancel_stops_node_and_detaches_source() {
    let source = customers();
    let (registry, mut running) = start(&source, build_node(LookupJoinType::Inner, json!({})));

    expect_batch(roundtrip(&mut running, row(json!(1))).await);
    assert!(registry.is_attached(NODE));

    running.handle.stop().await;
    assert!(!registry.is_attached(NODE));
    assert!(running.output.recv().await.is_none());
    assert!(running.input.send(row(json!(2)).into()).await.is_err());
    assert!(running.errors.recv().await.is_none());
}

#[tokio::test]
async fn test_cancel_while_blocked_on_full_output() {
    init_tracing();
    let source = customers();
    let registry = LookupRegistry::new();
    registry
        .register_instance(NODE, "memory", Box::new(source.clone()))
        .unwrap();
    let opts = SourceOptions::new("memory");
    let node = LookupJoinNode::new(
        NODE,
        vec![],
        vec!["id".into()],
        LookupJoinType::Inner,
        vec![Box::new(KeyExpr::field("customer_id"))],
        &opts,
        NodeOptions { buffer_length: 1 },
    )
    .unwrap();
    let mut running = node.start(registry.clone(), CancellationToken::new());

    // Nothing reads the output: the first batch fills it, the second blocks.
    for id in [1, 2, 4] {
        running.input.send(row(json!(id)).into()).await.unwrap();
    }
    while running.handle.metrics.snapshot().records_out < 2 {
        tokio::task::yield_now().await;
    }
    assert!(registry.is_attached(NODE));

    running.handle.shutdown();
    tokio::time::timeout(Duration::from_secs(2), running.handle.join)
        .await
        .expect("node exits after cancel")
        .unwrap();
    assert!(!registry.is_attached(NODE));

    assert!(running.output.recv().await.is_some());
    assert!(running.output.recv().await.is_none());
    assert_eq!(source.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_lookup_completes_before_cancel() {
    let source = customers().with_delay(Duration::from_millis(200));
    let (registry, mut running) = start(&source, build_node(LookupJoinType::Inner, json!({})));

    running.input.send(row(json!(2)).into()).await.unwrap();
    while source.call_count() == 0 {
        tokio::task::yield_now().await;
    }
    running.handle.shutdown();

    let batch = expect_batch(running.output.recv().await.expect("in-flight result"));
    assert_eq!(batch.len(), 1);
    assert!(running.output.recv().await.is_none());
    running.handle.join.await.unwrap();
    assert!(!registry.is_attached(NODE));
}

#[tokio::test]
async fn test_closed_input_ends_node() {
    let source = customers();
    let (registry, running) = start(&source, build_node(LookupJoinType::Inner, json!({})));

    let RunningNode {
        input,
        mut output,
        handle,
        ..
    } = running;
    drop(input);

    assert!(output.recv().await.is_none());
    handle.join.await.unwrap();
    assert!(!registry.is_attached(NODE));
}

#[tokio::test]
async fn test_source_panic_reported_as_fatal() {
    let source = customers().panic_on(json!(13));
    let (registry, mut running) = start(&source, build_node(LookupJoinType::Inner, json!({})));

    running.input.send(row(json!(13)).into()).await.unwrap();
    let err = running.errors.recv().await.expect("fatal error");
    match &err {
        LookupJoinError::Panic(msg) => assert!(msg.contains("mock lookup source panic")),
        other => panic!("expected panic error, got {other:?}"),
    }
    assert!(err.is_fatal());

    running.handle.join.await.unwrap();
    assert!(!registry.is_attached(NODE));
    assert!(running.output.recv().await.is_none());
}

#[tokio::test]
async fn test_node_restart_reattaches_source() {
    let source = customers();
    let (registry, mut running) = start(&source, build_node(LookupJoinType::Inner, json!({})));
    expect_batch(roundtrip(&mut running, row(json!(1))).await);
    running.handle.stop().await;

    let mut running = build_node(LookupJoinType::Inner, json!({}))
        .start(registry.clone(), CancellationToken::new());
    let batch = expect_batch(roundtrip(&mut running, row(json!(2))).await);
    assert_eq!(batch.len(), 1);
    assert_eq!(source.call_count(), 2);
    running.handle.stop().await;
}
