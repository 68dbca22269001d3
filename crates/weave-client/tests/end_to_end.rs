//! End-to-end scenarios against the in-memory trace server.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike};
use serde_json::json;
use weave_client::{CallOptions, ClientConfig, ClientError, WeaveClient};
use weave_server::{CallsFilter, InMemoryTraceServer, ObjReadReq, TraceServer};
use weave_trace::{context, with_run_stack, CallStack, TraceValue};
use weave_types::{CustomValue, ObjectRecord, Op, OpFailure, Ref, Table, Value};

const PROJECT: &str = "team/proj";

fn setup() -> (Arc<InMemoryTraceServer>, WeaveClient) {
    weave_client::logging::init_test();
    let server = Arc::new(InMemoryTraceServer::new());
    let client = WeaveClient::new("team", "proj", server.clone()).unwrap();
    (server, client)
}

fn nested_rows() -> Table {
    Table::new(vec![
        Value::dict([("a", Value::dict([("b", 1)]))]),
        Value::dict([("a", Value::dict([("b", 2)]))]),
    ])
}

async fn leaf(client: &WeaveClient, reference: Ref, row: usize) -> TraceValue {
    let dataset = client.get(reference).await.unwrap();
    let row = dataset.as_table().unwrap().row(row).await.unwrap();
    let a = row.as_dict().unwrap().key("a").await.unwrap();
    a.as_dict().unwrap().key("b").await.unwrap()
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn saved_dataset_rows_come_back_equal() {
    let (server, client) = setup();
    let first = client.publish(&nested_rows().into(), "dataset").await.unwrap();

    let b = leaf(&client, first.clone().into(), 0).await;
    assert_eq!(b.as_scalar(), Some(&Value::Int(1)));
    let row = client
        .get(first.clone())
        .await
        .unwrap()
        .as_table()
        .unwrap()
        .row(1)
        .await
        .unwrap();
    assert_eq!(row.raw(), Value::dict([("a", Value::dict([("b", 2)]))]));

    let second = client.publish(&nested_rows().into(), "dataset").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(server.version_count(PROJECT, "dataset"), 1);
}

#[tokio::test]
async fn nested_leaf_refs_agree_across_equal_publishes() {
    let (_, client) = setup();
    let a = client.publish(&nested_rows().into(), "left").await.unwrap();
    let b = client.publish(&nested_rows().into(), "left").await.unwrap();
    let from_a = leaf(&client, a.into(), 1).await;
    let from_b = leaf(&client, b.into(), 1).await;
    assert_eq!(from_a.reference(), from_b.reference());
    let uri = from_a.reference().unwrap().uri();
    assert!(uri.contains("/id/"));
    assert!(uri.ends_with("/key/a/key/b"));

    // Re-reading through the leaf's own ref lands on the same value.
    let again = client.get(from_a.reference().unwrap().clone()).await.unwrap();
    assert_eq!(again.as_scalar(), Some(&Value::Int(2)));
}

#[tokio::test]
async fn deleted_versions_are_distinguishable_and_others_survive() {
    let (_, client) = setup();
    let mut refs = Vec::new();
    for i in 0..4 {
        let model = ObjectRecord::new("Model").with_field("version", i);
        refs.push(client.publish(&model.into(), "model").await.unwrap());
    }
    assert_eq!(client.delete(&refs[1]).await.unwrap(), 1);
    assert_eq!(client.delete(&refs[3]).await.unwrap(), 1);

    for deleted in [&refs[1], &refs[3]] {
        let err = client.get(deleted.clone()).await.unwrap_err();
        assert!(err.is_deleted(), "{err}");
        assert!(err.deleted_at().is_some());
        assert!(!err.is_not_found());
    }
    for (i, live) in [(0, &refs[0]), (2, &refs[2])] {
        let obj = client.get(live.clone()).await.unwrap();
        let version = obj.as_object().unwrap().attr("version").await.unwrap();
        assert_eq!(version.as_scalar(), Some(&Value::Int(i)));
    }

    let latest = client.get(refs[0].with_digest("latest")).await.unwrap();
    assert_eq!(latest.reference(), Some(&Ref::Object(refs[2].clone())));
}

#[tokio::test]
async fn unregistered_types_cannot_be_published() {
    #[derive(Debug)]
    struct Embedding(#[allow(dead_code)] Vec<f32>);

    let (server, client) = setup();
    let err = client
        .publish(&CustomValue::new(Embedding(vec![0.1])).into(), "emb")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotPersistable { ref type_name } if type_name.contains("Embedding")));
    assert_eq!(server.version_count(PROJECT, "emb"), 0);
}

#[tokio::test]
async fn datetimes_round_trip_inline() {
    let (server, client) = setup();
    let offset = FixedOffset::east_opt(2 * 3600).unwrap();
    let when = offset.with_ymd_and_hms(2024, 3, 9, 17, 45, 12).unwrap();
    let value = Value::dict([("when", Value::Custom(CustomValue::new(when)))]);
    let r = client.publish(&value, "event").await.unwrap();

    let stored = server
        .obj_read(ObjReadReq {
            project_id: PROJECT.into(),
            object_id: "event".into(),
            digest: r.digest().to_string(),
        })
        .await
        .unwrap()
        .obj
        .val;
    let envelope = &stored["when"];
    assert_eq!(envelope["_type"], json!("CustomWeaveType"));
    assert!(envelope.get("files").is_none());
    assert!(envelope.get("inline_data").is_some());
    assert_eq!(server.file_count(), 0);
    assert_eq!(server.stats().file_create, 0);

    let fetched = client.get(r).await.unwrap();
    let when_back = fetched.as_dict().unwrap().key("when").await.unwrap();
    let Some(Value::Custom(custom)) = when_back.as_scalar() else {
        panic!("expected a custom value, got {}", when_back.kind());
    };
    let dt = custom.downcast_ref::<DateTime<FixedOffset>>().unwrap();
    assert_eq!((dt.year(), dt.month(), dt.day()), (2024, 3, 9));
    assert_eq!((dt.hour(), dt.minute(), dt.second()), (17, 45, 12));
    assert_eq!(dt.offset().local_minus_utc(), 2 * 3600);
}

#[tokio::test]
async fn tables_load_lazily_by_page() {
    weave_client::logging::init_test();
    let server = Arc::new(InMemoryTraceServer::new());
    let mut config = ClientConfig::new("team", "proj");
    config.table.page_size = 100;
    config.table.cache_pages = 4;
    let client = WeaveClient::from_config(&config, server.clone()).unwrap();

    let rows: Vec<Value> = (0..450).map(|i| Value::dict([("i", i)])).collect();
    let r = client.publish(&Table::new(rows).into(), "big").await.unwrap();
    let before = server.stats().table_query;

    let fetched = client.get(r).await.unwrap();
    let table = fetched.as_table().unwrap();
    assert_eq!(table.page_fetches(), 0);
    assert_eq!(server.stats().table_query, before);

    table.row(0).await.unwrap();
    assert_eq!(table.page_fetches(), 1);
    assert_eq!(table.cached_pages(), vec![0]);
    table.row(0).await.unwrap();
    table.row(1).await.unwrap();
    assert_eq!(table.page_fetches(), 1);
    assert_eq!(server.stats().table_query, before + 1);

    assert_eq!(table.len().await.unwrap(), 450);
    assert_eq!(table.all_rows().await.unwrap().len(), 450);
    assert_eq!(table.page_fetches(), 5);
}

#[tokio::test]
async fn mutations_publish_a_new_version() {
    let (server, client) = setup();
    let cfg = ObjectRecord::new("Config")
        .with_field("lr", 0.1)
        .with_field("tags", vec!["base"]);
    let original = client.publish(&cfg.into(), "cfg").await.unwrap();

    let mut fetched = client.get(original.clone()).await.unwrap();
    let unchanged = client.save_mutated(&fetched).await.unwrap();
    assert_eq!(unchanged, original);

    fetched.as_object_mut().unwrap().set_attr("lr", 0.2).unwrap();
    let mut tags = fetched.as_object().unwrap().attr("tags").await.unwrap();
    tags.as_list_mut().unwrap().append("tuned").unwrap();
    assert_eq!(fetched.root().unwrap().mutations().len(), 2);

    let updated = client.save_mutated(&tags).await.unwrap();
    assert_ne!(updated.digest(), original.digest());
    assert_eq!(server.version_count(PROJECT, "cfg"), 2);

    let new = client.get(updated).await.unwrap();
    let lr = new.as_object().unwrap().attr("lr").await.unwrap();
    assert_eq!(lr.as_scalar(), Some(&Value::Float(0.2)));
    let tags = new.as_object().unwrap().attr("tags").await.unwrap();
    assert_eq!(tags.as_list().unwrap().len(), 2);

    let old = client.get(original).await.unwrap();
    let lr = old.as_object().unwrap().attr("lr").await.unwrap();
    assert_eq!(lr.as_scalar(), Some(&Value::Float(0.1)));
}

#[tokio::test]
async fn methods_on_fetched_objects_bind_and_trace() {
    let (_, client) = setup();
    let scale = Op::method("scale", "return self.factor * x", |args| {
        let factor = args
            .receiver
            .as_ref()
            .and_then(|r| r.value.as_object())
            .and_then(|rec| rec.get("factor"))
            .and_then(Value::as_i64)
            .ok_or_else(|| OpFailure::new("AttributeError", "factor"))?;
        let x = args.input("x").and_then(Value::as_i64).unwrap_or(0);
        Ok(Value::Int(factor * x))
    });
    let scaler = ObjectRecord::new("Scaler")
        .with_field("factor", 3)
        .with_field("scale", scale);
    let r = client.publish(&scaler.into(), "scaler").await.unwrap();

    let fetched = client.get(r.clone()).await.unwrap();
    let method = fetched.as_object().unwrap().attr("scale").await.unwrap();
    let method = method.as_op().unwrap();
    assert!(method.is_bound());

    let out = with_run_stack(
        CallStack::new(),
        client.invoke(
            method,
            BTreeMap::from([("x".to_string(), Value::Int(5))]),
            CallOptions::default(),
        ),
    )
    .await
    .unwrap();
    assert_eq!(out, Value::Int(15));

    let calls = client.calls(CallsFilter::default()).await.unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].inputs["self"], json!(r.uri()));
    assert_eq!(calls[0].output, Some(json!(15)));
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pop_by_id_truncates_everything_above() {
    let (_, client) = setup();
    with_run_stack(CallStack::new(), async {
        let a = client.create_call("a", BTreeMap::new(), CallOptions::default()).await.unwrap();
        client.create_call("b", BTreeMap::new(), CallOptions::default()).await.unwrap();
        client.create_call("c", BTreeMap::new(), CallOptions::default()).await.unwrap();
        assert_eq!(context::current_stack().len(), 3);

        assert!(context::pop_call(Some(&a.id())).is_some());
        assert!(context::current_stack().is_empty());
        assert!(context::pop_call(Some(&a.id())).is_none());
    })
    .await;
}

#[tokio::test]
async fn root_summary_aggregates_children() {
    let (_, client) = setup();
    let root = with_run_stack(CallStack::new(), async {
        let root = client.create_call("root", BTreeMap::new(), CallOptions::default()).await.unwrap();
        let child = client.create_call("child", BTreeMap::new(), CallOptions::default()).await.unwrap();
        child.set_summary(json!({"tokens": 5}).as_object().cloned().unwrap());
        client.finish_call(&child, None, None).await.unwrap();
        client.finish_call(&root, None, None).await.unwrap();
        root
    })
    .await;
    assert_eq!(serde_json::Value::Object(root.summary()), json!({"tokens": 5}));

    let stored = client.get_call(&root.id()).await.unwrap();
    assert_eq!(stored.summary, json!({"tokens": 5}).as_object().cloned());
    let children = client
        .calls(CallsFilter {
            parent_ids: Some(vec![root.id()]),
            ..CallsFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].trace_id, root.trace_id());
}

#[tokio::test]
async fn llm_outputs_roll_up_usage() {
    let (_, client) = setup();
    let root = with_run_stack(CallStack::new(), async {
        let root = client.create_call("agent", BTreeMap::new(), CallOptions::default()).await.unwrap();
        for tokens in [10, 32] {
            let llm = client.create_call("llm", BTreeMap::new(), CallOptions::default()).await.unwrap();
            let output = Value::dict([
                ("model", Value::from("gpt-4o")),
                ("usage", Value::dict([("total_tokens", tokens)])),
            ]);
            client.finish_call(&llm, Some(output), None).await.unwrap();
        }
        client.finish_call(&root, None, None).await.unwrap();
        root
    })
    .await;
    assert_eq!(
        serde_json::Value::Object(root.summary()),
        json!({"usage": {"gpt-4o": {"requests": 2, "total_tokens": 42}}})
    );
}

#[tokio::test]
async fn concurrent_traces_do_not_share_a_stack() {
    let (_, client) = setup();
    let run = |name: &'static str| {
        let client = client.clone();
        context::spawn(async move {
            let root = client.create_call(name, BTreeMap::new(), CallOptions::default()).await.unwrap();
            tokio::task::yield_now().await;
            let child = client.create_call("step", BTreeMap::new(), CallOptions::default()).await.unwrap();
            tokio::task::yield_now().await;
            client.finish_call(&child, None, None).await.unwrap();
            client.finish_call(&root, None, None).await.unwrap();
            (root, child)
        })
    };
    let left = run("left");
    let right = run("right");
    let (left_root, left_child) = left.await.unwrap();
    let (right_root, right_child) = right.await.unwrap();

    assert_eq!(left_child.parent_id(), Some(left_root.id()));
    assert_eq!(right_child.parent_id(), Some(right_root.id()));
    assert_ne!(left_root.trace_id(), right_root.trace_id());
    assert_eq!(left_root.children().len(), 1);
    assert!(context::current_stack().is_empty());

    let deleted = client.delete_calls(&[left_root.id()]).await.unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(client.calls(CallsFilter::default()).await.unwrap().len(), 2);
}
