mod common;

use common::{count_all, create_entity, memory_store, GhostEntity, UnitTestEntity};
use futures::StreamExt;
use safestore_core::{
    is_main_queue, Concurrency, CreateConfig, ErrorKind, FetchConfig, OutputThread,
    QueuePriority, RemoveConfig,
};
use std::sync::mpsc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test(flavor = "multi_thread")]
async fn await_create_then_fetch() {
    let store = memory_store();
    let created = store
        .create::<UnitTestEntity>(&CreateConfig::default(), |draft| {
            draft.set("attributeOne", "awaited").set("attributeTwo", 5);
        })
        .await
        .unwrap();
    assert_eq!(created.integer("attributeTwo").unwrap(), Some(5));

    let fetched = store
        .fetch::<UnitTestEntity>(&FetchConfig::default())
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(
        fetched[0].object_id().unwrap(),
        created.object_id().unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn await_reports_the_same_error_kind_as_wait() {
    let store = memory_store();
    let awaited = store
        .create::<GhostEntity>(&CreateConfig::default(), |_| {})
        .await
        .unwrap_err();
    let waited = store
        .create::<GhostEntity>(&CreateConfig::default(), |_| {})
        .wait()
        .into_result()
        .unwrap_err();
    assert_eq!(awaited.kind(), ErrorKind::FailCreate);
    assert_eq!(awaited.kind(), waited.kind());
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_is_cold_and_emits_once() {
    let store = memory_store();
    let mut stream = store
        .create::<UnitTestEntity>(&CreateConfig::default(), |draft| {
            draft.set("attributeOne", "streamed");
        })
        .into_stream();
    assert_eq!(count_all::<UnitTestEntity>(&store), 0);

    let created = stream.next().await.unwrap().unwrap();
    assert_eq!(
        created.text("attributeOne").unwrap().as_deref(),
        Some("streamed")
    );
    assert!(stream.next().await.is_none());
    assert_eq!(count_all::<UnitTestEntity>(&store), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_emits_errors() {
    let store = memory_store();
    let items: Vec<_> = store
        .remove::<GhostEntity>(&RemoveConfig::default())
        .into_stream()
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    assert_eq!(
        items[0].as_ref().unwrap_err().kind(),
        ErrorKind::FailRemove
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn save_and_delete_can_be_awaited() {
    let store = memory_store();
    let created = create_entity(&store, "await", 1);
    created.set("attributeTwo", 2).unwrap();
    created.save().await.unwrap();
    created.delete().await.unwrap();
    assert_eq!(count_all::<UnitTestEntity>(&store), 0);
}

#[test]
fn callback_is_delivered_on_main_queue_by_default() {
    let store = memory_store();
    let (tx, rx) = mpsc::channel();
    store
        .create::<UnitTestEntity>(&CreateConfig::default(), |draft| {
            draft.set("attributeOne", "callback");
        })
        .on_complete(move |result| {
            let name = result
                .value()
                .map(|object| object.text("attributeOne").unwrap());
            tx.send((is_main_queue(), name)).unwrap();
        });
    let (on_main, name) = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(on_main);
    assert_eq!(name, Some(Some("callback".to_string())));
}

#[test]
fn callback_honours_background_output_thread() {
    let store = memory_store();
    create_entity(&store, "bg", 1);
    let (tx, rx) = mpsc::channel();
    store
        .fetch::<UnitTestEntity>(
            &FetchConfig::new()
                .concurrency(Concurrency::Async(QueuePriority::Utility))
                .output_thread(OutputThread::Background),
        )
        .on_result(
            move |objects| tx.send((is_main_queue(), objects.len())).unwrap(),
            |err| panic!("fetch failed: {err}"),
        );
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), (false, 1));
}

#[test]
fn stale_handle_failures_honour_the_output_thread() {
    let store = memory_store();
    let detached = {
        let created = create_entity(&store, "stale", 1);
        (*created).clone()
    };

    let (tx, rx) = mpsc::channel();
    let background_tx = tx.clone();
    detached
        .save()
        .output_thread(OutputThread::Background)
        .on_complete(move |result| {
            let kind = result.error().map(|err| err.kind());
            background_tx.send(("save", is_main_queue(), kind)).unwrap();
        });
    assert_eq!(
        rx.recv_timeout(TIMEOUT).unwrap(),
        ("save", false, Some(ErrorKind::FailGetContext))
    );

    detached.delete().on_complete(move |result| {
        let kind = result.error().map(|err| err.kind());
        tx.send(("delete", is_main_queue(), kind)).unwrap();
    });
    assert_eq!(
        rx.recv_timeout(TIMEOUT).unwrap(),
        ("delete", true, Some(ErrorKind::FailGetContext))
    );
}

#[test]
fn sync_concurrency_finishes_before_on_complete_returns() {
    let store = memory_store();
    let (tx, rx) = mpsc::channel();
    store
        .create::<UnitTestEntity>(
            &CreateConfig::new().concurrency(Concurrency::Sync),
            |draft| {
                draft.set("attributeOne", "sync");
            },
        )
        .on_complete(move |result| tx.send(result.is_success()).unwrap());
    assert_eq!(count_all::<UnitTestEntity>(&store), 1);
    assert!(rx.recv_timeout(TIMEOUT).unwrap());
}

#[test]
fn failures_reach_the_failure_callback() {
    let store = memory_store();
    let (tx, rx) = mpsc::channel();
    store
        .create::<GhostEntity>(&CreateConfig::default(), |_| {})
        .on_result(|_| panic!("unexpected success"), move |err| {
            tx.send(err.kind()).unwrap()
        });
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ErrorKind::FailCreate);
}

#[test]
fn operations_on_one_handle_run_in_submission_order() {
    let store = memory_store();
    let created = create_entity(&store, "order", 0);
    let (tx, rx) = mpsc::channel();
    for value in 1..=5_i64 {
        created.set("attributeTwo", value).unwrap();
        let tx = tx.clone();
        created
            .save()
            .output_thread(OutputThread::Main)
            .on_complete(move |result| tx.send((value, result.is_success())).unwrap());
    }
    let delivered: Vec<_> = (0..5).map(|_| rx.recv_timeout(TIMEOUT).unwrap()).collect();
    assert_eq!(
        delivered,
        (1..=5).map(|value| (value, true)).collect::<Vec<_>>()
    );
    let fetched = store
        .fetch::<UnitTestEntity>(&FetchConfig::default())
        .wait()
        .into_attached()
        .unwrap();
    assert_eq!(fetched[0].integer("attributeTwo").unwrap(), Some(5));
}
