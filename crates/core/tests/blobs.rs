use seqgate_api::*;
use seqgate_core::{
    context::{GatewayConfig, GatewayModConfig},
    default_test_builder,
    fetch::CancelHandle,
    factories::{
        BackendFixture, BackendOp, ChannelReplySink, MemBackendStore,
        MemReplySink,
    },
    Gateway,
};
use seqgate_test_utils::{
    enable_tracing, id::random_client_id, id::seq_id, iter_check, record::*,
};
use std::sync::Arc;
use std::time::Duration;

const KS: &str = "satncbi_extended";

async fn make_gateway(store: Arc<MemBackendStore>) -> Gateway {
    let builder = default_test_builder(store).with_default_config().unwrap();
    builder
        .config
        .set_module_config(&GatewayModConfig {
            gateway: GatewayConfig {
                backend_op_timeout_ms: 500,
                output_poll_interval_ms: 10,
                ..Default::default()
            },
        })
        .unwrap();
    builder.build().await.unwrap()
}

fn by_key(blob_id: BlobId) -> Request {
    Request::new(RequestKind::GetBlobByKey {
        blob_id,
        last_modified: None,
    })
}

fn by_id(id: &str, tse: TseOption) -> Request {
    Request::new(RequestKind::GetBlobById {
        seq_id: seq_id(id),
        tse,
        range: None,
    })
}

/// `(blob sat_key, chunk_no, last)` of every data chunk.
fn data_of(chunks: &[ReplyChunk]) -> Vec<(i32, u32, bool)> {
    chunks
        .iter()
        .filter_map(|c| match c {
            ReplyChunk::BlobData {
                blob_id,
                chunk_no,
                last,
                ..
            } => Some((blob_id.sat_key, *chunk_no, *last)),
            _ => None,
        })
        .collect()
}

fn props_of(chunks: &[ReplyChunk]) -> Vec<i32> {
    chunks
        .iter()
        .filter_map(|c| match c {
            ReplyChunk::BlobProps { props } => Some(props.blob_id.sat_key),
            _ => None,
        })
        .collect()
}

/// Every piece of blob `sat_key`, in order, then the last marker.
fn whole(sat_key: i32, n: u32) -> Vec<(i32, u32, bool)> {
    let mut out: Vec<_> = (0..n).map(|i| (sat_key, i, false)).collect();
    out.push((sat_key, n, true));
    out
}

fn blob(sat_key: i32, size: i64, n: u32) -> BackendFixture {
    let blob_id = BlobId::new(4, sat_key);
    BackendFixture::default().with_blob(
        KS,
        blob_props(blob_id, 100, size, n),
        blob_pieces(blob_id, n, 16),
    )
}

/// Sequence NC_000050.1 in blob 4.50, split as `4.1000.3`.
fn split_fixture() -> BackendFixture {
    let main = BlobId::new(4, 50);
    let id2: Id2Info = "4.1000.3".parse().unwrap();
    let mut f = BackendFixture::default()
        .with_bioseq_info(bioseq_info("NC_000050", 1, None, main))
        .with_blob(
            KS,
            BlobProps {
                id2_info: Some(id2),
                ..blob_props(main, 100, 200, 2)
            },
            blob_pieces(main, 2, 16),
        );
    for key in 997..=1000 {
        let blob_id = BlobId::new(4, key);
        f = f.with_blob(KS, blob_props(blob_id, 100, 50, 1), blob_pieces(blob_id, 1, 16));
    }
    f
}

#[tokio::test(flavor = "multi_thread")]
async fn chunks_are_resequenced() {
    enable_tracing();
    let store = MemBackendStore::new(blob(10, 200, 5));
    store.set_reverse_chunks(true);
    let gw = make_gateway(store).await;
    let sink = MemReplySink::new();

    let outcome = gw.handle(by_key(BlobId::new(4, 10)), sink.boxed()).await;

    assert_eq!(200, outcome.status);
    let chunks = sink.chunks();
    assert_eq!(vec![10], props_of(&chunks));
    assert_eq!(whole(10, 5), data_of(&chunks));
    assert_eq!(1, gw.context().counters().snapshot().blobs_sent);
}

#[tokio::test(flavor = "multi_thread")]
async fn last_modified_mismatch_is_not_found() {
    let store = MemBackendStore::new(blob(11, 200, 1));
    let gw = make_gateway(store.clone()).await;
    let sink = MemReplySink::new();

    let outcome = gw
        .handle(
            Request::new(RequestKind::GetBlobByKey {
                blob_id: BlobId::new(4, 11),
                last_modified: Some(99),
            }),
            sink.boxed(),
        )
        .await;

    assert_eq!(404, outcome.status);
    assert_eq!(0, store.op_count(&BackendOp::BlobChunks));
}

#[tokio::test(flavor = "multi_thread")]
async fn large_blob_is_not_resent_within_the_window() {
    let store = MemBackendStore::new(blob(12, 20_000, 3));
    let gw = make_gateway(store).await;
    let client = random_client_id();
    let request = |resend_timeout_ms| {
        by_key(BlobId::new(4, 12)).with_options(RequestOptions {
            client_id: Some(client.clone()),
            resend_timeout_ms,
            ..Default::default()
        })
    };

    let first = MemReplySink::new();
    gw.handle(request(Some(60_000)), first.boxed()).await;
    assert_eq!(whole(12, 3), data_of(&first.chunks()));

    let second = MemReplySink::new();
    let outcome = gw.handle(request(Some(60_000)), second.boxed()).await;
    assert_eq!(200, outcome.status);
    assert!(data_of(&second.chunks()).is_empty());
    assert!(second.chunks().iter().any(|c| matches!(
        c,
        ReplyChunk::BlobExcluded {
            reason: ExcludeReason::SentRecently,
            sent_ago_us: Some(_),
            ..
        }
    )));

    // a zero window allows a resend
    let third = MemReplySink::new();
    gw.handle(request(Some(0)), third.boxed()).await;
    assert_eq!(whole(12, 3), data_of(&third.chunks()));

    let counters = gw.context().counters().snapshot();
    assert_eq!(2, counters.blobs_sent);
    assert_eq!(1, counters.blobs_excluded);
}

#[tokio::test(flavor = "multi_thread")]
async fn exclusion_is_per_client_and_size() {
    let store = MemBackendStore::new(blob(13, 20_000, 2).with_blob(
        KS,
        blob_props(BlobId::new(4, 14), 100, 100, 1),
        blob_pieces(BlobId::new(4, 14), 1, 16),
    ));
    let gw = make_gateway(store).await;
    let client = random_client_id();
    let with_client = |blob_id, client: &ClientId| {
        by_key(blob_id).with_options(RequestOptions {
            client_id: Some(client.clone()),
            resend_timeout_ms: Some(60_000),
            ..Default::default()
        })
    };

    for _ in 0..2 {
        let sink = MemReplySink::new();
        gw.handle(with_client(BlobId::new(4, 14), &client), sink.boxed())
            .await;
        assert_eq!(whole(14, 1), data_of(&sink.chunks()), "small blob");
    }

    let sink = MemReplySink::new();
    gw.handle(with_client(BlobId::new(4, 13), &client), sink.boxed())
        .await;
    assert_eq!(whole(13, 2), data_of(&sink.chunks()));

    let other = random_client_id();
    let sink = MemReplySink::new();
    gw.handle(with_client(BlobId::new(4, 13), &other), sink.boxed())
        .await;
    assert_eq!(whole(13, 2), data_of(&sink.chunks()), "other client");

    // without a client id nothing is tracked
    let sink = MemReplySink::new();
    gw.handle(by_key(BlobId::new(4, 13)), sink.boxed()).await;
    assert_eq!(whole(13, 2), data_of(&sink.chunks()));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_send_to_the_same_client_is_excluded() {
    let store = MemBackendStore::new(blob(15, 20_000, 10));
    store.set_chunk_delay(Some(Duration::from_millis(30)));
    let gw = make_gateway(store).await;
    let client = random_client_id();
    let request = || {
        by_key(BlobId::new(4, 15)).with_options(RequestOptions {
            client_id: Some(client.clone()),
            resend_timeout_ms: Some(60_000),
            ..Default::default()
        })
    };

    let first = MemReplySink::new();
    let task = tokio::spawn({
        let gw = gw.clone();
        let sink = first.boxed();
        let request = request();
        async move { gw.handle(request, sink).await }
    });
    iter_check!(2000, {
        if !data_of(&first.chunks()).is_empty() {
            break;
        }
    });

    let second = MemReplySink::new();
    let outcome = gw.handle(request(), second.boxed()).await;
    assert_eq!(200, outcome.status);
    assert!(data_of(&second.chunks()).is_empty());
    assert!(second.chunks().iter().any(|c| matches!(
        c,
        ReplyChunk::BlobExcluded {
            reason: ExcludeReason::InProgress,
            sent_ago_us: None,
            ..
        }
    )));

    assert_eq!(200, task.await.unwrap().status);
    assert_eq!(whole(15, 10), data_of(&first.chunks()));
    let counters = gw.context().counters().snapshot();
    assert_eq!(1, counters.blobs_sent);
    assert_eq!(1, counters.blobs_excluded);
}

#[tokio::test(flavor = "multi_thread")]
async fn canceled_send_can_be_repeated() {
    let store = MemBackendStore::new(blob(16, 20_000, 10));
    store.set_chunk_delay(Some(Duration::from_millis(30)));
    let gw = make_gateway(store.clone()).await;
    let client = random_client_id();
    let request = || {
        by_key(BlobId::new(4, 16)).with_options(RequestOptions {
            client_id: Some(client.clone()),
            resend_timeout_ms: Some(60_000),
            ..Default::default()
        })
    };

    let first = MemReplySink::new();
    let cancel = CancelHandle::new();
    let task = tokio::spawn({
        let gw = gw.clone();
        let sink = first.boxed();
        let cancel = cancel.clone();
        let request = request();
        async move { gw.handle_with_cancel(request, sink, cancel).await }
    });
    iter_check!(2000, {
        if !data_of(&first.chunks()).is_empty() {
            break;
        }
    });
    cancel.cancel();
    assert!(task.await.unwrap().canceled);
    assert_eq!(0, gw.context().exclude_cache().blob_count(&client));

    store.set_chunk_delay(None);
    let second = MemReplySink::new();
    let outcome = gw.handle(request(), second.boxed()).await;
    assert_eq!(200, outcome.status);
    assert_eq!(whole(16, 10), data_of(&second.chunks()));
    assert_eq!(0, gw.context().counters().snapshot().blobs_excluded);
}

#[tokio::test(flavor = "multi_thread")]
async fn get_by_id_tse_options() {
    let store = MemBackendStore::new(split_fixture());
    let gw = make_gateway(store).await;

    let run = |tse| {
        let gw = gw.clone();
        async move {
            let sink = MemReplySink::new();
            let outcome = gw.handle(by_id("NC_000050.1", tse), sink.boxed()).await;
            assert_eq!(200, outcome.status, "{tse:?}");
            assert!(matches!(
                sink.chunks()[0],
                ReplyChunk::BioseqInfo { .. }
            ));
            sink.chunks()
        }
    };

    let none = run(TseOption::None).await;
    assert_eq!(vec![50], props_of(&none));
    assert!(data_of(&none).is_empty());

    let slim = run(TseOption::Slim).await;
    assert_eq!(vec![50, 1000], props_of(&slim));
    assert_eq!(whole(1000, 1), data_of(&slim));

    let smart = run(TseOption::Smart).await;
    assert_eq!(vec![50, 1000], props_of(&smart));
    assert_eq!(whole(1000, 1), data_of(&smart));

    let whole_tse = run(TseOption::Whole).await;
    assert_eq!(vec![50, 1000, 997, 998, 999], props_of(&whole_tse));
    let mut expect = whole(1000, 1);
    for key in 997..=999 {
        expect.extend(whole(key, 1));
    }
    assert_eq!(expect, data_of(&whole_tse));

    let orig = run(TseOption::Orig).await;
    assert_eq!(vec![50], props_of(&orig));
    assert_eq!(whole(50, 2), data_of(&orig));
}

#[tokio::test(flavor = "multi_thread")]
async fn unsplit_blob_options() {
    let main = BlobId::new(4, 60);
    let store = MemBackendStore::new(
        BackendFixture::default()
            .with_bioseq_info(bioseq_info("NC_000060", 2, None, main))
            .with_blob(KS, blob_props(main, 100, 200, 3), blob_pieces(main, 3, 16)),
    );
    let gw = make_gateway(store).await;

    let sink = MemReplySink::new();
    gw.handle(by_id("NC_000060", TseOption::Smart), sink.boxed())
        .await;
    assert_eq!(whole(60, 3), data_of(&sink.chunks()));

    let sink = MemReplySink::new();
    gw.handle(by_id("NC_000060", TseOption::Slim), sink.boxed())
        .await;
    assert_eq!(vec![60], props_of(&sink.chunks()));
    assert!(data_of(&sink.chunks()).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn split_chunk_request() {
    let store = MemBackendStore::new(
        split_fixture().with_split_history(
            KS,
            split_history("4.1000.3".parse().unwrap()),
        ),
    );
    let gw = make_gateway(store).await;
    let sink = MemReplySink::new();

    let outcome = gw
        .handle(
            Request::new(RequestKind::GetBlobChunk {
                id2_info: "4.1000.3".into(),
                chunk_no: 2,
            }),
            sink.boxed(),
        )
        .await;

    assert_eq!(200, outcome.status);
    assert_eq!(whole(998, 1), data_of(&sink.chunks()));
}

#[tokio::test(flavor = "multi_thread")]
async fn nothing_is_sent_after_cancel() {
    let store = MemBackendStore::new(blob(20, 400, 20));
    store.set_chunk_delay(Some(Duration::from_millis(30)));
    let gw = make_gateway(store).await;
    let sink = MemReplySink::new();
    let cancel = CancelHandle::new();

    let task = tokio::spawn({
        let gw = gw.clone();
        let cancel = cancel.clone();
        let sink = sink.boxed();
        async move {
            gw.handle_with_cancel(by_key(BlobId::new(4, 20)), sink, cancel)
                .await
        }
    });

    iter_check!(2000, {
        if !data_of(&sink.chunks()).is_empty() {
            break;
        }
    });
    cancel.cancel();
    let outcome = task.await.unwrap();

    assert!(outcome.canceled);
    assert_eq!(499, outcome.status);
    let seen = sink.chunks().len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(seen, sink.chunks().len());
    assert_eq!(None, sink.completion());
    assert!(data_of(&sink.chunks()).iter().all(|(_, _, last)| !last));
    assert_eq!(1, gw.context().counters().snapshot().requests_canceled);
}

#[tokio::test(flavor = "multi_thread")]
async fn client_disconnect_cancels() {
    let store = MemBackendStore::new(blob(21, 400, 4));
    let gw = make_gateway(store).await;
    let sink = MemReplySink::new();
    sink.disconnect();

    let outcome = gw.handle(by_key(BlobId::new(4, 21)), sink.boxed()).await;

    assert!(outcome.canceled);
    assert_eq!(None, sink.completion());
    assert_eq!(0, gw.context().counters().snapshot().blobs_sent);
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_reader_gets_everything_in_order() {
    let store = MemBackendStore::new(blob(30, 2000, 40));
    let gw = make_gateway(store).await;
    let (sink, mut rx) = ChannelReplySink::new(2, 2);

    let task = tokio::spawn({
        let gw = gw.clone();
        async move { gw.handle(by_key(BlobId::new(4, 30)), Box::new(sink)).await }
    });

    let mut got = Vec::new();
    while let Some(chunk) = rx.recv().await {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let done = matches!(chunk, ReplyChunk::Completion { .. });
        got.push(chunk);
        if done {
            break;
        }
    }
    let outcome = task.await.unwrap();

    assert_eq!(200, outcome.status);
    assert_eq!(whole(30, 40), data_of(&got));
    assert_eq!(Some(&ReplyChunk::Completion { status: 200 }), got.last());
}

#[tokio::test(flavor = "multi_thread")]
async fn reader_gone_mid_reply_cancels() {
    let store = MemBackendStore::new(blob(31, 2000, 40));
    let gw = make_gateway(store).await;
    let (sink, mut rx) = ChannelReplySink::new(2, 2);

    let task = tokio::spawn({
        let gw = gw.clone();
        async move { gw.handle(by_key(BlobId::new(4, 31)), Box::new(sink)).await }
    });

    // take a few, then hang up
    for _ in 0..3 {
        rx.recv().await.unwrap();
    }
    drop(rx);

    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.canceled);
}
