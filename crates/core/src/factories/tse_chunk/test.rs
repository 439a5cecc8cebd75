use super::*;
use crate::factories::*;
use crate::test_support::*;
use seqgate_test_utils::record::*;

const KS: &str = "satncbi_extended";

fn request(id2_info: &str, chunk_no: i32) -> Request {
    Request::new(RequestKind::GetBlobChunk {
        id2_info: id2_info.into(),
        chunk_no,
    })
}

/// A split blob `4.1000.5`: index blob at 1000, data chunks at 995..=999.
fn fixture(id2: Id2Info) -> BackendFixture {
    let mut f = BackendFixture::default().with_split_history(KS, split_history(id2));
    for key in (id2.info - id2.chunks)..=id2.info {
        let blob_id = BlobId::new(4, key);
        f = f.with_blob(
            KS,
            blob_props(blob_id, 100, 20, 2),
            blob_pieces(blob_id, 2, 10),
        );
    }
    f
}

fn data_keys(sink: &MemReplySink) -> Vec<(i32, u32, bool)> {
    sink.chunks()
        .into_iter()
        .filter_map(|c| match c {
            ReplyChunk::BlobData {
                blob_id,
                chunk_no,
                last,
                ..
            } => Some((blob_id.sat_key, chunk_no, last)),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn index_chunk_is_the_info_blob() {
    let id2: Id2Info = "4.1000.5".parse().unwrap();
    let (gw, _store) = gateway(fixture(id2), None);
    let req = request("4.1000.5", 0);
    let (mut ctx, sink) = request_ctx(&gw, req.clone());

    let mut p = TseChunkProcessorFactory::create().create(&req, 0, &gw);
    run(&mut p, &mut ctx).await;

    assert!(p.status().is_found());
    assert!(matches!(
        sink.chunks()[0],
        ReplyChunk::BlobProps { ref props } if props.blob_id == BlobId::new(4, 1000)
    ));
    assert_eq!(
        vec![(1000, 0, false), (1000, 1, false), (1000, 2, true)],
        data_keys(&sink)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn data_chunk_key_is_below_info() {
    let id2: Id2Info = "4.1000.5".parse().unwrap();
    let (gw, _store) = gateway(fixture(id2), None);
    let req = request("4.1000.5", 3);
    let (mut ctx, sink) = request_ctx(&gw, req.clone());

    let mut p = TseChunkProcessorFactory::create().create(&req, 0, &gw);
    run(&mut p, &mut ctx).await;

    assert!(p.status().is_found());
    // 1000 - 5 - 1 + 3
    assert!(data_keys(&sink).iter().all(|(key, _, _)| *key == 997));
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_range_chunk_touches_nothing() {
    let id2: Id2Info = "4.1000.5".parse().unwrap();
    let (gw, store) = gateway(fixture(id2), None);

    for chunk_no in [6, -1] {
        let req = request("4.1000.5", chunk_no);
        let (mut ctx, sink) = request_ctx(&gw, req.clone());
        let mut p = TseChunkProcessorFactory::create().create(&req, 0, &gw);
        run(&mut p, &mut ctx).await;

        assert_eq!(400, p.status().status_code(), "chunk {chunk_no}");
        assert!(data_keys(&sink).is_empty());
    }
    assert!(store.op_log().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_id2_info_is_a_client_error() {
    let (gw, store) = gateway(BackendFixture::default(), None);
    for text in ["4.1000", "4.x.5", "4.3.5"] {
        let req = request(text, 1);
        let (mut ctx, _sink) = request_ctx(&gw, req.clone());
        let mut p = TseChunkProcessorFactory::create().create(&req, 0, &gw);
        run(&mut p, &mut ctx).await;
        assert_eq!(400, p.status().status_code(), "{text}");
    }
    assert!(store.op_log().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_sat_is_a_client_error() {
    let (gw, store) = gateway(BackendFixture::default(), None);
    let req = request("77.1000.5", 1);
    let (mut ctx, _sink) = request_ctx(&gw, req.clone());
    let mut p = TseChunkProcessorFactory::create().create(&req, 0, &gw);
    run(&mut p, &mut ctx).await;
    assert_eq!(400, p.status().status_code());
    assert!(store.op_log().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn split_history_layout_wins() {
    // the client still has the 5 chunk layout, version 0 now has 8
    let current: Id2Info = "4.1000.8".parse().unwrap();
    let (gw, _store) = gateway(fixture(current), None);
    let req = request("4.1000.5", 3);
    let (mut ctx, sink) = request_ctx(&gw, req.clone());

    let mut p = TseChunkProcessorFactory::create().create(&req, 0, &gw);
    run(&mut p, &mut ctx).await;

    assert!(p.status().is_found());
    // 1000 - 8 - 1 + 3
    assert!(data_keys(&sink).iter().all(|(key, _, _)| *key == 994));
}

#[tokio::test(flavor = "multi_thread")]
async fn split_history_is_memoised_per_request() {
    let id2: Id2Info = "4.1000.5".parse().unwrap();
    let (gw, store) = gateway(fixture(id2), None);
    let req = request("4.1000.5", 2);
    let (mut ctx, _sink) = request_ctx(&gw, req.clone());

    let factory = TseChunkProcessorFactory::create();
    for priority in 0..2 {
        let mut p = factory.create(&req, priority, &gw);
        run(&mut p, &mut ctx).await;
        assert!(p.status().is_found());
    }
    assert_eq!(1, store.op_count(&BackendOp::SplitHistory));

    // a new request looks it up again
    let (mut ctx, _sink) = request_ctx(&gw, req.clone());
    let mut p = factory.create(&req, 0, &gw);
    run(&mut p, &mut ctx).await;
    assert_eq!(2, store.op_count(&BackendOp::SplitHistory));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_split_history_is_not_found() {
    let (gw, store) = gateway(BackendFixture::default(), None);
    let req = request("4.1000.5", 2);
    let (mut ctx, _sink) = request_ctx(&gw, req.clone());

    let mut p = TseChunkProcessorFactory::create().create(&req, 0, &gw);
    run(&mut p, &mut ctx).await;

    assert!(matches!(p.status(), ProcessorStatus::NotFound));
    assert_eq!(0, store.op_count(&BackendOp::BlobProps));
}
