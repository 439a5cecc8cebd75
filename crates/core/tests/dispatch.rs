use seqgate_api::*;
use seqgate_core::{
    context::{GatewayConfig, GatewayModConfig},
    default_test_builder,
    factories::{
        annot::AnnotNameFilter, AnnotProcessorFactory, BackendFixture,
        BackendOp, Fault, LocalCacheSnapshot, MemBackendStore,
        MemReplySink,
        mem_local_cache::config::{MemLocalCacheConfig, MemLocalCacheModConfig},
    },
    processor::DynProcessorFactory,
    Gateway,
};
use seqgate_test_utils::{enable_tracing, id::seq_id, record::*};
use std::sync::Arc;

async fn make_gateway(
    store: Arc<MemBackendStore>,
    processors: Option<Vec<DynProcessorFactory>>,
    cache: Option<MemLocalCacheConfig>,
) -> Gateway {
    let mut builder = default_test_builder(store);
    if let Some(processors) = processors {
        builder.processors = processors;
    }
    let builder = builder.with_default_config().unwrap();
    builder
        .config
        .set_module_config(&GatewayModConfig {
            gateway: GatewayConfig {
                backend_op_timeout_ms: 300,
                output_poll_interval_ms: 10,
                ..Default::default()
            },
        })
        .unwrap();
    if let Some(local_cache) = cache {
        builder
            .config
            .set_module_config(&MemLocalCacheModConfig { local_cache })
            .unwrap();
    }
    builder.build().await.unwrap()
}

fn resolve(id: &str) -> Request {
    Request::new(RequestKind::Resolve {
        seq_id: seq_id(id),
        all_info: false,
    })
}

fn annotations(id: &str, names: &[&str]) -> Request {
    Request::new(RequestKind::GetAnnotations {
        seq_id: seq_id(id),
        names: names.iter().map(|n| n.to_string()).collect(),
    })
}

fn messages(sink: &MemReplySink, severity: Severity) -> Vec<(u16, String)> {
    sink.chunks()
        .into_iter()
        .filter_map(|c| match c {
            ReplyChunk::Message {
                severity: s,
                status,
                text,
            } if s == severity => Some((status, text)),
            _ => None,
        })
        .collect()
}

fn annots(sink: &MemReplySink) -> Vec<NamedAnnotRecord> {
    sink.chunks()
        .into_iter()
        .filter_map(|c| match c {
            ReplyChunk::NamedAnnot { record } => Some(record),
            _ => None,
        })
        .collect()
}

fn annot_statuses(sink: &MemReplySink) -> Vec<(String, u16)> {
    sink.chunks()
        .into_iter()
        .filter_map(|c| match c {
            ReplyChunk::AnnotStatus { name, status } => Some((name, status)),
            _ => None,
        })
        .collect()
}

fn two_annot_processors(
    primary: AnnotNameFilter,
) -> Vec<DynProcessorFactory> {
    vec![
        AnnotProcessorFactory::create_with(
            "annot-primary",
            Some(vec!["nannot_a".into()]),
            primary,
        ),
        AnnotProcessorFactory::create_with(
            "annot-secondary",
            Some(vec!["nannot_b".into()]),
            AnnotNameFilter::Any,
        ),
    ]
}

#[tokio::test(flavor = "multi_thread")]
async fn resolve_found() {
    enable_tracing();
    let store = MemBackendStore::new(
        BackendFixture::default()
            .with_bioseq_info(bioseq_info("NC_000001", 11, None, BlobId::new(4, 1))),
    );
    let gw = make_gateway(store, None, None).await;
    let sink = MemReplySink::new();

    let outcome = gw.handle(resolve("NC_000001"), sink.boxed()).await;

    assert_eq!(200, outcome.status);
    assert!(!outcome.canceled);
    assert_eq!(1, outcome.chain.len());
    assert_eq!("resolve", outcome.chain[0].0);
    let chunks = sink.chunks();
    assert!(matches!(
        &chunks[0],
        ReplyChunk::BioseqInfo { record } if record.version == 11
    ));
    assert_eq!(ReplyChunk::Completion { status: 200 }, chunks[1]);
    assert_eq!(1, gw.context().counters().snapshot().requests_found);
}

#[tokio::test(flavor = "multi_thread")]
async fn nothing_can_serve_is_not_found() {
    let store = MemBackendStore::new(BackendFixture::default());
    let gw = make_gateway(store.clone(), None, None).await;
    let sink = MemReplySink::new();

    let outcome = gw
        .handle(
            Request::new(RequestKind::IpgResolve {
                protein: None,
                nucleotide: None,
                ipg: None,
            }),
            sink.boxed(),
        )
        .await;

    assert_eq!(404, outcome.status);
    assert!(outcome.chain.is_empty());
    assert_eq!(1, messages(&sink, Severity::Error).len());
    assert_eq!(Some(404), sink.completion());
    assert!(store.op_log().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn not_found_is_reported_once_at_the_end() {
    let store = MemBackendStore::new(BackendFixture::default());
    let gw = make_gateway(store, None, None).await;
    let sink = MemReplySink::new();

    let outcome = gw.handle(resolve("NC_999999.1"), sink.boxed()).await;

    assert_eq!(404, outcome.status);
    let warnings = messages(&sink, Severity::Warning);
    assert_eq!(1, warnings.len());
    assert_eq!(404, warnings[0].0);
    assert!(warnings[0].1.contains("NC_999999.1"), "{}", warnings[0].1);
    assert!(matches!(
        sink.chunks().last(),
        Some(ReplyChunk::Completion { status: 404 })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn hung_backend_is_a_timeout() {
    let store = MemBackendStore::new(BackendFixture::default());
    store.set_fault(BackendOp::BioseqInfo, Fault::Hang);
    let gw = make_gateway(store, None, None).await;
    let sink = MemReplySink::new();

    let outcome = gw.handle(resolve("NC_000001"), sink.boxed()).await;

    assert_eq!(504, outcome.status);
    assert_eq!(Some(504), sink.completion());
    let counters = gw.context().counters().snapshot();
    assert_eq!(1, counters.backend_timeouts);
    assert_eq!(1, counters.requests_failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn annotations_merge_across_processors() {
    let store = MemBackendStore::new(
        BackendFixture::default()
            .with_bioseq_info(bioseq_info("NC_000010", 1, None, BlobId::new(4, 1)))
            .with_named_annot(
                "nannot_a",
                named_annot("NC_000010", 1, "name1", BlobId::new(4, 101)),
            )
            .with_named_annot(
                "nannot_a",
                named_annot("NC_000010", 1, "name2", BlobId::new(4, 102)),
            )
            .with_named_annot(
                "nannot_b",
                named_annot("NC_000010", 1, "name1", BlobId::new(4, 201)),
            )
            .with_named_annot(
                "nannot_b",
                named_annot("NC_000010", 1, "name3", BlobId::new(4, 203)),
            ),
    );
    let gw = make_gateway(
        store.clone(),
        Some(two_annot_processors(AnnotNameFilter::Names(vec![
            "name1".into(),
            "name2".into(),
        ]))),
        None,
    )
    .await;
    let sink = MemReplySink::new();

    let outcome = gw
        .handle(
            annotations("NC_000010.1", &["name1", "name2", "name3"]),
            sink.boxed(),
        )
        .await;

    assert_eq!(200, outcome.status);
    assert_eq!(
        vec!["annot-primary", "annot-secondary"],
        outcome.chain.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>()
    );

    let got: Vec<(String, BlobId)> = annots(&sink)
        .into_iter()
        .map(|r| (r.annot_name, r.blob_id))
        .collect();
    assert_eq!(
        vec![
            ("name1".to_string(), BlobId::new(4, 101)),
            ("name2".to_string(), BlobId::new(4, 102)),
            ("name3".to_string(), BlobId::new(4, 203)),
        ],
        got
    );
    assert!(annot_statuses(&sink).is_empty());

    // the canonical metadata goes out once
    let infos = sink
        .chunks()
        .iter()
        .filter(|c| matches!(c, ReplyChunk::BioseqInfo { .. }))
        .count();
    assert_eq!(1, infos);

    // the secondary processor only asked for what was left
    assert_eq!(
        1,
        store.op_count(&BackendOp::NamedAnnotations("nannot_b".into()))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn complete_coverage_stops_the_chain() {
    let store = MemBackendStore::new(
        BackendFixture::default()
            .with_bioseq_info(bioseq_info("NC_000011", 1, None, BlobId::new(4, 1)))
            .with_named_annot(
                "nannot_a",
                named_annot("NC_000011", 1, "name1", BlobId::new(4, 101)),
            )
            .with_named_annot(
                "nannot_b",
                named_annot("NC_000011", 1, "name1", BlobId::new(4, 201)),
            ),
    );
    let gw = make_gateway(
        store.clone(),
        Some(two_annot_processors(AnnotNameFilter::Any)),
        None,
    )
    .await;
    let sink = MemReplySink::new();

    let outcome = gw
        .handle(annotations("NC_000011.1", &["name1"]), sink.boxed())
        .await;

    assert_eq!(200, outcome.status);
    assert_eq!(1, outcome.chain.len());
    let got = annots(&sink);
    assert_eq!(1, got.len());
    assert_eq!(BlobId::new(4, 101), got[0].blob_id);
    assert_eq!(
        0,
        store.op_count(&BackendOp::NamedAnnotations("nannot_b".into()))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unanswered_names_get_a_status() {
    let store = MemBackendStore::new(
        BackendFixture::default()
            .with_bioseq_info(bioseq_info("NC_000012", 1, None, BlobId::new(4, 1)))
            .with_named_annot(
                "nannot",
                named_annot("NC_000012", 1, "name1", BlobId::new(4, 101)),
            ),
    );
    let gw = make_gateway(store, None, None).await;
    let sink = MemReplySink::new();

    let outcome = gw
        .handle(
            annotations("NC_000012.1", &["name1", "nameX"]),
            sink.boxed(),
        )
        .await;

    assert_eq!(200, outcome.status);
    assert_eq!(1, annots(&sink).len());
    assert_eq!(vec![("nameX".to_string(), 404)], annot_statuses(&sink));
    // partial success is no not-found
    assert!(messages(&sink, Severity::Warning).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn no_annotation_found() {
    let store = MemBackendStore::new(
        BackendFixture::default()
            .with_bioseq_info(bioseq_info("NC_000013", 1, None, BlobId::new(4, 1))),
    );
    let gw = make_gateway(store, None, None).await;
    let sink = MemReplySink::new();

    let outcome = gw
        .handle(annotations("NC_000013.1", &["a", "b"]), sink.boxed())
        .await;

    assert_eq!(404, outcome.status);
    assert_eq!(
        vec![("a".to_string(), 404), ("b".to_string(), 404)],
        annot_statuses(&sink)
    );
    assert_eq!(1, messages(&sink, Severity::Warning).len());
}

#[tokio::test(flavor = "multi_thread")]
async fn history_newest_first() {
    let store = MemBackendStore::new(
        BackendFixture::default()
            .with_bioseq_info(bioseq_info("NC_000020", 3, None, BlobId::new(4, 3)))
            .with_accession_history(accession_history(
                "NC_000020",
                1,
                Some(100),
                BlobId::new(4, 1),
            ))
            .with_accession_history(accession_history(
                "NC_000020",
                3,
                Some(300),
                BlobId::new(4, 3),
            ))
            .with_accession_history(accession_history(
                "NC_000020",
                2,
                Some(200),
                BlobId::new(4, 2),
            )),
    );
    let gw = make_gateway(store, None, None).await;
    let sink = MemReplySink::new();

    let outcome = gw
        .handle(
            Request::new(RequestKind::GetHistory {
                seq_id: seq_id("NC_000020"),
            }),
            sink.boxed(),
        )
        .await;

    assert_eq!(200, outcome.status);
    let versions: Vec<i16> = sink
        .chunks()
        .into_iter()
        .filter_map(|c| match c {
            ReplyChunk::AccessionHistory { record } => Some(record.version),
            _ => None,
        })
        .collect();
    assert_eq!(vec![3, 2, 1], versions);
}

#[tokio::test(flavor = "multi_thread")]
async fn ipg_through_the_gateway() {
    let store = MemBackendStore::new(
        BackendFixture::default()
            .with_ipg(ipg(77, "WP_000100.1", Some("NZ_CP000001.1")))
            .with_ipg(ipg(77, "WP_000100.1", Some("NZ_CP000002.1"))),
    );
    let gw = make_gateway(store, None, None).await;
    let sink = MemReplySink::new();

    let outcome = gw
        .handle(
            Request::new(RequestKind::IpgResolve {
                protein: Some(seq_id("WP_000100.1")),
                nucleotide: None,
                ipg: None,
            }),
            sink.boxed(),
        )
        .await;

    assert_eq!(200, outcome.status);
    assert_eq!(1, outcome.chain.len());
    assert_eq!("ipg-resolve", outcome.chain[0].0);
    assert!(outcome.chain[0].1.is_found());
    assert_eq!(
        2,
        sink.chunks()
            .iter()
            .filter(|c| matches!(c, ReplyChunk::Ipg { .. }))
            .count()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn local_cache_snapshot_answers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let snapshot = LocalCacheSnapshot {
        bioseq_info: vec![bioseq_info("NC_000030", 2, None, BlobId::new(4, 9))],
        ..Default::default()
    };
    std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

    let store = MemBackendStore::new(BackendFixture::default());
    let gw = make_gateway(
        store.clone(),
        None,
        Some(MemLocalCacheConfig {
            snapshot_path: Some(path.to_string_lossy().to_string()),
        }),
    )
    .await;
    let sink = MemReplySink::new();

    let request = resolve("NC_000030").with_options(RequestOptions {
        cache_policy: CachePolicy::CacheOnly,
        ..Default::default()
    });
    let outcome = gw.handle(request, sink.boxed()).await;

    assert_eq!(200, outcome.status);
    assert!(store.op_log().is_empty());
    assert_eq!(1, gw.context().counters().snapshot().cache_hits);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreadable_snapshot_disables_the_cache() {
    let store = MemBackendStore::new(
        BackendFixture::default()
            .with_bioseq_info(bioseq_info("NC_000031", 1, None, BlobId::new(4, 9))),
    );
    let gw = make_gateway(
        store.clone(),
        None,
        Some(MemLocalCacheConfig {
            snapshot_path: Some("/nonexistent/cache.json".into()),
        }),
    )
    .await;
    assert!(gw.context().local_cache().is_none());

    let sink = MemReplySink::new();
    let outcome = gw.handle(resolve("NC_000031"), sink.boxed()).await;

    assert_eq!(200, outcome.status);
    assert_eq!(1, store.op_count(&BackendOp::BioseqInfo));
}
