use super::*;

const WINDOW: Duration = Duration::from_secs(60);

fn cache() -> ExcludeBlobCache {
    ExcludeBlobCache::new(ExcludeCacheConfig::default())
}

#[test]
fn in_progress_then_sent_recently() {
    let c = cache();
    let client = ClientId::from("c1");
    let blob = BlobId::new(4, 1);

    assert_eq!(ExcludeCheck::Added, c.check_and_add(&client, blob, WINDOW));
    assert_eq!(
        ExcludeCheck::InProgress,
        c.check_and_add(&client, blob, WINDOW)
    );

    c.set_completed(&client, blob);
    assert!(matches!(
        c.check_and_add(&client, blob, WINDOW),
        ExcludeCheck::SentRecently { .. }
    ));

    // other clients are unaffected
    let other = ClientId::from("c2");
    assert_eq!(ExcludeCheck::Added, c.check_and_add(&other, blob, WINDOW));
}

#[test]
fn stale_completion_allows_resend() {
    let c = cache();
    let client = ClientId::from("c1");
    let blob = BlobId::new(4, 1);

    c.check_and_add(&client, blob, Duration::ZERO);
    c.set_completed(&client, blob);
    assert_eq!(
        ExcludeCheck::Added,
        c.check_and_add(&client, blob, Duration::ZERO)
    );
    // and it is in progress again
    assert_eq!(
        ExcludeCheck::InProgress,
        c.check_and_add(&client, blob, Duration::ZERO)
    );
}

#[test]
fn removed_on_failure() {
    let c = cache();
    let client = ClientId::from("c1");
    let blob = BlobId::new(4, 1);

    c.check_and_add(&client, blob, WINDOW);
    c.remove(&client, blob);
    assert_eq!(0, c.blob_count(&client));
    assert_eq!(ExcludeCheck::Added, c.check_and_add(&client, blob, WINDOW));
}

#[test]
fn size_threshold_drops_oldest_completed() {
    let c = ExcludeBlobCache::new(ExcludeCacheConfig {
        max_blobs_per_client: 4,
        purge_down_to: 2,
        ..Default::default()
    });
    let client = ClientId::from("c1");

    for key in 0..4 {
        let blob = BlobId::new(4, key);
        c.check_and_add(&client, blob, WINDOW);
        c.set_completed(&client, blob);
    }
    // one in progress entry, never evicted
    c.check_and_add(&client, BlobId::new(4, 100), WINDOW);

    assert_eq!(2, c.blob_count(&client));
    assert_eq!(
        ExcludeCheck::InProgress,
        c.check_and_add(&client, BlobId::new(4, 100), WINDOW)
    );
    // the newest completed entry survived
    assert!(matches!(
        c.check_and_add(&client, BlobId::new(4, 3), WINDOW),
        ExcludeCheck::SentRecently { .. }
    ));
}

#[test]
fn inactive_clients_purged() {
    let c = ExcludeBlobCache::new(ExcludeCacheConfig {
        inactivity_timeout_ms: 0,
        ..Default::default()
    });
    c.check_and_add(&ClientId::from("c1"), BlobId::new(4, 1), WINDOW);
    assert_eq!(1, c.client_count());
    assert_eq!(1, c.purge_inactive());
    assert_eq!(0, c.client_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn purger_runs_in_background() {
    let c = Arc::new(ExcludeBlobCache::new(ExcludeCacheConfig {
        inactivity_timeout_ms: 0,
        purge_interval_ms: 5,
        ..Default::default()
    }));
    let _purger = ExcludeCachePurger::spawn(&c);
    c.check_and_add(&ClientId::from("c1"), BlobId::new(4, 1), WINDOW);

    tokio::time::timeout(Duration::from_secs(5), async {
        while c.client_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
