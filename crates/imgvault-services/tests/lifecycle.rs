mod helpers;

use helpers::{manual_clock, memory_store, png_bytes, seed, t0, FlakyStore, ReuploadAfterRead};
use imgvault_core::{Clock, StorageTier, StoredImage};
use imgvault_services::{LifecycleManager, LifecyclePolicy, LifecycleScheduler};
use imgvault_storage::{ImageStore, LocalStore, PutObject};
use std::sync::Arc;
use std::time::Duration;

const KEY: &str = "generated_images/1.webp";
const PERMANENT_KEY: &str = "generated_images/2.webp";
const OTHER_KEY: &str = "generated_images/3.webp";

fn day(n: i64) -> chrono::DateTime<chrono::Utc> {
    t0() + chrono::Duration::days(n)
}

async fn tier_of(store: &dyn ImageStore, key: &str) -> StorageTier {
    match store.head(key).await {
        Ok(StoredImage { tier, .. }) => tier,
        Err(e) if e.is_not_found() => StorageTier::Deleted,
        Err(e) => panic!("head failed: {}", e),
    }
}

#[tokio::test]
async fn untagged_objects_follow_the_schedule() {
    let store = memory_store();
    let original = seed(store.as_ref(), KEY, t0(), false).await;
    let clock = manual_clock();
    let manager = LifecycleManager::new(store.clone(), LifecyclePolicy::default(), clock.clone());

    clock.set(day(89));
    assert!(manager.sweep().await.unwrap().is_noop());
    assert_eq!(tier_of(store.as_ref(), KEY).await, StorageTier::Standard);

    clock.set(day(90));
    let report = manager.sweep().await.unwrap();
    assert_eq!(report.moved_to(StorageTier::Infrequent), 1);
    assert_eq!(tier_of(store.as_ref(), KEY).await, StorageTier::Infrequent);

    clock.set(day(270));
    manager.sweep().await.unwrap();
    assert_eq!(tier_of(store.as_ref(), KEY).await, StorageTier::Archive);

    // Archived objects stay readable and unchanged.
    let archived = store.get(KEY).await.unwrap();
    assert_eq!(archived.descriptor.etag, original.etag);
    assert_eq!(archived.descriptor.created_at, original.created_at);

    clock.set(day(634));
    assert!(manager.sweep().await.unwrap().is_noop());

    clock.set(day(635));
    let report = manager.sweep().await.unwrap();
    assert_eq!(report.deleted(), 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn permanent_objects_are_never_archived_or_deleted() {
    let store = memory_store();
    seed(store.as_ref(), PERMANENT_KEY, t0(), true).await;
    let clock = manual_clock();
    let manager = LifecycleManager::new(store.clone(), LifecyclePolicy::default(), clock.clone());

    clock.set(day(90));
    manager.sweep().await.unwrap();
    assert_eq!(tier_of(store.as_ref(), PERMANENT_KEY).await, StorageTier::Infrequent);

    clock.set(day(5_000));
    assert!(manager.sweep().await.unwrap().is_noop());
    let image = store.head(PERMANENT_KEY).await.unwrap();
    assert_eq!(image.tier, StorageTier::Infrequent);
    assert!(image.permanent);
}

#[tokio::test]
async fn tiers_only_move_forward_day_by_day() {
    let store = memory_store();
    seed(store.as_ref(), KEY, t0(), false).await;
    seed(store.as_ref(), PERMANENT_KEY, t0(), true).await;
    let clock = manual_clock();
    let manager = LifecycleManager::new(store.clone(), LifecyclePolicy::default(), clock.clone());

    let mut previous = (StorageTier::Standard, StorageTier::Standard);
    for n in 0..=700 {
        clock.set(day(n));
        manager.sweep().await.unwrap();
        let current = (
            tier_of(store.as_ref(), KEY).await,
            tier_of(store.as_ref(), PERMANENT_KEY).await,
        );
        assert!(current.0 >= previous.0, "day {}: {:?} -> {:?}", n, previous.0, current.0);
        assert!(current.1 >= previous.1, "day {}: {:?} -> {:?}", n, previous.1, current.1);

        let expected = match n {
            0..=89 => StorageTier::Standard,
            90..=269 => StorageTier::Infrequent,
            270..=634 => StorageTier::Archive,
            _ => StorageTier::Deleted,
        };
        assert_eq!(current.0, expected, "day {}", n);
        assert!(current.1 <= StorageTier::Infrequent, "day {}", n);
        previous = current;
    }
}

#[tokio::test]
async fn overdue_objects_catch_up_in_one_sweep() {
    let store = memory_store();
    seed(store.as_ref(), KEY, t0(), false).await;
    let clock = manual_clock();
    let manager = LifecycleManager::new(store.clone(), LifecyclePolicy::default(), clock.clone());

    clock.set(day(300));
    let report = manager.sweep().await.unwrap();
    let tiers: Vec<_> = report.transitions.iter().map(|t| t.to).collect();
    assert_eq!(tiers, vec![StorageTier::Infrequent, StorageTier::Archive]);

    assert!(manager.sweep().await.unwrap().is_noop());
}

#[tokio::test]
async fn failed_transitions_are_skipped_and_retried() {
    let memory = memory_store();
    seed(memory.as_ref(), KEY, t0(), false).await;
    seed(memory.as_ref(), OTHER_KEY, t0(), false).await;
    let flaky = Arc::new(FlakyStore::new(memory.clone()).break_key(KEY));
    let clock = manual_clock();
    let manager = LifecycleManager::new(flaky.clone(), LifecyclePolicy::default(), clock.clone());

    clock.set(day(100));
    let report = manager.sweep().await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].key, KEY);
    assert_eq!(tier_of(memory.as_ref(), KEY).await, StorageTier::Standard);
    assert_eq!(tier_of(memory.as_ref(), OTHER_KEY).await, StorageTier::Infrequent);

    flaky.repair_key(KEY);
    let report = manager.sweep().await.unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(tier_of(memory.as_ref(), KEY).await, StorageTier::Infrequent);
}

fn replacement(created_at: chrono::DateTime<chrono::Utc>) -> PutObject {
    PutObject::new(KEY, png_bytes(24, 24, 9), "image/png").created_at(created_at)
}

#[tokio::test]
async fn expiry_spares_an_object_reuploaded_mid_sweep() {
    let memory = memory_store();
    memory
        .put(
            PutObject::new(KEY, png_bytes(16, 16, 1), "image/png")
                .created_at(t0())
                .with_tier(StorageTier::Archive),
        )
        .await
        .unwrap();
    let racing = Arc::new(ReuploadAfterRead::new(memory.clone(), replacement(day(700))));
    let clock = manual_clock();
    let manager = LifecycleManager::new(racing, LifecyclePolicy::default(), clock.clone());

    clock.set(day(700));
    let report = manager.sweep().await.unwrap();
    assert_eq!(report.deleted(), 0);
    assert!(report.failures.is_empty());

    let survivor = memory.get(KEY).await.unwrap();
    assert_eq!(survivor.descriptor.created_at, day(700));
    assert_eq!(survivor.descriptor.tier, StorageTier::Standard);
    assert_eq!(survivor.bytes.as_ref(), png_bytes(24, 24, 9).as_slice());
}

#[tokio::test]
async fn tiering_does_not_restore_bytes_replaced_mid_sweep() {
    let memory = memory_store();
    let original = seed(memory.as_ref(), KEY, t0(), false).await;
    let racing = Arc::new(ReuploadAfterRead::new(memory.clone(), replacement(day(100))));
    let clock = manual_clock();
    let manager = LifecycleManager::new(racing, LifecyclePolicy::default(), clock.clone());

    clock.set(day(100));
    let report = manager.sweep().await.unwrap();
    assert!(report.transitions.is_empty());
    assert!(report.failures.is_empty());

    let current = memory.get(KEY).await.unwrap();
    assert_ne!(current.descriptor.etag, original.etag);
    assert_eq!(current.descriptor.created_at, day(100));
    assert_eq!(current.descriptor.tier, StorageTier::Standard);
}

#[tokio::test]
async fn reupload_with_an_old_timestamp_is_tiered_as_itself() {
    let memory = memory_store();
    seed(memory.as_ref(), KEY, t0(), false).await;
    let racing = Arc::new(ReuploadAfterRead::new(memory.clone(), replacement(day(10))));
    let clock = manual_clock();
    let manager = LifecycleManager::new(racing, LifecyclePolicy::default(), clock.clone());

    clock.set(day(300));
    let report = manager.sweep().await.unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(report.deleted(), 0);

    let current = memory.get(KEY).await.unwrap();
    assert_eq!(current.descriptor.created_at, day(10));
    assert_eq!(current.descriptor.tier, StorageTier::Archive);
    assert_eq!(current.bytes.as_ref(), png_bytes(24, 24, 9).as_slice());
}

#[tokio::test]
async fn tag_and_tier_rewrites_keep_a_concurrent_upload() {
    let memory = memory_store();
    seed(memory.as_ref(), KEY, t0(), false).await;
    let racing = ReuploadAfterRead::new(memory.clone(), replacement(day(1)));

    let tagged = racing.set_permanent(KEY, true).await.unwrap();
    assert!(tagged.permanent);
    assert_eq!(tagged.created_at, day(1));
    let stored = memory.get(KEY).await.unwrap();
    assert!(stored.descriptor.permanent);
    assert_eq!(stored.bytes.as_ref(), png_bytes(24, 24, 9).as_slice());

    seed(memory.as_ref(), OTHER_KEY, t0(), false).await;
    let racing = ReuploadAfterRead::new(
        memory.clone(),
        PutObject::new(OTHER_KEY, png_bytes(24, 24, 9), "image/png").created_at(day(1)),
    );
    let err = racing.set_tier(OTHER_KEY, StorageTier::Archive).await.unwrap_err();
    assert!(err.is_conflict());
    let stored = memory.get(OTHER_KEY).await.unwrap();
    assert_eq!(stored.descriptor.tier, StorageTier::Standard);
    assert_eq!(stored.descriptor.created_at, day(1));
}

#[tokio::test]
async fn local_backend_keeps_tiered_objects_readable() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        LocalStore::new(
            dir.path(),
            "http://localhost:8080/media".to_string(),
            "0123456789abcdef0123456789abcdef",
        )
        .await
        .unwrap(),
    );
    let original = seed(store.as_ref(), KEY, t0(), false).await;
    let clock = manual_clock();
    let manager = LifecycleManager::new(store.clone(), LifecyclePolicy::default(), clock.clone());

    clock.set(day(400));
    manager.sweep().await.unwrap();

    let object = store.get(KEY).await.unwrap();
    assert_eq!(object.descriptor.tier, StorageTier::Archive);
    assert_eq!(object.descriptor.etag, original.etag);
}

#[tokio::test]
async fn scheduler_ticks_on_the_injected_clock() {
    let store = memory_store();
    seed(store.as_ref(), KEY, t0(), false).await;
    let clock = manual_clock();
    let manager = Arc::new(LifecycleManager::new(
        store.clone(),
        LifecyclePolicy::default(),
        clock.clone(),
    ));
    let scheduler = LifecycleScheduler::new(manager, Duration::from_secs(100 * 86_400), clock.clone());

    let reports = scheduler.run_ticks(3).await;
    assert_eq!(reports.len(), 3);
    assert!(reports[0].is_noop());
    assert_eq!(reports[1].moved_to(StorageTier::Infrequent), 1);
    assert!(reports[2].is_noop());
    assert_eq!(clock.now(), day(300));
}

#[tokio::test]
async fn started_scheduler_expires_objects_and_shuts_down() {
    let store = memory_store();
    seed(store.as_ref(), KEY, t0(), false).await;
    let clock = manual_clock();
    let manager = Arc::new(LifecycleManager::new(
        store.clone(),
        LifecyclePolicy::default(),
        clock.clone(),
    ));
    let scheduler = Arc::new(LifecycleScheduler::new(
        manager,
        Duration::from_secs(86_400),
        clock.clone(),
    ));

    let handle = scheduler.start();
    for _ in 0..100_000 {
        if store.is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    handle.shutdown().await;

    assert!(store.is_empty());
    assert!(clock.now() >= day(635));
}
