use procgroup::types::UNIQUE_ID_BYTES;
use procgroup::{AllreduceOptions, ProcessGroupError, Store};

use super::helpers::{World, run_ranks_in};

#[tokio::test]
async fn test_rank1_retrieves_identical_bytes() {
    let world = World::new();
    let store = world.store.clone();

    run_ranks_in(&world, 2, 1, |p| async move {
        let t = [p.rt.tensor(0, &[1i32]).unwrap()];
        p.pg.allreduce(&t, AllreduceOptions::default())
            .await
            .unwrap()
            .wait()
            .unwrap();
    })
    .await;

    let published = store.inner.try_get("0_0").unwrap().unwrap();
    assert_eq!(published.len(), UNIQUE_ID_BYTES);
    assert_eq!(store.sets(), 1);
    assert_eq!(store.gets(), 1);
}

#[tokio::test]
async fn test_truncated_payload_fails_the_collective() {
    let world = World::new();
    world
        .store
        .set("0_0", &[0xaa; UNIQUE_ID_BYTES / 2])
        .await
        .unwrap();

    // Only the non-root process runs; it reads the corrupted id.
    let p = world.process(1, 2, 1);
    let t = [p.rt.tensor(0, &[1.0f32]).unwrap()];
    let err = p
        .pg
        .allreduce(&t, AllreduceOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProcessGroupError::UniqueIdLength {
            expected: UNIQUE_ID_BYTES,
            actual
        } if actual == UNIQUE_ID_BYTES / 2
    ));
    assert_eq!(p.rt.events_recorded(), 0);
    assert_eq!(p.pg.num_cached_communicators(), 0);
}

#[tokio::test]
async fn test_missing_root_times_out() {
    use procgroup::ProcessGroupConfig;
    use std::time::Duration;

    let world = World::with_config(
        ProcessGroupConfig::default().with_store_timeout(Duration::from_millis(50)),
    );
    let p = world.process(1, 2, 1);
    let t = [p.rt.tensor(0, &[1i8]).unwrap()];
    let err = p
        .pg
        .allreduce(&t, AllreduceOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessGroupError::StoreTimeout { ref key, .. } if key == "0_0"));
}

#[tokio::test]
async fn test_each_new_device_set_uses_a_fresh_key() {
    let world = World::new();
    let store = world.store.clone();

    run_ranks_in(&world, 2, 2, |p| async move {
        for devices in [vec![0], vec![1], vec![0, 1]] {
            let t: Vec<_> = devices
                .iter()
                .map(|&d| p.rt.tensor(d, &[1i32]).unwrap())
                .collect();
            p.pg.allreduce(&t, AllreduceOptions::default())
                .await
                .unwrap()
                .wait()
                .unwrap();
        }
    })
    .await;

    for key in ["0_0", "0_1", "0_2"] {
        assert!(store.inner.try_get(key).unwrap().is_some(), "missing {key}");
    }
    assert!(store.inner.try_get("0_3").unwrap().is_none());
}
