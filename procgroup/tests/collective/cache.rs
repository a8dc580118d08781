use std::sync::Arc;

use procgroup::{AllreduceOptions, BroadcastOptions};

use super::helpers::{World, run_ranks_in};

#[tokio::test]
async fn test_same_key_reuses_bundle_without_store_traffic() {
    let world = World::new();
    let store = world.store.clone();

    let observed = run_ranks_in(&world, 2, 2, |p| async move {
        let t = [p.rt.tensor(0, &[1i32]).unwrap(), p.rt.tensor(1, &[1i32]).unwrap()];

        p.pg.allreduce(&t, AllreduceOptions::default())
            .await
            .unwrap()
            .wait()
            .unwrap();
        let first = p.pg.cached_communicators(&[0, 1]).unwrap();
        let opened = p.backend.comms_opened();

        p.pg.broadcast(&t, BroadcastOptions::default())
            .await
            .unwrap()
            .wait()
            .unwrap();
        let second = p.pg.cached_communicators(&[0, 1]).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(p.backend.comms_opened(), opened);
        assert_eq!(p.pg.num_cached_communicators(), 1);
        opened
    })
    .await;

    assert_eq!(observed, vec![2, 2]);
    // One rendezvous: rank 0 published once, rank 1 read once.
    assert_eq!(store.sets(), 1);
    assert_eq!(store.gets(), 1);
}

#[tokio::test]
async fn test_device_order_selects_distinct_bundles() {
    let world = World::new();
    let store = world.store.clone();

    run_ranks_in(&world, 2, 2, |p| async move {
        let forward = [p.rt.tensor(0, &[1i32]).unwrap(), p.rt.tensor(1, &[2i32]).unwrap()];
        let reverse = [p.rt.tensor(1, &[1i32]).unwrap(), p.rt.tensor(0, &[2i32]).unwrap()];

        p.pg.allreduce(&forward, AllreduceOptions::default())
            .await
            .unwrap()
            .wait()
            .unwrap();
        p.pg.allreduce(&reverse, AllreduceOptions::default())
            .await
            .unwrap()
            .wait()
            .unwrap();

        let a = p.pg.cached_communicators(&[0, 1]).unwrap();
        let b = p.pg.cached_communicators(&[1, 0]).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.devices(), &[0, 1]);
        assert_eq!(b.devices(), &[1, 0]);
        assert_eq!(p.pg.num_cached_communicators(), 2);

        for t in forward.iter().chain(&reverse) {
            assert_eq!(p.rt.download::<i32>(t).unwrap(), vec![6]);
        }
    })
    .await;

    assert_eq!(store.sets(), 2);
}

#[tokio::test]
async fn test_dropping_group_releases_communicators() {
    let world = World::new();
    let fabric = world.fabric.clone();

    run_ranks_in(&world, 1, 2, |p| async move {
        let t = [p.rt.tensor(0, &[1u8]).unwrap(), p.rt.tensor(1, &[1u8]).unwrap()];
        p.pg.allreduce(&t, AllreduceOptions::default())
            .await
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(p.backend.live_comms(), 2);

        let backend = p.backend.clone();
        drop(p.pg);
        assert_eq!(backend.live_comms(), 0);
    })
    .await;

    assert_eq!(fabric.live_cliques(), 0);
}
