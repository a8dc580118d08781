use procgroup::types::ScalarType;
use procgroup::sim::SimTensor;
use procgroup::{AllreduceOptions, BroadcastOptions, ProcessGroupError, ReduceOptions};

use super::helpers::World;

#[tokio::test]
async fn test_malformed_inputs_record_no_events() {
    let world = World::new();
    let p = world.process(0, 1, 2);
    let rt = &p.rt;

    let cases = vec![
        ("empty", vec![]),
        ("host", vec![rt.host_tensor(&[1.0f32]).unwrap()]),
        ("sparse", vec![rt.tensor(0, &[1.0f32]).unwrap().into_sparse()]),
        ("strided", vec![rt.tensor(0, &[1.0f32; 2]).unwrap().into_non_contiguous()]),
        (
            "same device",
            vec![rt.tensor(0, &[1.0f32]).unwrap(), rt.tensor(0, &[1.0f32]).unwrap()],
        ),
        (
            "mixed types",
            vec![rt.tensor(0, &[1.0f32]).unwrap(), rt.tensor(1, &[1i32]).unwrap()],
        ),
        (
            "mixed sizes",
            vec![rt.tensor(0, &[1.0f32]).unwrap(), rt.tensor(1, &[1.0f32; 2]).unwrap()],
        ),
    ];

    for (name, buffers) in &cases {
        let err = p
            .pg
            .allreduce(buffers, AllreduceOptions::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ProcessGroupError::InvalidInput { .. }),
            "{name}: unexpected error {err:?}"
        );
    }

    assert_eq!(rt.events_recorded(), 0);
    assert_eq!(p.pg.num_cached_communicators(), 0);
    assert_eq!(world.store.sets(), 0);
}

#[tokio::test]
async fn test_too_many_buffers_for_visible_devices() {
    let world = World::new();
    let p = world.process(0, 1, 1);
    // A second runtime's device 1 cannot be addressed by this process.
    let other = World::new().process(0, 1, 2);
    let t = [
        p.rt.tensor(0, &[1i32]).unwrap(),
        other.rt.tensor(1, &[1i32]).unwrap(),
    ];
    let err = p
        .pg
        .allreduce(&t, AllreduceOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("only 1 devices are visible"));
    assert_eq!(p.rt.events_recorded(), 0);
}

#[tokio::test]
async fn test_device_index_beyond_visible_devices() {
    let world = World::new();
    let p = world.process(0, 1, 1);
    let other = World::new().process(0, 1, 4);
    let far = [other.rt.tensor(3, &[1.0f32; 2]).unwrap()];

    let err = p
        .pg
        .allreduce(&far, AllreduceOptions::default())
        .await
        .unwrap_err();
    assert!(
        matches!(&err, ProcessGroupError::InvalidInput { reason } if reason.contains("device 3")),
        "unexpected error {err:?}"
    );
    assert_eq!(world.store.sets(), 0);
    assert_eq!(p.rt.events_recorded(), 0);
    assert_eq!(p.pg.num_cached_communicators(), 0);

    // The rejected call must not consume the first rendezvous key.
    let t = [p.rt.tensor(0, &[1.0f32; 2]).unwrap()];
    p.pg
        .allreduce(&t, AllreduceOptions::default())
        .await
        .unwrap()
        .wait()
        .unwrap();
    assert!(world.store.inner.try_get("0_0").unwrap().is_some());
    assert_eq!(world.store.sets(), 1);
}

#[tokio::test]
async fn test_unsupported_element_types_fail_fast() {
    let world = World::new();
    let p = world.process(0, 1, 1);

    for scalar in [ScalarType::Bool, ScalarType::I16, ScalarType::BF16] {
        let t = [p.rt.alloc(0, scalar, 4).unwrap()];
        let err = p
            .pg
            .allreduce(&t, AllreduceOptions::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ProcessGroupError::UnsupportedScalarType { scalar_type } if scalar_type == scalar)
        );
    }
    assert_eq!(p.rt.events_recorded(), 0);
}

#[tokio::test]
async fn test_rooted_collectives_report_empty_input_before_root() {
    let world = World::new();
    let p = world.process(0, 1, 1);
    let none: [SimTensor; 0] = [];

    let errs = [
        p.pg.broadcast(&none, BroadcastOptions::default()).await.unwrap_err(),
        p.pg.reduce(&none, ReduceOptions::default()).await.unwrap_err(),
    ];
    for err in errs {
        assert!(
            matches!(&err, ProcessGroupError::InvalidInput { reason } if reason.contains("must not be zero")),
            "unexpected error {err:?}"
        );
    }

    // A well-formed list with a bad root still reports the root.
    let t = [p.rt.tensor(0, &[1i32]).unwrap()];
    let opts = BroadcastOptions {
        root_rank: 0,
        root_tensor: 1,
    };
    let err = p.pg.broadcast(&t, opts).await.unwrap_err();
    assert!(matches!(err, ProcessGroupError::InvalidRoot { root: 1, limit: 1 }));
    assert_eq!(p.rt.events_recorded(), 0);
}
