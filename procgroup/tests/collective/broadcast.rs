use procgroup::{BroadcastOptions, ProcessGroupError};

use super::helpers::run_ranks;

#[tokio::test]
async fn test_broadcast_from_rank0_device0() {
    let results = run_ranks(3, 2, |p| async move {
        let t: Vec<_> = (0..2)
            .map(|i| {
                let fill = if p.rank == 0 && i == 0 {
                    [f32::NAN, -0.0, 1.0e-40, 42.5]
                } else {
                    [0.0; 4]
                };
                p.rt.tensor(i, &fill).unwrap()
            })
            .collect();

        let work = p.pg.broadcast(&t, BroadcastOptions::default()).await.unwrap();
        work.wait().unwrap();

        t.iter()
            .map(|tensor| {
                p.rt.download::<f32>(tensor)
                    .unwrap()
                    .into_iter()
                    .map(f32::to_bits)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
    })
    .await;

    let expected: Vec<u32> = [f32::NAN, -0.0, 1.0e-40, 42.5]
        .into_iter()
        .map(f32::to_bits)
        .collect();
    for (rank, buffers) in results.iter().enumerate() {
        for bits in buffers {
            assert_eq!(bits, &expected, "rank {rank} is not bit-identical to the root");
        }
    }
}

#[tokio::test]
async fn test_broadcast_from_nonzero_root_tensor() {
    run_ranks(2, 2, |p| async move {
        // Global root = 1 * 2 + 1 = 3.
        let t: Vec<_> = (0..2)
            .map(|i| {
                let g = p.rank as i32 * 2 + i as i32;
                p.rt.tensor(i, &[g; 3]).unwrap()
            })
            .collect();
        let opts = BroadcastOptions {
            root_rank: 1,
            root_tensor: 1,
        };
        p.pg.broadcast(&t, opts).await.unwrap().wait().unwrap();
        for tensor in &t {
            assert_eq!(p.rt.download::<i32>(tensor).unwrap(), vec![3, 3, 3]);
        }
    })
    .await;
}

#[tokio::test]
async fn test_broadcast_rejects_bad_root() {
    run_ranks(1, 2, |p| async move {
        let t = [p.rt.tensor(0, &[1u8]).unwrap(), p.rt.tensor(1, &[1u8]).unwrap()];

        let bad_rank = BroadcastOptions {
            root_rank: 1,
            root_tensor: 0,
        };
        let err = p.pg.broadcast(&t, bad_rank).await.unwrap_err();
        assert!(matches!(err, ProcessGroupError::InvalidRoot { root: 1, limit: 1 }));

        let bad_tensor = BroadcastOptions {
            root_rank: 0,
            root_tensor: 2,
        };
        let err = p.pg.broadcast(&t, bad_tensor).await.unwrap_err();
        assert!(matches!(err, ProcessGroupError::InvalidRoot { root: 2, limit: 2 }));

        assert_eq!(p.rt.events_recorded(), 0);
        assert_eq!(p.pg.num_cached_communicators(), 0);
    })
    .await;
}
