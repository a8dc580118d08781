use procgroup::{ReduceOp, ReduceOptions};

use super::helpers::run_ranks;

#[tokio::test]
async fn test_reduce_to_root_leaves_others_untouched() {
    run_ranks(3, 1, |p| async move {
        let own = vec![p.rank as i64 + 1, 2];
        let t = [p.rt.tensor(0, &own).unwrap()];
        let opts = ReduceOptions {
            reduce_op: ReduceOp::Sum,
            root_rank: 2,
            root_tensor: 0,
        };
        p.pg.reduce(&t, opts).await.unwrap().wait().unwrap();

        let out = p.rt.download::<i64>(&t[0]).unwrap();
        if p.rank == 2 {
            assert_eq!(out, vec![6, 6]);
        } else {
            assert_eq!(out, own, "non-root rank {} was modified", p.rank);
        }
    })
    .await;
}

#[tokio::test]
async fn test_reduce_max_to_second_local_device() {
    run_ranks(2, 2, |p| async move {
        let t: Vec<_> = (0..2)
            .map(|i| {
                let g = p.rank as f32 * 2.0 + i as f32;
                p.rt.tensor(i, &[g, -g]).unwrap()
            })
            .collect();
        let opts = ReduceOptions {
            reduce_op: ReduceOp::Max,
            root_rank: 0,
            root_tensor: 1,
        };
        p.pg.reduce(&t, opts).await.unwrap().wait().unwrap();

        if p.rank == 0 {
            assert_eq!(p.rt.download::<f32>(&t[1]).unwrap(), vec![3.0, 0.0]);
            assert_eq!(p.rt.download::<f32>(&t[0]).unwrap(), vec![0.0, 0.0]);
        }
    })
    .await;
}
