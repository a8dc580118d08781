use procgroup::sim::F16;
use procgroup::{AllreduceOptions, ReduceOp};

use super::helpers::run_ranks;

fn opts(reduce_op: ReduceOp) -> AllreduceOptions {
    AllreduceOptions { reduce_op }
}

#[tokio::test]
async fn test_single_participant_is_identity() {
    run_ranks(1, 1, |p| async move {
        for op in [ReduceOp::Sum, ReduceOp::Min, ReduceOp::Max, ReduceOp::Product] {
            let t = [p.rt.tensor(0, &[3.0f32, -1.5, 0.0, 7.25]).unwrap()];
            p.pg.allreduce(&t, opts(op)).await.unwrap().wait().unwrap();
            assert_eq!(
                p.rt.download::<f32>(&t[0]).unwrap(),
                vec![3.0, -1.5, 0.0, 7.25],
                "{op} changed a single participant's buffer"
            );
        }
    })
    .await;
}

#[tokio::test]
async fn test_sum_two_processes_two_devices() {
    run_ranks(2, 2, |p| async move {
        // Global rank g contributes [g + 1, 10 * (g + 1)].
        let t: Vec<_> = (0..2)
            .map(|i| {
                let g = (p.rank * 2 + i as u32) as i64;
                p.rt.tensor(i, &[g + 1, 10 * (g + 1)]).unwrap()
            })
            .collect();

        p.pg.allreduce(&t, opts(ReduceOp::Sum)).await.unwrap().wait().unwrap();

        for tensor in &t {
            assert_eq!(
                p.rt.download::<i64>(tensor).unwrap(),
                vec![10, 100],
                "rank {} allreduce sum failed",
                p.rank
            );
        }
    })
    .await;
}

#[tokio::test]
async fn test_min_max_product_three_processes() {
    run_ranks(3, 1, |p| async move {
        let r = p.rank as f64;
        let base = [r + 1.0, -(r + 1.0)];

        let t = [p.rt.tensor(0, &base).unwrap()];
        p.pg.allreduce(&t, opts(ReduceOp::Min)).await.unwrap().wait().unwrap();
        assert_eq!(p.rt.download::<f64>(&t[0]).unwrap(), vec![1.0, -3.0]);

        let t = [p.rt.tensor(0, &base).unwrap()];
        p.pg.allreduce(&t, opts(ReduceOp::Max)).await.unwrap().wait().unwrap();
        assert_eq!(p.rt.download::<f64>(&t[0]).unwrap(), vec![3.0, -1.0]);

        let t = [p.rt.tensor(0, &base).unwrap()];
        p.pg.allreduce(&t, opts(ReduceOp::Product)).await.unwrap().wait().unwrap();
        assert_eq!(p.rt.download::<f64>(&t[0]).unwrap(), vec![6.0, -6.0]);
    })
    .await;
}

#[tokio::test]
async fn test_f16_sum() {
    run_ranks(2, 1, |p| async move {
        let v = F16::from_f32(0.5 + p.rank as f32);
        let t = [p.rt.tensor(0, &[v, v]).unwrap()];
        p.pg.allreduce(&t, opts(ReduceOp::Sum)).await.unwrap().wait().unwrap();
        let out: Vec<f32> = p
            .rt
            .download::<F16>(&t[0])
            .unwrap()
            .into_iter()
            .map(F16::to_f32)
            .collect();
        assert_eq!(out, vec![2.0, 2.0]);
    })
    .await;
}

#[tokio::test]
async fn test_repeated_allreduce_accumulates() {
    run_ranks(2, 1, |p| async move {
        let t = [p.rt.tensor(0, &[1i32]).unwrap()];
        for _ in 0..4 {
            let work = p.pg.allreduce(&t, opts(ReduceOp::Sum)).await.unwrap();
            work.wait().unwrap();
        }
        // 1 -> 2 -> 4 -> 8 -> 16
        assert_eq!(p.rt.download::<i32>(&t[0]).unwrap(), vec![16]);
        assert_eq!(p.pg.num_cached_communicators(), 1);
    })
    .await;
}
