use std::time::Duration;

use procgroup::{AllreduceOptions, ReduceOp};

use super::helpers::run_ranks;

const ROUNDS: usize = 8;

#[tokio::test]
async fn test_two_keys_issued_concurrently_do_not_deadlock() {
    let outcome = tokio::time::timeout(
        Duration::from_secs(20),
        run_ranks(2, 2, |p| async move {
            // Create both bundles in the same order on every process.
            let warm = [p.rt.tensor(0, &[0i32]).unwrap()];
            p.pg.allreduce(&warm, AllreduceOptions::default()).await.unwrap().wait().unwrap();
            let warm = [p.rt.tensor(1, &[0i32]).unwrap()];
            p.pg.allreduce(&warm, AllreduceOptions::default()).await.unwrap().wait().unwrap();

            let pg = &p.pg;
            let rt = &p.rt;
            std::thread::scope(|s| {
                let issuers: Vec<_> = (0..2usize)
                    .map(|device| {
                        s.spawn(move || {
                            let local = tokio::runtime::Builder::new_current_thread()
                                .enable_all()
                                .build()
                                .unwrap();
                            local.block_on(async {
                                let t = [rt.tensor(device, &[1i64]).unwrap()];
                                let opts = AllreduceOptions {
                                    reduce_op: ReduceOp::Sum,
                                };
                                for _ in 0..ROUNDS {
                                    pg.allreduce(&t, opts).await.unwrap().wait().unwrap();
                                }
                                rt.download::<i64>(&t[0]).unwrap()[0]
                            })
                        })
                    })
                    .collect();
                issuers
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .collect::<Vec<_>>()
            })
        }),
    )
    .await
    .expect("concurrent issuance deadlocked");

    // Two processes double the value every round.
    let expected = 1i64 << ROUNDS;
    for per_rank in outcome {
        assert_eq!(per_rank, vec![expected, expected]);
    }
}
