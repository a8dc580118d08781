use procgroup::ProcessGroupError;
use procgroup::types::ScalarType;

use super::helpers::run_ranks;

#[tokio::test]
async fn test_allgather_global_rank_order() {
    run_ranks(2, 2, |p| async move {
        let inputs: Vec<_> = (0..2)
            .map(|i| {
                let g = p.rank as i32 * 2 + i as i32;
                p.rt.tensor(i, &[g * 10, g * 10 + 1]).unwrap()
            })
            .collect();
        let world_size = p.size as usize * inputs.len();
        let outputs: Vec<_> = (0..2)
            .map(|i| p.rt.alloc(i, ScalarType::I32, 2 * world_size).unwrap())
            .collect();

        let work = p.pg.allgather(&outputs, &inputs).await.unwrap();
        work.wait().unwrap();

        for out in &outputs {
            assert_eq!(
                p.rt.download::<i32>(out).unwrap(),
                vec![0, 1, 10, 11, 20, 21, 30, 31],
                "rank {} allgather failed",
                p.rank
            );
        }
    })
    .await;
}

#[tokio::test]
async fn test_allgather_output_size_is_validated() {
    run_ranks(2, 1, |p| async move {
        let inputs = [p.rt.tensor(0, &[1u8, 2, 3]).unwrap()];
        // Needs size * 3 elements.
        let outputs = [p.rt.alloc(0, ScalarType::U8, 3 * p.size as usize - 1).unwrap()];
        let err = p.pg.allgather(&outputs, &inputs).await.unwrap_err();
        assert!(matches!(err, ProcessGroupError::InvalidInput { .. }));
        assert_eq!(p.rt.events_recorded(), 0);
    })
    .await;
}
