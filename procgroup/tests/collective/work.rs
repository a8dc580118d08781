use std::time::Duration;

use procgroup::{AllreduceOptions, DeviceRuntime, ProcessGroupConfig, WorkState};

use super::helpers::World;

#[tokio::test]
async fn test_poll_not_complete_before_slow_compute_retires() {
    let world = World::new();
    let p = world.process(0, 1, 1);
    let compute = p.rt.current_stream(0).unwrap();
    let t = [p.rt.tensor(0, &[0i32; 4]).unwrap()];

    // A slow kernel followed by the write the collective must observe.
    p.rt.delay_stream(compute, Duration::from_millis(150)).unwrap();
    p.rt.write_on_stream(compute, &t[0], &[5i32, 6, 7, 8]).unwrap();

    let work = p.pg.allreduce(&t, AllreduceOptions::default()).await.unwrap();
    assert!(!work.poll().unwrap(), "completed while compute was still running");
    assert_eq!(work.state().unwrap(), WorkState::Issued);

    work.wait().unwrap();
    assert!(work.poll().unwrap());
    assert_eq!(work.state().unwrap(), WorkState::Completed);
    assert_eq!(p.rt.download::<i32>(&t[0]).unwrap(), vec![5, 6, 7, 8]);
}

#[tokio::test]
async fn test_work_records_one_event_per_device_after_sync() {
    let world = World::new();
    let p = world.process(0, 1, 3);
    let t: Vec<_> = (0..3).map(|d| p.rt.tensor(d, &[1u8]).unwrap()).collect();

    let before = p.rt.events_recorded();
    let work = p.pg.allreduce(&t, AllreduceOptions::default()).await.unwrap();
    // One sync event and one completion event per device.
    assert_eq!(p.rt.events_recorded() - before, 6);
    assert_eq!(work.devices(), &[0, 1, 2]);
    work.wait().unwrap();
}

#[tokio::test]
async fn test_synchronize_orders_later_compute_work() {
    let world = World::with_config(ProcessGroupConfig::default().with_blocking_wait(false));
    let p = world.process(0, 1, 1);
    let compute = p.rt.current_stream(0).unwrap();
    let t = [p.rt.tensor(0, &[1i64]).unwrap()];

    let bundle = p.pg.communicators(&[0]).await.unwrap();
    let comm_stream = bundle.streams()[0];
    let gate = p.rt.gate_stream(comm_stream).unwrap();

    let work = p.pg.allreduce(&t, AllreduceOptions::default()).await.unwrap();
    // Non-blocking wait: returns while the collective is held back.
    work.wait().unwrap();
    assert!(!work.poll().unwrap());

    // Compute work queued now must run after the collective.
    p.rt.write_on_stream(compute, &t[0], &[99i64]).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(p.rt.download::<i64>(&t[0]).unwrap(), vec![1]);

    gate.open();
    p.rt.synchronize_stream(compute).unwrap();
    assert_eq!(p.rt.download::<i64>(&t[0]).unwrap(), vec![99]);
    assert!(work.poll().unwrap());
}

#[tokio::test]
async fn test_device_fault_surfaces_from_wait() {
    let world = World::new();
    let p = world.process(0, 1, 1);
    let compute = p.rt.current_stream(0).unwrap();
    let t = [p.rt.tensor(0, &[1.0f64]).unwrap()];

    p.rt.fail_stream(compute, "illegal memory access").unwrap();
    let work = p.pg.allreduce(&t, AllreduceOptions::default()).await.unwrap();

    let err = work.wait().unwrap_err();
    assert!(err.to_string().contains("illegal memory access"));
    assert!(work.state().is_err());
}

#[tokio::test]
async fn test_dropping_work_releases_events() {
    let world = World::new();
    let p = world.process(0, 1, 2);
    let t = [p.rt.tensor(0, &[1i32]).unwrap(), p.rt.tensor(1, &[1i32]).unwrap()];

    p.pg.communicators(&[0, 1]).await.unwrap();
    let live = p.rt.live_events();
    let work = p.pg.allreduce(&t, AllreduceOptions::default()).await.unwrap();
    assert_eq!(p.rt.live_events(), live + 2);
    work.wait().unwrap();
    drop(work);
    assert_eq!(p.rt.live_events(), live);
}
