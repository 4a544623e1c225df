use std::sync::Arc;
use std::thread;

use legion_thermald::ec::sim::SimulatedEc;
use legion_thermald::ec::{names, EcOp, EcTimings, EcTransport, PortPair, RegisterIo, RegisterMap};
use legion_thermald::telemetry::{SensorSnapshot, ThermalHistory, HISTORY_CAPACITY};

fn transport() -> (SimulatedEc, EcTransport) {
    let sim = SimulatedEc::new(PortPair::default());
    let ec = EcTransport::spawn(
        Box::new(sim.clone()),
        PortPair::default(),
        RegisterMap::legion_gen9(),
        EcTimings::default(),
    )
    .unwrap();
    (sim, ec)
}

#[test]
fn batch_with_unmapped_address_touches_no_ports() {
    let (sim, ec) = transport();
    let err = ec
        .execute(vec![EcOp::Read(0xE0), EcOp::Write(0x10, 1)])
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidRegister");
    assert_eq!(sim.port_accesses(), 0);
    assert!(sim.write_log().is_empty());
}

#[test]
fn named_access_round_trips_through_the_worker() {
    let (sim, ec) = transport();
    ec.write_named(names::CPU_PL1, 42).unwrap();
    assert_eq!(sim.register(0xC0), 42);
    assert_eq!(ec.read_named(names::CPU_PL1).unwrap(), 42);
    assert_eq!(ec.read_named("not_a_register").unwrap_err().kind(), "InvalidRegister");

    let stats = ec.stats();
    assert_eq!((stats.reads, stats.writes), (1, 1));
}

#[test]
fn handles_shared_across_threads_see_one_controller() {
    let (sim, ec) = transport();
    let io: Arc<dyn RegisterIo> = Arc::new(ec);
    let handles: Vec<_> = (0..4u8)
        .map(|i| {
            let io = Arc::clone(&io);
            thread::spawn(move || {
                for _ in 0..25 {
                    io.execute(vec![EcOp::Write(0xB2, i), EcOp::Write(0xB3, i)]).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let log = sim.write_log();
    assert_eq!(log.len(), 200);
    for pair in log.chunks(2) {
        assert_eq!(pair[0].0, 0xB2);
        assert_eq!(pair[1], (0xB3, pair[0].1));
    }
}

#[test]
fn history_keeps_only_the_newest_samples() {
    let history = ThermalHistory::new();
    let start = chrono::Utc::now();
    for i in 0..(HISTORY_CAPACITY + 50) {
        let at = start + chrono::Duration::seconds(i as i64);
        history.append(SensorSnapshot::with_temps((i % 100) as u8, 50, at));
    }
    assert_eq!(history.len(), HISTORY_CAPACITY);

    let all = history.snapshot();
    assert_eq!(all.front().map(|s| s.cpu_package_c), Some(50));
    assert!(all
        .iter()
        .zip(all.iter().skip(1))
        .all(|(a, b)| a.captured_at < b.captured_at));
    assert_eq!(history.recent(5).len(), 5);
}
