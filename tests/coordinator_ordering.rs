use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use sdr_loopback::{
    LoopbackError, Sample,
    capture::size_receive_buffer,
    coordinator::{Coordinator, CoordinatorSettings, CoordinatorState},
    device::{
        CompletionReport, CompletionStatus, DeviceClock, RxStreamer, StreamCmd, TimeSpec,
        TxMetadata, TxStreamer,
    },
    sequencer::TransmitBuffer,
};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Start(Option<TimeSpec>),
    Stop,
    TxCall { len: usize, md: TxMetadata },
    TxDone,
    RxCall { len: usize },
    RxDone,
}

#[derive(Default)]
struct Log(Mutex<Vec<Event>>);

impl Log {
    fn push(&self, e: Event) {
        self.0.lock().unwrap().push(e);
    }

    fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

struct FixedClock(TimeSpec);

impl DeviceClock for FixedClock {
    fn time_now(&self) -> TimeSpec {
        self.0
    }
}

struct RecordingTx {
    log: Arc<Log>,
    delay: Duration,
    status: CompletionStatus,
    panic: bool,
}

impl TxStreamer for RecordingTx {
    fn send(&self, buf: &[Sample], md: &TxMetadata, _timeout: Duration) -> CompletionReport {
        self.log.push(Event::TxCall {
            len: buf.len(),
            md: *md,
        });
        if self.panic {
            panic!("driver blew up");
        }
        std::thread::sleep(self.delay);
        self.log.push(Event::TxDone);
        if self.status == CompletionStatus::Success {
            CompletionReport::success(buf.len())
        } else {
            CompletionReport::failed(0, self.status, "scripted")
        }
    }
}

struct RecordingRx {
    log: Arc<Log>,
    delay: Duration,
    status: CompletionStatus,
    reject_start: bool,
    reject_stop: bool,
}

impl RxStreamer for RecordingRx {
    fn issue_stream_cmd(&self, cmd: StreamCmd) -> sdr_loopback::Result<()> {
        match cmd {
            StreamCmd::StartContinuous { at } => {
                if self.reject_start {
                    return Err(LoopbackError::device_command(cmd.name(), "late command"));
                }
                self.log.push(Event::Start(at));
            }
            StreamCmd::StopContinuous => {
                self.log.push(Event::Stop);
                if self.reject_stop {
                    return Err(LoopbackError::device_command(cmd.name(), "rejected"));
                }
            }
        }
        Ok(())
    }

    fn recv(&self, buf: &mut [Sample], _timeout: Duration) -> CompletionReport {
        self.log.push(Event::RxCall { len: buf.len() });
        std::thread::sleep(self.delay);
        buf.fill(Sample::new(1.0, 0.0));
        self.log.push(Event::RxDone);
        if self.status == CompletionStatus::Success {
            CompletionReport::success(buf.len())
        } else {
            CompletionReport::failed(buf.len() / 2, self.status, "scripted")
        }
    }
}

struct Rig {
    log: Arc<Log>,
    coordinator: Coordinator,
}

#[derive(Clone, Copy)]
struct Script {
    tx_delay: u64,
    rx_delay: u64,
    tx_status: CompletionStatus,
    rx_status: CompletionStatus,
    tx_panic: bool,
    reject_start: bool,
    reject_stop: bool,
    tx_rate: f64,
    timeout_slack: f64,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            tx_delay: 0,
            rx_delay: 0,
            tx_status: CompletionStatus::Success,
            rx_status: CompletionStatus::Success,
            tx_panic: false,
            reject_start: false,
            reject_stop: false,
            tx_rate: 1e6,
            timeout_slack: 0.5,
        }
    }
}

fn rig(script: Script) -> Rig {
    let log = Arc::new(Log::default());
    let tx = RecordingTx {
        log: Arc::clone(&log),
        delay: Duration::from_millis(script.tx_delay),
        status: script.tx_status,
        panic: script.tx_panic,
    };
    let rx = RecordingRx {
        log: Arc::clone(&log),
        delay: Duration::from_millis(script.rx_delay),
        status: script.rx_status,
        reject_start: script.reject_start,
        reject_stop: script.reject_stop,
    };
    let mut settings = CoordinatorSettings::new(script.tx_rate, 1e6);
    settings.timeout_slack = script.timeout_slack;
    let coordinator = Coordinator::new(
        Arc::new(FixedClock(TimeSpec::from_secs(5.0))),
        Arc::new(tx),
        Arc::new(rx),
        settings,
    )
    .unwrap();
    Rig { log, coordinator }
}

fn buffers(lead: usize) -> (TransmitBuffer, sdr_loopback::capture::ReceiveBuffer) {
    let tx = TransmitBuffer::from_samples(&vec![Sample::new(0.0, 1.0); 64], lead).unwrap();
    let rx = size_receive_buffer(lead, 64e-6, 1e6, 42).unwrap();
    (tx, rx)
}

fn position(events: &[Event], f: impl Fn(&Event) -> bool) -> usize {
    events.iter().position(f).expect("event not recorded")
}

fn count(events: &[Event], f: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|e| f(e)).count()
}

#[test]
fn test_arm_precedes_every_worker_call() {
    let mut r = rig(Script::default());
    let (tx, mut rx) = buffers(16);
    let timing = r.coordinator.arm().unwrap();
    assert_eq!(r.coordinator.state(), CoordinatorState::Armed);
    assert!((timing.trigger_time.as_secs() - 5.1).abs() < 1e-12);

    r.coordinator.stream(&tx, &mut rx).unwrap();
    let ev = r.log.events();
    assert_eq!(ev[0], Event::Start(Some(timing.trigger_time)));
    assert_eq!(count(&ev, |e| matches!(e, Event::Start(_))), 1);
    assert!(position(&ev, |e| matches!(e, Event::TxCall { .. })) > 0);
    assert!(position(&ev, |e| matches!(e, Event::RxCall { .. })) > 0);
    assert_eq!(r.coordinator.state(), CoordinatorState::Idle);
}

#[test]
fn test_stop_follows_both_joins_for_any_finish_order() {
    for (tx_delay, rx_delay) in [(0, 40), (40, 0), (0, 0), (25, 25)] {
        let mut r = rig(Script {
            tx_delay,
            rx_delay,
            ..Script::default()
        });
        let (tx, mut rx) = buffers(16);
        let report = r.coordinator.capture(&tx, &mut rx).unwrap();
        assert!(report.is_success());

        let ev = r.log.events();
        let stop = position(&ev, |e| *e == Event::Stop);
        assert_eq!(stop, ev.len() - 1, "stop not last for {tx_delay}/{rx_delay}: {ev:?}");
        assert_eq!(count(&ev, |e| *e == Event::Stop), 1);
        assert_eq!(count(&ev, |e| *e == Event::TxDone), 2);
        assert_eq!(count(&ev, |e| *e == Event::RxDone), 1);
    }
}

#[test]
fn test_lead_in_and_payload_are_sent_in_order() {
    let mut r = rig(Script::default());
    let (tx, mut rx) = buffers(16);
    let report = r.coordinator.capture(&tx, &mut rx).unwrap();
    assert_eq!(report.tx.samples, 80);
    assert_eq!(report.rx.samples, rx.len());

    let sends: Vec<(usize, TxMetadata)> = r
        .log
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::TxCall { len, md } => Some((len, md)),
            _ => None,
        })
        .collect();
    assert_eq!(sends.len(), 2);
    assert_eq!(sends[0].0, 16);
    assert_eq!(sends[0].1.time_spec, Some(report.timing.trigger_time));
    assert!(sends[0].1.start_of_burst && !sends[0].1.end_of_burst);
    assert_eq!(sends[1].0, 64);
    assert_eq!(sends[1].1.time_spec, None);
    assert!(!sends[1].1.start_of_burst && sends[1].1.end_of_burst);

    let ev = r.log.events();
    let first_done = position(&ev, |e| *e == Event::TxDone);
    let second_call = ev
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, Event::TxCall { .. }))
        .nth(1)
        .map(|(i, _)| i)
        .unwrap();
    assert!(first_done < second_call);
}

#[test]
fn test_no_lead_is_a_single_timed_burst() {
    let mut r = rig(Script::default());
    let (tx, mut rx) = buffers(0);
    r.coordinator.capture(&tx, &mut rx).unwrap();
    let ev = r.log.events();
    assert_eq!(count(&ev, |e| matches!(e, Event::TxCall { .. })), 1);
    match ev.iter().find(|e| matches!(e, Event::TxCall { .. })) {
        Some(Event::TxCall { len, md }) => {
            assert_eq!(*len, 64);
            assert!(md.time_spec.is_some() && md.start_of_burst && md.end_of_burst);
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_rx_timeout_is_reported_and_stop_still_issued() {
    let mut r = rig(Script {
        rx_status: CompletionStatus::Timeout,
        rx_delay: 10,
        ..Script::default()
    });
    let (tx, mut rx) = buffers(16);
    r.coordinator.arm().unwrap();
    let report = r.coordinator.stream(&tx, &mut rx).unwrap();
    assert_eq!(report.tx.status, CompletionStatus::Success);
    assert_eq!(report.rx.status, CompletionStatus::Timeout);
    assert_eq!(count(&r.log.events(), |e| *e == Event::Stop), 1);

    match report.into_result() {
        Err(LoopbackError::StreamCompletion { tx, rx }) => {
            assert!(tx.is_success());
            assert_eq!(rx.status, CompletionStatus::Timeout);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_capture_surfaces_both_reports() {
    let mut r = rig(Script {
        tx_status: CompletionStatus::Underrun,
        rx_status: CompletionStatus::Overrun,
        ..Script::default()
    });
    let (tx, mut rx) = buffers(16);
    let err = r.coordinator.capture(&tx, &mut rx).unwrap_err();
    match err {
        LoopbackError::StreamCompletion { tx, rx } => {
            assert_eq!(tx.status, CompletionStatus::Underrun);
            assert_eq!(rx.status, CompletionStatus::Overrun);
        }
        other => panic!("unexpected {other:?}"),
    }
    let ev = r.log.events();
    // a failed lead-in ends the transmit worker
    assert_eq!(count(&ev, |e| matches!(e, Event::TxCall { .. })), 1);
    assert_eq!(count(&ev, |e| *e == Event::Stop), 1);
    assert_eq!(*ev.last().unwrap(), Event::Stop);
}

#[test]
fn test_panicking_worker_still_gets_stopped() {
    let mut r = rig(Script {
        tx_panic: true,
        rx_delay: 10,
        ..Script::default()
    });
    let (tx, mut rx) = buffers(16);
    r.coordinator.arm().unwrap();
    let report = r.coordinator.stream(&tx, &mut rx).unwrap();
    assert_eq!(report.tx.status, CompletionStatus::Error);
    assert!(report.rx.is_success());
    let ev = r.log.events();
    assert_eq!(*ev.last().unwrap(), Event::Stop);
    assert_eq!(count(&ev, |e| *e == Event::Stop), 1);
}

#[test]
fn test_rejected_arm_launches_nothing() {
    let mut r = rig(Script {
        reject_start: true,
        ..Script::default()
    });
    let (tx, mut rx) = buffers(16);
    assert!(matches!(
        r.coordinator.capture(&tx, &mut rx),
        Err(LoopbackError::DeviceCommand { .. })
    ));
    assert_eq!(r.coordinator.state(), CoordinatorState::Idle);
    assert!(r.log.events().is_empty());
}

#[test]
fn test_out_of_order_calls_are_rejected() {
    let mut r = rig(Script::default());
    let (tx, mut rx) = buffers(16);
    assert!(matches!(
        r.coordinator.stream(&tx, &mut rx),
        Err(LoopbackError::InvalidState {
            expected: CoordinatorState::Armed,
            actual: CoordinatorState::Idle
        })
    ));
    r.coordinator.arm().unwrap();
    assert!(matches!(
        r.coordinator.arm(),
        Err(LoopbackError::InvalidState { .. })
    ));
    assert!(r.log.events().iter().all(|e| matches!(e, Event::Start(_))));
}

#[test]
fn test_receive_buffer_is_filled_by_the_worker() {
    let mut r = rig(Script::default());
    let (tx, mut rx) = buffers(16);
    r.coordinator.capture(&tx, &mut rx).unwrap();
    assert!(rx.as_slice().iter().all(|s| *s == Sample::new(1.0, 0.0)));
    assert_eq!(rx.useful().len(), rx.len() - 16 - 42);
}

#[test]
fn test_rejected_stop_keeps_both_reports() {
    let mut r = rig(Script {
        tx_status: CompletionStatus::Underrun,
        rx_status: CompletionStatus::Timeout,
        reject_stop: true,
        ..Script::default()
    });
    let (tx, mut rx) = buffers(16);
    r.coordinator.arm().unwrap();
    match r.coordinator.stream(&tx, &mut rx) {
        Err(LoopbackError::StopFailed { reason, report }) => {
            assert!(reason.contains("rejected"));
            assert_eq!(report.tx.status, CompletionStatus::Underrun);
            assert_eq!(report.rx.status, CompletionStatus::Timeout);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(r.coordinator.state(), CoordinatorState::Idle);
    assert_eq!(*r.log.events().last().unwrap(), Event::Stop);

    // a clean run whose stop is rejected still hands back its reports
    let mut r = rig(Script {
        reject_stop: true,
        ..Script::default()
    });
    match r.coordinator.capture(&tx, &mut rx) {
        Err(LoopbackError::StopFailed { report, .. }) => assert!(report.is_success()),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_bad_timeout_slack_is_rejected_up_front() {
    for slack in [-1.0, f64::NAN, f64::INFINITY] {
        let log = Arc::new(Log::default());
        let tx = RecordingTx {
            log: Arc::clone(&log),
            delay: Duration::ZERO,
            status: CompletionStatus::Success,
            panic: false,
        };
        let rx = RecordingRx {
            log: Arc::clone(&log),
            delay: Duration::ZERO,
            status: CompletionStatus::Success,
            reject_start: false,
            reject_stop: false,
        };
        let mut settings = CoordinatorSettings::new(1e6, 1e6);
        settings.timeout_slack = slack;
        let built = Coordinator::new(
            Arc::new(FixedClock(TimeSpec::from_secs(5.0))),
            Arc::new(tx),
            Arc::new(rx),
            settings,
        );
        assert!(matches!(built, Err(LoopbackError::InvalidConfig(_))), "slack {slack}");
        assert!(log.events().is_empty());
    }
}

#[test]
fn test_unrepresentable_timeout_stops_the_armed_stream() {
    let mut r = rig(Script {
        tx_rate: 1e-300,
        ..Script::default()
    });
    let (tx, mut rx) = buffers(16);
    r.coordinator.arm().unwrap();
    assert!(matches!(
        r.coordinator.stream(&tx, &mut rx),
        Err(LoopbackError::InvalidConfig(_))
    ));
    assert_eq!(r.coordinator.state(), CoordinatorState::Idle);
    let ev = r.log.events();
    assert_eq!(ev.len(), 2);
    assert!(matches!(ev[0], Event::Start(Some(_))));
    assert_eq!(ev[1], Event::Stop);
}
