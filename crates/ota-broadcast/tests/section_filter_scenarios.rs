// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Section filter lifecycle, delivery gate and threaded retrieval

mod common;

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{filter_with, FailingBackend, IdleBackend};
use ota_broadcast::{
    build_private_section, FilterParams, FilterState, PersonalityError, ProducerModel,
    SectionFilter, SectionFilterError, TableIdMatch,
};
use ota_state_manager::AgentStateManager;

fn running_filter(queue_depth: usize) -> (SectionFilter, Arc<AgentStateManager>, IdleBackend) {
    let backend = IdleBackend::default();
    let (mut filter, agent, _stats) = filter_with(Box::new(backend.clone()), queue_depth);
    filter.create().unwrap();
    filter
        .open(FilterParams::new(0x41, TableIdMatch::Exact(0x42)))
        .unwrap();
    (filter, agent, backend)
}

#[test]
fn test_matching_section_is_retrieved() {
    let (mut filter, _agent, _backend) = running_filter(8);
    let section = build_private_section(0x42, 1, b"payload").unwrap();

    filter.deliver(&section).unwrap();
    let received = filter.get_section(Duration::from_millis(1_000)).unwrap();
    assert_eq!(received.table_id(), 0x42);
    assert_eq!(&*received, section.as_slice());
    drop(received);

    let diagnostics = filter.diagnostics();
    assert_eq!(diagnostics.delivered, 1);
    assert_eq!(diagnostics.discarded, 0);
    assert_eq!(diagnostics.queued, 0);
}

#[test]
fn test_mismatched_table_id_is_discarded() {
    let (mut filter, _agent, _backend) = running_filter(8);
    let section = build_private_section(0x43, 1, b"payload").unwrap();

    let err = filter.deliver(&section).unwrap_err();
    assert!(matches!(
        err,
        SectionFilterError::FilterMismatch {
            field: "table_id",
            expected: 0x42,
            found: 0x43
        }
    ));
    assert!(err.is_recoverable());

    let err = filter.get_section(Duration::from_millis(100)).unwrap_err();
    assert!(matches!(err, SectionFilterError::Timeout));
    assert_eq!(filter.diagnostics().discarded, 1);
}

#[test]
fn test_overflow_counts_and_high_water() {
    let (filter, _agent, _backend) = running_filter(4);
    let section = build_private_section(0x42, 1, b"x").unwrap();

    for _ in 0..4 {
        filter.deliver(&section).unwrap();
    }
    let err = filter.deliver(&section).unwrap_err();
    assert!(matches!(err, SectionFilterError::Overflow));

    assert_eq!(filter.take_overflow_count(), 1);
    assert_eq!(filter.take_overflow_count(), 0);
    assert_eq!(filter.peek_high_water_mark(), 4);

    filter.clear_high_water_mark();
    assert_eq!(filter.peek_high_water_mark(), 0);
}

#[test]
fn test_open_while_running_is_rejected() {
    let (mut filter, _agent, backend) = running_filter(8);

    let err = filter
        .open(FilterParams::new(0x41, TableIdMatch::Any))
        .unwrap_err();
    assert!(matches!(
        err,
        SectionFilterError::StateMismatch {
            expected: FilterState::Stopped,
            actual: FilterState::Running,
            ..
        }
    ));
    assert_eq!(filter.state(), FilterState::Running);
    assert_eq!(
        filter.params().map(|p| p.table_id),
        Some(TableIdMatch::Exact(0x42))
    );
    assert_eq!(backend.calls(), vec!["create", "open"]);
}

#[test]
fn test_abort_before_wait_returns_promptly() {
    let (mut filter, agent, _backend) = running_filter(8);
    agent.abort().unwrap();

    let start = Instant::now();
    let err = filter.get_section(Duration::from_millis(5_000)).unwrap_err();
    assert!(matches!(err, SectionFilterError::Abort));
    assert!(start.elapsed() < Duration::from_millis(1_000));
}

#[test]
fn test_abort_during_wait_wakes_consumer() {
    let (mut filter, agent, _backend) = running_filter(8);
    let aborter = agent.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        aborter.abort().unwrap();
    });

    let start = Instant::now();
    let err = filter.get_section(Duration::from_millis(5_000)).unwrap_err();
    assert!(matches!(err, SectionFilterError::Abort));
    assert!(start.elapsed() < Duration::from_millis(2_000));
    handle.join().unwrap();
}

#[test]
fn test_abort_wins_over_queued_section() {
    let (mut filter, agent, _backend) = running_filter(8);
    filter
        .deliver(&build_private_section(0x42, 1, b"x").unwrap())
        .unwrap();
    agent.abort().unwrap();

    let err = filter.get_section(Duration::from_millis(100)).unwrap_err();
    assert!(matches!(err, SectionFilterError::Abort));

    // Once the abort clears the queued section is still there
    agent.clear_abort().unwrap();
    assert!(filter.get_section(Duration::from_millis(100)).is_ok());
}

#[test]
fn test_lifecycle_order_is_enforced() {
    let backend = IdleBackend::default();
    let (mut filter, _agent, _stats) = filter_with(Box::new(backend.clone()), 8);
    let params = FilterParams::new(0x41, TableIdMatch::Any);

    assert_eq!(filter.state(), FilterState::Unknown);
    assert!(matches!(
        filter.open(params),
        Err(SectionFilterError::StateMismatch { .. })
    ));
    assert!(matches!(
        filter.get_section(Duration::ZERO),
        Err(SectionFilterError::StateMismatch { .. })
    ));

    filter.create().unwrap();
    assert_eq!(filter.state(), FilterState::Stopped);
    assert_eq!(filter.producer_model(), Some(ProducerModel::Threaded));
    assert!(matches!(
        filter.create(),
        Err(SectionFilterError::StateMismatch { .. })
    ));
    assert!(matches!(
        filter.close(),
        Err(SectionFilterError::StateMismatch { .. })
    ));

    filter.open(params).unwrap();
    assert!(matches!(
        filter.destroy(),
        Err(SectionFilterError::StateMismatch { .. })
    ));

    filter.close().unwrap();
    assert_eq!(filter.state(), FilterState::Stopped);
    assert!(filter.params().is_none());

    filter.destroy().unwrap();
    assert_eq!(filter.state(), FilterState::Unknown);
    assert_eq!(backend.calls(), vec!["create", "open", "close", "destroy"]);
}

#[test]
fn test_delivery_outside_running_is_discarded() {
    let backend = IdleBackend::default();
    let (mut filter, _agent, stats) = filter_with(Box::new(backend.clone()), 8);
    let section = build_private_section(0x42, 1, b"x").unwrap();

    assert!(matches!(
        filter.deliver(&section),
        Err(SectionFilterError::StateMismatch { .. })
    ));

    filter.create().unwrap();
    let sink = backend.sink.lock().clone().unwrap();
    assert!(!sink.is_running());
    assert!(matches!(
        sink.deliver(&section),
        Err(SectionFilterError::StateMismatch { .. })
    ));
    assert_eq!(filter.diagnostics().discarded, 1);
    assert_eq!(stats.sections_discarded(), 2);
}

#[test]
fn test_reopen_starts_with_empty_queue() {
    let (mut filter, _agent, _backend) = running_filter(8);
    let section = build_private_section(0x42, 1, b"x").unwrap();
    filter.deliver(&section).unwrap();
    filter.deliver(&section).unwrap();

    filter.close().unwrap();
    filter
        .open(FilterParams::new(0x41, TableIdMatch::Exact(0x42)))
        .unwrap();
    assert_eq!(filter.diagnostics().queued, 0);
    assert!(matches!(
        filter.get_section(Duration::from_millis(20)),
        Err(SectionFilterError::Timeout)
    ));
}

#[test]
fn test_backend_open_failure_reverts_to_stopped() {
    let backend = FailingBackend::default();
    let (mut filter, _agent, _stats) = filter_with(Box::new(backend.clone()), 8);
    filter.create().unwrap();
    let params = FilterParams::new(0x41, TableIdMatch::Exact(0x42));

    // Delivered while the failing open is in progress
    let early = build_private_section(0x42, 1, b"early").unwrap();
    backend.on_open.lock().push(early);
    backend.fail_open.store(true, Ordering::SeqCst);

    let err = filter.open(params).unwrap_err();
    assert!(matches!(
        err,
        SectionFilterError::BackendError(PersonalityError::HardwareUnavailable(_))
    ));
    assert!(err.is_fatal());
    assert_eq!(filter.state(), FilterState::Stopped);
    assert!(filter.params().is_none());
    assert!(matches!(
        filter.get_section(Duration::from_millis(20)),
        Err(SectionFilterError::StateMismatch {
            actual: FilterState::Stopped,
            ..
        })
    ));

    let fresh = build_private_section(0x42, 2, b"fresh").unwrap();
    backend.fail_open.store(false, Ordering::SeqCst);
    *backend.on_open.lock() = vec![fresh.clone()];

    filter.open(params).unwrap();
    assert_eq!(filter.state(), FilterState::Running);
    assert_eq!(filter.diagnostics().queued, 1);

    let received = filter.get_section(Duration::from_millis(1_000)).unwrap();
    assert_eq!(&*received, fresh.as_slice());
    drop(received);
    assert!(matches!(
        filter.get_section(Duration::from_millis(50)),
        Err(SectionFilterError::Timeout)
    ));
}

#[test]
fn test_backend_close_failure_still_stops() {
    let backend = FailingBackend::default();
    let (mut filter, _agent, _stats) = filter_with(Box::new(backend.clone()), 8);
    filter.create().unwrap();
    filter
        .open(FilterParams::new(0x41, TableIdMatch::Exact(0x42)))
        .unwrap();
    backend.fail_close.store(true, Ordering::SeqCst);

    let err = filter.close().unwrap_err();
    assert!(matches!(
        err,
        SectionFilterError::BackendError(PersonalityError::StillRunning { .. })
    ));
    assert_eq!(filter.state(), FilterState::Stopped);
    assert!(filter.params().is_none());

    filter.destroy().unwrap();
    assert_eq!(filter.state(), FilterState::Unknown);
    assert!(backend.sink.lock().is_none());
}

#[test]
fn test_reopen_never_serves_sections_from_earlier_open() {
    let (mut filter, _agent, _backend) = running_filter(4);
    let sink = filter.sink().unwrap();
    let generation = Arc::new(AtomicU16::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let producer = {
        let generation = generation.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let tag = generation.load(Ordering::SeqCst);
                let section = build_private_section(0x42, tag, b"tagged").unwrap();
                let _ = sink.deliver(&section);
            }
        })
    };

    // Each open only accepts its own tag, so any other tag was queued by an earlier open
    for tag in 1..=200u16 {
        filter.close().unwrap();
        generation.store(tag, Ordering::SeqCst);
        filter
            .open(FilterParams::new(0x41, TableIdMatch::Exact(0x42)).with_table_id_ext(tag))
            .unwrap();
        for _ in 0..2 {
            match filter.get_section(Duration::from_millis(20)) {
                Ok(section) => assert_eq!(u16::from_be_bytes([section[3], section[4]]), tag),
                Err(SectionFilterError::Timeout) => {}
                Err(e) => panic!("unexpected retrieval error: {e}"),
            }
        }
    }

    stop.store(true, Ordering::SeqCst);
    producer.join().unwrap();
}

#[test]
fn test_gate_rejects_bad_payloads() {
    let (filter, _agent, _backend) = running_filter(8);

    assert!(matches!(
        filter.deliver(&[]),
        Err(SectionFilterError::InvalidInput(_))
    ));
    assert!(matches!(
        filter.deliver(&vec![0x42u8; 5_000]),
        Err(SectionFilterError::InvalidInput(_))
    ));

    let mut corrupted = build_private_section(0x42, 1, b"payload").unwrap();
    corrupted[8] ^= 0x01;
    assert!(matches!(
        filter.deliver(&corrupted),
        Err(SectionFilterError::ChecksumError { table_id: 0x42, .. })
    ));
    assert_eq!(filter.diagnostics().discarded, 3);
}

#[test]
fn test_table_id_extension_filter() {
    let backend = IdleBackend::default();
    let (mut filter, _agent, _stats) = filter_with(Box::new(backend), 8);
    filter.create().unwrap();
    filter
        .open(FilterParams::new(0x41, TableIdMatch::Any).with_table_id_ext(0x0002))
        .unwrap();

    assert!(matches!(
        filter.deliver(&build_private_section(0x3C, 0x0003, b"x").unwrap()),
        Err(SectionFilterError::FilterMismatch {
            field: "table_id_ext",
            ..
        })
    ));
    filter
        .deliver(&build_private_section(0x3C, 0x0002, b"x").unwrap())
        .unwrap();
}

#[test]
fn test_zero_timeout_boundary() {
    let (mut filter, _agent, _backend) = running_filter(8);
    assert!(matches!(
        filter.get_section(Duration::ZERO),
        Err(SectionFilterError::Timeout)
    ));

    filter
        .deliver(&build_private_section(0x42, 1, b"x").unwrap())
        .unwrap();
    assert!(filter.get_section(Duration::ZERO).is_ok());
}

#[test]
fn test_virtual_open_skips_backend() {
    let backend = IdleBackend::default();
    let (mut filter, _agent, _stats) = filter_with(Box::new(backend.clone()), 8);
    filter.create().unwrap();
    filter
        .open_virtual(FilterParams::new(0x41, TableIdMatch::Any))
        .unwrap();

    let sink = filter.sink().unwrap();
    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        sink.deliver(&build_private_section(0x3B, 9, b"replay").unwrap())
    });

    let section = filter.get_section(Duration::from_millis(2_000)).unwrap();
    assert_eq!(section.table_id(), 0x3B);
    drop(section);
    producer.join().unwrap().unwrap();

    filter.close().unwrap();
    assert_eq!(backend.calls(), vec!["create"]);
}

#[test]
fn test_producer_thread_delivers_across_threads() {
    let (mut filter, _agent, _backend) = running_filter(4);
    let sink = filter.sink().unwrap();
    let producer = thread::spawn(move || {
        let mut accepted = 0;
        while accepted < 20 {
            let section = build_private_section(0x42, accepted as u16, b"burst").unwrap();
            match sink.deliver(&section) {
                Ok(()) => accepted += 1,
                Err(SectionFilterError::Overflow) => thread::sleep(Duration::from_millis(1)),
                Err(e) => panic!("unexpected delivery error: {e}"),
            }
        }
    });

    let mut extensions = Vec::new();
    while extensions.len() < 20 {
        let section = filter.get_section(Duration::from_millis(2_000)).unwrap();
        extensions.push(u16::from_be_bytes([section[3], section[4]]));
    }
    producer.join().unwrap();

    assert_eq!(extensions, (0..20).collect::<Vec<u16>>());
    assert!(filter.peek_high_water_mark() <= 4);
}

#[test]
fn test_diagnostics_serialize() {
    let (filter, _agent, _backend) = running_filter(8);
    filter
        .deliver(&build_private_section(0x42, 1, b"x").unwrap())
        .unwrap();

    let json = serde_json::to_value(filter.diagnostics()).unwrap();
    assert_eq!(json["state"], "Running");
    assert_eq!(json["delivered"], 1);
    assert_eq!(json["queued"], 1);
    assert_eq!(json["capacity"], 8);
}
