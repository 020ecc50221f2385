use fleetmap::config::PipelineConfig;
use fleetmap::domain::feature::Feature;
use fleetmap::domain::messages::{ProcessRequest, Stats, WorkerResponse};
use fleetmap::domain::position::{Device, DeviceStatus, DeviceTable, Position, ViewportBounds};
use fleetmap::services::{ChangeLedger, ProcessingContext};
use std::collections::HashSet;
use std::sync::Arc;

fn fleet(count: i64) -> (Vec<Position>, DeviceTable) {
    let positions = (0..count)
        .map(|i| {
            Position::new(
                100_000 + i,
                i,
                48.0 + (i % 100) as f64 * 0.01,
                2.0 + (i / 100) as f64 * 0.01,
            )
            .with_course((i % 360) as f64)
        })
        .collect();
    let devices = (0..count)
        .map(|i| {
            let status = if i % 2 == 0 {
                DeviceStatus::Online
            } else {
                DeviceStatus::Offline
            };
            (i, Device::new(i, format!("Vehicle {}", i)).with_category("car").with_status(status))
        })
        .collect();
    (positions, devices)
}

fn all_features(responses: &[WorkerResponse]) -> Vec<Arc<Feature>> {
    responses
        .iter()
        .flat_map(|response| match response {
            WorkerResponse::FeaturesReady { features, .. }
            | WorkerResponse::FeaturesChunk { features, .. } => features.clone(),
            _ => Vec::new(),
        })
        .collect()
}

/// Run a request to completion, draining every chunk.
fn run_to_end(context: &mut ProcessingContext, request_id: u64, request: ProcessRequest) -> Vec<WorkerResponse> {
    let mut responses = context.process(request_id, request).unwrap();
    while let Some(step) = context.run_due_chunk() {
        responses.extend(step.result.unwrap());
    }
    responses
}

#[test]
fn test_selected_device_never_emitted() {
    let (positions, devices) = fleet(800);
    let mut context = ProcessingContext::default();

    for selected in [0, 1, 250, 799] {
        let mut request = ProcessRequest::new(positions.clone(), devices.clone(), 5);
        request.selected_device_id = Some(selected);
        request.selected_position_id = Some(100_000 + selected);

        let features = all_features(&run_to_end(&mut context, selected as u64, request));
        assert_eq!(features.len(), 799);
        assert!(features.iter().all(|f| f.device_id() != selected));
        assert!(!context.cache().contains_device(selected));
    }
}

#[test]
fn test_positions_without_device_are_skipped() {
    let (mut positions, devices) = fleet(5);
    positions.push(Position::new(1, 9_999, 10.0, 10.0));
    let mut context = ProcessingContext::default();

    let responses = context
        .process(1, ProcessRequest::new(positions, devices, 5))
        .unwrap();
    let features = all_features(&responses);

    assert_eq!(features.len(), 5);
    assert!(features.iter().all(|f| f.device_id() != 9_999));
}

#[test]
fn test_same_snapshot_twice_reuses_cached_features() {
    let (positions, devices) = fleet(50);
    let mut context = ProcessingContext::default();

    let first = context
        .process(1, ProcessRequest::new(positions.clone(), devices.clone(), 5))
        .unwrap();
    let second = context
        .process(2, ProcessRequest::new(positions, devices, 5))
        .unwrap();

    assert_eq!(second[0].stats().unwrap().changed, Some(0));
    let (first, second) = (all_features(&first), all_features(&second));
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert!(Arc::ptr_eq(a, b));
    }
}

#[test]
fn test_clear_rebuilds_everything() {
    let (positions, devices) = fleet(50);
    let mut context = ProcessingContext::default();

    let first = all_features(
        &context
            .process(1, ProcessRequest::new(positions.clone(), devices.clone(), 5))
            .unwrap(),
    );

    context.clear();
    assert!(context.cache().is_empty());
    assert!(context.ledger().is_empty());

    let responses = context
        .process(2, ProcessRequest::new(positions, devices, 5))
        .unwrap();
    assert_eq!(responses[0].stats().unwrap().changed, Some(50));

    let second = all_features(&responses);
    for (a, b) in first.iter().zip(&second) {
        assert!(!Arc::ptr_eq(a, b));
        assert_eq!(a, b);
    }
}

#[test]
fn test_eviction_leaves_only_current_devices() {
    let mut context = ProcessingContext::new(&PipelineConfig {
        chunk_size: 5_000,
        ..Default::default()
    });

    let (positions, devices) = fleet(3_000);
    context
        .process(1, ProcessRequest::new(positions[..2_000].to_vec(), devices.clone(), 5))
        .unwrap();
    assert_eq!(context.cache().len(), 2_000);

    let current = positions[1_500..].to_vec();
    let mut request = ProcessRequest::new(current, devices, 5);
    request.selected_device_id = Some(2_000);
    context.process(2, request).unwrap();

    let remaining = context.cache().device_ids();
    assert_eq!(remaining.len(), 1_499);
    assert!(remaining.iter().all(|id| (1_500..3_000).contains(id) && *id != 2_000));
}

#[test]
fn test_chunked_eviction_keeps_features_from_earlier_chunks() {
    let (positions, devices) = fleet(4_000);
    let mut context = ProcessingContext::default();

    run_to_end(
        &mut context,
        1,
        ProcessRequest::new(positions[..2_000].to_vec(), devices.clone(), 5),
    );
    assert_eq!(context.cache().len(), 2_000);

    // 3000 devices over six chunks; the cache passes the threshold twice.
    let current = positions[1_000..].to_vec();
    let second = all_features(&run_to_end(
        &mut context,
        2,
        ProcessRequest::new(current.clone(), devices.clone(), 5),
    ));
    assert_eq!(second.len(), 3_000);

    let cached = context.cache().device_ids();
    assert_eq!(context.cache().len(), 3_000);
    assert_eq!(cached.iter().min(), Some(&1_000));
    assert_eq!(cached.iter().max(), Some(&3_999));

    let third = all_features(&run_to_end(
        &mut context,
        3,
        ProcessRequest::new(current, devices, 5),
    ));
    assert_eq!(third.len(), 3_000);
    for (a, b) in second.iter().zip(&third) {
        assert!(Arc::ptr_eq(a, b));
    }
}

#[test]
fn test_chunk_order_puts_viewport_first() {
    let (mut positions, devices) = fleet(1_200);
    // Scatter so the 300 visible devices are interleaved with the rest.
    for (index, position) in positions.iter_mut().enumerate() {
        if index % 4 == 0 {
            position.latitude = 10.0;
            position.longitude = 10.0;
        } else {
            position.latitude = -40.0;
            position.longitude = -40.0;
        }
    }
    let mut request = ProcessRequest::new(positions, devices, 5);
    request.bounds = Some(ViewportBounds::new(11.0, 9.0, 11.0, 9.0));

    let mut context = ProcessingContext::default();
    let responses = run_to_end(&mut context, 1, request);

    let chunks: Vec<(usize, bool, bool)> = responses
        .iter()
        .filter_map(|r| match r {
            WorkerResponse::FeaturesChunk {
                features,
                is_first_chunk,
                is_viewport,
                ..
            } => Some((features.len(), *is_first_chunk, *is_viewport)),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec![(500, true, false), (500, false, false), (200, false, false)]);

    let ordered = all_features(&responses);
    assert!(ordered[..300].iter().all(|f| f.device_id() % 4 == 0));
    assert!(ordered[300..].iter().all(|f| f.device_id() % 4 != 0));

    let processed: Vec<Option<usize>> = responses.iter().map(|r| r.stats().unwrap().processed).collect();
    assert_eq!(processed, vec![Some(500), Some(1_000), Some(1_200), Some(1_200)]);
}

#[test]
fn test_small_moves_below_precision_are_not_changes() {
    let mut ledger = ChangeLedger::new();

    let first = ledger
        .detect_changes(&[Position::new(1, 7, 12.34565, 56.78901)], 4)
        .unwrap();
    let second = ledger
        .detect_changes(&[Position::new(2, 7, 12.34567, 56.78903)], 4)
        .unwrap();

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
}

#[test]
fn test_six_hundred_positions_stream_two_chunks() {
    let (positions, devices) = fleet(600);
    let mut context = ProcessingContext::default();

    let responses = run_to_end(&mut context, 1, ProcessRequest::new(positions, devices, 5));

    assert_eq!(responses.len(), 3);
    assert!(matches!(responses[0], WorkerResponse::FeaturesChunk { progress: 83, .. }));
    assert!(matches!(responses[1], WorkerResponse::FeaturesChunk { progress: 100, .. }));
    assert!(matches!(
        responses[2],
        WorkerResponse::ProcessingComplete {
            stats: Stats {
                total: 600,
                processed: Some(600),
                ..
            }
        }
    ));
    assert!(!responses
        .iter()
        .any(|r| matches!(r, WorkerResponse::FeaturesReady { .. })));
}

#[test]
fn test_ten_positions_are_ready_at_once() {
    let (positions, devices) = fleet(10);
    let mut context = ProcessingContext::default();

    let responses = run_to_end(&mut context, 1, ProcessRequest::new(positions, devices, 5));

    assert_eq!(responses.len(), 1);
    assert!(matches!(responses[0], WorkerResponse::FeaturesReady { .. }));
}

#[test]
fn test_invalid_coordinate_fails_cycle_without_poisoning_next() {
    let (mut positions, devices) = fleet(20);
    let mut context = ProcessingContext::default();
    context
        .process(1, ProcessRequest::new(positions.clone(), devices.clone(), 5))
        .unwrap();

    positions[10].latitude = f64::NAN;
    assert!(context
        .process(2, ProcessRequest::new(positions.clone(), devices.clone(), 5))
        .is_err());

    positions[10].latitude = 48.1;
    let responses = context
        .process(3, ProcessRequest::new(positions, devices, 5))
        .unwrap();
    let features = all_features(&responses);
    assert_eq!(features.len(), 20);

    let ids: HashSet<i64> = features.iter().map(|f| f.device_id()).collect();
    assert_eq!(ids.len(), 20);
}
