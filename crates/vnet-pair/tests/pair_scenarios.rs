use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

use vnet_pair::frame::{ipv4_header_checksum, ETHERTYPE_IPV4};
use vnet_pair::{
    build_frame, Delivery, EndpointId, EndpointPair, EndpointStats, FrameLog, PairConfig,
    TxError, Watchdog, ETH_HLEN, MIN_FRAME_LEN,
};

fn opaque_frame(src: EndpointId, len: usize, fill: u8) -> Vec<u8> {
    build_frame(src.mac(), 0x88b5, &vec![fill; len - ETH_HLEN])
}

fn ipv4_frame(src: EndpointId, saddr: [u8; 4], daddr: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&((20 + payload.len()) as u16).to_be_bytes());
    ip[8] = 64;
    ip[9] = 17;
    ip[12..16].copy_from_slice(&saddr);
    ip[16..20].copy_from_slice(&daddr);
    let csum = ipv4_header_checksum(&ip);
    ip[10..12].copy_from_slice(&csum.to_be_bytes());
    ip.extend_from_slice(payload);
    build_frame(src.mac(), ETHERTYPE_IPV4, &ip)
}

fn config(pool_size: usize, lockup_period: u64) -> PairConfig {
    PairConfig {
        pool_size,
        lockup_period,
        ..PairConfig::default()
    }
}

#[test]
fn single_transmit_is_fully_accounted_before_returning() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink_calls = calls.clone();
    let pair = EndpointPair::new(PairConfig::default(), move |id: EndpointId, frame: &[u8]| {
        sink_calls.lock().unwrap().push((id, frame.len()));
        Delivery::Accepted
    })
    .unwrap();

    let len = 98;
    pair.submit_transmit(EndpointId::A, &opaque_frame(EndpointId::A, len, 0x42))
        .unwrap();

    assert_eq!(*calls.lock().unwrap(), vec![(EndpointId::B, len)]);
    assert_eq!(
        pair.get_stats(EndpointId::B),
        EndpointStats {
            rx_packets: 1,
            rx_bytes: len as u64,
            ..EndpointStats::default()
        }
    );
    assert_eq!(
        pair.get_stats(EndpointId::A),
        EndpointStats {
            tx_packets: 1,
            tx_bytes: len as u64,
            ..EndpointStats::default()
        }
    );
    assert_eq!(pair.status(EndpointId::A).last_tx_len, len);
}

#[test]
fn receive_completion_runs_before_transmit_completion() {
    let pair_slot: Arc<OnceLock<Weak<EndpointPair>>> = Arc::new(OnceLock::new());
    let seen_tx = Arc::new(Mutex::new(Vec::new()));

    let sink_slot = pair_slot.clone();
    let sink_seen = seen_tx.clone();
    let pair = Arc::new(
        EndpointPair::new(PairConfig::default(), move |id: EndpointId, _: &[u8]| {
            if let Some(pair) = sink_slot.get().and_then(Weak::upgrade) {
                let sender = pair.get_stats(id.peer());
                sink_seen
                    .lock()
                    .unwrap()
                    .push((sender.tx_packets, sender.tx_bytes));
            }
            Delivery::Accepted
        })
        .unwrap(),
    );
    pair_slot.set(Arc::downgrade(&pair)).unwrap();

    pair.submit_transmit(EndpointId::A, &opaque_frame(EndpointId::A, 60, 0x10))
        .unwrap();
    pair.submit_transmit(EndpointId::A, &opaque_frame(EndpointId::A, 80, 0x11))
        .unwrap();

    // Each delivery sees the sender's counters from before its own transmit completed.
    assert_eq!(*seen_tx.lock().unwrap(), vec![(0, 0), (1, 60)]);
    assert_eq!(pair.get_stats(EndpointId::A).tx_packets, 2);
}

#[test]
fn short_frame_is_rejected_without_touching_stats() {
    let log = Arc::new(FrameLog::new());
    let pair = EndpointPair::with_shared_sink(PairConfig::default(), log.clone()).unwrap();

    let err = pair
        .submit_transmit(EndpointId::A, &vec![0u8; MIN_FRAME_LEN - 1])
        .unwrap_err();
    assert_eq!(
        err,
        TxError::FrameTooShort {
            len: MIN_FRAME_LEN - 1,
            min: MIN_FRAME_LEN
        }
    );
    assert!(!err.is_retryable());

    for id in EndpointId::ALL {
        assert_eq!(pair.get_stats(id), EndpointStats::default());
        assert_eq!(pair.status(id).pool_available, 8);
    }
    assert!(log.is_empty());
}

#[test]
fn oversized_frame_is_rejected() {
    let pair = EndpointPair::new(PairConfig::default(), ()).unwrap();
    pair.change_mtu(EndpointId::A, 576).unwrap();

    assert_eq!(
        pair.submit_transmit(EndpointId::A, &opaque_frame(EndpointId::A, 600, 0)),
        Err(TxError::FrameTooLong { len: 600, max: 590 })
    );
    pair.submit_transmit(EndpointId::A, &opaque_frame(EndpointId::A, 590, 0))
        .unwrap();
    assert_eq!(pair.get_stats(EndpointId::A).tx_packets, 1);
}

#[test]
fn exhausted_pool_refuses_third_transmit() {
    let pair = EndpointPair::new(config(2, 0), ()).unwrap();
    let frame = opaque_frame(EndpointId::A, 60, 1);

    pair.submit_transmit(EndpointId::A, &frame).unwrap();
    pair.submit_transmit(EndpointId::A, &frame).unwrap();
    assert!(pair.status(EndpointId::A).queue_stopped);

    let err = pair.submit_transmit(EndpointId::A, &frame).unwrap_err();
    assert_eq!(err, TxError::OutOfBuffers);
    assert!(err.is_retryable());
    assert_eq!(pair.get_stats(EndpointId::A).tx_packets, 2);
    assert_eq!(pair.get_stats(EndpointId::A).tx_errors, 0);

    // The other direction has its own pool.
    pair.submit_transmit(EndpointId::B, &opaque_frame(EndpointId::B, 60, 2))
        .unwrap();
}

#[test]
fn completing_one_frame_wakes_stopped_queue() {
    let n = 4;
    let pair = EndpointPair::new(config(n, 0), ()).unwrap();
    let frame = opaque_frame(EndpointId::B, 60, 3);

    for _ in 0..n {
        assert!(!pair.status(EndpointId::B).queue_stopped);
        pair.submit_transmit(EndpointId::B, &frame).unwrap();
    }
    assert!(pair.status(EndpointId::B).queue_stopped);
    assert_eq!(pair.status(EndpointId::A).rx_held, n);

    assert_eq!(pair.complete_rx(EndpointId::A, 1), 1);
    let status = pair.status(EndpointId::B);
    assert!(!status.queue_stopped);
    assert_eq!(status.pool_available, 1);

    pair.submit_transmit(EndpointId::B, &frame).unwrap();
}

#[test]
fn lockup_defers_completion_until_timeout() {
    let pair = EndpointPair::new(config(8, 3), ()).unwrap();
    let frame = opaque_frame(EndpointId::A, 70, 4);

    pair.submit_transmit(EndpointId::A, &frame).unwrap();
    pair.submit_transmit(EndpointId::A, &frame).unwrap();
    assert_eq!(pair.get_stats(EndpointId::A).tx_packets, 2);

    pair.submit_transmit(EndpointId::A, &frame).unwrap();
    let stats = pair.get_stats(EndpointId::A);
    assert_eq!(stats.tx_packets, 2);
    assert_eq!(stats.tx_errors, 0);
    assert!(pair.status(EndpointId::A).queue_stopped);
    // The peer still received the frame.
    assert_eq!(pair.get_stats(EndpointId::B).rx_packets, 3);

    let recovery = pair.transmit_timeout(EndpointId::A);
    assert_eq!(recovery.completed_frames, 1);
    assert_eq!(recovery.completed_bytes, 70);

    let stats = pair.get_stats(EndpointId::A);
    assert_eq!(stats.tx_errors, 1);
    assert_eq!(stats.tx_packets, 3);
    assert_eq!(stats.tx_bytes, 210);
    assert!(!pair.status(EndpointId::A).queue_stopped);
}

#[test]
fn returned_buffer_does_not_hide_pending_lockup_from_watchdog() {
    let pair = EndpointPair::new(config(3, 3), ()).unwrap();
    let frame = opaque_frame(EndpointId::A, 60, 9);
    for _ in 0..3 {
        pair.submit_transmit(EndpointId::A, &frame).unwrap();
    }
    let status = pair.status(EndpointId::A);
    assert!(status.queue_stopped);
    assert_eq!(status.deferred_completions, 1);

    // Refilling the empty pool must not wake a queue whose completion is still held back.
    assert_eq!(pair.complete_rx(EndpointId::B, 1), 1);
    let status = pair.status(EndpointId::A);
    assert_eq!(status.pool_available, 1);
    assert!(status.queue_stopped);

    let mut watchdog = Watchdog::new(Duration::from_millis(100));
    let t0 = Instant::now();
    assert!(watchdog.check(&pair, t0).is_empty());
    let recoveries = watchdog.check(&pair, t0 + Duration::from_millis(200));
    assert_eq!(recoveries.len(), 1);
    assert_eq!(recoveries[0].completed_frames, 1);

    let stats = pair.get_stats(EndpointId::A);
    assert_eq!(stats.tx_packets, 3);
    assert_eq!(stats.tx_errors, 1);
    assert!(!pair.status(EndpointId::A).queue_stopped);
}

#[test]
fn repeated_timeout_is_idempotent_apart_from_error_count() {
    let pair = EndpointPair::new(config(5, 0), ()).unwrap();
    pair.submit_transmit(EndpointId::A, &opaque_frame(EndpointId::A, 60, 5))
        .unwrap();

    let first = pair.transmit_timeout(EndpointId::A);
    assert_eq!(first.abandoned_buffers, 1);
    let after_first = pair.status(EndpointId::A);
    assert_eq!(after_first.pool_available, 5);
    assert_eq!(pair.get_stats(EndpointId::A).tx_errors, 1);

    let second = pair.transmit_timeout(EndpointId::A);
    assert_eq!(second.abandoned_buffers, 0);
    assert_eq!(second.completed_frames, 0);
    let after_second = pair.status(EndpointId::A);
    assert_eq!(after_second.pool_available, 5);
    assert!(!after_second.queue_stopped);
    assert_eq!(pair.get_stats(EndpointId::A).tx_errors, 2);
    assert_eq!(pair.get_stats(EndpointId::A).tx_packets, 1);
}

#[test]
fn buffers_abandoned_by_reset_are_not_taken_back() {
    let pair = EndpointPair::new(config(2, 0), ()).unwrap();
    let frame = opaque_frame(EndpointId::A, 60, 6);
    pair.submit_transmit(EndpointId::A, &frame).unwrap();
    pair.submit_transmit(EndpointId::A, &frame).unwrap();

    assert_eq!(pair.transmit_timeout(EndpointId::A).abandoned_buffers, 2);
    assert_eq!(pair.status(EndpointId::A).pool_epoch, 1);

    // B's upper layer finishes with the old frames; they are refused by the new pool.
    assert_eq!(pair.complete_rx(EndpointId::B, usize::MAX), 2);
    assert_eq!(pair.status(EndpointId::A).pool_available, 2);

    let report = pair.teardown();
    assert_eq!(report.missing, 0);
    assert_eq!(report.freed, 4);
}

#[test]
fn frames_queued_while_rx_disabled_are_delivered_in_order() {
    let log = Arc::new(FrameLog::new());
    let pair = EndpointPair::with_shared_sink(PairConfig::default(), log.clone()).unwrap();
    pair.set_rx_interrupts(EndpointId::B, false);

    let frames: Vec<Vec<u8>> = (0..3u8)
        .map(|i| opaque_frame(EndpointId::A, 60, i))
        .collect();
    for frame in &frames {
        pair.submit_transmit(EndpointId::A, frame).unwrap();
    }
    assert!(log.is_empty());
    assert_eq!(pair.status(EndpointId::B).rx_queued, 3);
    assert_eq!(pair.get_stats(EndpointId::A).tx_packets, 3);
    assert_eq!(pair.get_stats(EndpointId::B).rx_packets, 0);

    assert_eq!(pair.poll_rx(EndpointId::B, 2), 2);
    assert_eq!(pair.poll_rx(EndpointId::B, 2), 1);
    assert_eq!(pair.poll_rx(EndpointId::B, 2), 0);

    let received: Vec<Vec<u8>> = log.take().into_iter().map(|(_, frame)| frame).collect();
    assert_eq!(received, frames);
    assert_eq!(pair.get_stats(EndpointId::B).rx_packets, 3);
}

#[test]
fn closed_endpoint_refuses_transmits_until_reopened() {
    let pair = EndpointPair::new(PairConfig::default(), ()).unwrap();
    let frame = opaque_frame(EndpointId::A, 60, 7);

    pair.close(EndpointId::A);
    assert_eq!(
        pair.submit_transmit(EndpointId::A, &frame),
        Err(TxError::Down(EndpointId::A))
    );
    assert_eq!(pair.get_stats(EndpointId::A), EndpointStats::default());

    pair.open(EndpointId::A);
    pair.submit_transmit(EndpointId::A, &frame).unwrap();
    assert_eq!(pair.get_stats(EndpointId::A).tx_packets, 1);
}

#[test]
fn mtu_change_out_of_range_does_not_take_effect() {
    let pair = EndpointPair::new(PairConfig::default(), ()).unwrap();
    assert!(pair.change_mtu(EndpointId::B, 40).is_err());
    assert!(pair.change_mtu(EndpointId::B, 9000).is_err());
    assert_eq!(pair.status(EndpointId::B).mtu, 1500);
}

#[test]
fn default_transform_flips_ipv4_subnet() {
    let log = Arc::new(FrameLog::new());
    let pair = EndpointPair::with_shared_sink(PairConfig::default(), log.clone()).unwrap();

    let frame = ipv4_frame(EndpointId::A, [192, 168, 0, 1], [192, 168, 1, 2], b"ping");
    pair.submit_transmit(EndpointId::A, &frame).unwrap();

    let (_, received) = log.take().remove(0);
    let ip = &received[ETH_HLEN..ETH_HLEN + 20];
    assert_eq!(&ip[12..16], &[192, 168, 1, 1]);
    assert_eq!(&ip[16..20], &[192, 168, 0, 2]);
    assert_eq!(ipv4_header_checksum(ip), 0);
    assert_eq!(&received[received.len() - 4..], b"ping");
}

#[test]
fn transform_can_be_disabled() {
    let log = Arc::new(FrameLog::new());
    let config = PairConfig {
        transform_frames: false,
        ..PairConfig::default()
    };
    let pair = EndpointPair::with_shared_sink(config, log.clone()).unwrap();

    let frame = ipv4_frame(EndpointId::B, [10, 0, 0, 1], [10, 0, 0, 2], b"pong");
    pair.submit_transmit(EndpointId::B, &frame).unwrap();
    assert_eq!(log.take(), vec![(EndpointId::A, frame)]);
}

#[test]
fn sink_may_transmit_from_inside_delivery() {
    let pair_slot: Arc<OnceLock<Weak<EndpointPair>>> = Arc::new(OnceLock::new());
    let echoes = Arc::new(AtomicUsize::new(0));

    let sink_slot = pair_slot.clone();
    let sink_echoes = echoes.clone();
    let pair = Arc::new(
        EndpointPair::new(
            PairConfig {
                transform_frames: false,
                ..PairConfig::default()
            },
            move |id: EndpointId, frame: &[u8]| {
                if id == EndpointId::B {
                    if let Some(pair) = sink_slot.get().and_then(Weak::upgrade) {
                        pair.submit_transmit(EndpointId::B, frame).unwrap();
                        sink_echoes.fetch_add(1, Ordering::SeqCst);
                    }
                }
                Delivery::Accepted
            },
        )
        .unwrap(),
    );
    pair_slot.set(Arc::downgrade(&pair)).unwrap();

    pair.submit_transmit(EndpointId::A, &opaque_frame(EndpointId::A, 60, 8))
        .unwrap();

    assert_eq!(echoes.load(Ordering::SeqCst), 1);
    assert_eq!(pair.get_stats(EndpointId::A).rx_packets, 1);
    assert_eq!(pair.get_stats(EndpointId::B).tx_packets, 1);
    assert_eq!(pair.get_stats(EndpointId::A).tx_packets, 1);
}
