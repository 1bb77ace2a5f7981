use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Barrier, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use framebridge_core::testing::RecordingSink;
use framebridge_core::{
    Backpressure, DeliveryError, ExecutorConfig, FlipMode, FrameBridge, FrameDisposition,
    FrameParams, FrameSink, ScriptExecutor, ScriptThread, StreamId, StreamIdAllocator,
};

fn script_thread(capacity: usize, backpressure: Backpressure) -> Arc<ScriptThread> {
    ScriptThread::spawn(&ExecutorConfig {
        thread_name: "script-test".into(),
        queue_capacity: capacity,
        backpressure,
    })
    .expect("spawn script thread")
}

fn frame(producer: u8, seq: u32) -> Vec<u8> {
    let mut bytes = vec![producer];
    bytes.extend_from_slice(&seq.to_le_bytes());
    bytes
}

fn decode(bytes: &[u8]) -> (u8, u32) {
    let seq = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    (bytes[0], seq)
}

/// Sink that blocks every delivery until the gate opens.
#[derive(Default)]
struct GatedSink {
    open: Mutex<bool>,
    cv: Condvar,
    delivered: Mutex<usize>,
}

impl GatedSink {
    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }
}

impl FrameSink for GatedSink {
    fn deliver_frame(&self, _stream_id: StreamId, _frame: &[u8]) -> Result<(), DeliveryError> {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
        *self.delivered.lock().unwrap() += 1;
        Ok(())
    }
}

#[test]
fn single_producer_frames_arrive_in_order() {
    let exec = script_thread(4, Backpressure::Block);
    let bridge = FrameBridge::new(&StreamIdAllocator::new(), exec.clone()).unwrap();
    let sink = Arc::new(RecordingSink::new());
    bridge.bind_controller(sink.clone());

    for seq in 0..500u32 {
        let d = bridge.update_frame_buffer(&frame(0, seq), FrameParams::new(seq, 1, 0), FlipMode::None);
        assert_eq!(d, FrameDisposition::Posted);
    }
    exec.flush().unwrap();

    let seqs: Vec<u32> = sink.frames().iter().map(|(_, f)| decode(f).1).collect();
    assert_eq!(seqs, (0..500).collect::<Vec<_>>());
}

#[test]
fn concurrent_producers_keep_per_producer_order_and_geometry_consistent() {
    let exec = script_thread(8, Backpressure::Block);
    let bridge = Arc::new(FrameBridge::new(&StreamIdAllocator::new(), exec.clone()).unwrap());
    let sink = Arc::new(RecordingSink::new());
    bridge.bind_controller(sink.clone());

    const PRODUCERS: u8 = 4;
    const FRAMES: u32 = 250;
    let start = Arc::new(Barrier::new(PRODUCERS as usize));
    let handles: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let bridge = Arc::clone(&bridge);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for seq in 0..FRAMES {
                    // Width encodes the frame so geometry can be matched to delivery.
                    let width = u32::from(p) * 10_000 + seq;
                    bridge.update_frame_buffer(
                        &frame(p, seq),
                        FrameParams::new(width, 1, 0),
                        FlipMode::None,
                    );
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    exec.flush().unwrap();

    let frames = sink.frames();
    assert_eq!(frames.len(), PRODUCERS as usize * FRAMES as usize);

    let mut last_seen = vec![None::<u32>; PRODUCERS as usize];
    for (id, bytes) in &frames {
        assert_eq!(*id, bridge.id());
        let (p, seq) = decode(bytes);
        if let Some(prev) = last_seen[p as usize] {
            assert!(seq > prev, "producer {p}: frame {seq} after {prev}");
        }
        last_seen[p as usize] = Some(seq);
    }

    // The last frame the script saw is the one whose geometry is current.
    let (p, seq) = decode(&frames.last().unwrap().1);
    assert_eq!(bridge.width(), u32::from(p) * 10_000 + seq);
}

#[test]
fn block_policy_never_loses_frames() {
    let exec = script_thread(1, Backpressure::Block);
    let bridge = FrameBridge::new(&StreamIdAllocator::new(), exec.clone()).unwrap();
    let sink = Arc::new(RecordingSink::with_delay(Duration::from_millis(2)));
    bridge.bind_controller(sink.clone());

    for seq in 0..20 {
        let d = bridge.update_frame_buffer(&frame(0, seq), FrameParams::new(1, 1, 0), FlipMode::None);
        assert_eq!(d, FrameDisposition::Posted);
    }
    exec.flush().unwrap();

    assert_eq!(sink.len(), 20);
    let stats = bridge.stats();
    assert_eq!(stats.frames_rejected, 0);
    assert_eq!(stats.frames_delivered, 20);
}

#[test]
fn drop_newest_policy_rejects_and_counts() {
    let exec = script_thread(1, Backpressure::DropNewest);
    let bridge = FrameBridge::new(&StreamIdAllocator::new(), exec.clone()).unwrap();
    let sink = Arc::new(GatedSink::default());
    bridge.bind_controller(sink.clone());

    let dispositions: Vec<_> = (0..10)
        .map(|seq| {
            bridge.update_frame_buffer(&frame(0, seq), FrameParams::new(seq, 1, 0), FlipMode::None)
        })
        .collect();
    sink.release();
    exec.flush().unwrap();

    let posted = dispositions
        .iter()
        .filter(|d| **d == FrameDisposition::Posted)
        .count() as u64;
    let rejected = dispositions
        .iter()
        .filter(|d| **d == FrameDisposition::Rejected)
        .count() as u64;
    assert!(rejected > 0, "queue of one must overflow");
    assert_eq!(posted + rejected, 10);

    let stats = bridge.stats();
    assert_eq!(stats.frames_rejected, rejected);
    assert_eq!(stats.frames_delivered, posted);
    assert_eq!(*sink.delivered.lock().unwrap() as u64, posted);
    // Rejected frames still update geometry.
    assert_eq!(bridge.width(), 9);
}

#[test]
fn destroying_bridges_with_queued_frames_is_safe() {
    let exec = script_thread(64, Backpressure::Block);
    let ids = StreamIdAllocator::new();

    for round in 0..50u32 {
        let bridge = FrameBridge::new(&ids, exec.clone()).unwrap();
        let sink = Arc::new(RecordingSink::with_delay(Duration::from_micros(200)));
        bridge.bind_controller(sink.clone());
        let stats = bridge.stats_handle();

        let bridge = Arc::new(bridge);
        let producer = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                for seq in 0..20 {
                    bridge.update_frame_buffer(
                        &frame(0, seq),
                        FrameParams::new(seq, 1, 0),
                        FlipMode::None,
                    );
                }
            })
        };
        producer.join().unwrap();
        let id = bridge.id();
        drop(bridge);
        exec.flush().unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_posted, 20, "round {round}");
        assert_eq!(
            snap.frames_delivered + snap.frames_discarded,
            snap.frames_posted,
            "round {round}: every queued frame is delivered or discarded"
        );
        assert_eq!(sink.len() as u64, snap.frames_delivered);
        assert!(sink.frames().iter().all(|(sid, _)| *sid == id));
    }
}

#[test]
fn destroy_races_with_producer() {
    let exec = script_thread(16, Backpressure::Block);
    let ids = StreamIdAllocator::new();

    for _ in 0..50 {
        let bridge = Arc::new(FrameBridge::new(&ids, exec.clone()).unwrap());
        let sink = Arc::new(RecordingSink::new());
        bridge.bind_controller(sink.clone());
        let stats = bridge.stats_handle();

        let start = Arc::new(Barrier::new(2));
        let producer = {
            let bridge = Arc::clone(&bridge);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for seq in 0..50 {
                    bridge.update_frame_buffer(
                        &frame(1, seq),
                        FrameParams::new(seq, 1, 0),
                        FlipMode::None,
                    );
                }
            })
        };
        start.wait();
        // The host's handle goes away while frames are still arriving.
        drop(bridge);
        producer.join().unwrap();
        exec.flush().unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_received, 50);
        assert_eq!(snap.frames_delivered + snap.frames_discarded, snap.frames_posted);
        assert_eq!(sink.len() as u64, snap.frames_delivered);
    }
}

#[test]
fn streams_on_one_executor_are_isolated() {
    let exec = script_thread(8, Backpressure::Block);
    let ids = StreamIdAllocator::new();
    let a = FrameBridge::new(&ids, exec.clone()).unwrap();
    let b = FrameBridge::new(&ids, exec.clone()).unwrap();
    let sink_a = Arc::new(RecordingSink::new());
    let sink_b = Arc::new(RecordingSink::new());
    a.bind_controller(sink_a.clone());
    b.bind_controller(sink_b.clone());

    a.update_frame_buffer(b"a0", FrameParams::new(100, 50, 0), FlipMode::None);
    b.update_frame_buffer(b"b0", FrameParams::new(200, 60, 180), FlipMode::Both);
    a.update_frame_buffer(b"a1", FrameParams::new(101, 51, 0), FlipMode::None);
    exec.flush().unwrap();

    assert_eq!(
        sink_a.frames(),
        vec![(a.id(), b"a0".to_vec()), (a.id(), b"a1".to_vec())]
    );
    assert_eq!(sink_b.frames(), vec![(b.id(), b"b0".to_vec())]);
    assert_eq!(a.width(), 101);
    assert_eq!(b.flip_mode(), FlipMode::Both);
}

/// Feeds its own stream once from inside the first delivery it sees, after
/// the test opens the gate.
struct FeedbackSink {
    bridge: Mutex<Option<Arc<FrameBridge>>>,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
    nested: Mutex<Option<FrameDisposition>>,
}

impl FrameSink for FeedbackSink {
    fn deliver_frame(&self, _stream_id: StreamId, _frame: &[u8]) -> Result<(), DeliveryError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.recv().unwrap();
            let bridge = self.bridge.lock().unwrap().clone();
            if let Some(bridge) = bridge {
                let d = bridge.update_frame_buffer(
                    b"nested",
                    FrameParams::new(777, 777, 0),
                    FlipMode::None,
                );
                *self.nested.lock().unwrap() = Some(d);
            }
        }
        Ok(())
    }
}

#[test]
fn controller_feeding_its_stream_while_producer_blocks() {
    let exec = script_thread(1, Backpressure::Block);
    assert_eq!(exec.name(), "script-test");
    let bridge = Arc::new(FrameBridge::new(&StreamIdAllocator::new(), exec.clone()).unwrap());
    let (open_gate, gate) = mpsc::channel();
    let sink = Arc::new(FeedbackSink {
        bridge: Mutex::new(Some(Arc::clone(&bridge))),
        gate: Mutex::new(Some(gate)),
        nested: Mutex::new(None),
    });
    bridge.bind_controller(sink.clone());

    let (done_tx, done_rx) = mpsc::channel();
    let producer = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || {
            // Frame 0 is held by the sink, frame 1 fills the queue, frame 2 waits.
            for seq in 0..3 {
                bridge.update_frame_buffer(&frame(0, seq), FrameParams::new(seq, seq, 0), FlipMode::None);
            }
            let _ = done_tx.send(());
        })
    };
    while bridge.stats().frames_received < 3 {
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(50));
    open_gate.send(()).unwrap();

    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("producer stalled behind the script thread");
    producer.join().unwrap();
    exec.flush().unwrap();

    assert_eq!(*sink.nested.lock().unwrap(), Some(FrameDisposition::Rejected));
    // The nested frame was accepted last, so its geometry is current.
    assert_eq!(bridge.width(), 777);
    let stats = bridge.stats();
    assert_eq!(stats.frames_received, 4);
    assert_eq!(stats.frames_posted, 3);
    assert_eq!(stats.frames_rejected, 1);
    assert_eq!(stats.frames_delivered, 3);

    sink.bridge.lock().unwrap().take();
}

#[test]
fn readers_never_observe_partial_geometry() {
    let exec = script_thread(8, Backpressure::Block);
    let bridge = Arc::new(FrameBridge::new(&StreamIdAllocator::new(), exec.clone()).unwrap());
    bridge.bind_controller(Arc::new(RecordingSink::new()));
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let bridge = Arc::clone(&bridge);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut reads = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let g = bridge.geometry();
                    assert_eq!(g.width, g.height, "torn read: {g:?}");
                    assert_eq!(g.rotation_degrees, g.width % 4 * 90, "torn read: {g:?}");
                    assert_eq!(g.flip_mode.as_raw(), g.width % 4, "torn read: {g:?}");
                    let (w, h) = g.oriented_size();
                    assert_eq!(w, h);
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    let producers: Vec<_> = (0..3u32)
        .map(|p| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                for seq in 0..1_000u32 {
                    let n = p * 1_000 + seq + 1;
                    bridge.update_frame_buffer(
                        &frame(p as u8, seq),
                        FrameParams::new(n, n, n % 4 * 90),
                        FlipMode::from_raw(n % 4).unwrap(),
                    );
                }
            })
        })
        .collect();
    for h in producers {
        h.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for h in readers {
        assert!(h.join().unwrap() > 0);
    }
    exec.flush().unwrap();

    assert_eq!(bridge.stats().frames_delivered, 3_000);
}
