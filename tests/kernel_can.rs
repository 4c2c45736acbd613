//! Round-trips through a real (or virtual) CAN interface.
//!
//! Skipped unless `CANLINK_TEST_CAN_IFACE` names an interface the test may
//! use, e.g. a `vcan0` set up with:
//! `ip link add dev vcan0 type vcan && ip link set up vcan0`

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use embedded_can::{Frame as EmbeddedFrame, StandardId};
use socketcan::{CanFrame, CanSocket, Socket};

use canlink::{CanWorker, DebugOptions, FrameSink, TunnelFrame};

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<TunnelFrame>>,
}

impl FrameSink for RecordingSink {
    fn forward_frames(&self, frames: &[TunnelFrame]) {
        self.frames.lock().unwrap().extend_from_slice(frames);
    }
}

fn iface_name() -> Option<String> {
    std::env::var("CANLINK_TEST_CAN_IFACE").ok()
}

#[test]
fn tunnels_frames_through_a_real_interface() {
    let Some(iface) = iface_name() else {
        eprintln!("skipping: set CANLINK_TEST_CAN_IFACE (e.g. vcan0)");
        return;
    };

    let raw = match CanSocket::open(&iface) {
        Ok(socket) => socket,
        Err(err) => {
            eprintln!("skipping: failed to open raw CAN socket: {err:?}");
            return;
        }
    };

    let mut worker = CanWorker::new(&iface, DebugOptions::default()).expect("worker setup");
    let sink = Arc::new(RecordingSink::default());
    worker.set_peer(sink.clone());
    worker.start().expect("worker start");

    // Bus to tunnel: a frame written by another socket reaches the sink.
    let frame = CanFrame::new(StandardId::new(0x123).unwrap(), &[0xAB, 0xCD]).unwrap();
    raw.write_frame(&frame).expect("raw write");

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let frames = sink.frames.lock().unwrap().clone();
        if let Some(got) = frames.first() {
            assert_eq!(got.can_id(), 0x123);
            assert_eq!(got.payload(), &[0xAB, 0xCD]);
            break;
        }
        assert!(Instant::now() < deadline, "frame never reached the sink");
        thread::sleep(Duration::from_millis(10));
    }

    // Tunnel to bus: a staged frame appears on the raw socket within the
    // flush period.
    let tunnel = TunnelFrame::new(0x321, &[0x01, 0x02, 0x03]).unwrap();
    worker.handle().forward_frames(&[tunnel]);

    let got = raw
        .read_frame_timeout(Duration::from_secs(2))
        .expect("bus frame expected");
    let got = TunnelFrame::from_can(&got);
    assert_eq!(got.can_id(), 0x321);
    assert_eq!(got.payload(), &[0x01, 0x02, 0x03]);

    worker.stop();
}
