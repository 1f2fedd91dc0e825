use super::link::{DatagramSink, DatagramSource, MAX_DATAGRAM};
use super::packet::{fragment, Reassembler};
use super::schema::{LooperData, ReplicatedState, NUM_LOOPERS};
use crate::visual::pose::Pose;

/// Producer half: overwrites its snapshot every tick and sends it.
///
/// No queue and no acknowledgement. A failed send is logged and forgotten.
pub struct Maker<S> {
    sink: S,
    state: Box<ReplicatedState>,
    max_payload: usize,
    published: u64,
    send_failures: u64,
}

impl<S: DatagramSink> Maker<S> {
    pub fn new(sink: S, max_payload: usize) -> Self {
        Self {
            sink,
            state: ReplicatedState::boxed(),
            max_payload: max_payload.clamp(1, MAX_DATAGRAM - super::packet::PACKET_HEADER_LEN),
            published: 0,
            send_failures: 0,
        }
    }

    pub fn set_background(&mut self, rgba: [f32; 4]) {
        self.state.background = rgba;
    }

    pub fn publish(&mut self, frame_counter: u32, nav_pose: &Pose, loopers: [&LooperData; NUM_LOOPERS]) {
        self.state.frame_counter = frame_counter;
        self.state.nav_pose = nav_pose.to_wire();
        for (slot, data) in self.state.loopers.iter_mut().zip(loopers) {
            *slot = *data;
        }

        let mut failed = false;
        for datagram in fragment(frame_counter, self.state.as_bytes(), self.max_payload) {
            if let Err(e) = self.sink.send(&datagram) {
                if !failed {
                    log::warn!("Failed to send frame {frame_counter}: {e}");
                }
                failed = true;
            }
        }
        self.published += 1;
        if failed {
            self.send_failures += 1;
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }
}

/// Consumer half: drains whatever has arrived and keeps the newest complete
/// snapshot. Never blocks.
pub struct Taker<S> {
    source: S,
    reassembler: Reassembler,
    state: Box<ReplicatedState>,
    has_state: bool,
    buf: Vec<u8>,
    dropped: u64,
}

impl<S: DatagramSource> Taker<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            reassembler: Reassembler::new(ReplicatedState::SIZE),
            state: ReplicatedState::boxed(),
            has_state: false,
            buf: vec![0; MAX_DATAGRAM],
            dropped: 0,
        }
    }

    /// Drain pending datagrams. Returns true if a newer snapshot was accepted.
    pub fn pump(&mut self) -> bool {
        let mut updated = false;
        loop {
            let len = match self.source.try_recv(&mut self.buf) {
                Ok(Some(len)) => len,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Receive failed: {e}");
                    break;
                }
            };
            match self.reassembler.accept(&self.buf[..len]) {
                Ok(Some(counter)) => match self.state.read_from(self.reassembler.frame()) {
                    Ok(()) => {
                        self.has_state = true;
                        updated = true;
                    }
                    Err(e) => {
                        self.dropped += 1;
                        log::warn!("Dropping frame {counter}: {e}");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    self.dropped += 1;
                    log::warn!("Dropping malformed datagram: {e}");
                }
            }
        }
        updated
    }

    /// Latest snapshot received so far, `None` until the first one completes.
    pub fn poll(&mut self) -> Option<&ReplicatedState> {
        self.pump();
        self.latest()
    }

    pub fn latest(&self) -> Option<&ReplicatedState> {
        self.has_state.then_some(&*self.state)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::link::memory;
    use crate::net::packet::PacketHeader;
    use crate::net::replica::Replica;
    use crate::net::schema::{StripFrame, TrailFrame, REDUNDANCY};
    use bytemuck::Zeroable;
    use glam::Vec3;

    fn looper_data() -> Box<LooperData> {
        bytemuck::zeroed_box()
    }

    fn tagged_strip(frame: u32) -> StripFrame {
        let mut strip = StripFrame::zeroed();
        strip.vertices[0].position[0] = frame as f32;
        strip
    }

    #[test]
    fn snapshot_crosses_the_link() {
        let (tx, rx) = memory::link(|_| false);
        let mut maker = Maker::new(tx, 8192);
        let mut taker = Taker::new(rx);
        assert!(taker.poll().is_none());

        let mut a = looper_data();
        a.push_frames(&tagged_strip(1), &TrailFrame::default());
        a.trail_capacity = 600;
        let b = looper_data();
        maker.set_background([0.1, 0.2, 0.3, 1.0]);
        maker.publish(1, &Pose::at(Vec3::new(0.0, 1.0, 2.0)), [&*a, &*b]);

        let state = taker.poll().unwrap();
        assert_eq!(state.frame_counter, 1);
        assert_eq!(state.nav_pose.position, [0.0, 1.0, 2.0]);
        assert_eq!(state.background, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(state.loopers[0].trail_capacity, 600);
        assert_eq!(state.loopers[0].strips[REDUNDANCY - 1].vertices[0].position[0], 1.0);
        assert_eq!(maker.published(), 1);
    }

    #[test]
    fn poll_keeps_last_snapshot_when_nothing_arrives() {
        let (tx, rx) = memory::link(|_| false);
        let mut maker = Maker::new(tx, 4096);
        let mut taker = Taker::new(rx);
        let data = looper_data();
        maker.publish(7, &Pose::default(), [&*data, &*data]);
        assert_eq!(taker.poll().map(|s| s.frame_counter), Some(7));
        assert_eq!(taker.poll().map(|s| s.frame_counter), Some(7));
    }

    #[test]
    fn lost_datagram_loses_only_that_snapshot() {
        let chunks = ReplicatedState::SIZE.div_ceil(8192);
        // drop one chunk of the second snapshot
        let (tx, rx) = memory::link(move |i| i == chunks + 3);
        let mut maker = Maker::new(tx, 8192);
        let mut taker = Taker::new(rx);
        let data = looper_data();

        maker.publish(1, &Pose::default(), [&*data, &*data]);
        maker.publish(2, &Pose::default(), [&*data, &*data]);
        assert_eq!(taker.poll().map(|s| s.frame_counter), Some(1));
        maker.publish(3, &Pose::default(), [&*data, &*data]);
        assert_eq!(taker.poll().map(|s| s.frame_counter), Some(3));
        assert_eq!(taker.dropped(), 0);
    }

    #[test]
    fn foreign_datagrams_are_dropped() {
        let (mut tx, rx) = memory::link(|_| false);
        tx.send(b"not a leaf loops datagram").unwrap();
        let mut taker = Taker::new(rx);
        assert!(taker.poll().is_none());
        assert_eq!(taker.dropped(), 1);
    }

    #[test]
    fn dropped_includes_datagrams_of_the_same_poll() {
        let (mut tx, rx) = memory::link(|_| false);
        let mut taker = Taker::new(rx);

        // a header claiming a frame far larger than a snapshot
        let mut forged = Vec::new();
        PacketHeader {
            frame_counter: 9,
            chunk_index: 0,
            chunk_count: 1 << 20,
            total_len: 512 << 20,
        }
        .write(&mut forged);
        forged.extend_from_slice(&[0; 512]);
        tx.send(&forged).unwrap();

        let mut maker = Maker::new(tx, 8192);
        let data = looper_data();
        maker.publish(4, &Pose::default(), [&*data, &*data]);

        assert_eq!(taker.poll().map(|s| s.frame_counter), Some(4));
        assert_eq!(taker.dropped(), 1);
    }

    #[test]
    fn slow_consumer_recovers_ring_history() {
        let (tx, rx) = memory::link(|_| false);
        let mut maker = Maker::new(tx, 16384);
        let mut taker = Taker::new(rx);
        let mut replica = Replica::new();
        let mut producer = looper_data();
        let mut seen = Vec::new();

        for frame in 1..=20u32 {
            producer.push_frames(&tagged_strip(frame), &TrailFrame::default());
            maker.publish(frame, &Pose::default(), [&*producer, &*producer]);
            if frame % REDUNDANCY as u32 != 0 {
                continue;
            }
            let state = taker.poll().unwrap();
            let replay = replica.merge(state.frame_counter);
            for slot in replay.slots {
                seen.push(state.loopers[0].strips[slot].vertices[0].position[0] as u32);
            }
        }
        assert_eq!(seen, (1..=20).collect::<Vec<_>>());
    }
}
