use bytemuck::{Pod, Zeroable};

use crate::error::WireError;

/// Transform size of the visual analysis. Each strip frame carries one vertex
/// pair per bin in `0..FFT_SIZE / 2`, so `FFT_SIZE` vertices in total.
pub const FFT_SIZE: usize = 1024;
pub const STRIP_BINS: usize = FFT_SIZE / 2;
pub const STRIP_VERTICES: usize = STRIP_BINS * 2;

/// Number of most recent frames carried in every snapshot.
pub const REDUNDANCY: usize = 5;
pub const NUM_LOOPERS: usize = 2;
pub const TRAIL_POINTS_PER_FRAME: usize = 8;

pub const STATE_MAGIC: u32 = 0x4C4C_5354; // "LLST"
pub const SCHEMA_VERSION: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl Vertex {
    pub fn alpha(&self) -> f32 {
        self.color[3]
    }
}

/// One strip segment between two consecutive generated vertex rows.
/// Even indices belong to the older row, odd indices to the newer one.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct StripFrame {
    pub vertices: [Vertex; STRIP_VERTICES],
}

/// World-space points of the loudest bins of one generated frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct TrailFrame {
    pub points: [Vertex; TRAIL_POINTS_PER_FRAME],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PoseData {
    pub position: [f32; 3],
    /// Quaternion as x, y, z, w
    pub orientation: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LooperData {
    pub pose: PoseData,
    /// Oldest first; the last entry belongs to the snapshot's frame counter
    pub strips: [StripFrame; REDUNDANCY],
    pub trails: [TrailFrame; REDUNDANCY],
    pub trail_capacity: u32,
    pub trail_decay: f32,
    pub do_trail: u32,
}

impl LooperData {
    /// Drop the oldest frames and append the newest ones at the end.
    pub fn push_frames(&mut self, strip: &StripFrame, trail: &TrailFrame) {
        self.strips.copy_within(1.., 0);
        self.strips[REDUNDANCY - 1] = *strip;
        self.trails.copy_within(1.., 0);
        self.trails[REDUNDANCY - 1] = *trail;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct WireHeader {
    pub magic: u32,
    pub schema_version: u32,
    pub fft_size: u32,
    pub redundancy: u32,
    pub num_loopers: u32,
}

impl WireHeader {
    pub fn current() -> Self {
        Self {
            magic: STATE_MAGIC,
            schema_version: SCHEMA_VERSION,
            fft_size: FFT_SIZE as u32,
            redundancy: REDUNDANCY as u32,
            num_loopers: NUM_LOOPERS as u32,
        }
    }

    fn validate(&self) -> Result<(), WireError> {
        if self.magic != STATE_MAGIC {
            return Err(WireError::Magic(self.magic));
        }
        let expected = Self::current();
        let fields = [
            ("schema_version", expected.schema_version, self.schema_version),
            ("fft_size", expected.fft_size, self.fft_size),
            ("redundancy", expected.redundancy, self.redundancy),
            ("num_loopers", expected.num_loopers, self.num_loopers),
        ];
        for (field, expected, actual) in fields {
            if expected != actual {
                return Err(WireError::Schema {
                    field,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// The complete snapshot the simulator publishes every tick.
///
/// Fixed size and plain old data: it goes over the wire as its raw bytes in
/// native byte order. A peer with the other byte order fails the magic check.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ReplicatedState {
    pub header: WireHeader,
    pub frame_counter: u32,
    pub nav_pose: PoseData,
    pub background: [f32; 4],
    pub loopers: [LooperData; NUM_LOOPERS],
}

impl ReplicatedState {
    pub const SIZE: usize = std::mem::size_of::<ReplicatedState>();

    /// Zeroed snapshot with a valid header, allocated on the heap.
    pub fn boxed() -> Box<Self> {
        let mut state: Box<Self> = bytemuck::zeroed_box();
        state.header = WireHeader::current();
        state
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Validate and copy `bytes` into `self`. On error `self` is untouched.
    pub fn read_from(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        if bytes.len() != Self::SIZE {
            return Err(WireError::Length {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        let header_len = std::mem::size_of::<WireHeader>();
        let header: WireHeader = bytemuck::pod_read_unaligned(&bytes[..header_len]);
        header.validate()?;
        bytemuck::bytes_of_mut(self).copy_from_slice(bytes);
        Ok(())
    }

    #[cfg(test)]
    pub fn decode(bytes: &[u8]) -> Result<Box<Self>, WireError> {
        let mut state = Self::boxed();
        state.read_from(bytes)?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_follow_capacities() {
        assert_eq!(std::mem::size_of::<Vertex>(), 28);
        assert_eq!(std::mem::size_of::<StripFrame>(), 28 * STRIP_VERTICES);
        assert_eq!(
            ReplicatedState::SIZE,
            20 + 4 + 28 + 16 + NUM_LOOPERS * std::mem::size_of::<LooperData>()
        );
    }

    #[test]
    fn decode_checks_header() {
        let mut state = ReplicatedState::boxed();
        state.frame_counter = 42;
        state.loopers[1].strips[4].vertices[7].color = [1.0, 0.5, 0.25, 0.125];

        let decoded = ReplicatedState::decode(state.as_bytes()).unwrap();
        assert_eq!(decoded.frame_counter, 42);
        assert_eq!(decoded.loopers[1].strips[4].vertices[7].alpha(), 0.125);

        let mut bytes = state.as_bytes().to_vec();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            ReplicatedState::decode(&bytes),
            Err(WireError::Magic(_))
        ));

        let mut other = ReplicatedState::boxed();
        other.header.redundancy = 3;
        assert_eq!(
            ReplicatedState::decode(other.as_bytes()).unwrap_err(),
            WireError::Schema {
                field: "redundancy",
                expected: REDUNDANCY as u32,
                actual: 3
            }
        );

        assert!(matches!(
            ReplicatedState::decode(&bytes[..100]),
            Err(WireError::Length { .. })
        ));
    }

    #[test]
    fn failed_read_leaves_state_alone() {
        let mut target = ReplicatedState::boxed();
        target.frame_counter = 9;
        let garbage = vec![0u8; ReplicatedState::SIZE];
        assert!(target.read_from(&garbage).is_err());
        assert_eq!(target.frame_counter, 9);
        assert_eq!(target.header.magic, STATE_MAGIC);
    }

    #[test]
    fn push_frames_keeps_newest_last() {
        let mut data: Box<LooperData> = bytemuck::zeroed_box();
        for i in 0..7 {
            let mut strip = StripFrame::zeroed();
            strip.vertices[0].position[0] = i as f32;
            let trail = TrailFrame::default();
            data.push_frames(&strip, &trail);
        }
        let order: Vec<f32> = data.strips.iter().map(|s| s.vertices[0].position[0]).collect();
        assert_eq!(order, vec![2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
