use std::ops::Range;

use super::schema::REDUNDANCY;

/// What to do with one received snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replay {
    /// Ring slots to replay, oldest first. Slot `REDUNDANCY - 1` holds the
    /// frame numbered by the snapshot's counter.
    pub slots: Range<usize>,
    /// Frames that fell out of the ring before this snapshot arrived.
    pub lost: u32,
}

impl Replay {
    fn none() -> Self {
        Self {
            slots: REDUNDANCY..REDUNDANCY,
            lost: 0,
        }
    }

    fn newest(count: u32) -> Self {
        Self {
            slots: REDUNDANCY - count as usize..REDUNDANCY,
            lost: 0,
        }
    }
}

/// Consumer-side frame bookkeeping for the redundant ring.
///
/// Tracks the last frame number merged locally. A snapshot `n` frames ahead
/// replays its newest `min(n, REDUNDANCY)` slots; anything older is gone.
#[derive(Debug, Default)]
pub struct Replica {
    framenum: Option<u32>,
    total_lost: u64,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn framenum(&self) -> Option<u32> {
        self.framenum
    }

    pub fn total_lost(&self) -> u64 {
        self.total_lost
    }

    pub fn merge(&mut self, frame_counter: u32) -> Replay {
        let Some(local) = self.framenum else {
            // first contact: take whatever history the ring has
            self.framenum = Some(frame_counter);
            return Replay::newest(frame_counter.min(REDUNDANCY as u32));
        };

        if frame_counter < local {
            log::info!("Producer frame counter went back from {local} to {frame_counter}, resynchronising");
            self.framenum = None;
            return self.merge(frame_counter);
        }
        if frame_counter == local {
            return Replay::none();
        }

        let behind = frame_counter - local;
        let replayed = behind.min(REDUNDANCY as u32);
        let lost = behind - replayed;
        self.framenum = Some(frame_counter);
        self.total_lost += lost as u64;
        if lost > 0 {
            log::debug!("Lost {lost} frames before frame {frame_counter}");
        }
        Replay {
            slots: REDUNDANCY - replayed as usize..REDUNDANCY,
            lost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Producer advances one frame per tick and the consumer polls every
    /// `period` ticks. Returns the frame numbers reconstructed.
    fn simulate(period: u32, ticks: u32) -> (Vec<u32>, u64) {
        let mut replica = Replica::new();
        replica.merge(0);
        let mut seen = Vec::new();
        for counter in 1..=ticks {
            if counter % period != 0 {
                continue;
            }
            let replay = replica.merge(counter);
            for slot in replay.slots {
                seen.push(counter - (REDUNDANCY - 1 - slot) as u32);
            }
        }
        (seen, replica.total_lost())
    }

    #[test]
    fn polling_every_redundancy_ticks_loses_nothing() {
        let (seen, lost) = simulate(REDUNDANCY as u32, 100);
        assert_eq!(seen, (1..=100).collect::<Vec<_>>());
        assert_eq!(lost, 0);
    }

    #[test]
    fn one_tick_slower_drops_one_per_cycle() {
        let period = REDUNDANCY as u32 + 1;
        let (seen, lost) = simulate(period, period * 10);
        assert_eq!(lost, 10);
        assert_eq!(seen.len(), 10 * REDUNDANCY);
        // the frame right after each poll is the one that falls out
        for cycle in 0..10 {
            assert!(!seen.contains(&(cycle * period + 1)));
        }
    }

    #[test]
    fn repeated_snapshot_replays_nothing() {
        let mut replica = Replica::new();
        assert_eq!(replica.merge(3).slots, REDUNDANCY - 3..REDUNDANCY);
        assert_eq!(replica.merge(3), Replay::none());
        assert_eq!(replica.merge(4).slots, REDUNDANCY - 1..REDUNDANCY);
    }

    #[test]
    fn counter_going_back_resyncs() {
        let mut replica = Replica::new();
        replica.merge(1000);
        let replay = replica.merge(2);
        assert_eq!(replay.slots, REDUNDANCY - 2..REDUNDANCY);
        assert_eq!(replay.lost, 0);
        assert_eq!(replica.framenum(), Some(2));
    }

    #[test]
    fn late_join_takes_full_ring() {
        let mut replica = Replica::new();
        let replay = replica.merge(500);
        assert_eq!(replay.slots, 0..REDUNDANCY);
        assert_eq!(replay.lost, 0);
    }
}
