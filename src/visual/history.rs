use std::collections::vec_deque::{self, VecDeque};

use super::geometry::Fade;

/// Alpha a frame has left when it falls out of a buffer sized by
/// `set_length_in_seconds`.
const EVICTION_ALPHA: f32 = 0.05;

/// Fixed-capacity FIFO of fading frames.
///
/// Every push fades the frames already stored by `decay` before appending,
/// so a frame that has survived `j` later pushes carries `decay^j` of its
/// original alpha.
#[derive(Clone, Debug)]
pub struct BoundedHistoryBuffer<T> {
    frames: VecDeque<T>,
    capacity: usize,
    decay: f32,
}

impl<T: Fade> BoundedHistoryBuffer<T> {
    pub fn new(capacity: usize, decay: f32) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            decay,
        }
    }

    /// Buffer whose frames fade to 5% just as they are evicted.
    pub fn with_length_in_seconds(seconds: f32, pushes_per_second: f32) -> Self {
        let mut buffer = Self::new(1, 1.0);
        buffer.set_length_in_seconds(seconds, pushes_per_second);
        buffer
    }

    pub fn push(&mut self, frame: T) {
        self.decay_all(self.decay);
        self.frames.push_back(frame);
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    pub fn decay_all(&mut self, factor: f32) {
        for frame in self.frames.iter_mut() {
            frame.fade(factor);
        }
    }

    /// Resize so a frame lives for `seconds` and set the decay so it reaches
    /// 5% of its alpha by then. Oldest frames are dropped if the buffer shrinks.
    pub fn set_length_in_seconds(&mut self, seconds: f32, pushes_per_second: f32) {
        let capacity = (seconds * pushes_per_second).round().max(1.0) as usize;
        let decay = (EVICTION_ALPHA.ln() / capacity as f32).exp();
        self.set_capacity(capacity);
        self.decay = decay;
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    pub fn set_decay(&mut self, decay: f32) {
        self.decay = decay;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn decay(&self) -> f32 {
        self.decay
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Oldest first.
    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.frames.iter()
    }

    #[cfg(test)]
    pub fn newest(&self) -> Option<&T> {
        self.frames.back()
    }
}
