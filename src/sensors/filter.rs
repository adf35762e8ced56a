//! Fixed-window moving average.
//!
//! The window length is a runtime setting (`SystemConfig::filter_samples`),
//! capped at [`MAX_WINDOW`].  The mean covers populated slots only, so the
//! first samples after boot are meaningful immediately.

pub const MAX_WINDOW: usize = 16;

#[derive(Debug, Clone)]
pub struct MovingAverage {
    ring: [f32; MAX_WINDOW],
    window: usize,
    head: usize,
    count: usize,
}

impl MovingAverage {
    pub fn new(window: u8) -> Self {
        Self {
            ring: [0.0; MAX_WINDOW],
            window: usize::from(window).clamp(1, MAX_WINDOW),
            head: 0,
            count: 0,
        }
    }

    /// Push a sample and return the updated mean.
    pub fn push(&mut self, value: f32) -> f32 {
        self.ring[self.head] = value;
        self.head = (self.head + 1) % self.window;
        if self.count < self.window {
            self.count += 1;
        }
        self.mean()
    }

    pub fn mean(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        let sum: f32 = self.ring[..self.count].iter().sum();
        sum / self.count as f32
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }
}
