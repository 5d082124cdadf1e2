//! Sliding window of the most recent samples, as shown on screen
//!
//! The window has a fixed length `L = max_chunks * chunk_size`. Each tick
//! shifts out the oldest samples and appends the newly pulled ones, so the
//! window always holds the last `L` samples in time order (zero-padded until
//! enough audio has arrived).

use crate::audio::Sample;

/// Trailing window of samples plus its time axis
pub struct DisplayBuffer {
    samples: Vec<Sample>,
    time_axis: Vec<f64>,
}

impl DisplayBuffer {
    pub fn new(max_chunks: usize, chunk_size: usize, sample_rate: u32) -> Self {
        let len = max_chunks.saturating_mul(chunk_size);
        let rate = f64::from(sample_rate.max(1));

        Self {
            samples: vec![0; len],
            time_axis: (0..len).map(|i| i as f64 / rate).collect(),
        }
    }

    /// Drop the oldest `pulled.len()` samples and append `pulled`
    ///
    /// If more than `L` samples arrive at once only the newest `L` are kept.
    pub fn shift_in(&mut self, pulled: &[Sample]) {
        if pulled.is_empty() {
            return;
        }

        let len = self.samples.len();
        if pulled.len() >= len {
            self.samples.copy_from_slice(&pulled[pulled.len() - len..]);
        } else {
            self.samples.copy_within(pulled.len().., 0);
            self.samples[len - pulled.len()..].copy_from_slice(pulled);
        }
    }

    /// Read-only view for drawing
    pub fn snapshot(&self) -> DisplaySnapshot<'_> {
        DisplaySnapshot {
            samples: &self.samples,
            time: &self.time_axis,
        }
    }
}

/// Borrowed, immutable view of the window at one point in time
#[derive(Clone, Copy)]
pub struct DisplaySnapshot<'a> {
    /// Amplitudes, oldest first
    pub samples: &'a [Sample],
    /// Seconds since the start of the window, same length as `samples`
    pub time: &'a [f64],
}

impl DisplaySnapshot<'_> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length of the window in seconds
    pub fn duration(&self) -> f64 {
        match (self.time.first(), self.time.last()) {
            (Some(first), Some(last)) if self.time.len() > 1 => {
                let step = self.time[1] - first;
                last - first + step
            }
            _ => 0.0,
        }
    }
}
