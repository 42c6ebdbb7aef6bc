//! Rolling analysis window over rendered output.
//!
//! Keeps the most recent `capacity` mono samples that went to the speaker.
//! When the window is full, new samples overwrite the oldest ones.  The
//! playback meter reads its RMS once per display frame.

// ---------------------------------------------------------------------------
// AnalysisWindow
// ---------------------------------------------------------------------------

/// Fixed-capacity circular buffer of `f32` samples with level readouts.
pub struct AnalysisWindow {
    buf: Vec<f32>,
    /// Index of the next write position (wraps around the capacity).
    write_pos: usize,
    /// Number of valid samples currently stored.
    len: usize,
}

impl AnalysisWindow {
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "AnalysisWindow capacity must be > 0");
        Self {
            buf: vec![0.0; capacity],
            write_pos: 0,
            len: 0,
        }
    }

    pub fn push_slice(&mut self, data: &[f32]) {
        let capacity = self.buf.len();
        // Only the tail can survive a push longer than the window.
        let data = &data[data.len().saturating_sub(capacity)..];
        for &sample in data {
            self.buf[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % capacity;
        }
        self.len = (self.len + data.len()).min(capacity);
    }

    /// Root-mean-square of the stored samples; `0.0` when empty.
    pub fn rms(&self) -> f32 {
        if self.len == 0 {
            return 0.0;
        }
        let sum: f32 = self.samples().map(|s| s * s).sum();
        (sum / self.len as f32).sqrt()
    }

    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stored samples in chronological order.
    fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        let capacity = self.buf.len();
        let read_pos = if self.len < capacity { 0 } else { self.write_pos };
        (0..self.len).map(move |i| self.buf[(read_pos + i) % capacity])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
