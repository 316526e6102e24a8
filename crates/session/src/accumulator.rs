//! Utterance buffer with epoch-granular growth.

/// Result of appending one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Stored,
    /// The chunk was stored in full but capacity is now exhausted; the
    /// caller treats this as an implicit stop trigger.
    Full,
}

/// Growable buffer holding one utterance as normalized floats.
///
/// Logical capacity is always a whole number of epochs and grows by one
/// epoch at a time. Growth is refused once the configured epoch cap is
/// reached; appends never drop data, so the chunk that crosses the cap is
/// retained in full.
pub struct SampleAccumulator {
    samples: Vec<f32>,
    epoch_samples: usize,
    capacity: usize,
    max_epochs: Option<usize>,
}

impl SampleAccumulator {
    pub fn new(epoch_samples: usize, max_epochs: Option<usize>) -> Self {
        let mut acc = Self {
            samples: Vec::new(),
            epoch_samples,
            capacity: 0,
            max_epochs,
        };
        acc.grow();
        acc
    }

    /// Cap expressed as a maximum duration, rounded up to whole epochs.
    pub fn with_max_samples(epoch_samples: usize, max_samples: Option<usize>) -> Self {
        let max_epochs = max_samples.map(|n| n.div_ceil(epoch_samples).max(1));
        Self::new(epoch_samples, max_epochs)
    }

    fn can_grow(&self) -> bool {
        match self.max_epochs {
            None => true,
            Some(max) => self.capacity < max * self.epoch_samples,
        }
    }

    fn grow(&mut self) {
        self.capacity += self.epoch_samples;
        self.samples.reserve_exact(self.capacity - self.samples.len());
    }

    /// Append a chunk, growing by whole epochs as needed. All previously
    /// written samples are retained across growth.
    pub fn append(&mut self, chunk: &[f32]) -> AppendOutcome {
        while self.samples.len() + chunk.len() > self.capacity && self.can_grow() {
            self.grow();
            tracing::debug!(capacity = self.capacity, "utterance buffer grown");
        }
        self.samples.extend_from_slice(chunk);

        if self.samples.len() >= self.capacity && !self.can_grow() {
            AppendOutcome::Full
        } else {
            AppendOutcome::Stored
        }
    }

    /// True when growth is exhausted and free space is below `margin`.
    pub fn nearing_capacity(&self, margin: usize) -> bool {
        !self.can_grow() && self.capacity.saturating_sub(self.samples.len()) < margin
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Logically clear without releasing the allocation.
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}
