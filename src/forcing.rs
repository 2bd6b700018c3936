//! External signals that drive the simulation one sample per sub-step.

/// Sample rate every forcing signal is expected to carry.
pub const SAMPLE_RATE: u32 = 44_100;

/// Supplies one value per sub-step until exhausted.
pub trait ForcingSource: Send {
    /// Next sample, or `None` once the source has run dry. Advances the cursor.
    fn next_sample(&mut self) -> Option<f64>;

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Signed 16-bit PCM held fully in memory, read front to back.
#[derive(Debug, Clone)]
pub struct ForcingSignal {
    samples: Vec<i16>,
    sample_rate: u32,
    cursor: usize,
}

impl ForcingSignal {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            cursor: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.samples.len() - self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.samples.len()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
}

impl ForcingSource for ForcingSignal {
    fn next_sample(&mut self) -> Option<f64> {
        let sample = *self.samples.get(self.cursor)?;
        self.cursor += 1;
        Some(f64::from(sample))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_advances_then_exhausts() {
        let mut signal = ForcingSignal::new(vec![1, -2, i16::MAX], SAMPLE_RATE);
        assert_eq!(signal.remaining(), 3);
        assert_eq!(signal.next_sample(), Some(1.0));
        assert_eq!(signal.next_sample(), Some(-2.0));
        assert_eq!(signal.remaining(), 1);
        assert_eq!(signal.next_sample(), Some(32767.0));
        assert!(signal.is_exhausted());
        assert_eq!(signal.next_sample(), None);
        assert_eq!(signal.next_sample(), None);
        assert_eq!(signal.cursor(), 3);
    }

    #[test]
    fn test_empty_signal_is_exhausted() {
        let mut signal = ForcingSignal::new(Vec::new(), SAMPLE_RATE);
        assert!(signal.is_exhausted());
        assert_eq!(signal.next_sample(), None);
        assert_eq!(signal.sample_rate(), 44_100);
    }
}
