use std::time::Instant;

/// The smoothing factor for the rate estimate.
const SMOOTHING: f64 = 0.95;

/// Exponentially smoothed cycles-per-second counter.
///
/// # Examples
///
/// ```
/// use retinas::rate::CycleRate;
///
/// let mut rate = CycleRate::new();
///
/// for _ in 0..100 {
///    rate.tick();
/// }
/// assert_eq!(rate.count(), 100);
/// ```
#[derive(Debug, Clone)]
pub struct CycleRate {
    last_time: Instant,
    count: u64,
    hz: f64,
}

impl CycleRate {
    /// Creates a new counter.
    pub fn new() -> Self {
        Self {
            last_time: Instant::now(),
            count: 0,
            hz: 0.0,
        }
    }

    /// Returns the current rate in Hz.
    #[inline]
    pub fn hz(&self) -> f64 {
        self.hz
    }

    /// Returns the number of completed cycles.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Records one completed cycle and updates the rate.
    pub fn tick(&mut self) {
        self.count += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_time).as_secs_f64();
        self.last_time = now;

        // two ticks inside the timer resolution say nothing about the rate
        if elapsed <= 0.0 {
            return;
        }
        let instant_hz = 1.0 / elapsed;
        self.hz = if self.hz == 0.0 {
            instant_hz
        } else {
            self.hz * SMOOTHING + instant_hz * (1.0 - SMOOTHING)
        };
    }
}

impl Default for CycleRate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cycle_rate() {
        let mut rate = CycleRate::new();
        assert_eq!(rate.hz(), 0.0);
        for _ in 0..3 {
            std::thread::sleep(Duration::from_millis(5));
            rate.tick();
        }
        assert_eq!(rate.count(), 3);
        assert!(rate.hz() > 0.0 && rate.hz() < 1000.0);
    }
}
