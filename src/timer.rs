//! Timing harness.
//!
//! A [`Timer`] brackets the repetitions of one benchmark run; the drivers read the elapsed time
//! back once the run returns and divide it by the number of repetitions.

use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Timer {
    started: Option<Instant>,
    elapsed: Option<Duration>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new measurement, discarding the previous one.
    pub fn start_timer(&mut self) {
        self.elapsed = None;
        self.started = Some(Instant::now());
    }

    /// Ends the current measurement. Does nothing if the timer is not running.
    pub fn stop_timer(&mut self) {
        if let Some(start) = self.started.take() {
            self.elapsed = Some(start.elapsed());
        }
    }

    /// Duration of the last completed measurement.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_completed_measurements_are_reported() {
        let mut timer = Timer::new();
        assert!(timer.elapsed().is_none());
        timer.stop_timer();
        assert!(timer.elapsed().is_none());

        timer.start_timer();
        std::thread::sleep(Duration::from_millis(2));
        timer.stop_timer();
        assert!(timer.elapsed().unwrap() >= Duration::from_millis(2));

        timer.start_timer();
        assert!(timer.elapsed().is_none());
    }
}
