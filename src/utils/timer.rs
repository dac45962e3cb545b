//! Timer utilities
//!
//! Measures on the tokio clock, so paused-time tests observe virtual time.

use std::time::Duration;
use tokio::time::Instant;

/// Labelled elapsed-time measurement
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Stop and log the measurement
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::debug!("{}: {}ms", self.label, elapsed.as_millis());
        elapsed
    }
}

/// Stopwatch with lap timing, one lap per round
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    laps: Vec<(String, Duration)>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            laps: Vec::new(),
        }
    }

    pub fn lap(&mut self, label: impl Into<String>) {
        self.laps.push((label.into(), self.start.elapsed()));
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn laps(&self) -> &[(String, Duration)] {
        &self.laps
    }

    /// Duration of each lap, not cumulative
    pub fn lap_times(&self) -> Vec<(String, Duration)> {
        let mut prev = Duration::ZERO;
        self.laps
            .iter()
            .map(|(label, cumulative)| {
                let lap = *cumulative - prev;
                prev = *cumulative;
                (label.clone(), lap)
            })
            .collect()
    }

    pub fn format(&self) -> String {
        let mut output = String::new();
        for (label, duration) in self.lap_times() {
            output.push_str(&format!("{}: {}ms\n", label, duration.as_millis()));
        }
        output.push_str(&format!("Total: {}ms", self.total().as_millis()));
        output
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_timer() {
        let timer = Timer::start("test");
        sleep(Duration::from_millis(10)).await;
        assert_eq!(timer.elapsed_ms(), 10);
        assert_eq!(timer.stop(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopwatch_laps() {
        let mut sw = Stopwatch::new();
        sleep(Duration::from_millis(10)).await;
        sw.lap("round 1");
        sleep(Duration::from_millis(30)).await;
        sw.lap("round 2");

        assert_eq!(sw.laps().len(), 2);
        let lap_times = sw.lap_times();
        assert_eq!(lap_times[0].1, Duration::from_millis(10));
        assert_eq!(lap_times[1].1, Duration::from_millis(30));
        assert!(sw.format().ends_with("Total: 40ms"));
    }
}
