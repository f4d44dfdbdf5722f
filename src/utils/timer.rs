//! Wall-clock timing for executions

use std::time::{Duration, Instant};

/// Measures elapsed time for a labelled operation
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

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Log and return the elapsed time
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::debug!("{} took {}ms", self.label, elapsed.as_millis());
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_timer() {
        let timer = Timer::start("execute 7");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10);
        assert_eq!(timer.label(), "execute 7");
        assert!(timer.stop() >= Duration::from_millis(10));
    }
}
