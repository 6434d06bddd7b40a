//! One-shot software timer for the control loop.

use tokio::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Timer {
    timer_active: bool,
    timeout_duration: Duration,
    start_time: Instant,
}

pub fn new(timeout_duration: Duration) -> Timer {
    Timer {
        timer_active: false,
        timeout_duration,
        start_time: Instant::now(),
    }
}

impl Timer {
    pub fn timer_start(&mut self) {
        self.timer_active = true;
        self.start_time = Instant::now();
    }

    pub fn timer_stop(&mut self) {
        self.timer_active = false;
    }

    pub fn timer_timeouted(&self) -> bool {
        self.timer_active && self.start_time.elapsed() >= self.timeout_duration
    }
}
