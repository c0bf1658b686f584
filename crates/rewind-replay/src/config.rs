//! Player configuration

use std::time::Duration;

use rewind_core::UsefulEventFilter;

/// Configuration for the replay engine and player
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Wall-clock time between ticks
    pub tick_interval: Duration,
    /// Initial playback speed multiplier
    pub speed: f64,
    /// Initial skip-inactivity setting
    pub skip_inactivity: bool,
    /// Only gaps longer than this are skipped
    pub min_inactive_gap: Duration,
    /// Which interactions count as useful events
    pub filter: UsefulEventFilter,
    /// Capacity of the player event broadcast channel
    pub event_capacity: usize,
    /// Capacity of the command channel
    pub command_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            speed: 1.0,
            skip_inactivity: false,
            min_inactive_gap: Duration::ZERO,
            filter: UsefulEventFilter::default(),
            event_capacity: 256,
            command_capacity: 64,
        }
    }
}

impl PlayerConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_skip_inactivity(mut self, skip: bool) -> Self {
        self.skip_inactivity = skip;
        self
    }

    pub fn with_min_inactive_gap(mut self, gap: Duration) -> Self {
        self.min_inactive_gap = gap;
        self
    }

    pub fn with_filter(mut self, filter: UsefulEventFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

/// Whether a playback speed is acceptable
pub fn is_valid_speed(speed: f64) -> bool {
    speed.is_finite() && speed > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_validation() {
        assert!(is_valid_speed(0.5));
        assert!(is_valid_speed(8.0));
        assert!(!is_valid_speed(0.0));
        assert!(!is_valid_speed(-1.0));
        assert!(!is_valid_speed(f64::NAN));
        assert!(!is_valid_speed(f64::INFINITY));
    }
}
