use crate::pose::PoseInfo;
use std::collections::VecDeque;

// Number of submitted frames kept for display-time prediction.
pub const HISTORY_SIZE: usize = 10;

// Rolling window of the most recently submitted frame timestamps. The mean
// interval between them forecasts when the next frame will be submitted.
#[derive(Debug)]
pub struct PoseHistory {
    samples: VecDeque<PoseInfo>,
    capacity: usize,
}

impl PoseHistory {
    pub fn new() -> PoseHistory {
        PoseHistory::with_capacity(HISTORY_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> PoseHistory {
        PoseHistory {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity,
        }
    }

    pub fn push(&mut self, info: PoseInfo) {
        self.samples.push_back(info);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    // Forecast of when the next frame will be submitted. With fewer than two
    // samples there is no interval to average, so assume a 60Hz cadence.
    pub fn predicted_display_time(&self) -> f64 {
        if self.samples.len() < 2 {
            return 1.0 / 60.0;
        }

        // Successive intervals telescope: their mean is the span of the
        // window divided by the interval count.
        let num_intervals = (self.samples.len() - 1) as f64;
        let first = self.samples.front().unwrap().time;
        let last = self.samples.back().unwrap().time;
        last + (last - first) / num_intervals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(time: f64) -> PoseInfo {
        PoseInfo {
            time: time,
            ..PoseInfo::default()
        }
    }

    #[test]
    fn seeds_sixty_hz_until_two_samples_exist() {
        let mut history = PoseHistory::new();
        assert_eq!(history.predicted_display_time(), 1.0 / 60.0);
        history.push(sample(0.5));
        assert_eq!(history.predicted_display_time(), 1.0 / 60.0);
    }

    #[test]
    fn predicts_one_mean_interval_past_the_last_submit() {
        let mut history = PoseHistory::new();
        for time in &[0.0, 0.016, 0.032] {
            history.push(sample(*time));
        }
        assert!((history.predicted_display_time() - 0.048).abs() < 1e-9);
    }

    #[test]
    fn averages_irregular_intervals() {
        let mut history = PoseHistory::new();
        for time in &[0.0, 0.01, 0.05] {
            history.push(sample(*time));
        }
        // Intervals 0.01 and 0.04 average to 0.025.
        assert!((history.predicted_display_time() - 0.075).abs() < 1e-9);
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let mut history = PoseHistory::new();
        for i in 0..25 {
            history.push(sample(i as f64));
            assert!(history.len() <= HISTORY_SIZE);
        }
        assert_eq!(history.len(), HISTORY_SIZE);
    }

    #[test]
    fn prediction_uses_only_the_retained_window() {
        let mut history = PoseHistory::new();
        // A burst of fast frames pushes an early slow frame out of the
        // window entirely.
        history.push(sample(0.0));
        for i in 1..=HISTORY_SIZE {
            history.push(sample(10.0 + i as f64 * 0.016));
        }
        let predicted = history.predicted_display_time();
        let last = 10.0 + HISTORY_SIZE as f64 * 0.016;
        assert!((predicted - (last + 0.016)).abs() < 1e-9);
    }

    #[test]
    fn single_entry_capacity_always_seeds() {
        let mut history = PoseHistory::with_capacity(1);
        for time in &[0.0, 0.016, 0.032] {
            history.push(sample(*time));
        }
        assert_eq!(history.len(), 1);
        assert_eq!(history.predicted_display_time(), 1.0 / 60.0);
    }
}
