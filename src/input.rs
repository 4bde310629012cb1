use crate::pose::KeyTimes;
use glutin::VirtualKeyCode;
use std::collections::HashMap;
use std::collections::HashSet;

// Pressed-key set, accumulated per-key hold times and the sampled cursor
// position. Hold times accumulate tick by tick and are cleared when a frame
// is submitted, so the pose function always sees "seconds held since the
// frame it is warping away from".
#[derive(Debug, Default)]
pub struct InputState {
    pressed: HashSet<VirtualKeyCode>,
    key_times: HashMap<VirtualKeyCode, f64>,
    cursor_x: f64,
    cursor_y: f64,
}

impl InputState {
    pub fn new() -> InputState {
        InputState::default()
    }

    pub fn key_down(&mut self, key: VirtualKeyCode) {
        self.pressed.insert(key);
    }

    pub fn key_up(&mut self, key: VirtualKeyCode) {
        self.pressed.remove(&key);
    }

    pub fn is_pressed(&self, key: VirtualKeyCode) -> bool {
        self.pressed.contains(&key)
    }

    // Advance the hold time of every pressed key by one tick interval.
    pub fn accumulate(&mut self, dt: f64) {
        for key in &self.pressed {
            *self.key_times.entry(*key).or_insert(0.0) += dt;
        }
    }

    pub fn key_time(&self, key: VirtualKeyCode) -> f64 {
        self.key_times.get(&key).cloned().unwrap_or(0.0)
    }

    pub fn key_times(&self) -> KeyTimes {
        KeyTimes::from_map(&self.key_times)
    }

    // Snapshot for pose prediction: every pressed key reports the shared
    // extrapolated interval instead of its accumulated time.
    pub fn predicted_times(&self, dt: f64) -> KeyTimes {
        KeyTimes::uniform(&self.pressed, dt)
    }

    // Called on submit so the next tick measures from submit time forward.
    pub fn clear_key_times(&mut self) {
        self.key_times.clear();
    }

    pub fn set_cursor(&mut self, x: f64, y: f64) {
        self.cursor_x = x;
        self.cursor_y = y;
    }

    // Captured-cursor path: the windowing layer reports relative motion only,
    // so the library integrates a virtual cursor position itself.
    pub fn move_cursor(&mut self, dx: f64, dy: f64) {
        self.cursor_x += dx;
        self.cursor_y += dy;
    }

    pub fn cursor(&self) -> (f64, f64) {
        (self.cursor_x, self.cursor_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_only_while_pressed() {
        let mut input = InputState::new();
        input.key_down(VirtualKeyCode::W);
        input.accumulate(0.016);
        input.accumulate(0.016);
        input.key_up(VirtualKeyCode::W);
        input.accumulate(0.016);

        assert!((input.key_time(VirtualKeyCode::W) - 0.032).abs() < 1e-12);
        assert_eq!(input.key_time(VirtualKeyCode::A), 0.0);
    }

    #[test]
    fn release_keeps_time_accumulated_so_far() {
        let mut input = InputState::new();
        input.key_down(VirtualKeyCode::Space);
        input.accumulate(0.25);
        input.key_up(VirtualKeyCode::Space);

        // A tap inside the frame interval still counts until the next
        // submit clears it.
        assert_eq!(input.key_time(VirtualKeyCode::Space), 0.25);
        input.clear_key_times();
        assert_eq!(input.key_time(VirtualKeyCode::Space), 0.0);
    }

    #[test]
    fn snapshot_matches_accumulated_times() {
        let mut input = InputState::new();
        input.key_down(VirtualKeyCode::W);
        input.key_down(VirtualKeyCode::D);
        input.accumulate(0.1);
        input.key_up(VirtualKeyCode::D);
        input.accumulate(0.1);

        let times = input.key_times();
        assert!((times.time(VirtualKeyCode::W) - 0.2).abs() < 1e-12);
        assert!((times.time(VirtualKeyCode::D) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn predicted_times_use_the_shared_interval() {
        let mut input = InputState::new();
        input.key_down(VirtualKeyCode::W);
        input.accumulate(3.0);

        let times = input.predicted_times(0.008);
        assert_eq!(times.time(VirtualKeyCode::W), 0.008);
        assert_eq!(times.time(VirtualKeyCode::S), 0.0);
    }

    #[test]
    fn cursor_tracks_absolute_and_relative_updates() {
        let mut input = InputState::new();
        input.set_cursor(320.0, 240.0);
        input.move_cursor(10.0, -5.0);
        assert_eq!(input.cursor(), (330.0, 235.0));
    }
}
