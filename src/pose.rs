use euclid::Rotation3D;
use euclid::Vector3D;
use glutin::VirtualKeyCode;
use std::collections::HashMap;
use std::collections::HashSet;

// Number of opaque payload bytes carried by value inside every Pose.
pub const POSE_PAYLOAD_SIZE: usize = 64;

// Position and orientation of the virtual camera.
//
// The payload is application state the library copies around but never
// interprets. Pose functions can use it to carry accumulated input (for
// example pitch/yaw angles) from one pose to the next without side effects.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub position: Vector3D<f32>,
    // Unit quaternion.
    pub orientation: Rotation3D<f32>,
    pub payload: [u8; POSE_PAYLOAD_SIZE],
}

impl Default for Pose {
    fn default() -> Pose {
        Pose {
            position: Vector3D::zero(),
            orientation: Rotation3D::identity(),
            payload: [0; POSE_PAYLOAD_SIZE],
        }
    }
}

// The absolute inputs a pose was derived from: cursor position, the sample
// time in seconds on the library clock, and a copy of the pose itself so
// prediction can extrapolate from it. Always copied by value.
#[derive(Clone, Copy, Debug, Default)]
pub struct PoseInfo {
    pub mouse_x: f64,
    pub mouse_y: f64,
    pub time: f64,
    pub real_pose: Pose,
}

// By-value snapshot of per-key hold times handed to a pose function. Taking
// a snapshot rather than sharing the live accumulator keeps the pose function
// callable from both threads without extra locking.
#[derive(Clone, Debug, Default)]
pub struct KeyTimes {
    times: HashMap<VirtualKeyCode, f64>,
}

impl KeyTimes {
    // Seconds the key has been held since the last submitted frame, 0.0 for
    // keys that were never pressed in that interval.
    pub fn time(&self, key: VirtualKeyCode) -> f64 {
        self.times.get(&key).cloned().unwrap_or(0.0)
    }

    pub(crate) fn from_map(times: &HashMap<VirtualKeyCode, f64>) -> KeyTimes {
        KeyTimes {
            times: times.clone(),
        }
    }

    // Prediction snapshot: every currently pressed key reports the same
    // extrapolated interval.
    pub(crate) fn uniform(pressed: &HashSet<VirtualKeyCode>, dt: f64) -> KeyTimes {
        KeyTimes {
            times: pressed.iter().map(|key| (*key, dt)).collect(),
        }
    }
}

// Application-supplied mapping from input deltas to a camera pose. The
// function MUST be free of side effects: it is called from both threads and
// possibly several times per displayed frame, and its result is never cached.
//
// original - the pose the deltas are relative to
// dx, dy   - cursor movement in pixels since that pose
// dt       - seconds elapsed since that pose
// keys     - per-key hold times since the last submitted frame
pub type PoseFunction =
    fn(original: &Pose, dx: f64, dy: f64, dt: f64, keys: &KeyTimes) -> Pose;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pose_is_identity() {
        let pose = Pose::default();
        assert_eq!(pose.position, Vector3D::zero());
        assert_eq!(pose.orientation, Rotation3D::identity());
        assert!(pose.payload.iter().all(|byte| *byte == 0));
    }

    #[test]
    fn key_times_report_zero_for_absent_keys() {
        let times = KeyTimes::default();
        assert_eq!(times.time(VirtualKeyCode::W), 0.0);
    }

    #[test]
    fn uniform_key_times_cover_exactly_the_pressed_set() {
        let mut pressed = HashSet::new();
        pressed.insert(VirtualKeyCode::W);
        pressed.insert(VirtualKeyCode::A);

        let times = KeyTimes::uniform(&pressed, 0.25);
        assert_eq!(times.time(VirtualKeyCode::W), 0.25);
        assert_eq!(times.time(VirtualKeyCode::A), 0.25);
        assert_eq!(times.time(VirtualKeyCode::S), 0.0);
    }
}
