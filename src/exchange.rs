use crate::frame::FrameSubmitInfo;
use crate::pose::Pose;
use crate::pose::PoseInfo;
use crate::pose_history::PoseHistory;
use std::mem;

// The hand-off point between the two threads: the most recently submitted
// frame and the live camera pose derived from it, together with the pose
// history feeding prediction. One instance lives behind the exchange mutex.
pub(crate) struct FrameExchange {
    pub frame_valid: bool,
    pub last_frame: FrameSubmitInfo,
    pub camera_pose: Pose,
    pub camera_pose_info: PoseInfo,
    pub history: PoseHistory,
}

impl FrameExchange {
    pub fn new() -> FrameExchange {
        FrameExchange {
            frame_valid: false,
            last_frame: FrameSubmitInfo::default(),
            camera_pose: Pose::default(),
            camera_pose_info: PoseInfo::default(),
            history: PoseHistory::new(),
        }
    }

    // Publishes a submitted frame and hands back the frame it replaces, so
    // the caller can release the old frame's swapchain images once the
    // exchange is unlocked again. A reader always observes either the old
    // frame whole or the new frame whole.
    pub fn publish(&mut self, info: FrameSubmitInfo) -> FrameSubmitInfo {
        self.history.push(info.pose_info);
        let previous = mem::replace(&mut self.last_frame, info);
        self.frame_valid = true;
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_at(time: f64) -> FrameSubmitInfo {
        FrameSubmitInfo {
            pose_info: PoseInfo {
                time: time,
                ..PoseInfo::default()
            },
            ..FrameSubmitInfo::default()
        }
    }

    #[test]
    fn publish_latches_frame_valid() {
        let mut exchange = FrameExchange::new();
        assert!(!exchange.frame_valid);
        exchange.publish(frame_at(0.1));
        assert!(exchange.frame_valid);
        exchange.publish(frame_at(0.2));
        assert!(exchange.frame_valid);
    }

    #[test]
    fn publish_returns_the_replaced_frame() {
        let mut exchange = FrameExchange::new();
        exchange.publish(frame_at(1.0));
        let previous = exchange.publish(frame_at(2.0));
        assert_eq!(previous.pose_info.time, 1.0);
        assert_eq!(exchange.last_frame.pose_info.time, 2.0);
    }

    #[test]
    fn publish_records_the_pose_history() {
        let mut exchange = FrameExchange::new();
        for time in &[0.0, 0.016, 0.032] {
            exchange.publish(frame_at(*time));
        }
        assert_eq!(exchange.history.len(), 3);
        assert!((exchange.history.predicted_display_time() - 0.048).abs() < 1e-9);
    }
}
