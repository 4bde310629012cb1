// Asynchronous reprojection for OpenGL applications. The application renders
// off screen at its own rate on a hidden shared context; the reprojection
// loop re-presents the most recent frame from the up-to-the-moment camera
// pose at display rate, so input stays responsive even when rendering is
// slow.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

pub mod context;
mod exchange;
pub mod frame;
pub mod input;
pub mod pose;
pub mod pose_history;
mod renderer;
mod reprojection;
pub mod swapchain;

pub use crate::context::AppContext;
pub use crate::context::ReprojectionContext;
pub use crate::frame::FrameLayer;
pub use crate::frame::FrameLayerFlags;
pub use crate::frame::FrameSubmitInfo;
pub use crate::input::InputState;
pub use crate::pose::KeyTimes;
pub use crate::pose::Pose;
pub use crate::pose::PoseFunction;
pub use crate::pose::PoseInfo;
pub use crate::pose::POSE_PAYLOAD_SIZE;
pub use crate::pose_history::PoseHistory;
pub use crate::pose_history::HISTORY_SIZE;
pub use crate::renderer::Projection;
pub use crate::renderer::MAX_PARALLAX_ITERATIONS;
pub use crate::reprojection::EventCallback;
pub use crate::swapchain::Swapchain;
