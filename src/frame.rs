use crate::pose::Pose;
use crate::pose::PoseInfo;
use crate::swapchain::Swapchain;
use std::sync::Arc;

bitflags! {
    // Per-layer treatment during reprojection.
    pub struct FrameLayerFlags: u32 {
        // Changes in camera position are approximated by parallax mapping
        // against the layer's depth texture.
        const PARALLAX_ENABLED = 1 << 0;
        // Layer follows the live camera orientation and stays fixed in
        // screen space. Meant for HUDs.
        const CAMERA_LOCKED = 1 << 1;
    }
}

impl Default for FrameLayerFlags {
    fn default() -> FrameLayerFlags {
        FrameLayerFlags::empty()
    }
}

// One element of the composited output. The layer keeps the swapchain image
// it was rendered into acquired until the frame after this one is submitted.
#[derive(Clone)]
pub struct FrameLayer {
    // Vertical field of view the layer was rendered with, in radians.
    pub fov: f32,
    pub flags: FrameLayerFlags,
    pub swapchain: Arc<Swapchain>,
    pub swapchain_index: usize,
}

// Everything the reprojection loop needs to keep re-presenting a frame:
// the pose it was rendered from, the inputs that produced that pose, and
// the layers to composite.
#[derive(Clone, Default)]
pub struct FrameSubmitInfo {
    pub pose: Pose,
    pub pose_info: PoseInfo,
    pub layers: Vec<FrameLayer>,
}
