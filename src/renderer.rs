use crate::frame::FrameLayer;
use crate::frame::FrameLayerFlags;
use crate::pose::Pose;
use euclid::RigidTransform3D;
use euclid::Transform3D;
use gleam::gl;
use gleam::gl::Gl;
use gleam::gl::GLenum;
use gleam::gl::GLint;
use gleam::gl::GLuint;
use std::collections::HashMap;
use std::f32::consts::FRAC_PI_2;
use std::rc::Rc;

// Upper bound on ray-march steps in the parallax fragment shader.
pub const MAX_PARALLAX_ITERATIONS: u32 = 64;

// Unit quad drawn as a 4-vertex triangle strip.
static QUAD_VERTICES: [f32; 12] = [
    -1.0, -1.0, 0.0, // bottom left
    -1.0, 1.0, 0.0, // top left
    1.0, -1.0, 0.0, // bottom right
    1.0, 1.0, 0.0, // top right
];

const DEFAULT_VS: &str = r#"#version 330 core
in vec3 pos;
uniform mat4 model;
uniform mat4 view;
uniform mat4 projection;
out vec2 texCoords;
void main() {
    gl_Position = projection * view * model * vec4(pos, 1.0);
    texCoords = (pos.xy + vec2(1.0, 1.0)) * 0.5;
}
"#;

const DEFAULT_FS: &str = r#"#version 330 core
layout(location = 0) out vec4 color;
in vec2 texCoords;
uniform sampler2D tex;
void main() {
    color = texture(tex, texCoords);
}
"#;

const PARALLAX_VS: &str = r#"#version 330 core
in vec3 pos;
uniform mat4 model;
uniform mat4 view;
uniform mat4 projection;
uniform vec3 cameraPos;
out vec3 cameraToFrag;
void main() {
    vec4 worldPos = model * vec4(pos, 1.0);
    gl_Position = projection * view * worldPos;
    cameraToFrag = worldPos.xyz - cameraPos;
}
"#;

// Marches from the live camera towards the fragment's world position,
// reprojecting every probe into the submitted frame until it sinks below
// the depth that frame recorded. MAX_STEPS is patched in at build time.
const PARALLAX_FS: &str = r#"#version 330 core
layout(location = 0) out vec4 color;
in vec3 cameraToFrag;
uniform sampler2D tex;
uniform sampler2D depthTex;
uniform vec3 cameraPos;
uniform mat4 submitViewProjection;
const int MAX_STEPS = {MAX_STEPS};
vec3 submitMapped(vec3 probe) {
    vec4 clip = submitViewProjection * vec4(probe, 1.0);
    return (clip.xyz / clip.w) * 0.5 + 0.5;
}
void main() {
    for (int i = 1; i <= MAX_STEPS; i++) {
        float t = float(i) / float(MAX_STEPS);
        vec3 mapped = submitMapped(cameraPos + t * cameraToFrag);
        if (mapped.z >= texture(depthTex, mapped.xy).r) {
            color = texture(tex, mapped.xy);
            return;
        }
    }
    // Nothing occluded the ray; the quad itself is the hit.
    vec3 mapped = submitMapped(cameraPos + cameraToFrag);
    color = texture(tex, mapped.xy);
}
"#;

// Application projection parameters and the matrix the reprojection pass
// derives from them. The derived far plane sits at twice the application's
// so the warp quad placed at -far stays inside the clip volume.
#[derive(Clone, Copy, Debug)]
pub struct Projection {
    pub near: f32,
    pub far: f32,
    pub fov_y: f32,
    pub aspect: f32,
    matrix: Transform3D<f32>,
}

impl Projection {
    pub fn new(near: f32, far: f32, fov_y: f32, aspect: f32) -> Projection {
        Projection {
            near: near,
            far: far,
            fov_y: fov_y,
            aspect: aspect,
            matrix: perspective(fov_y, aspect, near, far * 2.0),
        }
    }

    pub fn matrix(&self) -> &Transform3D<f32> {
        &self.matrix
    }
}

impl Default for Projection {
    fn default() -> Projection {
        Projection::new(0.1, 100.0, FRAC_PI_2, 1.0)
    }
}

// gl-matrix style perspective, stored in euclid's row-vector convention so
// to_row_major_array() uploads directly as a GL column-major matrix.
fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Transform3D<f32> {
    let f = 1.0 / (fov_y / 2.0).tan();
    let nf = 1.0 / (near - far);

    #[rustfmt::skip]
    return Transform3D::row_major(
        f / aspect, 0.0, 0.0,                     0.0,
        0.0,        f,   0.0,                     0.0,
        0.0,        0.0, (far + near) * nf,       -1.0,
        0.0,        0.0, 2.0 * far * near * nf,   0.0,
    );
}

// How a layer is warped, decided per draw from its flags and the current
// camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LayerPath {
    Default,
    CameraLocked,
    Parallax,
}

pub(crate) fn select_path(
    flags: FrameLayerFlags,
    frame_pose: &Pose,
    camera_pose: &Pose,
) -> LayerPath {
    if flags.contains(FrameLayerFlags::CAMERA_LOCKED) {
        return LayerPath::CameraLocked;
    }
    // Without a position difference every ray resolves at its own texel, so
    // the plain quad path renders the same image without the march.
    if flags.contains(FrameLayerFlags::PARALLAX_ENABLED)
        && frame_pose.position != camera_pose.position
    {
        return LayerPath::Parallax;
    }
    LayerPath::Default
}

pub(crate) struct LayerMatrices {
    pub model: Transform3D<f32>,
    pub view: Transform3D<f32>,
}

// The model matrix places a unit quad so it exactly fills the submitted
// camera's frustum at the far plane; the view matrix re-observes it with the
// live orientation. Translation is ignored by the view except on the
// parallax path, which is the only one able to approximate it. A
// camera-locked quad instead takes the live orientation for the model too,
// cancelling the rotation between model and view.
pub(crate) fn layer_matrices(
    path: LayerPath,
    fov_y: f32,
    frame_pose: &Pose,
    camera_pose: &Pose,
    projection: &Projection,
) -> LayerMatrices {
    let far = projection.far;
    // TODO: let layers carry their own aspect ratio instead of inheriting
    // the projection's.
    let fov_x = projection.aspect * fov_y;
    let x_scale = far * (fov_x / 2.0).tan();
    let y_scale = far * (fov_y / 2.0).tan();

    let scale = Transform3D::create_scale(x_scale, y_scale, 1.0);
    let far_offset = Transform3D::create_translation(0.0, 0.0, -far);

    let quad_orientation = match path {
        LayerPath::CameraLocked => camera_pose.orientation,
        _ => frame_pose.orientation,
    };
    let anchor = RigidTransform3D::new(quad_orientation, frame_pose.position);
    let model = scale.post_mul(&far_offset).post_mul(&anchor.to_transform());

    let eye_position = match path {
        LayerPath::Parallax => camera_pose.position,
        _ => frame_pose.position,
    };
    let camera = RigidTransform3D::new(camera_pose.orientation, eye_position);
    let view = camera.inverse().to_transform();

    LayerMatrices {
        model: model,
        view: view,
    }
}

// World-to-clip transform of the frame as it was submitted; the parallax
// shader projects its probes with this to look up the recorded depth.
fn submitted_view_projection(frame_pose: &Pose, projection: &Projection) -> Transform3D<f32> {
    let camera = RigidTransform3D::new(frame_pose.orientation, frame_pose.position);
    camera.inverse().to_transform().post_mul(projection.matrix())
}

struct Program {
    id: GLuint,
    locations: HashMap<&'static str, GLint>,
}

impl Program {
    fn loc(&self, uniform: &'static str) -> GLint {
        self.locations.get(uniform).cloned().unwrap_or(-1)
    }
}

// Draws the layers of the last submitted frame as world-anchored quads.
// Owns the quad geometry and the two programs; all calls happen on the
// on-screen context.
pub(crate) struct LayerRenderer {
    gl: Rc<dyn Gl>,
    vao: GLuint,
    quad: GLuint,
    default_program: Program,
    parallax_program: Program,
}

impl LayerRenderer {
    pub fn new(gl: Rc<dyn Gl>) -> LayerRenderer {
        let vao = gl.gen_vertex_arrays(1)[0];
        gl.bind_vertex_array(vao);

        let quad = gl.gen_buffers(1)[0];
        gl.bind_buffer(gl::ARRAY_BUFFER, quad);
        gl::buffer_data(&*gl, gl::ARRAY_BUFFER, &QUAD_VERTICES, gl::STATIC_DRAW);

        // Both programs bind "pos" to attribute 0, so one quad setup serves
        // them both.
        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer(0, 3, gl::FLOAT, false, 0, 0);

        let default_program = build_program(
            &*gl,
            DEFAULT_VS,
            DEFAULT_FS,
            &["model", "view", "projection", "tex"],
        );
        let parallax_fs = PARALLAX_FS.replace("{MAX_STEPS}", &MAX_PARALLAX_ITERATIONS.to_string());
        let parallax_program = build_program(
            &*gl,
            PARALLAX_VS,
            &parallax_fs,
            &[
                "model",
                "view",
                "projection",
                "tex",
                "depthTex",
                "cameraPos",
                "submitViewProjection",
            ],
        );

        LayerRenderer {
            gl: gl,
            vao: vao,
            quad: quad,
            default_program: default_program,
            parallax_program: parallax_program,
        }
    }

    pub fn clear(&self) {
        self.gl.clear(gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT);
    }

    pub fn draw_layer(
        &self,
        layer: &FrameLayer,
        frame_pose: &Pose,
        camera_pose: &Pose,
        projection: &Projection,
    ) {
        let path = select_path(layer.flags, frame_pose, camera_pose);
        let matrices = layer_matrices(path, layer.fov, frame_pose, camera_pose, projection);

        let program = match path {
            LayerPath::Parallax => &self.parallax_program,
            _ => &self.default_program,
        };
        if program.id == 0 {
            // Build failure was already logged; nothing sensible to draw.
            return;
        }

        let gl = &self.gl;
        gl.use_program(program.id);
        gl.uniform_matrix_4fv(program.loc("model"), false, &matrices.model.to_row_major_array());
        gl.uniform_matrix_4fv(program.loc("view"), false, &matrices.view.to_row_major_array());
        gl.uniform_matrix_4fv(
            program.loc("projection"),
            false,
            &projection.matrix().to_row_major_array(),
        );

        gl.active_texture(gl::TEXTURE0);
        gl.bind_texture(
            gl::TEXTURE_2D,
            layer.swapchain.color_texture(layer.swapchain_index),
        );
        gl.uniform_1i(program.loc("tex"), 0);

        if path == LayerPath::Parallax {
            gl.active_texture(gl::TEXTURE1);
            gl.bind_texture(
                gl::TEXTURE_2D,
                layer.swapchain.depth_texture(layer.swapchain_index),
            );
            gl.uniform_1i(program.loc("depthTex"), 1);

            let eye = camera_pose.position;
            gl.uniform_3f(program.loc("cameraPos"), eye.x, eye.y, eye.z);
            gl.uniform_matrix_4fv(
                program.loc("submitViewProjection"),
                false,
                &submitted_view_projection(frame_pose, projection).to_row_major_array(),
            );
            gl.active_texture(gl::TEXTURE0);
        }

        gl.bind_vertex_array(self.vao);
        gl.draw_arrays(gl::TRIANGLE_STRIP, 0, 4);
    }
}

impl Drop for LayerRenderer {
    fn drop(&mut self) {
        if self.default_program.id != 0 {
            self.gl.delete_program(self.default_program.id);
        }
        if self.parallax_program.id != 0 {
            self.gl.delete_program(self.parallax_program.id);
        }
        self.gl.delete_buffers(&[self.quad]);
        self.gl.delete_vertex_arrays(&[self.vao]);
    }
}

fn build_shader(gl: &dyn Gl, source: &str, shader_type: GLenum) -> GLuint {
    let shader = gl.create_shader(shader_type);
    gl.shader_source(shader, &[source.as_bytes()]);
    gl.compile_shader(shader);
    let mut status = [0i32];
    unsafe {
        gl.get_shader_iv(shader, gl::COMPILE_STATUS, &mut status);
    }
    if status[0] == 0 {
        error!(
            "Failed to compile shader: {}",
            gl.get_shader_info_log(shader)
        );
        gl.delete_shader(shader);
        return 0;
    }
    shader
}

// Builds a program or logs the driver's info log and leaves the id at 0, in
// which case draws through it are skipped.
fn build_program(
    gl: &dyn Gl,
    vs_source: &str,
    fs_source: &str,
    uniforms: &[&'static str],
) -> Program {
    let unusable = Program {
        id: 0,
        locations: HashMap::new(),
    };

    let vs = build_shader(gl, vs_source, gl::VERTEX_SHADER);
    let fs = build_shader(gl, fs_source, gl::FRAGMENT_SHADER);
    if vs == 0 || fs == 0 {
        return unusable;
    }

    let program = gl.create_program();
    gl.attach_shader(program, vs);
    gl.attach_shader(program, fs);
    gl.bind_attrib_location(program, 0, "pos");
    gl.link_program(program);
    gl.delete_shader(vs);
    gl.delete_shader(fs);

    let mut status = [0i32];
    unsafe {
        gl.get_program_iv(program, gl::LINK_STATUS, &mut status);
    }
    if status[0] == 0 {
        error!(
            "Failed to link program: {}",
            gl.get_program_info_log(program)
        );
        gl.delete_program(program);
        return unusable;
    }

    let mut locations = HashMap::new();
    for uniform in uniforms {
        let loc = gl.get_uniform_location(program, uniform);
        if loc == -1 {
            warn!("Program is missing uniform {:?}", uniform);
        }
        locations.insert(*uniform, loc);
    }

    Program {
        id: program,
        locations: locations,
    }
}
