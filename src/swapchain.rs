use gleam::gl;
use gleam::gl::Gl;
use gleam::gl::GLint;
use gleam::gl::GLsizei;
use gleam::gl::GLuint;
use std::rc::Rc;
use std::sync::Condvar;
use std::sync::Mutex;

// Acquire/release protocol of the image ring, kept apart from the GL objects
// so it carries no context requirements. One mutex guards the ring cursor,
// the per-slot acquired flags and the storage dimensions; the condvar wakes
// writers blocked on a slot the reader still holds.
pub(crate) struct ImageRing {
    state: Mutex<RingState>,
    available: Condvar,
}

struct RingState {
    index: usize,
    acquired: Vec<bool>,
    width: i32,
    height: i32,
}

impl ImageRing {
    pub fn new(num_images: usize, width: i32, height: i32) -> ImageRing {
        ImageRing {
            state: Mutex::new(RingState {
                index: 0,
                acquired: vec![false; num_images],
                width: width,
                height: height,
            }),
            available: Condvar::new(),
        }
    }

    // Blocks until the next slot of the ring is no longer held. The cursor
    // only advances on a successful acquire.
    pub fn acquire(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        while state.acquired[state.index] {
            state = self.available.wait(state).unwrap();
        }

        let index = state.index;
        state.acquired[index] = true;
        state.index = (index + 1) % state.acquired.len();
        index
    }

    pub fn release(&self, index: usize) {
        let mut state = self.state.lock().unwrap();
        state.acquired[index] = false;
        self.available.notify_all();
    }

    pub fn dimensions(&self) -> (i32, i32) {
        let state = self.state.lock().unwrap();
        (state.width, state.height)
    }

    // Runs the storage reallocation under the ring mutex so an acquire never
    // interleaves with a resize.
    pub fn resize_with<F: FnOnce()>(&self, width: i32, height: i32, realloc: F) {
        let mut state = self.state.lock().unwrap();
        state.width = width;
        state.height = height;
        realloc();
    }
}

// Ring of color+depth image pairs. The application renders into acquired
// images on its own context while the reprojection loop keeps sampling the
// pair published with the last submitted frame.
pub struct Swapchain {
    gl: Rc<dyn Gl>,
    num_images: usize,
    images: Vec<GLuint>,
    depth_images: Vec<GLuint>,
    fbos: Vec<GLuint>,
    ring: ImageRing,
}

// Shared with the reprojection loop through FrameLayer, but every GL call
// stays on the application context. Cross-thread access is limited to the
// texture ids and the ring protocol.
unsafe impl Send for Swapchain {}
unsafe impl Sync for Swapchain {}

impl Swapchain {
    // The gl handle must come from an initialized reprojection context; the
    // images are shared between both GL contexts.
    pub fn new(gl: Rc<dyn Gl>, width: i32, height: i32, num_images: usize) -> Swapchain {
        let images = gl.gen_textures(num_images as GLsizei);
        for image in &images {
            gl.bind_texture(gl::TEXTURE_2D, *image);
            color_storage(&*gl, width, height);
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as GLint);
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as GLint);
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as GLint);
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as GLint);
        }

        let depth_images = gl.gen_textures(num_images as GLsizei);
        for image in &depth_images {
            gl.bind_texture(gl::TEXTURE_2D, *image);
            depth_storage(&*gl, width, height);
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::NEAREST as GLint);
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::NEAREST as GLint);
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as GLint);
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as GLint);
        }

        let mut previous_fbo_buf = [0i32];
        unsafe {
            gl.get_integer_v(gl::DRAW_FRAMEBUFFER_BINDING, &mut previous_fbo_buf);
        }
        let previous_fbo = previous_fbo_buf[0] as GLuint;

        let fbos = gl.gen_framebuffers(num_images as GLsizei);
        for i in 0..num_images {
            gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, fbos[i]);
            gl.framebuffer_texture_2d(
                gl::DRAW_FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                gl::TEXTURE_2D,
                images[i],
                0,
            );
            gl.framebuffer_texture_2d(
                gl::DRAW_FRAMEBUFFER,
                gl::DEPTH_ATTACHMENT,
                gl::TEXTURE_2D,
                depth_images[i],
                0,
            );
            let status = gl.check_frame_buffer_status(gl::DRAW_FRAMEBUFFER);
            if status != gl::FRAMEBUFFER_COMPLETE {
                error!("Swapchain framebuffer {} incomplete: 0x{:x}", i, status);
            }
        }
        gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, previous_fbo);
        gl.bind_texture(gl::TEXTURE_2D, 0);

        Swapchain {
            gl: gl,
            num_images: num_images,
            images: images,
            depth_images: depth_images,
            fbos: fbos,
            ring: ImageRing::new(num_images, width, height),
        }
    }

    // Reserves an image for rendering. Blocks while the next slot is still
    // referenced by the published frame; the reprojection loop never holds a
    // slot past the submit that replaces it, so the wait is bounded by the
    // application's own submission rate.
    pub fn acquire_image(&self) -> usize {
        self.ring.acquire()
    }

    // Makes the slot's framebuffer the current render target.
    pub fn bind_framebuffer(&self, index: usize) {
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, self.fbos[index]);
    }

    // Reallocates the backing storage of every slot. Filter and wrap state
    // is texture state and survives; outstanding handles stay valid but
    // their contents are undefined afterwards.
    pub fn resize(&self, width: i32, height: i32) {
        let gl = &self.gl;
        self.ring.resize_with(width, height, || {
            for image in &self.images {
                gl.bind_texture(gl::TEXTURE_2D, *image);
                color_storage(&**gl, width, height);
            }
            for image in &self.depth_images {
                gl.bind_texture(gl::TEXTURE_2D, *image);
                depth_storage(&**gl, width, height);
            }
            gl.bind_texture(gl::TEXTURE_2D, 0);
        });
    }

    // Returns a slot to the ring. Called by the frame exchange when a newer
    // frame replaces the one referencing this slot; applications do not call
    // this themselves.
    pub fn release_image(&self, index: usize) {
        self.ring.release(index);
    }

    pub fn width(&self) -> i32 {
        self.ring.dimensions().0
    }

    pub fn height(&self) -> i32 {
        self.ring.dimensions().1
    }

    pub fn num_images(&self) -> usize {
        self.num_images
    }

    pub fn color_texture(&self, index: usize) -> GLuint {
        self.images[index]
    }

    pub fn depth_texture(&self, index: usize) -> GLuint {
        self.depth_images[index]
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.gl.delete_framebuffers(&self.fbos);
        self.gl.delete_textures(&self.images);
        self.gl.delete_textures(&self.depth_images);
    }
}

fn color_storage(gl: &dyn Gl, width: i32, height: i32) {
    gl.tex_image_2d(
        gl::TEXTURE_2D,
        0,
        gl::RGB as GLint,
        width,
        height,
        0,
        gl::RGB,
        gl::UNSIGNED_BYTE,
        None,
    );
}

fn depth_storage(gl: &dyn Gl, width: i32, height: i32) {
    gl.tex_image_2d(
        gl::TEXTURE_2D,
        0,
        gl::DEPTH_COMPONENT24 as GLint,
        width,
        height,
        0,
        gl::DEPTH_COMPONENT,
        gl::FLOAT,
        None,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_cycles_through_every_slot() {
        let ring = ImageRing::new(3, 64, 64);
        assert_eq!(ring.acquire(), 0);
        assert_eq!(ring.acquire(), 1);
        assert_eq!(ring.acquire(), 2);
    }

    #[test]
    fn released_slot_can_be_reacquired_in_ring_order() {
        let ring = ImageRing::new(2, 64, 64);
        assert_eq!(ring.acquire(), 0);
        ring.release(0);
        assert_eq!(ring.acquire(), 1);
        assert_eq!(ring.acquire(), 0);
    }

    #[test]
    fn acquire_blocks_until_the_held_slot_is_released() {
        let ring = Arc::new(ImageRing::new(2, 64, 64));
        assert_eq!(ring.acquire(), 0);
        assert_eq!(ring.acquire(), 1);

        let (sender, receiver) = mpsc::channel();
        let writer = {
            let ring = ring.clone();
            thread::spawn(move || {
                let index = ring.acquire();
                sender.send(index).unwrap();
            })
        };

        // Both slots are held, so the third acquire must be parked.
        assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());

        ring.release(0);
        assert_eq!(receiver.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
        writer.join().unwrap();
    }

    #[test]
    fn resize_updates_dimensions_under_the_ring_lock() {
        let ring = ImageRing::new(2, 64, 64);
        let mut realloc_ran = false;
        ring.resize_with(320, 240, || realloc_ran = true);
        assert!(realloc_ran);
        assert_eq!(ring.dimensions(), (320, 240));
    }
}
