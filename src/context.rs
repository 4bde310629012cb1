use crate::exchange::FrameExchange;
use crate::frame::FrameLayer;
use crate::frame::FrameSubmitInfo;
use crate::input::InputState;
use crate::pose::Pose;
use crate::pose::PoseFunction;
use crate::pose::PoseInfo;
use crate::renderer::Projection;
use crate::reprojection::EventCallback;
use crate::reprojection::ReprojectionLoop;
use crate::swapchain::Swapchain;
use gleam::gl;
use gleam::gl::Gl;
use glutin::dpi::PhysicalSize;
use glutin::Api;
use glutin::ContextBuilder;
use glutin::EventsLoop;
use glutin::GlProfile;
use glutin::GlRequest;
use glutin::PossiblyCurrent;
use glutin::WindowedContext;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread;

// State shared between the reprojection loop and the application thread.
// Lock order where both are needed: input before exchange, never reversed.
// The swapchain ring mutex is never held together with either.
pub(crate) struct Shared {
    exchange: Mutex<FrameExchange>,
    input: Mutex<InputState>,
    projection: Mutex<Projection>,
    pose_function: Mutex<Option<PoseFunction>>,
    cursor_captured: AtomicBool,
    should_close: AtomicBool,
    start_time: f64,
}

// What one reprojection tick hands to the renderer: the published frame (if
// any) as a consistent snapshot, plus the freshly derived camera pose.
pub(crate) struct TickState {
    pub frame: Option<(Pose, Vec<FrameLayer>)>,
    pub camera_pose: Pose,
    pub projection: Projection,
}

impl Shared {
    pub fn new() -> Shared {
        Shared {
            exchange: Mutex::new(FrameExchange::new()),
            input: Mutex::new(InputState::new()),
            projection: Mutex::new(Projection::default()),
            pose_function: Mutex::new(None),
            cursor_captured: AtomicBool::new(false),
            should_close: AtomicBool::new(false),
            start_time: time::precise_time_s(),
        }
    }

    // Monotonic seconds since the context was created.
    pub fn now(&self) -> f64 {
        time::precise_time_s() - self.start_time
    }

    pub fn input(&self) -> MutexGuard<InputState> {
        self.input.lock().unwrap()
    }

    pub fn register_pose_function(&self, function: PoseFunction) {
        *self.pose_function.lock().unwrap() = Some(function);
    }

    pub fn pose_function(&self) -> Option<PoseFunction> {
        *self.pose_function.lock().unwrap()
    }

    pub fn update_projection(&self, near: f32, far: f32, fov_y: f32, aspect: f32) {
        *self.projection.lock().unwrap() = Projection::new(near, far, fov_y, aspect);
    }

    pub fn projection(&self) -> Projection {
        *self.projection.lock().unwrap()
    }

    pub fn cursor_captured(&self) -> bool {
        self.cursor_captured.load(Ordering::Relaxed)
    }

    pub fn set_cursor_captured(&self, captured: bool) {
        self.cursor_captured.store(captured, Ordering::Relaxed);
    }

    pub fn should_close(&self) -> bool {
        self.should_close.load(Ordering::SeqCst)
    }

    pub fn request_close(&self) {
        self.should_close.store(true, Ordering::SeqCst);
    }

    pub fn get_camera_pose(&self) -> (Pose, PoseInfo) {
        let exchange = self.exchange.lock().unwrap();
        (exchange.camera_pose, exchange.camera_pose_info)
    }

    pub fn get_predicted_display_time(&self) -> f64 {
        self.exchange.lock().unwrap().history.predicted_display_time()
    }

    pub fn get_predicted_camera_pose(&self, target_time: f64) -> (Pose, PoseInfo) {
        let now = self.now();
        self.predicted_camera_pose_at(target_time, now)
    }

    // Prediction halves the deltas to land midway between the last submitted
    // frame and the forecast next one. `now` is a parameter so tests stay
    // deterministic.
    fn predicted_camera_pose_at(&self, target_time: f64, now: f64) -> (Pose, PoseInfo) {
        let function = match self.pose_function() {
            Some(function) => function,
            None => {
                warn!("Pose prediction requested with no pose function registered");
                return self.get_camera_pose();
            }
        };

        let dt = 0.5 * (target_time - now);
        // The snapshot carries the pressed keys by value, so the pose
        // function needs no access to live input state.
        let keys = self.input.lock().unwrap().predicted_times(dt);

        let exchange = self.exchange.lock().unwrap();
        let dx = 0.5 * (exchange.camera_pose_info.mouse_x - exchange.last_frame.pose_info.mouse_x);
        let dy = 0.5 * (exchange.camera_pose_info.mouse_y - exchange.last_frame.pose_info.mouse_y);

        let pose = function(&exchange.camera_pose, dx, dy, dt, &keys);
        (pose, exchange.camera_pose_info)
    }

    // Publishes a frame. The caller is responsible for flushing its GL
    // context first so the images are fully written before the reader
    // samples them.
    pub fn submit_frame(&self, info: FrameSubmitInfo) {
        let previous = {
            let mut exchange = self.exchange.lock().unwrap();
            exchange.publish(info)
        };

        // The old frame's images are released only now that the new frame
        // is published, so a tick that already copied the old layer list
        // keeps drawing pinned images.
        for layer in &previous.layers {
            layer.swapchain.release_image(layer.swapchain_index);
        }

        self.input.lock().unwrap().clear_key_times();
    }

    // One reprojection tick's bookkeeping: accumulate key hold times, sample
    // the cursor, derive the live camera pose from the last submitted frame.
    pub fn advance_camera(&self, time: f64, tick_interval: f64) -> TickState {
        let function = self.pose_function();
        let captured = self.cursor_captured();

        let mut input = self.input.lock().unwrap();
        input.accumulate(tick_interval);
        let (cursor_x, cursor_y) = input.cursor();
        let keys = input.key_times();

        let mut exchange = self.exchange.lock().unwrap();
        exchange.camera_pose_info.mouse_x = cursor_x;
        exchange.camera_pose_info.mouse_y = cursor_y;
        exchange.camera_pose_info.time = time;

        let mut dx = cursor_x - exchange.last_frame.pose_info.mouse_x;
        let mut dy = cursor_y - exchange.last_frame.pose_info.mouse_y;
        let dt = time - exchange.last_frame.pose_info.time;
        if !captured {
            dx = 0.0;
            dy = 0.0;
        }

        if let Some(function) = function {
            let pose = function(&exchange.last_frame.pose_info.real_pose, dx, dy, dt, &keys);
            exchange.camera_pose = pose;
            exchange.camera_pose_info.real_pose = pose;
        }

        TickState {
            frame: if exchange.frame_valid {
                Some((
                    exchange.last_frame.pose,
                    exchange.last_frame.layers.clone(),
                ))
            } else {
                None
            },
            camera_pose: exchange.camera_pose,
            projection: self.projection(),
        }
    }
}

// Owner of the on-screen window context and entry point of the library.
// Construction stands in for initialization: it requires the context to be
// current and loads the GL function table against it. start_reprojection
// then takes over the calling thread until shutdown.
pub struct ReprojectionContext {
    window: WindowedContext<PossiblyCurrent>,
    events_loop: EventsLoop,
    gl: Rc<dyn Gl>,
    shared: Arc<Shared>,
    event_callback: Option<EventCallback>,
}

impl ReprojectionContext {
    pub fn new(
        window: WindowedContext<PossiblyCurrent>,
        events_loop: EventsLoop,
    ) -> Result<ReprojectionContext, String> {
        if !window.is_current() {
            error!("Cannot initialize reprojection without a current GL context");
            return Err("GL context is not current".into());
        }

        let gl = unsafe { gl::GlFns::load_with(|symbol| window.get_proc_address(symbol) as *const _) };

        Ok(ReprojectionContext {
            window: window,
            events_loop: events_loop,
            gl: gl,
            shared: Arc::new(Shared::new()),
            event_callback: None,
        })
    }

    // The pose function must be registered before reprojection starts. It is
    // invoked fresh for every live and predicted pose; see PoseFunction for
    // the purity requirement.
    pub fn register_pose_function(&self, function: PoseFunction) {
        self.shared.register_pose_function(function);
    }

    pub fn update_projection(&self, near: f32, far: f32, fov_y: f32, aspect: f32) {
        self.shared.update_projection(near, far, fov_y, aspect);
    }

    // The callback sees every window event after the library's own handling,
    // the way a chained input callback would.
    pub fn register_event_callback(&mut self, callback: EventCallback) {
        self.event_callback = Some(callback);
    }

    pub fn capture_cursor(&self) {
        self.shared.set_cursor_captured(true);
    }

    pub fn release_cursor(&self) {
        self.shared.set_cursor_captured(false);
    }

    pub fn get_camera_pose(&self) -> (Pose, PoseInfo) {
        self.shared.get_camera_pose()
    }

    pub fn get_predicted_display_time(&self) -> f64 {
        self.shared.get_predicted_display_time()
    }

    pub fn get_predicted_camera_pose(&self, time: f64) -> (Pose, PoseInfo) {
        self.shared.get_predicted_camera_pose(time)
    }

    // Cooperative shutdown: the loop exits at its next tick boundary and the
    // application observes should_close() on its own.
    pub fn shutdown(&self) {
        self.shared.request_close();
    }

    // Spawns the application thread against a hidden shared context and runs
    // the reprojection loop on the calling thread until shutdown. The
    // application renders off screen only, so a 1x1 headless context sharing
    // the window's GL objects stands in for a hidden window.
    pub fn start_reprojection<F>(self, callback: F) -> Result<(), String>
    where
        F: FnOnce(AppContext) + Send + 'static,
    {
        if self.shared.pose_function().is_none() {
            error!("No pose function registered, not starting reprojection");
            return Err("no pose function registered".into());
        }

        let ReprojectionContext {
            window,
            mut events_loop,
            gl,
            shared,
            event_callback,
        } = self;

        let headless = ContextBuilder::new()
            .with_gl(GlRequest::Specific(Api::OpenGl, (3, 2)))
            .with_gl_profile(GlProfile::Core)
            .with_shared_lists(window.context())
            .build_headless(&events_loop, PhysicalSize::new(1.0, 1.0))
            .map_err(|err| {
                error!("Failed to create shared application context: {:?}", err);
                format!("failed to create shared context: {:?}", err)
            })?;

        let app_shared = shared.clone();
        let app_thread = thread::Builder::new()
            .name("arp-application".into())
            .spawn(move || {
                let headless = match unsafe { headless.make_current() } {
                    Ok(context) => context,
                    Err((_, err)) => {
                        error!("Failed to make application context current: {:?}", err);
                        app_shared.request_close();
                        return;
                    }
                };
                let gl = unsafe {
                    gl::GlFns::load_with(|symbol| headless.get_proc_address(symbol) as *const _)
                };

                callback(AppContext {
                    gl: gl,
                    shared: app_shared.clone(),
                });

                // The application has finished; bring the loop down with it.
                app_shared.request_close();
            })
            .map_err(|err| format!("failed to spawn application thread: {}", err))?;

        ReprojectionLoop::new(window, gl, shared, event_callback).run(&mut events_loop);

        if app_thread.join().is_err() {
            error!("Application thread panicked");
        }

        Ok(())
    }
}

// Handle given to the application callback on its own thread, standing in
// for the hidden window of the underlying protocol: rendering goes through
// gl() and swapchains, poses and frames through the shared state.
pub struct AppContext {
    gl: Rc<dyn Gl>,
    shared: Arc<Shared>,
}

impl AppContext {
    // GL function table of the hidden context. Objects created through it
    // are shared with the on-screen context.
    pub fn gl(&self) -> &Rc<dyn Gl> {
        &self.gl
    }

    pub fn create_swapchain(&self, width: i32, height: i32, num_images: usize) -> Arc<Swapchain> {
        Arc::new(Swapchain::new(self.gl.clone(), width, height, num_images))
    }

    // Seconds on the library clock; PoseInfo times and predicted display
    // times are on the same axis.
    pub fn now(&self) -> f64 {
        self.shared.now()
    }

    // True once shutdown was requested from either side. The application
    // loop is expected to poll this and return.
    pub fn should_close(&self) -> bool {
        self.shared.should_close()
    }

    pub fn shutdown(&self) {
        self.shared.request_close();
    }

    pub fn capture_cursor(&self) {
        self.shared.set_cursor_captured(true);
    }

    pub fn release_cursor(&self) {
        self.shared.set_cursor_captured(false);
    }

    pub fn get_camera_pose(&self) -> (Pose, PoseInfo) {
        self.shared.get_camera_pose()
    }

    pub fn get_predicted_display_time(&self) -> f64 {
        self.shared.get_predicted_display_time()
    }

    pub fn get_predicted_camera_pose(&self, time: f64) -> (Pose, PoseInfo) {
        self.shared.get_predicted_camera_pose(time)
    }

    // Publishes a frame. Flushes the application context first so the
    // submitted images are fully written before the on-screen context
    // samples them; the images referenced by the previous frame are released
    // in the process.
    pub fn submit_frame(&self, info: FrameSubmitInfo) {
        self.gl.flush();
        self.shared.submit_frame(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::KeyTimes;
    use euclid::Vector3D;
    use glutin::VirtualKeyCode;

    // Encodes its inputs into the returned position so tests can observe
    // exactly what the harness passed in.
    fn recording_pose_function(
        _original: &Pose,
        dx: f64,
        dy: f64,
        dt: f64,
        _keys: &KeyTimes,
    ) -> Pose {
        Pose {
            position: Vector3D::new(dx as f32, dy as f32, dt as f32),
            ..Pose::default()
        }
    }

    fn key_time_pose_function(
        _original: &Pose,
        _dx: f64,
        _dy: f64,
        _dt: f64,
        keys: &KeyTimes,
    ) -> Pose {
        Pose {
            position: Vector3D::new(keys.time(VirtualKeyCode::W) as f32, 0.0, 0.0),
            ..Pose::default()
        }
    }

    fn identity_pose_function(
        original: &Pose,
        _dx: f64,
        _dy: f64,
        _dt: f64,
        _keys: &KeyTimes,
    ) -> Pose {
        *original
    }

    fn frame_with_cursor(mouse_x: f64, mouse_y: f64, time: f64) -> FrameSubmitInfo {
        FrameSubmitInfo {
            pose_info: PoseInfo {
                mouse_x: mouse_x,
                mouse_y: mouse_y,
                time: time,
                ..PoseInfo::default()
            },
            ..FrameSubmitInfo::default()
        }
    }

    #[test]
    fn prediction_halves_cursor_and_time_deltas() {
        let shared = Shared::new();
        shared.register_pose_function(recording_pose_function);
        shared.submit_frame(frame_with_cursor(100.0, 40.0, 1.0));
        {
            let mut exchange = shared.exchange.lock().unwrap();
            exchange.camera_pose_info.mouse_x = 200.0;
            exchange.camera_pose_info.mouse_y = 80.0;
        }

        let (pose, _) = shared.predicted_camera_pose_at(2.032, 2.0);
        assert!((pose.position.x - 50.0).abs() < 1e-4);
        assert!((pose.position.y - 20.0).abs() < 1e-4);
        assert!((pose.position.z - 0.016).abs() < 1e-6);
    }

    #[test]
    fn prediction_reports_the_shared_interval_for_pressed_keys() {
        let shared = Shared::new();
        shared.register_pose_function(key_time_pose_function);
        shared.input().key_down(VirtualKeyCode::W);

        let (pose, _) = shared.predicted_camera_pose_at(1.032, 1.0);
        assert!((pose.position.x - 0.016).abs() < 1e-6);
    }

    #[test]
    fn submit_clears_accumulated_key_times() {
        let shared = Shared::new();
        {
            let mut input = shared.input();
            input.key_down(VirtualKeyCode::W);
            input.accumulate(0.5);
        }
        assert_eq!(shared.input().key_time(VirtualKeyCode::W), 0.5);

        shared.submit_frame(FrameSubmitInfo::default());
        assert_eq!(shared.input().key_time(VirtualKeyCode::W), 0.0);
        // The key itself stays pressed across the submit.
        assert!(shared.input().is_pressed(VirtualKeyCode::W));
    }

    #[test]
    fn tick_passes_deltas_relative_to_the_last_frame() {
        let shared = Shared::new();
        shared.register_pose_function(recording_pose_function);
        shared.set_cursor_captured(true);
        shared.submit_frame(frame_with_cursor(10.0, 20.0, 1.0));
        shared.input().set_cursor(30.0, 60.0);

        let state = shared.advance_camera(1.5, 0.016);
        let (pose, info) = shared.get_camera_pose();
        assert!((pose.position.x - 20.0).abs() < 1e-4);
        assert!((pose.position.y - 40.0).abs() < 1e-4);
        assert!((pose.position.z - 0.5).abs() < 1e-4);
        assert_eq!(info.mouse_x, 30.0);
        assert_eq!(info.time, 1.5);
        assert!(state.frame.is_some());
    }

    #[test]
    fn tick_zeroes_cursor_deltas_while_not_captured() {
        let shared = Shared::new();
        shared.register_pose_function(recording_pose_function);
        shared.submit_frame(frame_with_cursor(10.0, 20.0, 1.0));
        shared.input().set_cursor(500.0, 500.0);

        shared.advance_camera(1.5, 0.016);
        let (pose, _) = shared.get_camera_pose();
        assert_eq!(pose.position.x, 0.0);
        assert_eq!(pose.position.y, 0.0);
    }

    #[test]
    fn tick_accumulates_key_hold_times() {
        let shared = Shared::new();
        shared.register_pose_function(identity_pose_function);
        shared.input().key_down(VirtualKeyCode::D);

        shared.advance_camera(0.016, 0.016);
        shared.advance_camera(0.032, 0.016);
        assert!((shared.input().key_time(VirtualKeyCode::D) - 0.032).abs() < 1e-9);
    }

    #[test]
    fn no_frame_means_nothing_to_draw() {
        let shared = Shared::new();
        shared.register_pose_function(identity_pose_function);
        let state = shared.advance_camera(0.016, 0.016);
        assert!(state.frame.is_none());
    }

    #[test]
    fn identity_function_with_no_input_is_a_fixed_point() {
        let shared = Shared::new();
        shared.register_pose_function(identity_pose_function);
        shared.submit_frame(FrameSubmitInfo::default());

        shared.advance_camera(0.016, 0.016);
        let (first, _) = shared.get_camera_pose();
        shared.advance_camera(0.032, 0.016);
        let (second, _) = shared.get_camera_pose();
        assert_eq!(first, Pose::default());
        assert_eq!(first, second);
    }

    #[test]
    fn close_request_is_sticky_and_visible_to_both_sides() {
        let shared = Shared::new();
        assert!(!shared.should_close());
        shared.request_close();
        assert!(shared.should_close());
        // A submit racing shutdown is benign.
        shared.submit_frame(FrameSubmitInfo::default());
        assert!(shared.should_close());
    }
}
