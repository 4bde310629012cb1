use crate::context::Shared;
use crate::renderer::LayerRenderer;
use gleam::gl::Gl;
use glutin::DeviceEvent;
use glutin::ElementState;
use glutin::Event;
use glutin::EventsLoop;
use glutin::KeyboardInput;
use glutin::PossiblyCurrent;
use glutin::WindowEvent;
use glutin::WindowedContext;
use std::rc::Rc;
use std::sync::Arc;

// Window events are forwarded here after the library's own handling, taking
// the place of chained input callbacks.
pub type EventCallback = Box<dyn FnMut(&Event)>;

// The display-rate half of the protocol. Owns the on-screen context; every
// tick recomputes the live camera pose from fresh input and redraws the
// layers of the last submitted frame.
pub(crate) struct ReprojectionLoop {
    window: WindowedContext<PossiblyCurrent>,
    gl: Rc<dyn Gl>,
    shared: Arc<Shared>,
    renderer: LayerRenderer,
    event_callback: Option<EventCallback>,
    cursor_applied: Option<bool>,
    prev_tick_time: f64,
}

impl ReprojectionLoop {
    pub fn new(
        window: WindowedContext<PossiblyCurrent>,
        gl: Rc<dyn Gl>,
        shared: Arc<Shared>,
        event_callback: Option<EventCallback>,
    ) -> ReprojectionLoop {
        let renderer = LayerRenderer::new(gl.clone());
        let prev_tick_time = shared.now();
        ReprojectionLoop {
            window: window,
            gl: gl,
            shared: shared,
            renderer: renderer,
            event_callback: event_callback,
            cursor_applied: None,
            prev_tick_time: prev_tick_time,
        }
    }

    pub fn run(&mut self, events_loop: &mut EventsLoop) {
        debug!("Reprojection loop starting");
        while !self.shared.should_close() {
            self.apply_cursor_mode();
            self.tick();
            if let Err(err) = self.window.swap_buffers() {
                error!("Failed to swap buffers: {:?}", err);
                self.shared.request_close();
            }
            self.poll_events(events_loop);
        }
        debug!("Reprojection loop exiting");
    }

    fn apply_cursor_mode(&mut self) {
        let captured = self.shared.cursor_captured();
        if self.cursor_applied == Some(captured) {
            return;
        }
        self.cursor_applied = Some(captured);

        let window = self.window.window();
        if let Err(err) = window.grab_cursor(captured) {
            warn!("Failed to update cursor grab: {}", err);
        }
        window.hide_cursor(captured);
    }

    fn tick(&mut self) {
        let time = self.shared.now();
        let tick_interval = time - self.prev_tick_time;
        self.prev_tick_time = time;

        let state = self.shared.advance_camera(time, tick_interval);

        // The layer list was copied out under the exchange mutex and the
        // images it references stay acquired until the next submit, so
        // drawing happens without holding any lock.
        self.renderer.clear();
        if let Some((frame_pose, layers)) = state.frame {
            for layer in layers.iter().rev() {
                self.renderer
                    .draw_layer(layer, &frame_pose, &state.camera_pose, &state.projection);
            }
        }
    }

    fn poll_events(&mut self, events_loop: &mut EventsLoop) {
        let shared = &self.shared;
        let gl = &self.gl;
        let window = &self.window;
        let callback = &mut self.event_callback;

        events_loop.poll_events(|event| {
            handle_event(&event, shared, gl, window);
            if let Some(callback) = callback.as_mut() {
                callback(&event);
            }
        });
    }
}

fn handle_event(
    event: &Event,
    shared: &Arc<Shared>,
    gl: &Rc<dyn Gl>,
    window: &WindowedContext<PossiblyCurrent>,
) {
    match event {
        Event::WindowEvent { event, .. } => match event {
            WindowEvent::CloseRequested => {
                shared.request_close();
            }
            WindowEvent::KeyboardInput {
                input:
                    KeyboardInput {
                        state,
                        virtual_keycode: Some(key),
                        ..
                    },
                ..
            } => {
                let mut input = shared.input();
                match state {
                    ElementState::Pressed => input.key_down(*key),
                    ElementState::Released => input.key_up(*key),
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                // While captured the cursor is integrated from device
                // motion instead; see below.
                if !shared.cursor_captured() {
                    let position = position.to_physical(window.window().get_hidpi_factor());
                    shared.input().set_cursor(position.x, position.y);
                }
            }
            WindowEvent::Resized(size) => {
                let size = size.to_physical(window.window().get_hidpi_factor());
                gl.viewport(0, 0, size.width as i32, size.height as i32);
            }
            _ => {}
        },
        Event::DeviceEvent {
            event: DeviceEvent::MouseMotion { delta },
            ..
        } => {
            if shared.cursor_captured() {
                shared.input().move_cursor(delta.0, delta.1);
            }
        }
        _ => {}
    }
}
