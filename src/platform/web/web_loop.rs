use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use log::{error, info, warn, Level};
use wasm_bindgen::{prelude::*, JsCast};
use web_sys::{Event, HtmlCanvasElement, MouseEvent, TouchEvent, Window};

use crate::{
    error::{SmokeError, SmokeResult},
    input_mapper::MOUSE_POINTER_ID,
    properties_window::{properties_window_main, SharedControls},
    simulation_parameters::SimulationConfig,
    surface::Surface,
    SimulationSession,
};

use super::webgl_backend::WebGlBackend;

const PROPERTIES_WINDOW_ID: &str = "properties_window";

type FrameCallback = Rc<RefCell<Option<Closure<dyn FnMut(f64)>>>>;

fn to_js(e: SmokeError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn host_error(msg: &str) -> SmokeError {
    SmokeError::Host(String::from(msg))
}

fn window() -> SmokeResult<Window> {
    web_sys::window().ok_or_else(|| host_error("no global `window` exists"))
}

struct WebLoop {
    session: SimulationSession<WebGlBackend>,
    canvas: HtmlCanvasElement,
    controls: Option<SharedControls>,
    animation_frame: Option<i32>,
}

impl WebLoop {
    fn new_session(canvas: &HtmlCanvasElement, config: SimulationConfig) -> SmokeResult<SimulationSession<WebGlBackend>> {
        let surface = Surface::acquire(WebGlBackend::new(canvas)?)?;
        let mut session = SimulationSession::new(surface, config)?;
        session.initialize()?;
        Ok(session)
    }

    /// Converts CSS pixels relative to the canvas into drawable pixels.
    fn to_drawable(&self, x: f64, y: f64) -> (f32, f32) {
        let client_width = self.canvas.client_width().max(1) as f64;
        let client_height = self.canvas.client_height().max(1) as f64;
        (
            (x * self.canvas.width() as f64 / client_width) as f32,
            (y * self.canvas.height() as f64 / client_height) as f32,
        )
    }

    fn frame(&mut self, time_ms: f64) -> SmokeResult<()> {
        if let Some(controls) = &self.controls {
            if let Some(config) = controls.take_restart() {
                self.session.dispose()?;
                self.session = Self::new_session(&self.canvas, config)?;
                info!("restarted simulation");
            }
            self.session.set_visualization(controls.visualization());
        }

        let (width, height) = (
            self.canvas.client_width().max(1) as u32,
            self.canvas.client_height().max(1) as u32,
        );
        if (width, height) != self.session.surface().drawable_size() {
            self.session.resize(width, height)?;
        }

        self.session.step(time_ms / 1000.)?;
        Ok(())
    }

    fn on_mouse_move(&mut self, event: &MouseEvent) {
        let (x, y) = self.to_drawable(event.offset_x() as f64, event.offset_y() as f64);
        self.session.on_pointer_move(MOUSE_POINTER_ID, x, y);
    }

    fn on_touch(&mut self, event: &TouchEvent, released: bool) {
        let rect = self.canvas.get_bounding_client_rect();
        let touches = event.changed_touches();
        for i in 0..touches.length() {
            let touch = match touches.get(i) {
                Some(touch) => touch,
                None => continue,
            };
            if released {
                self.session.on_pointer_release(touch.identifier());
            } else {
                let (x, y) = self.to_drawable(touch.client_x() as f64 - rect.left(), touch.client_y() as f64 - rect.top());
                self.session.on_pointer_move(touch.identifier(), x, y);
            }
        }
    }
}

/// Handle of a running smoke simulation attached to a canvas.
#[wasm_bindgen]
pub struct SmokeCanvas {
    state: Rc<RefCell<WebLoop>>,
    alive: Rc<Cell<bool>>,
    frame_callback: FrameCallback,
    listeners: Vec<(&'static str, Closure<dyn FnMut(Event)>)>,
}

#[wasm_bindgen]
impl SmokeCanvas {
    /// Starts the simulation on the canvas with id `canvas_id`, using the built-in default
    /// config.
    pub fn start(canvas_id: &str) -> Result<SmokeCanvas, JsValue> {
        console_error_panic_hook::set_once();
        // a second canvas on the same page finds the logger already installed
        let _ = console_log::init_with_level(Level::Info);

        let config_yaml = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/default-config.yaml"));
        let config = SimulationConfig::from_yaml(config_yaml).map_err(to_js)?;

        Self::start_with_config(canvas_id, config).map_err(to_js)
    }

    /// Stops the animation loop, detaches the input listeners and releases every GPU
    /// resource. Calling it again does nothing.
    pub fn dispose(&mut self) {
        if !self.alive.replace(false) {
            return;
        }

        let mut state = self.state.borrow_mut();
        if let Some(id) = state.animation_frame.take() {
            if let Ok(window) = window() {
                if let Err(e) = window.cancel_animation_frame(id) {
                    warn!("failed cancelling animation frame: {:?}", e);
                }
            }
        }

        for (event, listener) in self.listeners.drain(..) {
            if let Err(e) = state
                .canvas
                .remove_event_listener_with_callback(event, listener.as_ref().unchecked_ref())
            {
                warn!("failed removing `{}` listener: {:?}", event, e);
            }
        }

        // breaks the self reference of the frame callback
        self.frame_callback.borrow_mut().take();

        if let Some(controls) = &state.controls {
            controls.cancel();
        }
        if let Err(e) = state.session.dispose() {
            error!("failed disposing simulation: {}", e);
        }
        info!("smoke canvas disposed");
    }
}

impl SmokeCanvas {
    fn start_with_config(canvas_id: &str, config: SimulationConfig) -> SmokeResult<SmokeCanvas> {
        let window = window()?;
        let document = window.document().ok_or_else(|| host_error("window has no document"))?;
        let canvas = document
            .get_element_by_id(canvas_id)
            .ok_or_else(|| SmokeError::Host(format!("no element with id `{}`", canvas_id)))?
            .dyn_into::<HtmlCanvasElement>()
            .map_err(|_| SmokeError::Host(format!("element `{}` is not a canvas", canvas_id)))?;

        canvas.set_width(canvas.client_width().max(1) as u32);
        canvas.set_height(canvas.client_height().max(1) as u32);

        let controls = match document.get_element_by_id(PROPERTIES_WINDOW_ID) {
            Some(_) => {
                let controls = SharedControls::new(config);
                properties_window_main(None, controls.clone());
                Some(controls)
            }
            None => None,
        };

        let session = WebLoop::new_session(&canvas, config)?;
        let state = Rc::new(RefCell::new(WebLoop {
            session,
            canvas: canvas.clone(),
            controls,
            animation_frame: None,
        }));

        let mut smoke_canvas = SmokeCanvas {
            state,
            alive: Rc::new(Cell::new(true)),
            frame_callback: Rc::new(RefCell::new(None)),
            listeners: Vec::new(),
        };

        smoke_canvas.listen(&canvas, "mousemove", |web_loop, event| {
            if let Some(event) = event.dyn_ref::<MouseEvent>() {
                web_loop.on_mouse_move(event);
            }
        })?;
        smoke_canvas.listen(&canvas, "mouseleave", |web_loop, _| {
            web_loop.session.on_pointer_release(MOUSE_POINTER_ID);
        })?;
        for (event_name, released) in [
            ("touchstart", false),
            ("touchmove", false),
            ("touchend", true),
            ("touchcancel", true),
        ] {
            smoke_canvas.listen(&canvas, event_name, move |web_loop, event| {
                if let Some(event) = event.dyn_ref::<TouchEvent>() {
                    event.prevent_default();
                    web_loop.on_touch(event, released);
                }
            })?;
        }

        smoke_canvas.start_animation(&window)?;
        info!("smoke canvas `{}` started", canvas_id);
        Ok(smoke_canvas)
    }

    fn listen(
        &mut self,
        canvas: &HtmlCanvasElement,
        event_name: &'static str,
        mut handler: impl FnMut(&mut WebLoop, &Event) + 'static,
    ) -> SmokeResult<()> {
        let state = self.state.clone();
        let alive = self.alive.clone();
        let closure = Closure::<dyn FnMut(Event)>::new(move |event: Event| {
            if !alive.get() {
                return;
            }
            if let Ok(mut web_loop) = state.try_borrow_mut() {
                handler(&mut web_loop, &event);
            }
        });

        canvas
            .add_event_listener_with_callback(event_name, closure.as_ref().unchecked_ref())
            .map_err(|e| SmokeError::Host(format!("failed adding `{}` listener: {:?}", event_name, e)))?;
        self.listeners.push((event_name, closure));
        Ok(())
    }

    fn start_animation(&mut self, window: &Window) -> SmokeResult<()> {
        let state = self.state.clone();
        let alive = self.alive.clone();
        let next_frame = self.frame_callback.clone();
        let frame_window = window.clone();

        *self.frame_callback.borrow_mut() = Some(Closure::<dyn FnMut(f64)>::new(move |time_ms: f64| {
            if !alive.get() {
                return;
            }

            let mut web_loop = state.borrow_mut();
            web_loop.animation_frame = None;
            if let Err(e) = web_loop.frame(time_ms) {
                error!("simulation stopped: {}", e);
                alive.set(false);
                return;
            }

            if let Some(callback) = next_frame.borrow().as_ref() {
                match frame_window.request_animation_frame(callback.as_ref().unchecked_ref()) {
                    Ok(id) => web_loop.animation_frame = Some(id),
                    Err(e) => error!("failed requesting animation frame: {:?}", e),
                }
            }
        }));

        let id = match self.frame_callback.borrow().as_ref() {
            Some(callback) => window
                .request_animation_frame(callback.as_ref().unchecked_ref())
                .map_err(|e| SmokeError::Host(format!("failed requesting animation frame: {:?}", e)))?,
            None => return Err(host_error("frame callback missing")),
        };
        self.state.borrow_mut().animation_frame = Some(id);
        Ok(())
    }
}

impl Drop for SmokeCanvas {
    fn drop(&mut self) {
        self.dispose();
    }
}
