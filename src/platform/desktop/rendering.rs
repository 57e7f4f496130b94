use log::{error, info};
use sdl2::{
    event::{Event, WindowEvent},
    keyboard::Keycode,
    pixels::PixelFormatEnum,
    render::{Texture, TextureCreator},
    video::WindowContext,
    EventPump,
};

use crate::{
    graphics::GraphicsBackend,
    input_mapper::MOUSE_POINTER_ID,
    platform::desktop::snapshot::{next_free_path, save_png},
    software_backend::SoftwareBackend,
    SimulationSession,
};

/// SDL2 window showing the software backend's surface through a streaming texture.
pub struct SimulationWindow {
    event_pump: EventPump,
    canvas: sdl2::render::WindowCanvas,
    // the sdl2_texture has a implicit lifetime reference to _sdl2_texture_creator
    _sdl2_texture_creator: TextureCreator<WindowContext>,
    sdl2_texture: Texture,
    texture_size: (u32, u32),
}

impl SimulationWindow {
    pub fn new(window_width: u32, window_height: u32) -> Result<Self, String> {
        let sdl_context = sdl2::init()?;
        let video_subsystem = sdl_context.video()?;
        let window = video_subsystem
            .window("stable-smoke", window_width, window_height)
            .position_centered()
            .resizable()
            .build()
            .map_err(|e| e.to_string())?;

        let canvas = window.into_canvas().build().map_err(|e| e.to_string())?;
        let event_pump = sdl_context.event_pump()?;

        let sdl2_texture_creator = canvas.texture_creator();
        let sdl2_texture = Self::create_texture(&sdl2_texture_creator, window_width, window_height)?;

        Ok(SimulationWindow {
            event_pump,
            canvas,
            _sdl2_texture_creator: sdl2_texture_creator,
            sdl2_texture,
            texture_size: (window_width, window_height),
        })
    }

    fn create_texture(creator: &TextureCreator<WindowContext>, width: u32, height: u32) -> Result<Texture, String> {
        // byte order R, G, B, A in memory
        creator
            .create_texture_streaming(PixelFormatEnum::ABGR8888, width.max(1), height.max(1))
            .map_err(|e| e.to_string())
    }

    pub fn size(&self) -> (u32, u32) {
        self.canvas.window().size()
    }

    /// Forwards window events to the session. Returns `false` once the window should close.
    pub fn process_events(&mut self, session: &mut SimulationSession<SoftwareBackend>) -> Result<bool, String> {
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    keycode: Some(Keycode::Escape),
                    ..
                } => return Ok(false),
                Event::KeyDown {
                    keycode: Some(Keycode::F12),
                    ..
                } => {
                    let backend = session.surface().backend();
                    let (width, height) = backend.drawable_size();
                    let path = next_free_path("./photo");
                    if let Err(e) = save_png(&path, width, height, &backend.surface_rgba8()) {
                        error!("failed saving screenshot: {}", e);
                    }
                }
                Event::Window {
                    win_event: WindowEvent::SizeChanged(width, height),
                    ..
                } => {
                    let (width, height) = (width.max(1) as u32, height.max(1) as u32);
                    info!("window resized to {}x{}", width, height);
                    session.resize(width, height).map_err(|e| e.to_string())?;
                }
                Event::MouseMotion { x, y, .. } => {
                    session.on_pointer_move(MOUSE_POINTER_ID, x as f32, y as f32);
                }
                Event::Window {
                    win_event: WindowEvent::Leave,
                    ..
                } => {
                    session.on_pointer_release(MOUSE_POINTER_ID);
                }
                _ => {}
            }
        }
        Ok(true)
    }

    pub fn present(&mut self, backend: &SoftwareBackend) -> Result<(), String> {
        let (width, height) = backend.drawable_size();
        if (width, height) != self.texture_size {
            self.sdl2_texture = Self::create_texture(&self._sdl2_texture_creator, width, height)?;
            self.texture_size = (width, height);
        }

        let pixels = backend.surface_rgba8();
        let row_len = width as usize * 4;
        self.sdl2_texture
            .with_lock(None, |buffer: &mut [u8], pitch: usize| {
                for (y, row) in pixels.chunks(row_len.max(1)).enumerate() {
                    buffer[y * pitch..y * pitch + row.len()].copy_from_slice(row);
                }
            })?;

        self.canvas.copy(&self.sdl2_texture, None, None)?;
        self.canvas.present();
        Ok(())
    }
}
