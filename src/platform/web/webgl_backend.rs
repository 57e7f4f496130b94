use std::collections::HashMap;

use js_sys::{Float32Array, Object, Reflect, Uint16Array};
use log::info;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    HtmlCanvasElement, WebGl2RenderingContext as Gl, WebGlBuffer, WebGlFramebuffer, WebGlProgram, WebGlShader,
    WebGlTexture, WebGlUniformLocation, WebGlVertexArrayObject,
};

use crate::error::{SmokeError, SmokeResult};
use crate::graphics::{
    ActiveUniform, BoundUniform, CompiledProgram, GraphicsApi, GraphicsBackend, GraphicsCapabilities, Texel,
    TexelPrecision, TextureDescriptor, TextureFilter, TextureFormat, TextureId, UniformKind, UniformValue,
};
use crate::shader_programs::ProgramSource;

const POSITION_ATTRIBUTE: u32 = 0;

pub struct WebGlProgramHandle {
    program: WebGlProgram,
    // indexed by uniform slot
    locations: Vec<Option<WebGlUniformLocation>>,
}

struct RenderTarget {
    framebuffer: WebGlFramebuffer,
    texture: WebGlTexture,
    descriptor: TextureDescriptor,
}

/// Half-float render targets on a WebGL2 context.
pub struct WebGlBackend {
    context: Gl,
    canvas: HtmlCanvasElement,
    capabilities: GraphicsCapabilities,
    quad_vao: WebGlVertexArrayObject,
    _quad_vertices: WebGlBuffer,
    _quad_indices: WebGlBuffer,
    targets: HashMap<TextureId, RenderTarget>,
    next_texture_id: u64,
}

fn js_error(e: JsValue) -> String {
    e.as_string().unwrap_or_else(|| format!("{:?}", e))
}

fn has_extension(context: &Gl, name: &str) -> bool {
    matches!(context.get_extension(name), Ok(Some(_)))
}

fn texture_formats(format: TextureFormat) -> (u32, u32) {
    match format {
        TextureFormat::R => (Gl::R16F, Gl::RED),
        TextureFormat::Rg => (Gl::RG16F, Gl::RG),
        TextureFormat::Rgba => (Gl::RGBA16F, Gl::RGBA),
    }
}

impl WebGlBackend {
    /// Acquires a WebGL2 context on `canvas`. Fails if WebGL2 is missing or no float format
    /// can be rendered to.
    pub fn new(canvas: &HtmlCanvasElement) -> SmokeResult<Self> {
        let attributes = Object::new();
        for key in ["alpha", "depth", "stencil", "antialias"] {
            Reflect::set(&attributes, &JsValue::from_str(key), &JsValue::FALSE)
                .map_err(|e| SmokeError::Host(js_error(e)))?;
        }

        let context = canvas
            .get_context_with_context_options("webgl2", &attributes)
            .map_err(|e| SmokeError::UnsupportedPlatform(js_error(e)))?
            .ok_or_else(|| SmokeError::UnsupportedPlatform(String::from("WebGL2 is not available")))?
            .dyn_into::<Gl>()
            .map_err(|_| SmokeError::UnsupportedPlatform(String::from("context is not a WebGL2 context")))?;

        let color_buffer_float = has_extension(&context, "EXT_color_buffer_float");
        let color_buffer_half_float = has_extension(&context, "EXT_color_buffer_half_float");
        if !color_buffer_float && !color_buffer_half_float {
            return Err(SmokeError::UnsupportedPlatform(String::from(
                "no renderable floating-point texture format",
            )));
        }

        let max_texture_size = context
            .get_parameter(Gl::MAX_TEXTURE_SIZE)
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or(2048.) as u32;

        let capabilities = GraphicsCapabilities {
            api: GraphicsApi::WebGl2,
            precision: TexelPrecision::Half,
            linear_filtering: has_extension(&context, "OES_texture_float_linear"),
            max_texture_size,
        };

        let (quad_vao, quad_vertices, quad_indices) = Self::create_quad(&context)?;
        context.clear_color(0.0, 0.0, 0.0, 1.0);
        info!("WebGL2 context ready ({:?})", capabilities);

        Ok(Self {
            context,
            canvas: canvas.clone(),
            capabilities,
            quad_vao,
            _quad_vertices: quad_vertices,
            _quad_indices: quad_indices,
            targets: HashMap::new(),
            next_texture_id: 1,
        })
    }

    fn create_quad(context: &Gl) -> SmokeResult<(WebGlVertexArrayObject, WebGlBuffer, WebGlBuffer)> {
        let host = |msg: &str| SmokeError::Host(String::from(msg));

        let vao = context
            .create_vertex_array()
            .ok_or_else(|| host("could not create vertex array object"))?;
        context.bind_vertex_array(Some(&vao));

        let vertices: [f32; 8] = [-1., -1., -1., 1., 1., 1., 1., -1.];
        let vertex_buffer = context.create_buffer().ok_or_else(|| host("failed to create buffer"))?;
        context.bind_buffer(Gl::ARRAY_BUFFER, Some(&vertex_buffer));
        context.buffer_data_with_array_buffer_view(
            Gl::ARRAY_BUFFER,
            &Float32Array::from(&vertices[..]),
            Gl::STATIC_DRAW,
        );

        let indices: [u16; 6] = [0, 1, 2, 0, 2, 3];
        let index_buffer = context.create_buffer().ok_or_else(|| host("failed to create buffer"))?;
        context.bind_buffer(Gl::ELEMENT_ARRAY_BUFFER, Some(&index_buffer));
        context.buffer_data_with_array_buffer_view(
            Gl::ELEMENT_ARRAY_BUFFER,
            &Uint16Array::from(&indices[..]),
            Gl::STATIC_DRAW,
        );

        context.vertex_attrib_pointer_with_i32(POSITION_ATTRIBUTE, 2, Gl::FLOAT, false, 0, 0);
        context.enable_vertex_attrib_array(POSITION_ATTRIBUTE);
        context.bind_vertex_array(None);

        Ok((vao, vertex_buffer, index_buffer))
    }

    fn target(&self, texture: TextureId) -> SmokeResult<&RenderTarget> {
        self.targets.get(&texture).ok_or(SmokeError::StaleTexture(texture))
    }

    fn allocate_target(&self, descriptor: &TextureDescriptor) -> Result<RenderTarget, String> {
        let context = &self.context;
        let texture = context
            .create_texture()
            .ok_or_else(|| String::from("failed to create texture"))?;
        context.bind_texture(Gl::TEXTURE_2D, Some(&texture));

        let (internal_format, format) = texture_formats(descriptor.format);
        context
            .tex_image_2d_with_i32_and_i32_and_i32_and_format_and_type_and_opt_u8_array(
                Gl::TEXTURE_2D,
                0,
                internal_format as i32,
                descriptor.width as i32,
                descriptor.height as i32,
                0,
                format,
                Gl::HALF_FLOAT,
                None,
            )
            .map_err(js_error)?;

        let filter = match descriptor.filter {
            TextureFilter::Nearest => Gl::NEAREST,
            TextureFilter::Linear => Gl::LINEAR,
        };
        context.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_MIN_FILTER, filter as i32);
        context.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_MAG_FILTER, filter as i32);
        context.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_WRAP_S, Gl::CLAMP_TO_EDGE as i32);
        context.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_WRAP_T, Gl::CLAMP_TO_EDGE as i32);

        let framebuffer = context
            .create_framebuffer()
            .ok_or_else(|| String::from("failed to create framebuffer"))?;
        context.bind_framebuffer(Gl::FRAMEBUFFER, Some(&framebuffer));
        context.framebuffer_texture_2d(Gl::FRAMEBUFFER, Gl::COLOR_ATTACHMENT0, Gl::TEXTURE_2D, Some(&texture), 0);

        let status = context.check_framebuffer_status(Gl::FRAMEBUFFER);
        context.bind_framebuffer(Gl::FRAMEBUFFER, None);
        if status != Gl::FRAMEBUFFER_COMPLETE {
            context.delete_framebuffer(Some(&framebuffer));
            context.delete_texture(Some(&texture));
            return Err(format!("framebuffer incomplete (status 0x{:x})", status));
        }

        Ok(RenderTarget {
            framebuffer,
            texture,
            descriptor: *descriptor,
        })
    }
}

pub fn compile_shader(context: &Gl, shader_type: u32, source: &str) -> Result<WebGlShader, String> {
    let shader = context
        .create_shader(shader_type)
        .ok_or_else(|| String::from("Unable to create shader object"))?;
    context.shader_source(&shader, source);
    context.compile_shader(&shader);

    if context
        .get_shader_parameter(&shader, Gl::COMPILE_STATUS)
        .as_bool()
        .unwrap_or(false)
    {
        Ok(shader)
    } else {
        let log = context
            .get_shader_info_log(&shader)
            .unwrap_or_else(|| String::from("Unknown error creating shader"));
        context.delete_shader(Some(&shader));
        Err(log)
    }
}

/// Links with `aPosition` pinned to attribute 0 so the quad VAO fits every program.
pub fn link_program(context: &Gl, vert_shader: &WebGlShader, frag_shader: &WebGlShader) -> Result<WebGlProgram, String> {
    let program = context
        .create_program()
        .ok_or_else(|| String::from("Unable to create shader object"))?;

    context.attach_shader(&program, vert_shader);
    context.attach_shader(&program, frag_shader);
    context.bind_attrib_location(&program, POSITION_ATTRIBUTE, "aPosition");
    context.link_program(&program);

    if context
        .get_program_parameter(&program, Gl::LINK_STATUS)
        .as_bool()
        .unwrap_or(false)
    {
        Ok(program)
    } else {
        let log = context
            .get_program_info_log(&program)
            .unwrap_or_else(|| String::from("Unknown error creating program object"));
        context.delete_program(Some(&program));
        Err(log)
    }
}

impl GraphicsBackend for WebGlBackend {
    type Program = WebGlProgramHandle;

    fn capabilities(&self) -> GraphicsCapabilities {
        self.capabilities
    }

    fn drawable_size(&self) -> (u32, u32) {
        (self.canvas.width(), self.canvas.height())
    }

    fn resize_drawable(&mut self, width: u32, height: u32) {
        self.canvas.set_width(width);
        self.canvas.set_height(height);
    }

    fn compile_program(&mut self, source: &ProgramSource) -> SmokeResult<CompiledProgram<WebGlProgramHandle>> {
        let role = source.role;
        let context = &self.context;

        let vertex = compile_shader(context, Gl::VERTEX_SHADER, source.vertex)
            .map_err(|log| SmokeError::Compile { role, log })?;
        let fragment = match compile_shader(context, Gl::FRAGMENT_SHADER, source.fragment) {
            Ok(fragment) => fragment,
            Err(log) => {
                context.delete_shader(Some(&vertex));
                return Err(SmokeError::Compile { role, log });
            }
        };

        let linked = link_program(context, &vertex, &fragment);
        context.delete_shader(Some(&vertex));
        context.delete_shader(Some(&fragment));
        let program = linked.map_err(|log| SmokeError::Link { role, log })?;

        let count = context
            .get_program_parameter(&program, Gl::ACTIVE_UNIFORMS)
            .as_f64()
            .unwrap_or(0.) as u32;

        let mut uniforms = Vec::with_capacity(count as usize);
        let mut locations = Vec::with_capacity(count as usize);
        for index in 0..count {
            let info = match context.get_active_uniform(&program, index) {
                Some(info) => info,
                None => continue,
            };
            let kind = match info.type_() {
                Gl::FLOAT => UniformKind::Float,
                Gl::FLOAT_VEC2 => UniformKind::Vec2,
                Gl::FLOAT_VEC3 => UniformKind::Vec3,
                Gl::SAMPLER_2D => UniformKind::Sampler2D,
                other => {
                    context.delete_program(Some(&program));
                    return Err(SmokeError::Link {
                        role,
                        log: format!("uniform `{}` has unsupported type 0x{:x}", info.name(), other),
                    });
                }
            };
            locations.push(context.get_uniform_location(&program, &info.name()));
            uniforms.push(ActiveUniform { name: info.name(), kind });
        }

        Ok(CompiledProgram {
            handle: WebGlProgramHandle { program, locations },
            uniforms,
        })
    }

    fn delete_program(&mut self, program: WebGlProgramHandle) {
        self.context.delete_program(Some(&program.program));
    }

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> SmokeResult<TextureId> {
        let max = self.capabilities.max_texture_size;
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.width > max || descriptor.height > max {
            return Err(SmokeError::Allocation {
                width: descriptor.width,
                height: descriptor.height,
                reason: format!("dimensions must be within 1..={}", max),
            });
        }

        let target = self.allocate_target(descriptor).map_err(|reason| SmokeError::Allocation {
            width: descriptor.width,
            height: descriptor.height,
            reason,
        })?;

        let id = TextureId(self.next_texture_id);
        self.next_texture_id += 1;
        self.targets.insert(id, target);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) -> SmokeResult<()> {
        let target = self.targets.remove(&texture).ok_or(SmokeError::StaleTexture(texture))?;
        self.context.delete_framebuffer(Some(&target.framebuffer));
        self.context.delete_texture(Some(&target.texture));
        Ok(())
    }

    fn draw_full_screen_quad(
        &mut self,
        program: &WebGlProgramHandle,
        uniforms: &[BoundUniform],
        destination: Option<TextureId>,
    ) -> SmokeResult<()> {
        let context = &self.context;

        let (framebuffer, width, height) = match destination {
            Some(id) => {
                let target = self.target(id)?;
                (Some(&target.framebuffer), target.descriptor.width, target.descriptor.height)
            }
            None => (None, self.canvas.width(), self.canvas.height()),
        };

        context.use_program(Some(&program.program));

        let mut texture_unit = 0;
        for BoundUniform { slot, value } in uniforms {
            let location = program.locations.get(*slot).and_then(|l| l.as_ref());
            match *value {
                UniformValue::Float(v) => context.uniform1f(location, v),
                UniformValue::Vec2([x, y]) => context.uniform2f(location, x, y),
                UniformValue::Vec3([x, y, z]) => context.uniform3f(location, x, y, z),
                UniformValue::Sampler(id) => {
                    let target = self.target(id)?;
                    context.active_texture(Gl::TEXTURE0 + texture_unit);
                    context.bind_texture(Gl::TEXTURE_2D, Some(&target.texture));
                    context.uniform1i(location, texture_unit as i32);
                    texture_unit += 1;
                }
            }
        }

        context.bind_framebuffer(Gl::FRAMEBUFFER, framebuffer);
        context.viewport(0, 0, width as i32, height as i32);
        context.bind_vertex_array(Some(&self.quad_vao));
        context.draw_elements_with_i32(Gl::TRIANGLES, 6, Gl::UNSIGNED_SHORT, 0);
        context.bind_vertex_array(None);
        Ok(())
    }

    fn read_texels(&mut self, texture: TextureId) -> SmokeResult<Vec<Texel>> {
        let target = self.target(texture)?;
        let TextureDescriptor { width, height, format, .. } = target.descriptor;

        let buffer = Float32Array::new_with_length(width * height * 4);
        self.context.bind_framebuffer(Gl::FRAMEBUFFER, Some(&target.framebuffer));
        let result = self.context.read_pixels_with_opt_array_buffer_view(
            0,
            0,
            width as i32,
            height as i32,
            Gl::RGBA,
            Gl::FLOAT,
            Some(&buffer),
        );
        self.context.bind_framebuffer(Gl::FRAMEBUFFER, None);
        result.map_err(|e| SmokeError::Host(js_error(e)))?;

        Ok(buffer
            .to_vec()
            .chunks_exact(4)
            .map(|c| format.mask(Texel::new(c[0], c[1], c[2], c[3])))
            .collect())
    }

    fn write_texels(&mut self, texture: TextureId, texels: &[Texel]) -> SmokeResult<()> {
        let target = self.target(texture)?;
        let TextureDescriptor { width, height, format, .. } = target.descriptor;
        let expected = width as usize * height as usize;
        if texels.len() != expected {
            return Err(SmokeError::TexelCount {
                expected,
                actual: texels.len(),
            });
        }

        let channels = format.channels();
        let data: Vec<f32> = texels.iter().flat_map(|t| t.iter().copied().take(channels)).collect();
        let (_, upload_format) = texture_formats(format);

        self.context.bind_texture(Gl::TEXTURE_2D, Some(&target.texture));
        self.context
            .tex_sub_image_2d_with_i32_and_i32_and_u32_and_type_and_opt_array_buffer_view(
                Gl::TEXTURE_2D,
                0,
                0,
                0,
                width as i32,
                height as i32,
                upload_format,
                Gl::FLOAT,
                Some(&Float32Array::from(&data[..])),
            )
            .map_err(|e| SmokeError::Host(js_error(e)))
    }
}
