use std::collections::HashMap;

use crate::concurrency::par_rows_mut;
use crate::error::{SmokeError, SmokeResult};
use crate::graphics::{
    ActiveUniform, BoundUniform, CompiledProgram, GraphicsApi, GraphicsBackend, GraphicsCapabilities,
    TexelPrecision, Texel, TextureDescriptor, TextureFilter, TextureId, UniformKind, UniformValue,
};
use crate::shader_programs::{self, ProgramRole, ProgramSource};
use crate::{V2, V3};

pub const SOFTWARE_MAX_TEXTURE_SIZE: u32 = 8192;

/// A program on the CPU is its role (which selects the kernel) plus the uniforms
/// reported by the linker.
#[derive(Debug, Clone)]
pub struct SoftwareProgram {
    role: ProgramRole,
    uniforms: Vec<ActiveUniform>,
}

struct SoftwareTexture {
    descriptor: TextureDescriptor,
    texels: Vec<Texel>,
}

/// Evaluates full-screen-quad passes on the CPU with GL sampling rules: texel centers at
/// `(i + 0.5) / w`, clamp-to-edge addressing, nearest or bilinear filtering and channel
/// masking on write. Row 0 is the bottom row.
pub struct SoftwareBackend {
    capabilities: GraphicsCapabilities,
    drawable_width: u32,
    drawable_height: u32,
    surface: Vec<Texel>,
    textures: HashMap<TextureId, SoftwareTexture>,
    next_texture_id: u64,
}

impl SoftwareBackend {
    pub fn new(drawable_width: u32, drawable_height: u32) -> Self {
        Self::with_capabilities(
            drawable_width,
            drawable_height,
            GraphicsCapabilities {
                api: GraphicsApi::Software,
                precision: TexelPrecision::Full,
                linear_filtering: true,
                max_texture_size: SOFTWARE_MAX_TEXTURE_SIZE,
            },
        )
    }

    pub fn with_capabilities(drawable_width: u32, drawable_height: u32, capabilities: GraphicsCapabilities) -> Self {
        Self {
            capabilities,
            drawable_width,
            drawable_height,
            surface: vec![Texel::zeros(); drawable_width as usize * drawable_height as usize],
            textures: HashMap::new(),
            next_texture_id: 1,
        }
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn surface_texels(&self) -> &[Texel] {
        &self.surface
    }

    /// The visible surface as 8-bit RGBA, top row first (the order images and SDL expect).
    pub fn surface_rgba8(&self) -> Vec<u8> {
        let width = self.drawable_width as usize;
        let mut pixels = Vec::with_capacity(self.surface.len() * 4);
        for row in self.surface.chunks(width.max(1)).rev() {
            for texel in row {
                for channel in texel.iter() {
                    pixels.push(((*channel).clamp(0., 1.) * 255.).round() as u8);
                }
            }
        }
        pixels
    }

    fn texture(&self, texture: TextureId) -> SmokeResult<&SoftwareTexture> {
        self.textures.get(&texture).ok_or(SmokeError::StaleTexture(texture))
    }

    fn resolve_uniforms<'a>(
        &'a self,
        program: &SoftwareProgram,
        bound: &[BoundUniform],
    ) -> SmokeResult<PassUniforms<'a>> {
        let mut uniforms = PassUniforms::default();

        for BoundUniform { slot, value } in bound {
            let name = match program.uniforms.get(*slot) {
                Some(uniform) => uniform.name.as_str(),
                None => continue,
            };

            match *value {
                UniformValue::Float(v) => match name {
                    shader_programs::U_DT => uniforms.dt = v,
                    shader_programs::U_DISSIPATION => uniforms.dissipation = v,
                    shader_programs::U_ASPECT_RATIO => uniforms.aspect_ratio = v,
                    shader_programs::U_RADIUS => uniforms.radius = v,
                    shader_programs::U_CURL_STRENGTH => uniforms.curl_strength = v,
                    shader_programs::U_VALUE => uniforms.value = v,
                    shader_programs::U_SCALE => uniforms.scale = v,
                    _ => {}
                },
                UniformValue::Vec2(v) => match name {
                    shader_programs::U_TEXEL_SIZE => uniforms.texel_size = V2::from(v),
                    shader_programs::U_POINT => uniforms.point = V2::from(v),
                    _ => {}
                },
                UniformValue::Vec3(v) => {
                    if name == shader_programs::U_COLOR {
                        uniforms.color = V3::from(v);
                    }
                }
                UniformValue::Sampler(id) => {
                    let texture = Some(self.texture(id)?);
                    match name {
                        shader_programs::U_VELOCITY => uniforms.velocity = texture,
                        shader_programs::U_SOURCE => uniforms.source = texture,
                        shader_programs::U_TARGET => uniforms.target = texture,
                        shader_programs::U_CURL_TEXTURE => uniforms.curl = texture,
                        shader_programs::U_PRESSURE => uniforms.pressure = texture,
                        shader_programs::U_DIVERGENCE => uniforms.divergence = texture,
                        shader_programs::U_TEXTURE => uniforms.texture = texture,
                        _ => {}
                    }
                }
            }
        }

        Ok(uniforms)
    }
}

/// Uniform state of one draw. Anything not bound keeps the GL default of zero; unbound
/// samplers read `(0, 0, 0, 1)`.
struct PassUniforms<'a> {
    texel_size: V2,
    point: V2,
    color: V3,
    dt: f32,
    dissipation: f32,
    aspect_ratio: f32,
    radius: f32,
    curl_strength: f32,
    value: f32,
    scale: f32,

    velocity: Option<&'a SoftwareTexture>,
    source: Option<&'a SoftwareTexture>,
    target: Option<&'a SoftwareTexture>,
    curl: Option<&'a SoftwareTexture>,
    pressure: Option<&'a SoftwareTexture>,
    divergence: Option<&'a SoftwareTexture>,
    texture: Option<&'a SoftwareTexture>,
}

impl Default for PassUniforms<'_> {
    fn default() -> Self {
        Self {
            texel_size: V2::zeros(),
            point: V2::zeros(),
            color: V3::zeros(),
            dt: 0.,
            dissipation: 0.,
            aspect_ratio: 0.,
            radius: 0.,
            curl_strength: 0.,
            value: 0.,
            scale: 0.,
            velocity: None,
            source: None,
            target: None,
            curl: None,
            pressure: None,
            divergence: None,
            texture: None,
        }
    }
}

fn texel_at(texture: &SoftwareTexture, x: i64, y: i64) -> Texel {
    let w = texture.descriptor.width as i64;
    let h = texture.descriptor.height as i64;
    let x = x.clamp(0, w - 1) as usize;
    let y = y.clamp(0, h - 1) as usize;
    texture.texels[y * w as usize + x]
}

fn sample(texture: Option<&SoftwareTexture>, uv: V2) -> Texel {
    let texture = match texture {
        Some(texture) => texture,
        None => return Texel::new(0., 0., 0., 1.),
    };

    let w = texture.descriptor.width as f32;
    let h = texture.descriptor.height as f32;

    match texture.descriptor.filter {
        TextureFilter::Nearest => texel_at(texture, (uv.x * w).floor() as i64, (uv.y * h).floor() as i64),
        TextureFilter::Linear => {
            let px = uv.x * w - 0.5;
            let py = uv.y * h - 0.5;
            let x0 = px.floor();
            let y0 = py.floor();
            let fx = px - x0;
            let fy = py - y0;
            let (x0, y0) = (x0 as i64, y0 as i64);

            let bottom = texel_at(texture, x0, y0) * (1. - fx) + texel_at(texture, x0 + 1, y0) * fx;
            let top = texel_at(texture, x0, y0 + 1) * (1. - fx) + texel_at(texture, x0 + 1, y0 + 1) * fx;
            bottom * (1. - fy) + top * fy
        }
    }
}

/// Fragment kernels, one per program role. Each mirrors its GLSL source.
fn shade(role: ProgramRole, u: &PassUniforms, uv: V2) -> Texel {
    let ts = u.texel_size;
    let v_l = uv - V2::new(ts.x, 0.);
    let v_r = uv + V2::new(ts.x, 0.);
    let v_t = uv + V2::new(0., ts.y);
    let v_b = uv - V2::new(0., ts.y);

    match role {
        ProgramRole::Clear => sample(u.texture, uv) * u.value,
        ProgramRole::Display => sample(u.texture, uv),
        ProgramRole::Visualize => {
            let t = sample(u.texture, uv);
            Texel::new(t.x.abs() * u.scale, t.y.abs() * u.scale, t.z.abs() * u.scale, 1.)
        }
        ProgramRole::Splat => {
            let mut p = uv - u.point;
            p.x *= u.aspect_ratio;
            let splat = u.color * (-p.dot(&p) / u.radius).exp();
            let base = sample(u.target, uv).xyz();
            let out = base + splat;
            Texel::new(out.x, out.y, out.z, 1.)
        }
        ProgramRole::Advection => {
            let coord = uv - sample(u.velocity, uv).xy().component_mul(&ts) * u.dt;
            sample(u.source, coord) * u.dissipation
        }
        ProgramRole::Divergence => {
            let mut l = sample(u.velocity, v_l).x;
            let mut r = sample(u.velocity, v_r).x;
            let mut t = sample(u.velocity, v_t).y;
            let mut b = sample(u.velocity, v_b).y;
            let c = sample(u.velocity, uv).xy();
            if v_l.x < 0. {
                l = -c.x;
            }
            if v_r.x > 1. {
                r = -c.x;
            }
            if v_b.y < 0. {
                b = -c.y;
            }
            if v_t.y > 1. {
                t = -c.y;
            }
            Texel::new(0.5 * (r - l + t - b), 0., 0., 1.)
        }
        ProgramRole::Curl => {
            let l = sample(u.velocity, v_l).y;
            let r = sample(u.velocity, v_r).y;
            let t = sample(u.velocity, v_t).x;
            let b = sample(u.velocity, v_b).x;
            Texel::new(r - l - t + b, 0., 0., 1.)
        }
        ProgramRole::Vorticity => {
            let l = sample(u.curl, v_l).x;
            let r = sample(u.curl, v_r).x;
            let t = sample(u.curl, v_t).x;
            let b = sample(u.curl, v_b).x;
            let c = sample(u.curl, uv).x;

            let mut force = V2::new(t.abs() - b.abs(), r.abs() - l.abs()) * 0.5;
            force /= force.norm() + 0.0001;
            force *= u.curl_strength * c;
            force.y *= -1.;

            let vel = sample(u.velocity, uv).xy() + force * u.dt;
            Texel::new(vel.x, vel.y, 0., 1.)
        }
        ProgramRole::Pressure => {
            let l = sample(u.pressure, v_l).x;
            let r = sample(u.pressure, v_r).x;
            let t = sample(u.pressure, v_t).x;
            let b = sample(u.pressure, v_b).x;
            let divergence = sample(u.divergence, uv).x;
            Texel::new((l + r + b + t - divergence) * 0.25, 0., 0., 1.)
        }
        ProgramRole::GradientSubtract => {
            let l = sample(u.pressure, v_l).x;
            let r = sample(u.pressure, v_r).x;
            let t = sample(u.pressure, v_t).x;
            let b = sample(u.pressure, v_b).x;
            let vel = sample(u.velocity, uv).xy() - V2::new(r - l, t - b) * 0.5;
            Texel::new(vel.x, vel.y, 0., 1.)
        }
    }
}

/// Collects `uniform <type> <name>;` declarations. Precision qualifiers may precede the type.
fn parse_uniforms(role: ProgramRole, source: &str) -> SmokeResult<Vec<ActiveUniform>> {
    let mut uniforms = Vec::new();

    for line in source.lines().map(str::trim) {
        if !line.starts_with("uniform ") {
            continue;
        }
        let tokens: Vec<&str> = line.trim_end_matches(';').split_whitespace().collect();
        let (type_name, name) = match tokens.as_slice() {
            [.., type_name, name] if tokens.len() >= 3 => (*type_name, *name),
            _ => {
                return Err(SmokeError::Compile {
                    role,
                    log: format!("malformed uniform declaration `{}`", line),
                })
            }
        };
        let kind = UniformKind::from_glsl_type(type_name).ok_or_else(|| SmokeError::Compile {
            role,
            log: format!("unsupported uniform type `{}` of `{}`", type_name, name),
        })?;
        uniforms.push(ActiveUniform {
            name: name.to_string(),
            kind,
        });
    }

    Ok(uniforms)
}

fn check_entry_point(role: ProgramRole, stage: &str, source: &str) -> SmokeResult<()> {
    if source.contains("void main") {
        Ok(())
    } else {
        Err(SmokeError::Compile {
            role,
            log: format!("{} shader has no `void main`", stage),
        })
    }
}

impl GraphicsBackend for SoftwareBackend {
    type Program = SoftwareProgram;

    fn capabilities(&self) -> GraphicsCapabilities {
        self.capabilities
    }

    fn drawable_size(&self) -> (u32, u32) {
        (self.drawable_width, self.drawable_height)
    }

    fn resize_drawable(&mut self, width: u32, height: u32) {
        self.drawable_width = width;
        self.drawable_height = height;
        self.surface = vec![Texel::zeros(); width as usize * height as usize];
    }

    fn compile_program(&mut self, source: &ProgramSource) -> SmokeResult<CompiledProgram<SoftwareProgram>> {
        check_entry_point(source.role, "vertex", source.vertex)?;
        check_entry_point(source.role, "fragment", source.fragment)?;

        let mut uniforms = parse_uniforms(source.role, source.vertex)?;
        for uniform in parse_uniforms(source.role, source.fragment)? {
            match uniforms.iter().find(|u| u.name == uniform.name) {
                Some(existing) if existing.kind != uniform.kind => {
                    return Err(SmokeError::Link {
                        role: source.role,
                        log: format!(
                            "uniform `{}` declared as {:?} and {:?}",
                            uniform.name, existing.kind, uniform.kind
                        ),
                    });
                }
                Some(_) => {}
                None => uniforms.push(uniform),
            }
        }

        Ok(CompiledProgram {
            handle: SoftwareProgram {
                role: source.role,
                uniforms: uniforms.clone(),
            },
            uniforms,
        })
    }

    fn delete_program(&mut self, _program: SoftwareProgram) {}

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> SmokeResult<TextureId> {
        let max = self.capabilities.max_texture_size;
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.width > max || descriptor.height > max {
            return Err(SmokeError::Allocation {
                width: descriptor.width,
                height: descriptor.height,
                reason: format!("dimensions must be within 1..={}", max),
            });
        }

        let id = TextureId(self.next_texture_id);
        self.next_texture_id += 1;

        let count = descriptor.width as usize * descriptor.height as usize;
        let zero = descriptor.format.mask(Texel::zeros());
        self.textures.insert(
            id,
            SoftwareTexture {
                descriptor: *descriptor,
                texels: vec![zero; count],
            },
        );
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) -> SmokeResult<()> {
        self.textures
            .remove(&texture)
            .map(|_| ())
            .ok_or(SmokeError::StaleTexture(texture))
    }

    fn draw_full_screen_quad(
        &mut self,
        program: &SoftwareProgram,
        uniforms: &[BoundUniform],
        destination: Option<TextureId>,
    ) -> SmokeResult<()> {
        let (width, height, format) = match destination {
            Some(id) => {
                let descriptor = self.texture(id)?.descriptor;
                (descriptor.width, descriptor.height, Some(descriptor.format))
            }
            None => (self.drawable_width, self.drawable_height, None),
        };
        if width == 0 || height == 0 {
            return Ok(());
        }

        let pass = self.resolve_uniforms(program, uniforms)?;
        let role = program.role;

        // evaluated into a fresh buffer, so a pass never observes its own partial output
        let mut output = vec![Texel::zeros(); width as usize * height as usize];
        par_rows_mut(&mut output, width as usize, |j, row| {
            let v = (j as f32 + 0.5) / height as f32;
            for (i, texel) in row.iter_mut().enumerate() {
                let uv = V2::new((i as f32 + 0.5) / width as f32, v);
                let value = shade(role, &pass, uv);
                *texel = match format {
                    Some(format) => format.mask(value),
                    None => value,
                };
            }
        });

        match destination {
            Some(id) => {
                if let Some(texture) = self.textures.get_mut(&id) {
                    texture.texels = output;
                }
            }
            None => self.surface = output,
        }
        Ok(())
    }

    fn read_texels(&mut self, texture: TextureId) -> SmokeResult<Vec<Texel>> {
        Ok(self.texture(texture)?.texels.clone())
    }

    fn write_texels(&mut self, texture: TextureId, texels: &[Texel]) -> SmokeResult<()> {
        let target = self.textures.get_mut(&texture).ok_or(SmokeError::StaleTexture(texture))?;
        if target.texels.len() != texels.len() {
            return Err(SmokeError::TexelCount {
                expected: target.texels.len(),
                actual: texels.len(),
            });
        }
        let format = target.descriptor.format;
        for (dst, src) in target.texels.iter_mut().zip(texels) {
            *dst = format.mask(*src);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::TextureFormat;
    use crate::shader_programs::{ShaderProgram, BASE_VERTEX_SHADER, U_TEXTURE};

    fn assert_texel_eq(a: Texel, b: Texel) {
        assert!((a - b).norm() < 1e-6, "{:?} != {:?}", a, b);
    }

    fn ramp(backend: &mut SoftwareBackend, filter: TextureFilter) -> TextureId {
        // 2x1 texture holding 0 and 1
        let id = backend
            .create_texture(&TextureDescriptor {
                width: 2,
                height: 1,
                format: TextureFormat::R,
                filter,
            })
            .unwrap();
        backend
            .write_texels(id, &[Texel::new(0., 0., 0., 1.), Texel::new(1., 0., 0., 1.)])
            .unwrap();
        id
    }

    #[test]
    fn nearest_and_linear_sampling() {
        let mut backend = SoftwareBackend::new(4, 4);
        let nearest = ramp(&mut backend, TextureFilter::Nearest);
        let linear = ramp(&mut backend, TextureFilter::Linear);
        let nearest = backend.texture(nearest).unwrap();
        let linear = backend.texture(linear).unwrap();

        // texel centers are exact for both filters
        assert_eq!(sample(Some(nearest), V2::new(0.25, 0.5)).x, 0.);
        assert_eq!(sample(Some(linear), V2::new(0.75, 0.5)).x, 1.);

        assert_eq!(sample(Some(nearest), V2::new(0.49, 0.5)).x, 0.);
        assert!((sample(Some(linear), V2::new(0.5, 0.5)).x - 0.5).abs() < 1e-6);

        // clamp to edge
        assert_eq!(sample(Some(linear), V2::new(-3., 0.5)).x, 0.);
        assert_eq!(sample(Some(linear), V2::new(7., 2.)).x, 1.);
        assert_eq!(sample(Some(nearest), V2::new(1., 0.5)).x, 1.);
    }

    #[test]
    fn unbound_sampler_reads_opaque_black() {
        assert_texel_eq(sample(None, V2::new(0.5, 0.5)), Texel::new(0., 0., 0., 1.));

        let mut backend = SoftwareBackend::new(3, 2);
        let display = ShaderProgram::compile(&mut backend, ProgramRole::Display).unwrap();
        backend.draw_full_screen_quad(display.handle(), &[], None).unwrap();
        for texel in backend.surface_texels() {
            assert_texel_eq(*texel, Texel::new(0., 0., 0., 1.));
        }
    }

    #[test]
    fn writes_are_masked_by_format() {
        let mut backend = SoftwareBackend::new(1, 1);
        let id = backend
            .create_texture(&TextureDescriptor {
                width: 1,
                height: 1,
                format: TextureFormat::Rg,
                filter: TextureFilter::Nearest,
            })
            .unwrap();
        backend.write_texels(id, &[Texel::new(1., 2., 3., 4.)]).unwrap();
        assert_texel_eq(backend.read_texels(id).unwrap()[0], Texel::new(1., 2., 0., 1.));

        assert!(matches!(
            backend.write_texels(id, &[]),
            Err(SmokeError::TexelCount { expected: 1, actual: 0 })
        ));
    }

    #[test]
    fn allocation_limits() {
        let mut backend = SoftwareBackend::new(1, 1);
        for (width, height) in [(0, 4), (4, 0), (SOFTWARE_MAX_TEXTURE_SIZE + 1, 1)] {
            let result = backend.create_texture(&TextureDescriptor {
                width,
                height,
                format: TextureFormat::R,
                filter: TextureFilter::Nearest,
            });
            assert!(matches!(result, Err(SmokeError::Allocation { .. })));
        }
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn released_textures_are_stale() {
        let mut backend = SoftwareBackend::new(1, 1);
        let id = ramp(&mut backend, TextureFilter::Nearest);
        backend.delete_texture(id).unwrap();

        assert!(matches!(backend.delete_texture(id), Err(SmokeError::StaleTexture(t)) if t == id));
        assert!(matches!(backend.read_texels(id), Err(SmokeError::StaleTexture(_))));

        // ids are never handed out twice
        let next = ramp(&mut backend, TextureFilter::Nearest);
        assert_ne!(next, id);
    }

    #[test]
    fn clear_pass_scales_source() {
        let mut backend = SoftwareBackend::new(1, 1);
        let source = ramp(&mut backend, TextureFilter::Nearest);
        let destination = ramp(&mut backend, TextureFilter::Nearest);
        let clear = ShaderProgram::compile(&mut backend, ProgramRole::Clear).unwrap();

        let mut binding = clear.bind();
        binding
            .set_uniform(U_TEXTURE, UniformValue::Sampler(source))
            .unwrap()
            .set_uniform(shader_programs::U_VALUE, UniformValue::Float(0.5))
            .unwrap();
        backend
            .draw_full_screen_quad(clear.handle(), binding.uniforms(), Some(destination))
            .unwrap();

        let texels = backend.read_texels(destination).unwrap();
        assert_texel_eq(texels[0], Texel::new(0., 0., 0., 1.));
        assert_texel_eq(texels[1], Texel::new(0.5, 0., 0., 1.));
    }

    #[test]
    fn broken_sources_fail_to_compile() {
        let mut backend = SoftwareBackend::new(1, 1);

        let no_entry_point = ProgramSource {
            role: ProgramRole::Clear,
            vertex: BASE_VERTEX_SHADER,
            fragment: "precision highp float;\nuniform float value;\n",
        };
        assert!(matches!(
            backend.compile_program(&no_entry_point),
            Err(SmokeError::Compile { role: ProgramRole::Clear, .. })
        ));

        let bad_type = ProgramSource {
            role: ProgramRole::Display,
            vertex: BASE_VERTEX_SHADER,
            fragment: "uniform mat4 transform;\nvoid main () {}\n",
        };
        assert!(matches!(backend.compile_program(&bad_type), Err(SmokeError::Compile { .. })));

        let conflicting = ProgramSource {
            role: ProgramRole::Display,
            vertex: BASE_VERTEX_SHADER,
            fragment: "uniform float texelSize;\nvoid main () {}\n",
        };
        assert!(matches!(backend.compile_program(&conflicting), Err(SmokeError::Link { .. })));
    }

    #[test]
    fn surface_rgba8_is_top_row_first() {
        let mut backend = SoftwareBackend::new(1, 2);
        backend.surface[0] = Texel::new(1., 0., 0., 1.);
        backend.surface[1] = Texel::new(0., 0., 1., 1.);
        assert_eq!(backend.surface_rgba8(), vec![0, 0, 255, 255, 255, 0, 0, 255]);
    }
}
