use std::collections::HashMap;

use crate::error::{SmokeError, SmokeResult};
use crate::graphics::{BoundUniform, CompiledProgram, GraphicsBackend, TextureId, UniformKind, UniformValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramRole {
    Advection,
    Splat,
    Curl,
    Vorticity,
    Divergence,
    Pressure,
    Clear,
    GradientSubtract,
    Display,
    Visualize,
}

#[cfg(test)]
pub const ALL_PROGRAM_ROLES: [ProgramRole; 10] = [
    ProgramRole::Advection,
    ProgramRole::Splat,
    ProgramRole::Curl,
    ProgramRole::Vorticity,
    ProgramRole::Divergence,
    ProgramRole::Pressure,
    ProgramRole::Clear,
    ProgramRole::GradientSubtract,
    ProgramRole::Display,
    ProgramRole::Visualize,
];

// uniform names shared by the GLSL sources and the passes that bind them
pub const U_TEXEL_SIZE: &str = "texelSize";
pub const U_VELOCITY: &str = "uVelocity";
pub const U_SOURCE: &str = "uSource";
pub const U_DT: &str = "dt";
pub const U_DISSIPATION: &str = "dissipation";
pub const U_TARGET: &str = "uTarget";
pub const U_ASPECT_RATIO: &str = "aspectRatio";
pub const U_COLOR: &str = "color";
pub const U_POINT: &str = "point";
pub const U_RADIUS: &str = "radius";
pub const U_CURL_TEXTURE: &str = "uCurl";
pub const U_CURL_STRENGTH: &str = "curl";
pub const U_PRESSURE: &str = "uPressure";
pub const U_DIVERGENCE: &str = "uDivergence";
pub const U_TEXTURE: &str = "uTexture";
pub const U_VALUE: &str = "value";
pub const U_SCALE: &str = "scale";

/// Shared by every pass. `aPosition` is bound to attribute location 0 before linking, so
/// one vertex array serves all programs.
pub const BASE_VERTEX_SHADER: &str = r##"
        precision highp float;
        attribute vec2 aPosition;
        varying vec2 vUv;
        varying vec2 vL;
        varying vec2 vR;
        varying vec2 vT;
        varying vec2 vB;
        uniform vec2 texelSize;

        void main () {
            vUv = aPosition * 0.5 + 0.5;
            vL = vUv - vec2(texelSize.x, 0.0);
            vR = vUv + vec2(texelSize.x, 0.0);
            vT = vUv + vec2(0.0, texelSize.y);
            vB = vUv - vec2(0.0, texelSize.y);
            gl_Position = vec4(aPosition, 0.0, 1.0);
        }
        "##;

const CLEAR_FRAGMENT_SHADER: &str = r##"
        precision highp float;
        precision mediump sampler2D;
        varying vec2 vUv;
        uniform sampler2D uTexture;
        uniform float value;

        void main () {
            gl_FragColor = value * texture2D(uTexture, vUv);
        }
        "##;

const DISPLAY_FRAGMENT_SHADER: &str = r##"
        precision highp float;
        precision mediump sampler2D;
        varying vec2 vUv;
        uniform sampler2D uTexture;

        void main () {
            gl_FragColor = texture2D(uTexture, vUv);
        }
        "##;

const VISUALIZE_FRAGMENT_SHADER: &str = r##"
        precision highp float;
        precision mediump sampler2D;
        varying vec2 vUv;
        uniform sampler2D uTexture;
        uniform float scale;

        void main () {
            gl_FragColor = vec4(abs(texture2D(uTexture, vUv).xyz) * scale, 1.0);
        }
        "##;

const SPLAT_FRAGMENT_SHADER: &str = r##"
        precision highp float;
        precision mediump sampler2D;
        varying vec2 vUv;
        uniform sampler2D uTarget;
        uniform float aspectRatio;
        uniform vec3 color;
        uniform vec2 point;
        uniform float radius;

        void main () {
            vec2 p = vUv - point.xy;
            p.x *= aspectRatio;
            vec3 splat = exp(-dot(p, p) / radius) * color;
            vec3 base = texture2D(uTarget, vUv).xyz;
            gl_FragColor = vec4(base + splat, 1.0);
        }
        "##;

const ADVECTION_FRAGMENT_SHADER: &str = r##"
        precision highp float;
        precision mediump sampler2D;
        varying vec2 vUv;
        uniform sampler2D uVelocity;
        uniform sampler2D uSource;
        uniform vec2 texelSize;
        uniform float dt;
        uniform float dissipation;

        void main () {
            vec2 coord = vUv - dt * texture2D(uVelocity, vUv).xy * texelSize;
            gl_FragColor = dissipation * texture2D(uSource, coord);
        }
        "##;

const DIVERGENCE_FRAGMENT_SHADER: &str = r##"
        precision highp float;
        precision mediump sampler2D;
        varying vec2 vUv;
        varying vec2 vL;
        varying vec2 vR;
        varying vec2 vT;
        varying vec2 vB;
        uniform sampler2D uVelocity;

        void main () {
            float L = texture2D(uVelocity, vL).x;
            float R = texture2D(uVelocity, vR).x;
            float T = texture2D(uVelocity, vT).y;
            float B = texture2D(uVelocity, vB).y;
            vec2 C = texture2D(uVelocity, vUv).xy;
            if (vL.x < 0.0) { L = -C.x; }
            if (vR.x > 1.0) { R = -C.x; }
            if (vB.y < 0.0) { B = -C.y; }
            if (vT.y > 1.0) { T = -C.y; }
            float div = 0.5 * (R - L + T - B);
            gl_FragColor = vec4(div, 0.0, 0.0, 1.0);
        }
        "##;

const CURL_FRAGMENT_SHADER: &str = r##"
        precision highp float;
        precision mediump sampler2D;
        varying vec2 vUv;
        varying vec2 vL;
        varying vec2 vR;
        varying vec2 vT;
        varying vec2 vB;
        uniform sampler2D uVelocity;

        void main () {
            float L = texture2D(uVelocity, vL).y;
            float R = texture2D(uVelocity, vR).y;
            float T = texture2D(uVelocity, vT).x;
            float B = texture2D(uVelocity, vB).x;
            float vorticity = R - L - T + B;
            gl_FragColor = vec4(vorticity, 0.0, 0.0, 1.0);
        }
        "##;

const VORTICITY_FRAGMENT_SHADER: &str = r##"
        precision highp float;
        precision mediump sampler2D;
        varying vec2 vUv;
        varying vec2 vL;
        varying vec2 vR;
        varying vec2 vT;
        varying vec2 vB;
        uniform sampler2D uVelocity;
        uniform sampler2D uCurl;
        uniform float curl;
        uniform float dt;

        void main () {
            float L = texture2D(uCurl, vL).x;
            float R = texture2D(uCurl, vR).x;
            float T = texture2D(uCurl, vT).x;
            float B = texture2D(uCurl, vB).x;
            float C = texture2D(uCurl, vUv).x;
            vec2 force = 0.5 * vec2(abs(T) - abs(B), abs(R) - abs(L));
            force /= length(force) + 0.0001;
            force *= curl * C;
            force.y *= -1.0;
            vec2 vel = texture2D(uVelocity, vUv).xy;
            gl_FragColor = vec4(vel + force * dt, 0.0, 1.0);
        }
        "##;

const PRESSURE_FRAGMENT_SHADER: &str = r##"
        precision highp float;
        precision mediump sampler2D;
        varying vec2 vUv;
        varying vec2 vL;
        varying vec2 vR;
        varying vec2 vT;
        varying vec2 vB;
        uniform sampler2D uPressure;
        uniform sampler2D uDivergence;

        void main () {
            float L = texture2D(uPressure, vL).x;
            float R = texture2D(uPressure, vR).x;
            float T = texture2D(uPressure, vT).x;
            float B = texture2D(uPressure, vB).x;
            float divergence = texture2D(uDivergence, vUv).x;
            float pressure = (L + R + B + T - divergence) * 0.25;
            gl_FragColor = vec4(pressure, 0.0, 0.0, 1.0);
        }
        "##;

const GRADIENT_SUBTRACT_FRAGMENT_SHADER: &str = r##"
        precision highp float;
        precision mediump sampler2D;
        varying vec2 vUv;
        varying vec2 vL;
        varying vec2 vR;
        varying vec2 vT;
        varying vec2 vB;
        uniform sampler2D uPressure;
        uniform sampler2D uVelocity;

        void main () {
            float L = texture2D(uPressure, vL).x;
            float R = texture2D(uPressure, vR).x;
            float T = texture2D(uPressure, vT).x;
            float B = texture2D(uPressure, vB).x;
            vec2 velocity = texture2D(uVelocity, vUv).xy;
            velocity.xy -= 0.5 * vec2(R - L, T - B);
            gl_FragColor = vec4(velocity, 0.0, 1.0);
        }
        "##;

#[derive(Debug, Clone, Copy)]
pub struct ProgramSource {
    pub role: ProgramRole,
    pub vertex: &'static str,
    pub fragment: &'static str,
}

impl ProgramSource {
    pub fn for_role(role: ProgramRole) -> Self {
        let fragment = match role {
            ProgramRole::Advection => ADVECTION_FRAGMENT_SHADER,
            ProgramRole::Splat => SPLAT_FRAGMENT_SHADER,
            ProgramRole::Curl => CURL_FRAGMENT_SHADER,
            ProgramRole::Vorticity => VORTICITY_FRAGMENT_SHADER,
            ProgramRole::Divergence => DIVERGENCE_FRAGMENT_SHADER,
            ProgramRole::Pressure => PRESSURE_FRAGMENT_SHADER,
            ProgramRole::Clear => CLEAR_FRAGMENT_SHADER,
            ProgramRole::GradientSubtract => GRADIENT_SUBTRACT_FRAGMENT_SHADER,
            ProgramRole::Display => DISPLAY_FRAGMENT_SHADER,
            ProgramRole::Visualize => VISUALIZE_FRAGMENT_SHADER,
        };
        Self {
            role,
            vertex: BASE_VERTEX_SHADER,
            fragment,
        }
    }
}

/// A linked program plus the fixed name -> (slot, type) table captured at link time.
/// Never mutated after construction; uniform values live in a [`ProgramBinding`].
pub struct ShaderProgram<P> {
    role: ProgramRole,
    handle: P,
    slots: HashMap<String, (usize, UniformKind)>,
}

impl<P> ShaderProgram<P> {
    pub fn compile<B: GraphicsBackend<Program = P>>(backend: &mut B, role: ProgramRole) -> SmokeResult<Self> {
        let CompiledProgram { handle, uniforms } = backend.compile_program(&ProgramSource::for_role(role))?;
        let slots = uniforms
            .into_iter()
            .enumerate()
            .map(|(slot, uniform)| (uniform.name, (slot, uniform.kind)))
            .collect();
        Ok(Self { role, handle, slots })
    }

    pub fn role(&self) -> ProgramRole {
        self.role
    }

    pub fn handle(&self) -> &P {
        &self.handle
    }

    #[cfg(test)]
    pub fn has_uniform(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn bind(&self) -> ProgramBinding<'_, P> {
        ProgramBinding {
            program: self,
            uniforms: Vec::with_capacity(self.slots.len()),
        }
    }

    pub fn into_handle(self) -> P {
        self.handle
    }
}

/// Uniform values for one pass of a program.
pub struct ProgramBinding<'a, P> {
    program: &'a ShaderProgram<P>,
    uniforms: Vec<BoundUniform>,
}

impl<'a, P> ProgramBinding<'a, P> {
    /// Fails fast if `name` was not active at link time or was declared with another type.
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) -> SmokeResult<&mut Self> {
        let &(slot, expected) = self.program.slots.get(name).ok_or_else(|| SmokeError::UnknownUniform {
            role: self.program.role,
            name: name.to_string(),
        })?;

        if expected != value.kind() {
            return Err(SmokeError::UniformTypeMismatch {
                role: self.program.role,
                name: name.to_string(),
                expected,
                actual: value.kind(),
            });
        }

        match self.uniforms.iter_mut().find(|u| u.slot == slot) {
            Some(bound) => bound.value = value,
            None => self.uniforms.push(BoundUniform { slot, value }),
        }
        Ok(self)
    }

    pub fn program(&self) -> &'a ShaderProgram<P> {
        self.program
    }

    pub fn uniforms(&self) -> &[BoundUniform] {
        &self.uniforms
    }

    pub fn sampled_textures(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.uniforms.iter().filter_map(|u| match u.value {
            UniformValue::Sampler(texture) => Some(texture),
            _ => None,
        })
    }
}

/// All programs of the pipeline, created once at initialization.
pub struct Programs<P> {
    pub advection: ShaderProgram<P>,
    pub splat: ShaderProgram<P>,
    pub curl: ShaderProgram<P>,
    pub vorticity: ShaderProgram<P>,
    pub divergence: ShaderProgram<P>,
    pub pressure: ShaderProgram<P>,
    pub clear: ShaderProgram<P>,
    pub gradient_subtract: ShaderProgram<P>,
    pub display: ShaderProgram<P>,
    pub visualize: ShaderProgram<P>,
}

impl<P> Programs<P> {
    pub fn compile_all<B: GraphicsBackend<Program = P>>(backend: &mut B) -> SmokeResult<Self> {
        Ok(Self {
            advection: ShaderProgram::compile(backend, ProgramRole::Advection)?,
            splat: ShaderProgram::compile(backend, ProgramRole::Splat)?,
            curl: ShaderProgram::compile(backend, ProgramRole::Curl)?,
            vorticity: ShaderProgram::compile(backend, ProgramRole::Vorticity)?,
            divergence: ShaderProgram::compile(backend, ProgramRole::Divergence)?,
            pressure: ShaderProgram::compile(backend, ProgramRole::Pressure)?,
            clear: ShaderProgram::compile(backend, ProgramRole::Clear)?,
            gradient_subtract: ShaderProgram::compile(backend, ProgramRole::GradientSubtract)?,
            display: ShaderProgram::compile(backend, ProgramRole::Display)?,
            visualize: ShaderProgram::compile(backend, ProgramRole::Visualize)?,
        })
    }

    pub fn release<B: GraphicsBackend<Program = P>>(self, backend: &mut B) {
        for program in [
            self.advection,
            self.splat,
            self.curl,
            self.vorticity,
            self.divergence,
            self.pressure,
            self.clear,
            self.gradient_subtract,
            self.display,
            self.visualize,
        ] {
            backend.delete_program(program.into_handle());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software_backend::SoftwareBackend;

    #[test]
    fn every_role_compiles() {
        let mut backend = SoftwareBackend::new(8, 8);
        for role in ALL_PROGRAM_ROLES {
            let program = ShaderProgram::compile(&mut backend, role).unwrap();
            assert_eq!(program.role(), role);
        }
    }

    #[test]
    fn link_table_contains_declared_uniforms() {
        let mut backend = SoftwareBackend::new(8, 8);
        let splat = ShaderProgram::compile(&mut backend, ProgramRole::Splat).unwrap();
        for name in [U_TARGET, U_ASPECT_RATIO, U_COLOR, U_POINT, U_RADIUS] {
            assert!(splat.has_uniform(name), "missing {}", name);
        }
        assert!(!splat.has_uniform(U_DT));
    }

    #[test]
    fn unknown_uniform_fails_fast() {
        let mut backend = SoftwareBackend::new(8, 8);
        let clear = ShaderProgram::compile(&mut backend, ProgramRole::Clear).unwrap();
        let mut binding = clear.bind();
        match binding.set_uniform("dissipation", UniformValue::Float(0.5)) {
            Err(SmokeError::UnknownUniform { role, name }) => {
                assert_eq!(role, ProgramRole::Clear);
                assert_eq!(name, "dissipation");
            }
            _ => panic!("expected UnknownUniform"),
        }
    }

    #[test]
    fn uniform_type_is_checked() {
        let mut backend = SoftwareBackend::new(8, 8);
        let advection = ShaderProgram::compile(&mut backend, ProgramRole::Advection).unwrap();
        let mut binding = advection.bind();
        assert!(matches!(
            binding.set_uniform(U_DT, UniformValue::Vec2([0., 0.])),
            Err(SmokeError::UniformTypeMismatch {
                expected: UniformKind::Float,
                actual: UniformKind::Vec2,
                ..
            })
        ));
    }

    #[test]
    fn rebinding_a_uniform_replaces_its_value() {
        let mut backend = SoftwareBackend::new(8, 8);
        let clear = ShaderProgram::compile(&mut backend, ProgramRole::Clear).unwrap();
        let mut binding = clear.bind();
        binding
            .set_uniform(U_VALUE, UniformValue::Float(0.5))
            .unwrap()
            .set_uniform(U_TEXTURE, UniformValue::Sampler(TextureId(3)))
            .unwrap()
            .set_uniform(U_VALUE, UniformValue::Float(0.25))
            .unwrap();

        assert_eq!(binding.uniforms().len(), 2);
        assert!(binding
            .uniforms()
            .iter()
            .any(|u| u.value == UniformValue::Float(0.25)));
        assert_eq!(binding.sampled_textures().collect::<Vec<_>>(), vec![TextureId(3)]);
    }
}
