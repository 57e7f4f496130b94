use std::mem;

use crate::graphics::{GraphicsCapabilities, TextureDescriptor, TextureFilter, TextureFormat, TextureId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Velocity,
    Density,
    Pressure,
    Divergence,
    Curl,
}

impl FieldKind {
    pub fn format(self) -> TextureFormat {
        match self {
            FieldKind::Velocity => TextureFormat::Rg,
            FieldKind::Density => TextureFormat::Rgba,
            FieldKind::Pressure | FieldKind::Divergence | FieldKind::Curl => TextureFormat::R,
        }
    }

    /// Advected fields are sampled between texel centers and want bilinear filtering.
    /// Without float-linear support they degrade to nearest.
    pub fn filter(self, capabilities: &GraphicsCapabilities) -> TextureFilter {
        match self {
            FieldKind::Velocity | FieldKind::Density if capabilities.linear_filtering => TextureFilter::Linear,
            _ => TextureFilter::Nearest,
        }
    }

    pub fn descriptor(self, width: u32, height: u32, capabilities: &GraphicsCapabilities) -> TextureDescriptor {
        TextureDescriptor {
            width,
            height,
            format: self.format(),
            filter: self.filter(capabilities),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub kind: FieldKind,
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
}

impl Field {
    pub fn texel_size(&self) -> [f32; 2] {
        [1. / self.width as f32, 1. / self.height as f32]
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Two same-shaped fields. Passes read `read()` and write `write()`; only `swap` changes
/// which is which.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoubleBuffer {
    front: Field,
    back: Field,
}

impl DoubleBuffer {
    pub fn new(front: Field, back: Field) -> Self {
        debug_assert_eq!(front.kind, back.kind);
        debug_assert_eq!((front.width, front.height), (back.width, back.height));
        Self { front, back }
    }

    pub fn read(&self) -> &Field {
        &self.front
    }

    pub fn write(&self) -> &Field {
        &self.back
    }

    pub fn swap(&mut self) {
        mem::swap(&mut self.front, &mut self.back);
    }

    pub fn fields(&self) -> [Field; 2] {
        [self.front, self.back]
    }
}

/// All render targets of one resolution. Rebuilt as a whole on resize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    pub width: u32,
    pub height: u32,
    pub velocity: DoubleBuffer,
    pub density: DoubleBuffer,
    pub pressure: DoubleBuffer,
    pub divergence: Field,
    pub curl: Field,
}

impl FieldSet {
    pub fn all_fields(&self) -> Vec<Field> {
        let mut fields = Vec::with_capacity(8);
        fields.extend(self.velocity.fields());
        fields.extend(self.density.fields());
        fields.extend(self.pressure.fields());
        fields.push(self.divergence);
        fields.push(self.curl);
        fields
    }
}
