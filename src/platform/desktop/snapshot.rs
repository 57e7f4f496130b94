use std::{f32::consts::TAU, fs::File, io::BufWriter, path::Path};

use log::info;

use crate::{
    input_mapper::MOUSE_POINTER_ID, simulation_parameters::SimulationConfig, software_backend::SoftwareBackend,
    surface::Surface, vec3f, SimulationSession,
};

/// Picks `<basepath>-<n>.png` with the first `n` not taken yet.
pub fn next_free_path(basepath: &str) -> String {
    let mut i = 0;
    loop {
        let s = format!("{}-{}.png", basepath, i);
        if !Path::new(&s).exists() {
            break s;
        }
        i += 1;
    }
}

/// Writes 8-bit RGBA pixels (top row first) as PNG.
pub fn save_png(path: &str, width: u32, height: u32, rgba: &[u8]) -> Result<(), String> {
    let file = File::create(path).map_err(|e| format!("failed creating `{}`: {}", path, e))?;

    let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_source_gamma(png::ScaledFloat::new(1.0 / 2.2));
    let source_chromaticities = png::SourceChromaticities::new(
        (0.31270, 0.32900),
        (0.64000, 0.33000),
        (0.30000, 0.60000),
        (0.15000, 0.06000),
    );
    encoder.set_source_chromaticities(source_chromaticities);

    let mut writer = encoder.write_header().map_err(|e| e.to_string())?;
    writer.write_image_data(rgba).map_err(|e| e.to_string())?;
    info!("wrote {}x{} image to `{}`", width, height, path);
    Ok(())
}

/// Position of the scripted pointer after `step` of `steps`: one loop of a circle around
/// the center of the drawable.
fn scripted_pointer(step: usize, steps: usize, width: u32, height: u32) -> (f32, f32) {
    let angle = TAU * step as f32 / steps.max(1) as f32;
    let radius = 0.3 * width.min(height) as f32;
    (
        width as f32 * 0.5 + radius * angle.cos(),
        height as f32 * 0.5 + radius * angle.sin(),
    )
}

/// Runs `steps` frames at a fixed 60 Hz clock with a scripted pointer and stores the last
/// frame.
pub fn run_snapshot(
    config: SimulationConfig,
    width: u32,
    height: u32,
    steps: usize,
    output: &str,
) -> Result<(), String> {
    let surface = Surface::acquire(SoftwareBackend::new(width, height)).map_err(|e| e.to_string())?;
    let mut session = SimulationSession::new(surface, config).map_err(|e| e.to_string())?;
    session.initialize().map_err(|e| e.to_string())?;

    // a strong white splat in the middle, so even a single step shows something
    session.splat_at(
        width as f32 * 0.5,
        height as f32 * 0.5,
        0.,
        -200.,
        vec3f(1., 1., 1.),
    );

    for step in 0..steps {
        let (x, y) = scripted_pointer(step, steps, width, height);
        session.on_pointer_move(MOUSE_POINTER_ID, x, y);
        session.step(step as f64 / 60.).map_err(|e| e.to_string())?;
    }

    let pixels = session.surface().backend().surface_rgba8();
    save_png(output, width, height, &pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_pointer_stays_inside() {
        for step in 0..100 {
            let (x, y) = scripted_pointer(step, 100, 200, 100);
            assert!((0f32..200.).contains(&x));
            assert!((0f32..100.).contains(&y));
        }
    }

    #[test]
    fn snapshot_writes_png() {
        let path = std::env::temp_dir().join(format!("stable-smoke-snapshot-{}.png", std::process::id()));
        let path = path.to_string_lossy().to_string();
        run_snapshot(SimulationConfig::default(), 32, 24, 3, &path).unwrap();

        let decoder = png::Decoder::new(File::open(&path).unwrap());
        let reader = decoder.read_info().unwrap();
        assert_eq!((reader.info().width, reader.info().height), (32, 24));
        std::fs::remove_file(&path).unwrap();
    }
}
