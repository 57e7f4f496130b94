use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::simulation_parameters::SimulationConfig;
use crate::{V2, V3};

/// Mouse pointer id. Touches use their browser identifier.
pub const MOUSE_POINTER_ID: i32 = -1;

/// One impulse in drawable pixels. `dx`/`dy` are already scaled by the splat force;
/// `y` grows downwards like DOM and SDL coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Splat {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
    pub color: V3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pointer {
    pub id: i32,
    pub position: V2,
    pub delta: V2,
    pub color: V3,
    // consumed by the next step
    pub moved: bool,
}

pub struct InputMapper {
    pointers: Vec<Pointer>,
    queued: Vec<Splat>,
    color: V3,
    moves_since_color_change: u32,
    color_cycle_moves: u32,
    splat_force: f32,
    splat_color_intensity: f32,
    rng: SmallRng,
}

impl InputMapper {
    pub fn new(config: &SimulationConfig) -> Self {
        Self::with_rng(config, SmallRng::from_entropy())
    }

    pub fn with_rng(config: &SimulationConfig, mut rng: SmallRng) -> Self {
        let color = Self::random_color(&mut rng);
        Self {
            pointers: Vec::new(),
            queued: Vec::new(),
            color,
            moves_since_color_change: 0,
            color_cycle_moves: config.color_cycle_moves,
            splat_force: config.splat_force,
            splat_color_intensity: config.splat_color_intensity,
            rng,
        }
    }

    // biased towards bright colors
    fn random_color(rng: &mut SmallRng) -> V3 {
        V3::new(rng.gen::<f32>() + 0.2, rng.gen::<f32>() + 0.2, rng.gen::<f32>() + 0.2)
    }

    pub fn active_color(&self) -> V3 {
        self.color
    }

    #[cfg(test)]
    pub fn pointers(&self) -> &[Pointer] {
        &self.pointers
    }

    /// Records a pointer position in drawable pixels. The first sample of a pointer only
    /// establishes its position.
    pub fn on_pointer_move(&mut self, id: i32, x: f32, y: f32) {
        self.moves_since_color_change += 1;
        if self.moves_since_color_change >= self.color_cycle_moves {
            self.color = Self::random_color(&mut self.rng);
            self.moves_since_color_change = 0;
        }

        let position = V2::new(x, y);
        let color = self.color;
        let splat_force = self.splat_force;

        match self.pointers.iter_mut().find(|p| p.id == id) {
            Some(pointer) => {
                pointer.delta = (position - pointer.position) * splat_force;
                pointer.position = position;
                pointer.color = color;
                pointer.moved = true;
            }
            None => self.pointers.push(Pointer {
                id,
                position,
                delta: V2::zeros(),
                color,
                moved: false,
            }),
        }
    }

    pub fn on_pointer_release(&mut self, id: i32) {
        self.pointers.retain(|p| p.id != id);
    }

    /// Queues a splat for the next step. The color is used as given.
    pub fn queue_splat(&mut self, splat: Splat) {
        self.queued.push(splat);
    }

    pub fn has_pending(&self) -> bool {
        !self.queued.is_empty() || self.pointers.iter().any(|p| p.moved)
    }

    /// Returns the splats of this step and clears every `moved` flag.
    pub fn take_splats(&mut self) -> Vec<Splat> {
        let intensity = self.splat_color_intensity;
        let mut splats: Vec<Splat> = self
            .pointers
            .iter_mut()
            .filter(|p| p.moved)
            .map(|p| {
                p.moved = false;
                Splat {
                    x: p.position.x,
                    y: p.position.y,
                    dx: p.delta.x,
                    dy: p.delta.y,
                    color: p.color * intensity,
                }
            })
            .collect();
        splats.append(&mut self.queued);
        splats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> InputMapper {
        InputMapper::with_rng(&SimulationConfig::default(), SmallRng::seed_from_u64(7))
    }

    #[test]
    fn first_sample_only_primes_position() {
        let mut input = mapper();
        input.on_pointer_move(MOUSE_POINTER_ID, 100., 50.);
        assert!(!input.has_pending());
        assert!(input.take_splats().is_empty());

        input.on_pointer_move(MOUSE_POINTER_ID, 103., 49.);
        let splats = input.take_splats();
        assert_eq!(splats.len(), 1);
        assert_eq!((splats[0].x, splats[0].y), (103., 49.));
        assert_eq!((splats[0].dx, splats[0].dy), (30., -10.));

        // moved is consumed once
        assert!(input.take_splats().is_empty());
    }

    #[test]
    fn density_color_is_scaled() {
        let mut input = mapper();
        input.on_pointer_move(3, 0., 0.);
        input.on_pointer_move(3, 1., 0.);
        let color = input.active_color();
        let splat = input.take_splats()[0];
        assert!((splat.color - color * 0.3).norm() < 1e-6);
    }

    #[test]
    fn colors_cycle_every_configured_moves() {
        let config = SimulationConfig {
            color_cycle_moves: 4,
            ..SimulationConfig::default()
        };
        let mut input = InputMapper::with_rng(&config, SmallRng::seed_from_u64(1));
        let initial = input.active_color();
        for c in initial.iter() {
            assert!((0.2..1.2).contains(c));
        }

        for i in 0..3 {
            input.on_pointer_move(MOUSE_POINTER_ID, i as f32, 0.);
            assert_eq!(input.active_color(), initial);
        }
        input.on_pointer_move(MOUSE_POINTER_ID, 3., 0.);
        assert_ne!(input.active_color(), initial);
    }

    #[test]
    fn seeded_rng_is_deterministic() {
        let a = mapper();
        let b = mapper();
        assert_eq!(a.active_color(), b.active_color());
    }

    #[test]
    fn pointers_are_tracked_separately() {
        let mut input = mapper();
        input.on_pointer_move(0, 10., 10.);
        input.on_pointer_move(1, 20., 20.);
        input.on_pointer_move(0, 11., 10.);
        input.on_pointer_release(1);
        input.on_pointer_move(1, 25., 20.);

        let splats = input.take_splats();
        assert_eq!(splats.len(), 1);
        assert_eq!(splats[0].dx, 10.);
        assert_eq!(input.pointers().len(), 2);
    }

    #[test]
    fn queued_splats_come_after_pointers() {
        let mut input = mapper();
        input.queue_splat(Splat {
            x: 1.,
            y: 2.,
            dx: 3.,
            dy: 4.,
            color: V3::new(1., 1., 1.),
        });
        assert!(input.has_pending());
        let splats = input.take_splats();
        assert_eq!(splats.len(), 1);
        assert_eq!(splats[0].color, V3::new(1., 1., 1.));
        assert!(!input.has_pending());
    }
}
