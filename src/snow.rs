//! Ambient snow overlay
//!
//! Independent of surfaces: particles fall from above the viewport and are
//! drawn after all surfaces, with blending off for the surface pass.

use rand::Rng;
use serde::Serialize;

use crate::geometry::Viewport;
use crate::render::Frame;

/// Chance of spawning one particle per update
const SPAWN_PROBABILITY: f64 = 0.2;
/// Particles are dropped once this far below the bottom edge
const DESPAWN_MARGIN: f64 = 50.0;
const SNOW_ALPHA: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Particle {
    pub x: f64,
    pub y: f64,
    pub r: f64,
    /// Fall speed in pixels per second
    pub vy: f64,
}

#[derive(Debug, Default)]
pub struct SnowField {
    enabled: bool,
    particles: Vec<Particle>,
}

impl SnowField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Flip the overlay on or off, returning the new state
    pub fn toggle(&mut self) -> bool {
        self.enabled = !self.enabled;
        self.enabled
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Advance the simulation by `dt` seconds
    pub fn update(&mut self, dt: f64, viewport: &Viewport, rng: &mut impl Rng) {
        if !self.enabled {
            return;
        }

        if rng.gen_bool(SPAWN_PROBABILITY) {
            self.particles.push(Particle {
                x: rng.gen_range(0.0..viewport.width.max(1.0)),
                y: -10.0,
                r: 1.0 + rng.gen_range(0.0..3.0),
                vy: 30.0 + rng.gen_range(0.0..80.0),
            });
        }

        for particle in &mut self.particles {
            particle.y += particle.vy * dt;
        }

        let max_y = viewport.height + DESPAWN_MARGIN;
        self.particles.retain(|p| p.y <= max_y);
    }

    /// Paint the particles as filled circles (no-op while disabled)
    pub fn draw(&self, frame: &mut Frame, viewport: &Viewport) {
        if !self.enabled || self.particles.is_empty() {
            return;
        }
        let dpr = viewport.device_pixel_ratio.max(0.0);
        for p in &self.particles {
            frame.fill_circle(
                (p.x * dpr) as f32,
                (p.y * dpr) as f32,
                (p.r * dpr) as f32,
                [1.0, 1.0, 1.0, SNOW_ALPHA],
            );
        }
    }
}
