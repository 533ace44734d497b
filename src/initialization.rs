use std::f32::consts::TAU;

use rand::{Rng, RngCore};

/// Weight initialization schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Initialization {
    #[default]
    GlorotUniform,
    GlorotNormal,
    HeUniform,
    HeNormal,
    /// Uniform in `[-0.05, 0.05)`.
    Uniform,
}

impl Initialization {
    /// Draws one weight for a layer with `fan_in` inputs and `fan_out` outputs.
    pub fn sample(self, fan_in: usize, fan_out: usize, rng: &mut dyn RngCore) -> f32 {
        let fan_in = fan_in.max(1) as f32;
        let fan_out = fan_out.max(1) as f32;
        match self {
            Self::GlorotUniform => {
                let limit = (6.0 / (fan_in + fan_out)).sqrt();
                rng.random_range(-limit..limit)
            }
            Self::GlorotNormal => standard_normal(rng) * (2.0 / (fan_in + fan_out)).sqrt(),
            Self::HeUniform => {
                let limit = (6.0 / fan_in).sqrt();
                rng.random_range(-limit..limit)
            }
            Self::HeNormal => standard_normal(rng) * (2.0 / fan_in).sqrt(),
            Self::Uniform => rng.random_range(-0.05..0.05),
        }
    }
}

/// Box-Muller transform.
fn standard_normal(rng: &mut dyn RngCore) -> f32 {
    // In (0, 1], so the log is finite.
    let u1 = 1.0 - rng.random::<f32>();
    let u2 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}
