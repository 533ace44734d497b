use std::iter;

use log::trace;
use rand::{Rng, RngCore, SeedableRng, rngs::StdRng};

use crate::{
    Error, Initialization, Layer, Result, Storage, Variable,
    layers::{Ports, ports},
};

/// Inverted dropout. Zeroes each element with probability `rate` while training and scales the
/// survivors by `1 / (1 - rate)`; the identity at inference.
#[derive(Debug, Clone)]
pub struct Dropout {
    rate: f32,
    ports: Option<Ports>,
    /// Scaled keep mask of the last training pass, same shape as the input.
    mask: Option<Variable>,
    rng: Option<StdRng>,
    last_pass_training: bool,
}

impl Dropout {
    /// `rate` is clamped to `[0, 1)`.
    pub fn new(rate: f32) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0 - f32::EPSILON),
            ports: None,
            mask: None,
            rng: None,
            last_pass_training: false,
        }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }
}

impl Layer for Dropout {
    fn name(&self) -> &'static str {
        "dropout"
    }

    fn input(&self) -> Option<&Variable> {
        self.ports.as_ref().map(|ports| &ports.input)
    }

    fn output(&self) -> Option<&Variable> {
        self.ports.as_ref().map(|ports| &ports.output)
    }

    fn initialize(
        &mut self,
        input: &Variable,
        _storage: &mut Storage,
        rng: &mut dyn RngCore,
        _initialization: Initialization,
    ) -> Result<()> {
        self.rng = Some(StdRng::seed_from_u64(rng.next_u64()));
        self.mask = Some(Variable::new(input.dimensions()));
        self.ports = Some(Ports::same_shape(input));
        Ok(())
    }

    fn update_dimensions(&mut self, input: &Variable) -> Result<()> {
        if self.rng.is_none() {
            return Err(Error::NotInitialized);
        }
        self.mask = Some(Variable::new(input.dimensions()));
        self.ports = Some(Ports::same_shape(input));
        Ok(())
    }

    fn forward(&mut self, storage: &mut Storage, training: bool) -> Result<()> {
        let ports = ports(&self.ports)?;
        let (Some(mask), Some(rng)) = (&self.mask, &mut self.rng) else {
            return Err(Error::NotInitialized);
        };
        trace!("dropout forward {} training={training}", ports.input.shape());
        self.last_pass_training = training;
        let [x, y, mask] = storage.slots_mut([&ports.input, &ports.output, mask])?;
        let x = x.tensor_mut()?;
        let y = y.tensor_mut()?;
        if !training {
            return y.copy_from_slice(x.as_slice());
        }
        let keep = 1.0 - self.rate;
        let mask = mask.tensor_mut()?;
        mask.fill_with(|| {
            if rng.random::<f32>() < keep {
                1.0 / keep
            } else {
                0.0
            }
        });
        for ((y_i, &x_i), &m_i) in iter::zip(y.as_mut_slice(), x.as_slice()).zip(mask.as_slice()) {
            *y_i = x_i * m_i;
        }
        Ok(())
    }

    fn backward(&mut self, storage: &mut Storage) -> Result<()> {
        let ports = ports(&self.ports)?;
        let mask = self.mask.as_ref().ok_or(Error::NotInitialized)?;
        trace!("dropout backward {}", ports.input.shape());
        let [x, y, mask] = storage.slots_mut([&ports.input, &ports.output, mask])?;
        let dx = x.gradient_mut()?;
        let dy = y.gradient_mut()?;
        if !self.last_pass_training {
            return dx.copy_from_slice(dy.as_slice());
        }
        let mask = mask.tensor_mut()?;
        let dy_and_mask = iter::zip(dy.as_slice(), mask.as_slice());
        for (dx_i, (&dy_i, &m_i)) in iter::zip(dx.as_mut_slice(), dy_and_mask) {
            *dx_i = dy_i * m_i;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized(rate: f32, dimensions: [usize; 2]) -> (Dropout, Storage) {
        let mut storage = Storage::new();
        let mut layer = Dropout::new(rate);
        layer
            .initialize(
                &Variable::new(dimensions),
                &mut storage,
                &mut StdRng::seed_from_u64(5),
                Initialization::default(),
            )
            .unwrap();
        (layer, storage)
    }

    #[test]
    fn identity_at_inference() {
        let (mut layer, mut storage) = initialized(0.5, [2, 3]);
        let input = layer.input().unwrap().clone();
        let output = layer.output().unwrap().clone();
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        storage.assign_tensor(&input, &data).unwrap();
        layer.forward(&mut storage, false).unwrap();
        assert_eq!(storage.peek_tensor(&output).unwrap().as_slice(), &data);
        storage.assign_gradient(&output, &data).unwrap();
        layer.backward(&mut storage).unwrap();
        assert_eq!(storage.peek_gradient(&input).unwrap().as_slice(), &data);
    }

    #[test]
    fn training_drops_and_rescales() {
        let (mut layer, mut storage) = initialized(0.5, [50, 20]);
        let input = layer.input().unwrap().clone();
        let output = layer.output().unwrap().clone();
        storage.assign_tensor_with(&input, || 1.0).unwrap();
        layer.forward(&mut storage, true).unwrap();
        let y = storage.peek_tensor(&output).unwrap().as_slice();
        assert!(y.iter().all(|&y| y == 0.0 || y == 2.0));
        let kept = y.iter().filter(|&&y| y == 2.0).count();
        assert!((400..600).contains(&kept));

        storage.assign_gradient_with(&output, || 1.0).unwrap();
        layer.backward(&mut storage).unwrap();
        let y = storage.peek_tensor(&output).unwrap().as_slice().to_vec();
        let dx = storage.peek_gradient(&input).unwrap().as_slice();
        assert_eq!(dx, y.as_slice());
    }

    #[test]
    fn zero_rate_is_identity_while_training() {
        let (mut layer, mut storage) = initialized(0.0, [1, 4]);
        let input = layer.input().unwrap().clone();
        storage.assign_tensor(&input, &[1.0, -1.0, 2.0, -2.0]).unwrap();
        layer.forward(&mut storage, true).unwrap();
        assert_eq!(
            storage.peek_tensor(layer.output().unwrap()).unwrap().as_slice(),
            &[1.0, -1.0, 2.0, -2.0]
        );
    }
}
