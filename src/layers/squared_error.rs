use std::iter;

use log::trace;
use rand::RngCore;

use crate::{
    Initialization, Layer, Result, Storage, Variable,
    layers::{Ports, ports},
};

/// Regression output layer.
///
/// The forward pass passes its input through. The targets are expected in the gradient buffer of
/// the output, where [`NeuralNetwork::set_next_batch`](crate::NeuralNetwork::set_next_batch)
/// writes them, and the backward pass turns them into `prediction - target`.
#[derive(Debug, Clone, Default)]
pub struct SquaredError {
    ports: Option<Ports>,
}

impl SquaredError {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for SquaredError {
    fn name(&self) -> &'static str {
        "squared_error"
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
        _rng: &mut dyn RngCore,
        _initialization: Initialization,
    ) -> Result<()> {
        self.ports = Some(Ports::same_shape(input));
        Ok(())
    }

    fn update_dimensions(&mut self, input: &Variable) -> Result<()> {
        self.ports = Some(Ports::same_shape(input));
        Ok(())
    }

    fn forward(&mut self, storage: &mut Storage, _training: bool) -> Result<()> {
        let ports = ports(&self.ports)?;
        trace!("squared_error forward {}", ports.input.shape());
        let [x, y] = storage.slots_mut([&ports.input, &ports.output])?;
        let x = x.tensor_mut()?;
        y.tensor_mut()?.copy_from_slice(x.as_slice())
    }

    fn backward(&mut self, storage: &mut Storage) -> Result<()> {
        let ports = ports(&self.ports)?;
        trace!("squared_error backward {}", ports.input.shape());
        let [x, y] = storage.slots_mut([&ports.input, &ports.output])?;
        let dx = x.gradient_mut()?;
        let (y, targets) = y.value_and_gradient_mut()?;
        for ((dx_i, &y_i), &t_i) in
            iter::zip(dx.as_mut_slice(), y.as_slice()).zip(targets.as_slice())
        {
            *dx_i = y_i - t_i;
        }
        Ok(())
    }

    /// Mean over the batch of the summed squared error, `0.5 * sum((y - t)^2) / batch`.
    fn loss(&self, storage: &mut Storage) -> Result<Option<f32>> {
        let ports = ports(&self.ports)?;
        let batch = ports.output.dimensions().first().copied().unwrap_or(1).max(1);
        let [output] = storage.slots_mut([&ports.output])?;
        let (y, t) = output.value_and_gradient_mut()?;
        let sum = iter::zip(y.as_slice(), t.as_slice())
            .map(|(y, t)| (y - t).powi(2))
            .sum::<f32>();
        Ok(Some(0.5 * sum / batch as f32))
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn error_is_prediction_minus_target() {
        let mut storage = Storage::new();
        let mut layer = SquaredError::new();
        layer
            .initialize(
                &Variable::new([2, 1]),
                &mut storage,
                &mut StdRng::seed_from_u64(0),
                Initialization::default(),
            )
            .unwrap();
        let input = layer.input().unwrap().clone();
        let output = layer.output().unwrap().clone();
        storage.assign_tensor(&input, &[0.5, 2.0]).unwrap();
        storage.assign_gradient(&output, &[1.0, 1.0]).unwrap();
        layer.forward(&mut storage, true).unwrap();
        assert_eq!(storage.peek_tensor(&output).unwrap().as_slice(), &[0.5, 2.0]);
        assert_approx_eq!(layer.loss(&mut storage).unwrap().unwrap(), 0.5 * (0.25 + 1.0) / 2.0);
        layer.backward(&mut storage).unwrap();
        assert_eq!(storage.peek_gradient(&input).unwrap().as_slice(), &[-0.5, 1.0]);
        // Targets stay in place for the next backward pass.
        assert_eq!(storage.peek_gradient(&output).unwrap().as_slice(), &[1.0, 1.0]);
    }
}
