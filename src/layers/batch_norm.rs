use log::trace;
use rand::RngCore;

use crate::{
    Error, Initialization, Layer, Result, Storage, Variable,
    layers::{Ports, batch_and_features, check_features, ports},
};

#[derive(Debug, Clone)]
struct Parameters {
    /// Trainable `[1, features]`.
    scale: Variable,
    /// Trainable `[1, features]`.
    shift: Variable,
    /// Preservable `[1, features]`.
    running_mean: Variable,
    /// Preservable `[1, features]`.
    running_variance: Variable,
    /// Normalized input of the last training pass, `[batch, features]`.
    normalized: Variable,
    /// `1 / sqrt(var + epsilon)` of the last training pass, `[1, features]`.
    inverse_std: Variable,
}

/// Batch normalization over the batch axis of a `[batch, features]` input.
///
/// Running statistics are preservable, so they survive a change of batch size.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    momentum: f32,
    epsilon: f32,
    ports: Option<Ports>,
    parameters: Option<Parameters>,
}

impl Default for BatchNorm {
    fn default() -> Self {
        Self::new(0.99, 1e-4)
    }
}

impl BatchNorm {
    /// `momentum` is the weight of the old running statistics in each update.
    pub fn new(momentum: f32, epsilon: f32) -> Self {
        Self {
            momentum,
            epsilon,
            ports: None,
            parameters: None,
        }
    }

    /// Returns `None` before the layer is initialized.
    pub fn scale(&self) -> Option<&Variable> {
        self.parameters.as_ref().map(|p| &p.scale)
    }

    /// Returns `None` before the layer is initialized.
    pub fn shift(&self) -> Option<&Variable> {
        self.parameters.as_ref().map(|p| &p.shift)
    }

    /// Returns `None` before the layer is initialized.
    pub fn running_mean(&self) -> Option<&Variable> {
        self.parameters.as_ref().map(|p| &p.running_mean)
    }

    /// Returns `None` before the layer is initialized.
    pub fn running_variance(&self) -> Option<&Variable> {
        self.parameters.as_ref().map(|p| &p.running_variance)
    }

    fn parts(&self) -> Result<(&Ports, &Parameters)> {
        let ports = ports(&self.ports)?;
        let parameters = self.parameters.as_ref().ok_or(Error::NotInitialized)?;
        Ok((ports, parameters))
    }
}

impl Layer for BatchNorm {
    fn name(&self) -> &'static str {
        "batch_norm"
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
        storage: &mut Storage,
        _rng: &mut dyn RngCore,
        _initialization: Initialization,
    ) -> Result<()> {
        let (batch, features) = batch_and_features(input)?;
        let parameters = Parameters {
            scale: Variable::trainable([1, features]),
            shift: Variable::trainable([1, features]),
            running_mean: Variable::preservable([1, features]),
            running_variance: Variable::preservable([1, features]),
            normalized: Variable::new([batch, features]),
            inverse_std: Variable::new([1, features]),
        };
        storage.assign_tensor_with(&parameters.scale, || 1.0)?;
        storage.assign_tensor_with(&parameters.shift, || 0.0)?;
        storage.assign_tensor_with(&parameters.running_mean, || 0.0)?;
        storage.assign_tensor_with(&parameters.running_variance, || 1.0)?;
        self.parameters = Some(parameters);
        self.ports = Some(Ports::same_shape(input));
        Ok(())
    }

    fn update_dimensions(&mut self, input: &Variable) -> Result<()> {
        let parameters = self.parameters.as_mut().ok_or(Error::NotInitialized)?;
        let features = parameters.scale.dimensions()[1];
        let batch = check_features(input, features)?;
        parameters.normalized = Variable::new([batch, features]);
        self.ports = Some(Ports::same_shape(input));
        Ok(())
    }

    fn forward(&mut self, storage: &mut Storage, training: bool) -> Result<()> {
        let (ports, p) = self.parts()?;
        trace!("batch_norm forward {} training={training}", ports.input.shape());
        let [x, y, scale, shift, running_mean, running_variance, normalized, inverse_std] = storage
            .slots_mut([
                &ports.input,
                &ports.output,
                &p.scale,
                &p.shift,
                &p.running_mean,
                &p.running_variance,
                &p.normalized,
                &p.inverse_std,
            ])?;
        let x = x.tensor_mut()?;
        let y = y.tensor_mut()?;
        let scale = scale.tensor_mut()?.as_slice();
        let shift = shift.tensor_mut()?.as_slice();
        let running_mean = running_mean.tensor_mut()?.as_mut_slice();
        let running_variance = running_variance.tensor_mut()?.as_mut_slice();
        let features = scale.len();

        if !training {
            for (x_row, y_row) in x.rows().zip(y.rows_mut()) {
                for f in 0..features {
                    let x_hat = (x_row[f] - running_mean[f])
                        / (running_variance[f] + self.epsilon).sqrt();
                    y_row[f] = scale[f] * x_hat + shift[f];
                }
            }
            return Ok(());
        }

        let batch = x.dimensions()[0] as f32;
        let mut mean = vec![0.0f32; features];
        for x_row in x.rows() {
            for (m, &x_f) in mean.iter_mut().zip(x_row) {
                *m += x_f / batch;
            }
        }
        let mut variance = vec![0.0f32; features];
        for x_row in x.rows() {
            for f in 0..features {
                variance[f] += (x_row[f] - mean[f]).powi(2) / batch;
            }
        }
        let inverse_std = inverse_std.tensor_mut()?.as_mut_slice();
        for f in 0..features {
            inverse_std[f] = 1.0 / (variance[f] + self.epsilon).sqrt();
            running_mean[f] = self.momentum * running_mean[f] + (1.0 - self.momentum) * mean[f];
            running_variance[f] =
                self.momentum * running_variance[f] + (1.0 - self.momentum) * variance[f];
        }
        let normalized = normalized.tensor_mut()?;
        for ((x_row, n_row), y_row) in x.rows().zip(normalized.rows_mut()).zip(y.rows_mut()) {
            for f in 0..features {
                n_row[f] = (x_row[f] - mean[f]) * inverse_std[f];
                y_row[f] = scale[f] * n_row[f] + shift[f];
            }
        }
        Ok(())
    }

    fn backward(&mut self, storage: &mut Storage) -> Result<()> {
        let (ports, p) = self.parts()?;
        trace!("batch_norm backward {}", ports.input.shape());
        let [x, y, scale, shift, normalized, inverse_std] = storage.slots_mut([
            &ports.input,
            &ports.output,
            &p.scale,
            &p.shift,
            &p.normalized,
            &p.inverse_std,
        ])?;
        let dx = x.gradient_mut()?;
        let dy = y.gradient_mut()?;
        let (scale, d_scale) = scale.value_and_gradient_mut()?;
        let d_shift = shift.gradient_mut()?.as_mut_slice();
        let normalized = normalized.tensor_mut()?;
        let inverse_std = inverse_std.tensor_mut()?.as_slice();
        let scale = scale.as_slice();
        let d_scale = d_scale.as_mut_slice();
        let features = scale.len();
        let batch = dx.dimensions()[0] as f32;

        d_scale.fill(0.0);
        d_shift.fill(0.0);
        for (dy_row, n_row) in dy.rows().zip(normalized.rows()) {
            for f in 0..features {
                d_shift[f] += dy_row[f];
                d_scale[f] += dy_row[f] * n_row[f];
            }
        }
        for ((dx_row, dy_row), n_row) in dx.rows_mut().zip(dy.rows()).zip(normalized.rows()) {
            for f in 0..features {
                dx_row[f] = scale[f] * inverse_std[f] / batch
                    * (batch * dy_row[f] - d_shift[f] - n_row[f] * d_scale[f]);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn initialized(batch: usize, features: usize) -> (BatchNorm, Storage) {
        let mut storage = Storage::new();
        let mut layer = BatchNorm::new(0.9, 1e-5);
        layer
            .initialize(
                &Variable::new([batch, features]),
                &mut storage,
                &mut StdRng::seed_from_u64(0),
                Initialization::default(),
            )
            .unwrap();
        (layer, storage)
    }

    #[test]
    fn declares_trainable_and_preservable_parameters() {
        let (layer, mut storage) = initialized(4, 2);
        assert_eq!(storage.trainable_parameters().len(), 2);
        assert!(layer.running_mean().unwrap().is_preservable());
        assert!(!layer.running_mean().unwrap().is_trainable());
        assert_eq!(
            storage.tensor(layer.running_variance().unwrap()).unwrap().as_slice(),
            &[1.0, 1.0]
        );
    }

    #[test]
    fn training_forward_normalizes_and_tracks_statistics() {
        let (mut layer, mut storage) = initialized(2, 1);
        let input = layer.input().unwrap().clone();
        storage.assign_tensor(&input, &[1.0, 3.0]).unwrap();
        layer.forward(&mut storage, true).unwrap();
        let y = storage.peek_tensor(layer.output().unwrap()).unwrap().as_slice();
        assert_approx_eq!(y[0], -1.0, 1e-3);
        assert_approx_eq!(y[1], 1.0, 1e-3);
        let mean = storage.peek_tensor(layer.running_mean().unwrap()).unwrap().as_slice();
        assert_approx_eq!(mean[0], 0.2);
        let variance = storage.peek_tensor(layer.running_variance().unwrap()).unwrap().as_slice();
        assert_approx_eq!(variance[0], 0.9 + 0.1 * 1.0);
    }

    #[test]
    fn inference_uses_running_statistics() {
        let (mut layer, mut storage) = initialized(2, 1);
        let input = layer.input().unwrap().clone();
        storage.assign_tensor(layer.running_mean().unwrap(), &[1.0]).unwrap();
        storage.assign_tensor(layer.running_variance().unwrap(), &[4.0]).unwrap();
        storage.assign_tensor(&input, &[1.0, 5.0]).unwrap();
        layer.forward(&mut storage, false).unwrap();
        let y = storage.peek_tensor(layer.output().unwrap()).unwrap().as_slice();
        assert_approx_eq!(y[0], 0.0, 1e-3);
        assert_approx_eq!(y[1], 2.0, 1e-3);
        // Inference leaves the statistics alone.
        let mean = storage.peek_tensor(layer.running_mean().unwrap()).unwrap().as_slice();
        assert_eq!(mean, &[1.0]);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let (mut layer, mut storage) = initialized(3, 2);
        let input = layer.input().unwrap().clone();
        let output = layer.output().unwrap().clone();
        let scale = layer.scale().unwrap().clone();
        storage.assign_tensor(&scale, &[1.5, -0.5]).unwrap();
        let x = [0.2f32, 1.0, -0.4, 0.3, 0.9, -1.2];
        let c = [1.0f32, -2.0, 0.5, 0.25, -1.0, 3.0];
        storage.assign_tensor(&input, &x).unwrap();
        storage.assign_gradient(&output, &c).unwrap();
        layer.forward(&mut storage, true).unwrap();
        layer.backward(&mut storage).unwrap();
        let dx = storage.peek_gradient(&input).unwrap().clone();

        let h = 1e-2f32;
        for i in 0..x.len() {
            let mut loss_at = |delta: f32| {
                let mut shifted = x;
                shifted[i] += delta;
                storage.assign_tensor(&input, &shifted).unwrap();
                layer.forward(&mut storage, true).unwrap();
                let y = storage.peek_tensor(&output).unwrap().as_slice();
                y.iter().zip(&c).map(|(y, c)| y * c).sum::<f32>()
            };
            let numeric = (loss_at(h) - loss_at(-h)) / (2.0 * h);
            assert_approx_eq!(dx.as_slice()[i], numeric, 5e-2);
        }
    }

    #[test]
    fn update_dimensions_keeps_statistics() {
        let (mut layer, _) = initialized(4, 2);
        let mean = layer.running_mean().unwrap().clone();
        layer.update_dimensions(&Variable::new([1, 2])).unwrap();
        assert_eq!(layer.running_mean().unwrap(), &mean);
        assert_eq!(layer.output().unwrap().dimensions(), &[1, 2]);
        assert!(layer.update_dimensions(&Variable::new([1, 3])).is_err());
    }
}
