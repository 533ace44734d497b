use std::iter;

use log::trace;
use rand::RngCore;

use crate::{
    Initialization, Layer, Result, Storage, Variable,
    layers::{Ports, batch_and_features, ports},
};

/// Classification output layer: row-wise softmax with a cross-entropy gradient.
///
/// Like [`SquaredError`](crate::SquaredError), the targets (one-hot rows) live in the gradient
/// buffer of the output.
#[derive(Debug, Clone, Default)]
pub struct SoftMax {
    ports: Option<Ports>,
}

impl SoftMax {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for SoftMax {
    fn name(&self) -> &'static str {
        "softmax"
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
        batch_and_features(input)?;
        self.ports = Some(Ports::same_shape(input));
        Ok(())
    }

    fn update_dimensions(&mut self, input: &Variable) -> Result<()> {
        batch_and_features(input)?;
        self.ports = Some(Ports::same_shape(input));
        Ok(())
    }

    fn forward(&mut self, storage: &mut Storage, _training: bool) -> Result<()> {
        let ports = ports(&self.ports)?;
        trace!("softmax forward {}", ports.input.shape());
        let [x, y] = storage.slots_mut([&ports.input, &ports.output])?;
        let x = x.tensor_mut()?;
        let y = y.tensor_mut()?;
        for (x_row, y_row) in x.rows().zip(y.rows_mut()) {
            // Shift by the row maximum so `exp` cannot overflow.
            let max = x_row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f32;
            for (y_k, &x_k) in y_row.iter_mut().zip(x_row) {
                *y_k = (x_k - max).exp();
                sum += *y_k;
            }
            for y_k in y_row.iter_mut() {
                *y_k /= sum;
            }
        }
        Ok(())
    }

    fn backward(&mut self, storage: &mut Storage) -> Result<()> {
        let ports = ports(&self.ports)?;
        trace!("softmax backward {}", ports.input.shape());
        let [x, y] = storage.slots_mut([&ports.input, &ports.output])?;
        let dx = x.gradient_mut()?;
        let (p, targets) = y.value_and_gradient_mut()?;
        for ((dx_i, &p_i), &t_i) in
            iter::zip(dx.as_mut_slice(), p.as_slice()).zip(targets.as_slice())
        {
            *dx_i = p_i - t_i;
        }
        Ok(())
    }

    /// Mean cross-entropy over the batch.
    fn loss(&self, storage: &mut Storage) -> Result<Option<f32>> {
        let ports = ports(&self.ports)?;
        let (batch, _) = batch_and_features(&ports.output)?;
        let [output] = storage.slots_mut([&ports.output])?;
        let (p, t) = output.value_and_gradient_mut()?;
        let sum = iter::zip(p.as_slice(), t.as_slice())
            .map(|(&p, &t)| -t * p.max(f32::MIN_POSITIVE).ln())
            .sum::<f32>();
        Ok(Some(sum / batch.max(1) as f32))
    }
}
