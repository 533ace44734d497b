use faer::{Accum, Par, linalg::matmul::matmul};
use log::trace;
use rand::RngCore;

use crate::{
    Error, Initialization, Layer, Result, Storage, Variable,
    layers::{Ports, batch_and_features, check_features, ports},
};

/// Fully connected layer, `y = x W + b`.
///
/// ```text
/// input:   [batch, inputs]
/// weights: [inputs, units]
/// bias:    [1, units]
/// output:  [batch, units]
/// ```
#[derive(Debug, Clone)]
pub struct Dense {
    units: usize,
    ports: Option<Ports>,
    weights: Option<Variable>,
    bias: Option<Variable>,
}

impl Dense {
    pub fn new(units: usize) -> Self {
        Self {
            units,
            ports: None,
            weights: None,
            bias: None,
        }
    }

    pub fn units(&self) -> usize {
        self.units
    }

    /// Returns `None` before the layer is initialized.
    pub fn weights(&self) -> Option<&Variable> {
        self.weights.as_ref()
    }

    /// Returns `None` before the layer is initialized.
    pub fn bias(&self) -> Option<&Variable> {
        self.bias.as_ref()
    }

    fn parameters(&self) -> Result<(&Ports, &Variable, &Variable)> {
        let ports = ports(&self.ports)?;
        match (&self.weights, &self.bias) {
            (Some(weights), Some(bias)) => Ok((ports, weights, bias)),
            _ => Err(Error::NotInitialized),
        }
    }
}

impl Layer for Dense {
    fn name(&self) -> &'static str {
        "dense"
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
        rng: &mut dyn RngCore,
        initialization: Initialization,
    ) -> Result<()> {
        let (batch, inputs) = batch_and_features(input)?;
        let weights = Variable::trainable([inputs, self.units]);
        let bias = Variable::trainable([1, self.units]);
        let units = self.units;
        storage.assign_tensor_with(&weights, || initialization.sample(inputs, units, &mut *rng))?;
        storage.assign_tensor_with(&bias, || 0.0)?;
        self.weights = Some(weights);
        self.bias = Some(bias);
        self.ports = Some(Ports {
            input: input.clone(),
            output: Variable::new([batch, self.units]),
        });
        Ok(())
    }

    fn update_dimensions(&mut self, input: &Variable) -> Result<()> {
        let inputs = match &self.weights {
            Some(weights) => weights.dimensions()[0],
            None => return Err(Error::NotInitialized),
        };
        let batch = check_features(input, inputs)?;
        self.ports = Some(Ports {
            input: input.clone(),
            output: Variable::new([batch, self.units]),
        });
        Ok(())
    }

    fn forward(&mut self, storage: &mut Storage, _training: bool) -> Result<()> {
        let (ports, weights, bias) = self.parameters()?;
        trace!("dense forward {} -> {}", ports.input.shape(), ports.output.shape());
        let [x, w, b, y] = storage.slots_mut([&ports.input, weights, bias, &ports.output])?;
        let x = x.tensor_mut()?.as_mat_ref()?;
        let w = w.tensor_mut()?.as_mat_ref()?;
        let b = b.tensor_mut()?;
        let y = y.tensor_mut()?;
        // y = x W
        matmul(y.as_mat_mut()?, Accum::Replace, x, w, 1.0, Par::Seq);
        // y += b, broadcast over the batch.
        for row in y.rows_mut() {
            for (y_k, &b_k) in row.iter_mut().zip(b.as_slice()) {
                *y_k += b_k;
            }
        }
        Ok(())
    }

    fn backward(&mut self, storage: &mut Storage) -> Result<()> {
        let (ports, weights, bias) = self.parameters()?;
        trace!("dense backward {} <- {}", ports.input.shape(), ports.output.shape());
        let [x, w, b, y] = storage.slots_mut([&ports.input, weights, bias, &ports.output])?;
        let (x, dx) = x.value_and_gradient_mut()?;
        let (w, dw) = w.value_and_gradient_mut()?;
        let db = b.gradient_mut()?;
        let dy = y.gradient_mut()?.as_mat_ref()?;
        // dW = x^T dy
        matmul(
            dw.as_mat_mut()?,
            Accum::Replace,
            x.as_mat_ref()?.transpose(),
            dy,
            1.0,
            Par::Seq,
        );
        // db = sum of dy over the batch
        let db = db.as_mut_slice();
        db.fill(0.0);
        for i in 0..dy.nrows() {
            for (k, db_k) in db.iter_mut().enumerate() {
                *db_k += dy[(i, k)];
            }
        }
        // dx = dy W^T
        matmul(
            dx.as_mat_mut()?,
            Accum::Replace,
            dy,
            w.as_mat_ref()?.transpose(),
            1.0,
            Par::Seq,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn initialized(inputs: usize, units: usize, batch: usize) -> (Dense, Storage) {
        let mut storage = Storage::new();
        let mut rng = StdRng::seed_from_u64(0);
        let mut dense = Dense::new(units);
        let input = Variable::new([batch, inputs]);
        dense
            .initialize(&input, &mut storage, &mut rng, Initialization::default())
            .unwrap();
        (dense, storage)
    }

    #[test]
    fn declares_parameters() {
        let (dense, storage) = initialized(3, 2, 1);
        assert_eq!(dense.weights().unwrap().dimensions(), &[3, 2]);
        assert_eq!(dense.bias().unwrap().dimensions(), &[1, 2]);
        assert_eq!(dense.output().unwrap().dimensions(), &[1, 2]);
        assert_eq!(storage.trainable_parameters().len(), 2);
        let bias = storage.peek_tensor(dense.bias().unwrap()).unwrap();
        assert_eq!(bias.as_slice(), &[0.0, 0.0]);
    }

    #[test]
    fn forward_computes_affine_map() {
        let (mut dense, mut storage) = initialized(2, 2, 2);
        let weights = dense.weights().unwrap().clone();
        let bias = dense.bias().unwrap().clone();
        let input = dense.input().unwrap().clone();
        storage.assign_tensor(&weights, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        storage.assign_tensor(&bias, &[0.5, -0.5]).unwrap();
        storage.assign_tensor(&input, &[1.0, 0.0, 1.0, 1.0]).unwrap();
        dense.forward(&mut storage, true).unwrap();
        let output = storage.peek_tensor(dense.output().unwrap()).unwrap();
        assert_eq!(output.as_slice(), &[1.5, 1.5, 4.5, 5.5]);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let (mut dense, mut storage) = initialized(3, 2, 2);
        let input = dense.input().unwrap().clone();
        let output = dense.output().unwrap().clone();
        let weights = dense.weights().unwrap().clone();
        storage
            .assign_tensor(&input, &[0.3, -0.2, 0.7, 1.1, 0.4, -0.6])
            .unwrap();
        // Loss L = sum(y * c), so dL/dy = c.
        let c = [0.5f32, -1.0, 2.0, 0.25];
        storage.assign_gradient(&output, &c).unwrap();
        dense.forward(&mut storage, true).unwrap();
        dense.backward(&mut storage).unwrap();
        let dw = storage.peek_gradient(&weights).unwrap().clone();
        let dx = storage.peek_gradient(&input).unwrap().clone();

        let loss = |storage: &mut Storage, dense: &mut Dense| {
            dense.forward(storage, true).unwrap();
            let y = storage.peek_tensor(&output).unwrap();
            y.as_slice().iter().zip(&c).map(|(y, c)| y * c).sum::<f32>()
        };
        let h = 1e-2f32;
        for i in 0..6 {
            let original = storage.peek_tensor(&weights).unwrap().as_slice()[i];
            storage.tensor(&weights).unwrap().as_mut_slice()[i] = original + h;
            let plus = loss(&mut storage, &mut dense);
            storage.tensor(&weights).unwrap().as_mut_slice()[i] = original - h;
            let minus = loss(&mut storage, &mut dense);
            storage.tensor(&weights).unwrap().as_mut_slice()[i] = original;
            assert_approx_eq!(dw.as_slice()[i], (plus - minus) / (2.0 * h), 1e-2);
        }
        for i in 0..6 {
            let original = storage.peek_tensor(&input).unwrap().as_slice()[i];
            storage.tensor(&input).unwrap().as_mut_slice()[i] = original + h;
            let plus = loss(&mut storage, &mut dense);
            storage.tensor(&input).unwrap().as_mut_slice()[i] = original - h;
            let minus = loss(&mut storage, &mut dense);
            storage.tensor(&input).unwrap().as_mut_slice()[i] = original;
            assert_approx_eq!(dx.as_slice()[i], (plus - minus) / (2.0 * h), 1e-2);
        }

        let db = storage.peek_gradient(dense.bias().unwrap()).unwrap();
        assert_approx_eq!(db.as_slice()[0], 0.5 + 2.0);
        assert_approx_eq!(db.as_slice()[1], -1.0 + 0.25);
    }

    #[test]
    fn backward_overwrites_gradients() {
        let (mut dense, mut storage) = initialized(2, 1, 1);
        let input = dense.input().unwrap().clone();
        let output = dense.output().unwrap().clone();
        storage.assign_tensor(&input, &[1.0, 2.0]).unwrap();
        storage.assign_gradient(&output, &[1.0]).unwrap();
        dense.forward(&mut storage, true).unwrap();
        dense.backward(&mut storage).unwrap();
        let first = storage.peek_gradient(dense.weights().unwrap()).unwrap().clone();
        dense.backward(&mut storage).unwrap();
        let second = storage.peek_gradient(dense.weights().unwrap()).unwrap();
        assert_eq!(&first, second);
    }

    #[test]
    fn update_dimensions_keeps_parameters() {
        let (mut dense, _) = initialized(3, 2, 4);
        let weights = dense.weights().unwrap().clone();
        let old_output = dense.output().unwrap().clone();
        dense.update_dimensions(&Variable::new([1, 3])).unwrap();
        assert_eq!(dense.weights().unwrap(), &weights);
        assert_ne!(dense.output().unwrap(), &old_output);
        assert_eq!(dense.output().unwrap().dimensions(), &[1, 2]);
    }

    #[test]
    fn update_dimensions_rejects_other_feature_count() {
        let (mut dense, _) = initialized(3, 2, 4);
        let err = dense.update_dimensions(&Variable::new([4, 5])).unwrap_err();
        assert_eq!(
            err,
            Error::DimensionMismatch {
                axis: 1,
                expected: 3,
                got: 5
            }
        );
    }

    #[test]
    fn forward_before_initialize() {
        let mut dense = Dense::new(2);
        let mut storage = Storage::new();
        assert_eq!(dense.forward(&mut storage, true), Err(Error::NotInitialized));
        assert!(storage.is_empty());
    }
}
