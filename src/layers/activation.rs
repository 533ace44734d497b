use std::iter;

use log::trace;
use rand::RngCore;

use crate::{
    ActivationFunction, DynActivationFunction, Initialization, Layer, Result, Storage, Variable,
    layers::{Ports, ports},
};

/// Element-wise activation, any input shape.
#[derive(Debug, Clone)]
pub struct Activation {
    phi: DynActivationFunction,
    ports: Option<Ports>,
}

impl Activation {
    pub fn new(phi: impl ActivationFunction) -> Self {
        Self {
            phi: DynActivationFunction::new(phi),
            ports: None,
        }
    }

    pub fn from_dyn(phi: DynActivationFunction) -> Self {
        Self { phi, ports: None }
    }

    pub fn phi(&self) -> DynActivationFunction {
        self.phi
    }
}

impl Layer for Activation {
    fn name(&self) -> &'static str {
        self.phi.name()
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
        trace!("{} forward {}", self.phi.name(), ports.input.shape());
        let [x, y] = storage.slots_mut([&ports.input, &ports.output])?;
        let x = x.tensor_mut()?;
        let y = y.tensor_mut()?;
        self.phi.apply_multiple(x.as_slice(), y.as_mut_slice());
        Ok(())
    }

    fn backward(&mut self, storage: &mut Storage) -> Result<()> {
        let ports = ports(&self.ports)?;
        trace!("{} backward {}", self.phi.name(), ports.input.shape());
        let [x, y] = storage.slots_mut([&ports.input, &ports.output])?;
        let (x, dx) = x.value_and_gradient_mut()?;
        let dy = y.gradient_mut()?;
        for ((dx_i, &x_i), &dy_i) in iter::zip(dx.as_mut_slice(), x.as_slice()).zip(dy.as_slice()) {
            *dx_i = dy_i * self.phi.deriv(x_i);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::activation_functions::{Relu, Sigmoid};

    fn initialized(phi: impl ActivationFunction, dimensions: [usize; 2]) -> (Activation, Storage) {
        let mut storage = Storage::new();
        let mut layer = Activation::new(phi);
        layer
            .initialize(
                &Variable::new(dimensions),
                &mut storage,
                &mut StdRng::seed_from_u64(0),
                Initialization::default(),
            )
            .unwrap();
        (layer, storage)
    }

    #[test]
    fn relu_forward_backward() {
        let (mut layer, mut storage) = initialized(Relu, [2, 2]);
        let input = layer.input().unwrap().clone();
        let output = layer.output().unwrap().clone();
        storage.assign_tensor(&input, &[-1.0, 2.0, 0.5, -3.0]).unwrap();
        layer.forward(&mut storage, true).unwrap();
        assert_eq!(
            storage.peek_tensor(&output).unwrap().as_slice(),
            &[0.0, 2.0, 0.5, 0.0]
        );
        storage.assign_gradient(&output, &[1.0, 1.0, 2.0, 2.0]).unwrap();
        layer.backward(&mut storage).unwrap();
        assert_eq!(
            storage.peek_gradient(&input).unwrap().as_slice(),
            &[0.0, 1.0, 2.0, 0.0]
        );
        // Activations hold no parameters.
        assert!(storage.trainable_parameters().is_empty());
    }

    #[test]
    fn sigmoid_backward_uses_input() {
        let (mut layer, mut storage) = initialized(Sigmoid, [1, 1]);
        let input = layer.input().unwrap().clone();
        let output = layer.output().unwrap().clone();
        storage.assign_tensor(&input, &[0.0]).unwrap();
        storage.assign_gradient(&output, &[2.0]).unwrap();
        layer.forward(&mut storage, false).unwrap();
        layer.backward(&mut storage).unwrap();
        assert_approx_eq!(storage.peek_tensor(&output).unwrap().as_slice()[0], 0.5);
        assert_approx_eq!(storage.peek_gradient(&input).unwrap().as_slice()[0], 0.5);
    }

    #[test]
    fn update_dimensions_follows_input() {
        let (mut layer, _) = initialized(Relu, [4, 3]);
        let old_output = layer.output().unwrap().clone();
        let new_input = Variable::new([1, 3]);
        layer.update_dimensions(&new_input).unwrap();
        assert_eq!(layer.input().unwrap(), &new_input);
        assert_ne!(layer.output().unwrap(), &old_output);
        assert_eq!(layer.output().unwrap().dimensions(), &[1, 3]);
    }
}
