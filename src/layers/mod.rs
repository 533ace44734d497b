//! Layers that can be chained in a [`NeuralNetwork`](crate::NeuralNetwork).

mod activation;
mod batch_norm;
mod dense;
mod dropout;
mod softmax;
mod squared_error;

pub use activation::*;
pub use batch_norm::*;
pub use dense::*;
pub use dropout::*;
pub use softmax::*;
pub use squared_error::*;

use rand::RngCore;

use crate::{Error, Initialization, Result, Storage, Variable};

/// A unit of computation in a linear chain of layers.
///
/// Layers never own buffers. They hold [`Variable`] handles and read or write the matching
/// buffers through the [`Storage`] passed in.
pub trait Layer {
    fn name(&self) -> &'static str;

    /// Returns `None` before the layer is initialized.
    fn input(&self) -> Option<&Variable>;

    /// Returns `None` before the layer is initialized.
    fn output(&self) -> Option<&Variable>;

    /// Declares the output variable and any parameter variables, and fills parameter buffers
    /// using `initialization`.
    fn initialize(
        &mut self,
        input: &Variable,
        storage: &mut Storage,
        rng: &mut dyn RngCore,
        initialization: Initialization,
    ) -> Result<()>;

    /// Re-derives the output variable from a new input variable.
    /// Must not touch storage; stale buffers are evicted by the network.
    fn update_dimensions(&mut self, input: &Variable) -> Result<()>;

    /// Reads the input buffer and overwrites the output buffer.
    fn forward(&mut self, storage: &mut Storage, training: bool) -> Result<()>;

    /// Reads the output gradient and overwrites the input gradient and any parameter gradients.
    fn backward(&mut self, storage: &mut Storage) -> Result<()>;

    /// Loss of the output against the targets held in the output gradient.
    /// `None` for layers that are not output layers.
    fn loss(&self, _storage: &mut Storage) -> Result<Option<f32>> {
        Ok(None)
    }
}

/// Input and output handles of an initialized layer.
#[derive(Debug, Clone)]
pub(crate) struct Ports {
    pub(crate) input: Variable,
    pub(crate) output: Variable,
}

impl Ports {
    /// Output with the same dimensions as the input.
    pub(crate) fn same_shape(input: &Variable) -> Self {
        Self {
            input: input.clone(),
            output: Variable::new(input.dimensions()),
        }
    }
}

pub(crate) fn ports(ports: &Option<Ports>) -> Result<&Ports> {
    ports.as_ref().ok_or(Error::NotInitialized)
}

/// Checks for a `[batch, features]` input, returning `(batch, features)`.
pub(crate) fn batch_and_features(input: &Variable) -> Result<(usize, usize)> {
    input.shape().as_matrix()
}

/// Checks that `input` has `expected` features.
pub(crate) fn check_features(input: &Variable, expected: usize) -> Result<usize> {
    let (batch, features) = batch_and_features(input)?;
    if features != expected {
        return Err(Error::DimensionMismatch {
            axis: 1,
            expected,
            got: features,
        });
    }
    Ok(batch)
}
