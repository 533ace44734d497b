use log::{info, trace, warn};
use rand::RngCore;

use crate::{DataSlot, Error, Initialization, Layer, Result, Storage, Tensor, Variable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Uninitialized,
    Ready,
}

/// A linear chain of layers sharing one [`Storage`].
///
/// Layers run in insertion order on the forward pass and in exactly the reverse order on the
/// backward pass. The output variable of each layer is the input variable of the next one.
#[derive(Default)]
pub struct NeuralNetwork {
    layers: Vec<Box<dyn Layer>>,
    storage: Storage,
    initialization: Initialization,
    state: State,
}

impl NeuralNetwork {
    pub fn new(initialization: Initialization) -> Self {
        Self {
            layers: Vec::new(),
            storage: Storage::new(),
            initialization,
            state: State::Uninitialized,
        }
    }

    /// Appends a layer. The network has to be initialized again afterwards.
    pub fn add(&mut self, layer: impl Layer + 'static) {
        self.layers.push(Box::new(layer));
        self.state = State::Uninitialized;
    }

    pub fn with_layer(mut self, layer: impl Layer + 'static) -> Self {
        self.add(layer);
        self
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn initialization(&self) -> Initialization {
        self.initialization
    }

    pub fn is_initialized(&self) -> bool {
        self.state == State::Ready
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// Input variable of the first layer.
    pub fn input(&self) -> Option<&Variable> {
        self.layers.first()?.input()
    }

    /// Output variable of the last layer.
    pub fn output(&self) -> Option<&Variable> {
        self.layers.last()?.output()
    }

    fn check_ready(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::EmptyNetwork);
        }
        match self.state {
            State::Ready => Ok(()),
            State::Uninitialized => Err(Error::NotInitialized),
        }
    }

    fn ports(&self) -> Result<(&Variable, &Variable)> {
        self.check_ready()?;
        match (self.input(), self.output()) {
            (Some(input), Some(output)) => Ok((input, output)),
            _ => Err(Error::NotInitialized),
        }
    }

    /// Declares every layer's variables and fills the parameters, starting from `input`.
    ///
    /// Any buffers of a previous initialization are dropped.
    pub fn initialize(&mut self, input: Variable, rng: &mut dyn RngCore) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::EmptyNetwork);
        }
        info!(
            "initializing {} layers with input {} ({:?})",
            self.layers.len(),
            input.shape(),
            self.initialization,
        );
        self.state = State::Uninitialized;
        self.storage = Storage::new();
        let mut input = input;
        for layer in &mut self.layers {
            layer.initialize(&input, &mut self.storage, rng, self.initialization)?;
            input = layer.output().ok_or(Error::NotInitialized)?.clone();
        }
        self.state = State::Ready;
        Ok(())
    }

    /// Re-derives every layer's variables from a new input variable.
    ///
    /// Ephemeral buffers are evicted first. Parameters and preservable buffers are kept.
    ///
    /// If a layer rejects the new shape, the whole chain is re-derived from the previous input so
    /// that it stays connected, and the error is returned. Should that fail too, the network has
    /// to be initialized again.
    pub fn update_dimensions(&mut self, input: Variable) -> Result<()> {
        self.check_ready()?;
        let previous = self.input().ok_or(Error::NotInitialized)?.clone();
        info!("updating dimensions to input {}", input.shape());
        self.storage.clear_non_preservable();
        let Err(err) = Self::chain_dimensions(&mut self.layers, input) else {
            return Ok(());
        };
        warn!("{err}, restoring input {}", previous.shape());
        if Self::chain_dimensions(&mut self.layers, previous).is_err() {
            self.state = State::Uninitialized;
        }
        Err(err)
    }

    fn chain_dimensions(layers: &mut [Box<dyn Layer>], input: Variable) -> Result<()> {
        let mut input = input;
        for layer in layers {
            layer.update_dimensions(&input)?;
            input = layer.output().ok_or(Error::NotInitialized)?.clone();
        }
        Ok(())
    }

    /// Writes `observations` into the network input and `targets` into the gradient of the
    /// network output.
    pub fn set_next_batch(&mut self, observations: &Tensor, targets: &Tensor) -> Result<()> {
        let (input, output) = self.ports()?;
        if targets.element_count() != output.element_count() {
            return Err(Error::ShapeMismatch {
                expected: output.element_count(),
                got: targets.element_count(),
            });
        }
        let (input, output) = (input.clone(), output.clone());
        self.storage.assign_tensor(&input, observations.as_slice())?;
        self.storage.assign_gradient(&output, targets.as_slice())
    }

    fn forward_pass(&mut self, training: bool) -> Result<()> {
        self.check_ready()?;
        for layer in &mut self.layers {
            trace!("forward {}", layer.name());
            layer.forward(&mut self.storage, training)?;
        }
        Ok(())
    }

    /// Runs every layer forward in training mode.
    pub fn forward(&mut self) -> Result<()> {
        self.forward_pass(true)
    }

    /// Runs every layer backward, last layer first.
    pub fn backward(&mut self) -> Result<()> {
        self.check_ready()?;
        for layer in self.layers.iter_mut().rev() {
            trace!("backward {}", layer.name());
            layer.backward(&mut self.storage)?;
        }
        Ok(())
    }

    /// Output buffer of the last layer.
    pub fn batch_predictions(&mut self) -> Result<&Tensor> {
        self.check_ready()?;
        let output = self.layers.last().and_then(|layer| layer.output());
        let output = output.ok_or(Error::NotInitialized)?;
        self.storage.tensor(output).map(|tensor| &*tensor)
    }

    /// Runs an inference pass on `observations`.
    ///
    /// If the observations are shaped differently from the current network input, the network is
    /// reshaped first; trained parameters are kept.
    pub fn predict(&mut self, observations: &Tensor) -> Result<&Tensor> {
        let (input, _) = self.ports()?;
        let input = if input.dimensions() == observations.dimensions() {
            input.clone()
        } else {
            let input = Variable::new(observations.dimensions());
            self.update_dimensions(input.clone())?;
            input
        };
        self.storage.assign_tensor(&input, observations.as_slice())?;
        self.forward_pass(false)?;
        self.batch_predictions()
    }

    /// Loss of the last layer against the targets of the current batch.
    ///
    /// `None` if the last layer is not an output layer.
    pub fn loss(&mut self) -> Result<Option<f32>> {
        self.check_ready()?;
        match self.layers.last() {
            Some(layer) => layer.loss(&mut self.storage),
            None => Err(Error::EmptyNetwork),
        }
    }

    /// Value and gradient slots of every parameter, in creation order.
    pub fn trainable_parameters(&self) -> Vec<&DataSlot> {
        self.storage.trainable_parameters()
    }

    pub fn trainable_parameters_mut(&mut self) -> Vec<&mut DataSlot> {
        self.storage.trainable_parameters_mut()
    }
}
