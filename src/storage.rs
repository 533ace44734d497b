use std::collections::HashMap;

use log::debug;

use crate::{Error, Result, Tensor, TensorShape, Variable, VariableId};

/// Value and gradient buffers of one variable, allocated on first use.
#[derive(Debug)]
pub struct DataSlot {
    variable: Variable,
    tensor: Option<Tensor>,
    gradient: Option<Tensor>,
}

fn get_or_allocate<'a>(
    buffer: &'a mut Option<Tensor>,
    shape: &TensorShape,
) -> Result<&'a mut Tensor> {
    let tensor = match buffer.take() {
        Some(tensor) => tensor,
        None => Tensor::zeros(shape.clone())?,
    };
    Ok(buffer.insert(tensor))
}

impl DataSlot {
    fn new(variable: Variable) -> Self {
        Self {
            variable,
            tensor: None,
            gradient: None,
        }
    }

    /// The variable that owns this slot.
    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    /// Returns `None` if the value has not been allocated yet.
    pub fn tensor(&self) -> Option<&Tensor> {
        self.tensor.as_ref()
    }

    /// Returns `None` if the gradient has not been allocated yet.
    pub fn gradient(&self) -> Option<&Tensor> {
        self.gradient.as_ref()
    }

    pub fn tensor_mut(&mut self) -> Result<&mut Tensor> {
        get_or_allocate(&mut self.tensor, self.variable.shape())
    }

    pub fn gradient_mut(&mut self) -> Result<&mut Tensor> {
        get_or_allocate(&mut self.gradient, self.variable.shape())
    }

    /// Both buffers at once, allocating whichever is missing.
    pub fn value_and_gradient_mut(&mut self) -> Result<(&mut Tensor, &mut Tensor)> {
        let Self {
            variable,
            tensor,
            gradient,
        } = self;
        let tensor = get_or_allocate(tensor, variable.shape())?;
        let gradient = get_or_allocate(gradient, variable.shape())?;
        Ok((tensor, gradient))
    }
}

/// Owner of every buffer in a network, keyed by variable identity.
///
/// Buffers live as long as their slot. A slot is only removed by
/// [`Storage::clear_non_preservable`], so references handed out by `Storage` must not be kept
/// across a reshape.
#[derive(Debug, Default)]
pub struct Storage {
    slots: HashMap<VariableId, DataSlot>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, variable: &Variable) -> bool {
        self.slots.contains_key(&variable.id())
    }

    fn slot_mut(&mut self, variable: &Variable) -> &mut DataSlot {
        self.slots
            .entry(variable.id())
            .or_insert_with(|| DataSlot::new(variable.clone()))
    }

    /// The value buffer of `variable`, zero-allocated on first access.
    /// The same buffer is returned for as long as the slot exists.
    pub fn tensor(&mut self, variable: &Variable) -> Result<&mut Tensor> {
        self.slot_mut(variable).tensor_mut()
    }

    /// The gradient buffer of `variable`, zero-allocated on first access.
    pub fn gradient(&mut self, variable: &Variable) -> Result<&mut Tensor> {
        self.slot_mut(variable).gradient_mut()
    }

    /// Reads the value buffer without allocating.
    pub fn peek_tensor(&self, variable: &Variable) -> Option<&Tensor> {
        self.slots.get(&variable.id())?.tensor()
    }

    /// Reads the gradient buffer without allocating.
    pub fn peek_gradient(&self, variable: &Variable) -> Option<&Tensor> {
        self.slots.get(&variable.id())?.gradient()
    }

    fn check_length(variable: &Variable, data: &[f32]) -> Result<()> {
        if variable.element_count() != data.len() {
            return Err(Error::ShapeMismatch {
                expected: variable.element_count(),
                got: data.len(),
            });
        }
        Ok(())
    }

    /// Overwrites the value buffer with `data`.
    /// On a length mismatch nothing is allocated or written.
    pub fn assign_tensor(&mut self, variable: &Variable, data: &[f32]) -> Result<()> {
        Self::check_length(variable, data)?;
        self.tensor(variable)?.copy_from_slice(data)
    }

    /// Fills the value buffer by calling `generator` once per element, in storage order.
    pub fn assign_tensor_with(
        &mut self,
        variable: &Variable,
        generator: impl FnMut() -> f32,
    ) -> Result<()> {
        self.tensor(variable)?.fill_with(generator);
        Ok(())
    }

    /// Overwrites the gradient buffer with `data`.
    /// On a length mismatch nothing is allocated or written.
    pub fn assign_gradient(&mut self, variable: &Variable, data: &[f32]) -> Result<()> {
        Self::check_length(variable, data)?;
        self.gradient(variable)?.copy_from_slice(data)
    }

    /// Fills the gradient buffer by calling `generator` once per element, in storage order.
    pub fn assign_gradient_with(
        &mut self,
        variable: &Variable,
        generator: impl FnMut() -> f32,
    ) -> Result<()> {
        self.gradient(variable)?.fill_with(generator);
        Ok(())
    }

    /// Mutable access to several slots at once, inserting missing ones.
    ///
    /// Fails with [`Error::AliasedVariable`] if a variable appears twice.
    pub fn slots_mut<const N: usize>(
        &mut self,
        variables: [&Variable; N],
    ) -> Result<[&mut DataSlot; N]> {
        for (i, variable) in variables.iter().enumerate() {
            if variables[..i].contains(variable) {
                return Err(Error::AliasedVariable { id: variable.id() });
            }
        }
        for variable in variables {
            self.slot_mut(variable);
        }
        let ids = variables.map(Variable::id);
        let slots: Vec<&mut DataSlot> = self
            .slots
            .get_disjoint_mut(ids.each_ref())
            .into_iter()
            .flatten()
            .collect();
        // Every key was inserted above, so nothing was filtered out.
        slots.try_into().map_err(|_| Error::NotInitialized)
    }

    /// Every slot, in no particular order.
    pub fn slots(&self) -> impl Iterator<Item = &DataSlot> {
        self.slots.values()
    }

    /// Slots of all trainable variables, in variable creation order.
    pub fn trainable_parameters(&self) -> Vec<&DataSlot> {
        let mut parameters: Vec<&DataSlot> = self
            .slots
            .values()
            .filter(|slot| slot.variable.is_trainable())
            .collect();
        parameters.sort_by_key(|slot| slot.variable.id());
        parameters
    }

    /// Slots of all trainable variables, in variable creation order.
    pub fn trainable_parameters_mut(&mut self) -> Vec<&mut DataSlot> {
        let mut parameters: Vec<&mut DataSlot> = self
            .slots
            .values_mut()
            .filter(|slot| slot.variable.is_trainable())
            .collect();
        parameters.sort_by_key(|slot| slot.variable.id());
        parameters
    }

    /// Drops every slot whose variable is neither trainable nor preservable.
    /// Returns the number of slots removed.
    pub fn clear_non_preservable(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.variable.is_preservable());
        let removed = before - self.slots.len();
        debug!("cleared {removed} non-preservable slots, {} left", self.slots.len());
        removed
    }
}
