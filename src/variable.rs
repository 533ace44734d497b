use std::{
    hash::{Hash, Hasher},
    sync::atomic::{AtomicU64, Ordering},
};

use derive_more::Display;

use crate::TensorShape;

/// Process-unique key of a storage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("#{_0}")]
pub struct VariableId(u64);

impl VariableId {
    fn mint() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// What happens to a variable's buffers when the network is reshaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifecycle {
    /// Activations and intermediate gradients, discarded on reshape.
    #[default]
    Ephemeral,
    /// Kept across reshapes but not optimized, e.g. running statistics.
    Preservable,
    /// Network parameters. Always preserved.
    Trainable,
}

/// Handle to a logical storage slot.
///
/// Variables are compared by identity, not by shape: two variables created separately are
/// different slots even when their shapes and lifecycles match. Cloning a variable clones the
/// handle, so the clone addresses the same slot. Use [`Variable::copy`] to get a new slot of the
/// same shape.
#[derive(Debug, Clone)]
pub struct Variable {
    id: VariableId,
    shape: TensorShape,
    lifecycle: Lifecycle,
}

impl Variable {
    pub fn with_shape(shape: TensorShape, lifecycle: Lifecycle) -> Self {
        Self {
            id: VariableId::mint(),
            shape,
            lifecycle,
        }
    }

    /// An ephemeral variable.
    pub fn new(dimensions: impl Into<TensorShape>) -> Self {
        Self::with_shape(dimensions.into(), Lifecycle::Ephemeral)
    }

    pub fn trainable(dimensions: impl Into<TensorShape>) -> Self {
        Self::with_shape(dimensions.into(), Lifecycle::Trainable)
    }

    pub fn preservable(dimensions: impl Into<TensorShape>) -> Self {
        Self::with_shape(dimensions.into(), Lifecycle::Preservable)
    }

    /// A new variable with the same shape and lifecycle, but its own slot.
    pub fn copy(&self) -> Self {
        Self::with_shape(TensorShape::new(self.dimensions()), self.lifecycle)
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn dimensions(&self) -> &[usize] {
        self.shape.dimensions()
    }

    pub fn dimension_offsets(&self) -> &[usize] {
        self.shape.offsets()
    }

    pub fn element_count(&self) -> usize {
        self.shape.element_count()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_trainable(&self) -> bool {
        self.lifecycle == Lifecycle::Trainable
    }

    /// Trainable variables are always preservable.
    pub fn is_preservable(&self) -> bool {
        matches!(
            self.lifecycle,
            Lifecycle::Preservable | Lifecycle::Trainable
        )
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
