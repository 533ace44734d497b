use std::{
    fmt::{self, Debug},
    iter,
};

#[derive(Clone, Copy)]
pub struct DynActivationFunction {
    name: &'static str,
    apply: fn(f32) -> f32,
    deriv: fn(f32) -> f32,
}

impl Debug for DynActivationFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Debug::fmt(self.name, f)
    }
}

impl PartialEq for DynActivationFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl DynActivationFunction {
    pub fn new<Phi: ActivationFunction>(_: Phi) -> Self {
        Self {
            name: Phi::NAME,
            apply: Phi::apply,
            deriv: Phi::deriv,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn apply(&self, x: f32) -> f32 {
        (self.apply)(x)
    }

    /// Applies to `xs` element-wise, writing into `ys`.
    /// Extra elements of the longer slice are left alone.
    pub fn apply_multiple(&self, xs: &[f32], ys: &mut [f32]) {
        for (&x, y) in iter::zip(xs, ys) {
            *y = self.apply(x);
        }
    }

    pub fn deriv(&self, x: f32) -> f32 {
        (self.deriv)(x)
    }

    /// Looks up one of the built-in [`activation_functions`] by its [`ActivationFunction::NAME`].
    pub fn by_name(name: &str) -> Option<Self> {
        use activation_functions::*;
        [
            Self::new(Identity),
            Self::new(Sigmoid),
            Self::new(Tanh),
            Self::new(Relu),
            Self::new(LeakyRelu),
        ]
        .into_iter()
        .find(|phi| phi.name == name)
    }
}

pub trait ActivationFunction: Send + Sync + 'static {
    const NAME: &'static str;

    fn apply(x: f32) -> f32;

    /// Derivative with respect to the pre-activation input.
    fn deriv(x: f32) -> f32;
}

pub mod activation_functions {
    use super::ActivationFunction;

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Identity;
    impl ActivationFunction for Identity {
        const NAME: &'static str = "identity";

        fn apply(x: f32) -> f32 {
            x
        }

        fn deriv(_: f32) -> f32 {
            1.0
        }
    }

    fn sigmoid(x: f32) -> f32 {
        0.5 * (1.0 + f32::tanh(0.5 * x))
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Sigmoid;
    impl ActivationFunction for Sigmoid {
        const NAME: &'static str = "sigmoid";

        fn apply(x: f32) -> f32 {
            sigmoid(x)
        }

        fn deriv(x: f32) -> f32 {
            let s = sigmoid(x);
            s * (1.0 - s)
        }
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Tanh;
    impl ActivationFunction for Tanh {
        const NAME: &'static str = "tanh";

        fn apply(x: f32) -> f32 {
            f32::tanh(x)
        }

        fn deriv(x: f32) -> f32 {
            1.0 - f32::tanh(x).powi(2)
        }
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Relu;
    impl ActivationFunction for Relu {
        const NAME: &'static str = "relu";

        fn apply(x: f32) -> f32 {
            x.max(0.0)
        }

        fn deriv(x: f32) -> f32 {
            if x > 0.0 { 1.0 } else { 0.0 }
        }
    }

    /// Relu with a slope of 0.01 below zero.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct LeakyRelu;
    impl ActivationFunction for LeakyRelu {
        const NAME: &'static str = "leaky_relu";

        fn apply(x: f32) -> f32 {
            if x > 0.0 { x } else { 0.01 * x }
        }

        fn deriv(x: f32) -> f32 {
            if x > 0.0 { 1.0 } else { 0.01 }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::{activation_functions::*, *};

    #[test]
    fn dyn_dispatch_matches_static() {
        let phi = DynActivationFunction::new(Sigmoid);
        assert_eq!(phi.name(), "sigmoid");
        assert_approx_eq!(phi.apply(0.0), 0.5);
        assert_approx_eq!(phi.deriv(0.0), 0.25);
    }

    #[test]
    fn relu() {
        let phi = DynActivationFunction::new(Relu);
        let mut ys = [0.0f32; 3];
        phi.apply_multiple(&[-1.0, 0.0, 2.0], &mut ys);
        assert_eq!(ys, [0.0, 0.0, 2.0]);
        assert_eq!(phi.deriv(-1.0), 0.0);
        assert_eq!(phi.deriv(3.0), 1.0);
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(
            DynActivationFunction::by_name("leaky_relu"),
            Some(DynActivationFunction::new(LeakyRelu))
        );
        assert_eq!(DynActivationFunction::by_name("tanh").map(|phi| phi.apply(0.0)), Some(0.0));
        assert!(DynActivationFunction::by_name("swish").is_none());
    }

    #[test]
    fn tanh_derivative() {
        let phi = DynActivationFunction::new(Tanh);
        let x = 0.3f32;
        let h = 1e-3f32;
        let numeric = (phi.apply(x + h) - phi.apply(x - h)) / (2.0 * h);
        assert_approx_eq!(phi.deriv(x), numeric, 1e-3);
    }
}
