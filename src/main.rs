use std::error::Error;

use netstore::{
    Activation, Dense, NeuralNetwork, PrettyPrintTensor, SquaredError, Tensor, Variable,
    activation_functions::*,
};
use rand::{SeedableRng, rngs::StdRng};

fn train(nn: &mut NeuralNetwork, eta: f32, n_epochs: usize) -> Result<f32, Box<dyn Error>> {
    let mut loss = 0.0;
    for _ in 0..n_epochs {
        nn.forward()?;
        loss = nn.loss()?.unwrap_or(f32::NAN);
        nn.backward()?;
        for slot in nn.trainable_parameters_mut() {
            let (value, gradient) = slot.value_and_gradient_mut()?;
            for (w, &dw) in value.as_mut_slice().iter_mut().zip(gradient.as_slice()) {
                *w -= eta * dw;
            }
        }
    }
    Ok(loss)
}

fn main() -> Result<(), Box<dyn Error>> {
    stderrlog::new()
        .module(module_path!())
        .module("netstore")
        .verbosity(2)
        .init()?;

    // Train the network to be a NOT gate.
    let observations = Tensor::from_vec([2, 1], vec![0.0, 1.0])?;
    let targets = Tensor::from_vec([2, 1], vec![1.0, 0.0])?;

    let mut nn = NeuralNetwork::default()
        .with_layer(Dense::new(1))
        .with_layer(Activation::new(Sigmoid))
        .with_layer(SquaredError::new());
    nn.initialize(Variable::new([2, 1]), &mut StdRng::seed_from_u64(0))?;
    nn.set_next_batch(&observations, &targets)?;

    let loss = train(&mut nn, 0.5, 10_000)?;

    println!("{}", PrettyPrintTensor::new("x", &observations));
    println!("{}", PrettyPrintTensor::new("y", nn.batch_predictions()?));
    println!("L = {loss:.08}");

    // One observation at a time reshapes the network but keeps the trained parameters.
    for x in [0.0, 1.0] {
        let observation = Tensor::from_vec([1, 1], vec![x])?;
        let prediction = nn.predict(&observation)?;
        println!("not({x}) = {:.08}", prediction.as_slice()[0]);
    }
    Ok(())
}
