use std::{error::Error, fs, path::PathBuf};

use clap::Parser;
use log::info;
use netstore::{
    Activation, Dense, DynActivationFunction, Initialization, NeuralNetwork, PrettyPrintTensor,
    SquaredError, Tensor, Variable, activation_functions::*,
};
use rand::{SeedableRng, rngs::StdRng};

/// Trains a small network to compute XOR.
#[derive(Debug, Parser)]
struct Args {
    #[arg(long, default_value_t = 5000)]
    epochs: usize,
    /// Learning rate.
    #[arg(long, default_value_t = 0.2)]
    eta: f32,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Units of the hidden layer.
    #[arg(long, default_value_t = 8)]
    hidden: usize,
    /// Activation of the hidden layer: identity, sigmoid, tanh, relu or leaky_relu.
    #[arg(long, default_value = "tanh")]
    activation: String,
    /// Use He initialization instead of Glorot.
    #[arg(long)]
    he: bool,
    /// Dump the trained parameters as raw f32s.
    #[arg(long)]
    dump: Option<PathBuf>,
    /// Increase logging verbosity.
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn step(nn: &mut NeuralNetwork, eta: f32) -> Result<f32, Box<dyn Error>> {
    nn.forward()?;
    let loss = nn.loss()?.unwrap_or(f32::NAN);
    nn.backward()?;
    for slot in nn.trainable_parameters_mut() {
        let (value, gradient) = slot.value_and_gradient_mut()?;
        for (w, &dw) in value.as_mut_slice().iter_mut().zip(gradient.as_slice()) {
            *w -= eta * dw;
        }
    }
    Ok(loss)
}

fn dump_params(nn: &NeuralNetwork, path: &PathBuf) -> Result<(), Box<dyn Error>> {
    let mut bytes: Vec<u8> = Vec::new();
    for slot in nn.trainable_parameters() {
        if let Some(tensor) = slot.tensor() {
            bytes.extend_from_slice(bytemuck::cast_slice(tensor.as_slice()));
        }
    }
    fs::write(path, bytes)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    stderrlog::new()
        .module(module_path!())
        .module("netstore")
        .verbosity(usize::from(args.verbose) + 1)
        .init()?;

    let observations = Tensor::from_vec([4, 2], vec![0., 0., 1., 0., 0., 1., 1., 1.])?;
    let targets = Tensor::from_vec([4, 1], vec![0., 1., 1., 0.])?;

    let initialization = match args.he {
        true => Initialization::HeUniform,
        false => Initialization::GlorotUniform,
    };
    let hidden_activation = DynActivationFunction::by_name(&args.activation)
        .ok_or_else(|| format!("unknown activation function {:?}", args.activation))?;
    let mut nn = NeuralNetwork::new(initialization)
        .with_layer(Dense::new(args.hidden))
        .with_layer(Activation::from_dyn(hidden_activation))
        .with_layer(Dense::new(1))
        .with_layer(Activation::new(Sigmoid))
        .with_layer(SquaredError::new());
    nn.initialize(Variable::new([4, 2]), &mut StdRng::seed_from_u64(args.seed))?;
    nn.set_next_batch(&observations, &targets)?;

    let n_logs = 10;
    for i_epoch in 0..args.epochs {
        let loss = step(&mut nn, args.eta)?;
        if i_epoch % (args.epochs / args.epochs.min(n_logs)).max(1) == 0
            || i_epoch == args.epochs - 1
        {
            let percentage = (i_epoch as f32) / (args.epochs as f32) * 100.0;
            info!("[{percentage:.0}%] L = {loss}");
        }
    }

    for (i, slot) in nn.trainable_parameters().into_iter().enumerate() {
        if let Some(tensor) = slot.tensor() {
            println!("{}", PrettyPrintTensor::new(&format!("p_{i}"), tensor));
        }
    }
    let predictions = nn.predict(&observations)?;
    println!("{}", PrettyPrintTensor::new("y", predictions));

    if let Some(path) = &args.dump {
        dump_params(&nn, path)?;
        println!("Parameters written to {}", path.display());
    }
    Ok(())
}
