pub use faer;

mod activation;
mod error;
mod initialization;
mod network;
mod pretty_print;
mod storage;
mod tensor;
mod variable;

pub mod layers;

pub use activation::*;
pub use error::*;
pub use initialization::*;
pub use layers::*;
pub use network::*;
pub use pretty_print::*;
pub use storage::*;
pub use tensor::*;
pub use variable::*;
