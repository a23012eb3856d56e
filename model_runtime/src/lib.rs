pub mod dataset;
pub mod error;
pub mod hyper;
pub mod runtime;
pub mod softmax;
pub mod tensor;

pub use dataset::Dataset;
pub use error::{Result, RuntimeErr};
pub use hyper::Hyperparameters;
pub use runtime::ModelRuntime;
pub use softmax::SoftmaxRegression;
pub use tensor::{Parameters, Tensor};
