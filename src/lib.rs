mod autoencoder;
mod batch;
mod cifar;
mod config;
mod curve;
mod device;
mod error;
mod layers;
mod net;
mod plot;
mod pretrain;
mod probe;
mod results;
mod trainer;
mod utils;
mod vol;

pub use autoencoder::*;
pub use batch::*;
pub use cifar::*;
pub use config::*;
pub use curve::*;
pub use device::*;
pub use error::*;
pub use layers::*;
pub use net::*;
pub use plot::*;
pub use pretrain::*;
pub use probe::*;
pub use results::*;
pub use trainer::*;
pub use utils::*;
pub use vol::*;

pub type Float = f32;
