pub mod batch_norm;
pub mod builder;
pub mod connectivity;
pub mod driver;
pub mod encoding;
pub mod error;
pub mod evaluate;
pub mod extract;
pub mod model;
pub mod network;
pub mod params;
pub mod persistence;
pub mod pipeline;
pub mod replay;
pub mod shape;
pub mod simulator;
pub mod types;

mod delay_buffer;
mod neuron;
mod util;
