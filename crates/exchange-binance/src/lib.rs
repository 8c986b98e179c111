pub mod client;
pub mod error;
mod models;

pub use client::BinanceClient;
pub use error::BinanceError;
