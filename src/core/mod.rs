#[cfg(not(target_arch = "wasm32"))]
pub mod config;
pub mod error;
pub mod io;
pub mod model;
pub mod progress;
