pub mod core;
#[cfg(not(target_arch = "wasm32"))]
pub mod server;
#[cfg(not(target_arch = "wasm32"))]
pub mod services;
#[cfg(target_arch = "wasm32")]
pub mod web;
