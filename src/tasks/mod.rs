pub mod docker;
pub mod engine;
pub mod memory;
pub mod state;
pub mod store;
pub mod types;
