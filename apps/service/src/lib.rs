pub mod config;
pub mod database;
pub mod engine;
pub mod monitoring;
pub mod oncall;
pub mod pool;

pub use engine::Engine;
