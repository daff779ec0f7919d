//! Application layer: builder, engine, status views.

mod engine;
mod status;

pub use engine::{BuildError, Engine, EngineBuilder, EngineConfig};
pub use status::EscrowStatus;
