pub mod aggregate;
pub mod assign;
pub mod attribution;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod filter;
pub mod locator;
pub mod observability;
pub mod report;
pub mod session;
pub mod store;

pub use engine::{AttributionEngine, EngineSettings};
pub use error::CoreError;
pub use store::AttributionStore;
