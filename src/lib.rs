pub mod api;
pub mod backup;
pub mod core;
pub mod error;

pub use error::{PlannerError, Result};
