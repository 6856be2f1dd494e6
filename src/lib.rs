pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod table;
pub mod tabular;

pub use error::{FlowError, Result};
pub use table::Table;
