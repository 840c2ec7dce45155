//! Common types for the tessera toolkit

pub mod cost;
pub mod error;
pub mod graph_id;
pub mod mode;
pub mod time_info;

pub use cost::Cost;
pub use error::{Error, Result};
pub use graph_id::GraphId;
pub use mode::{access, Mode};
pub use time_info::TimeInfo;
