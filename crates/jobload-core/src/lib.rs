pub mod actions;
pub mod api;
pub mod config;
pub mod metrics;
pub mod pool;
pub mod recorder;
pub mod records;
pub mod report;
pub mod token;
pub mod worker;

#[cfg(test)]
mod testing;

pub use actions::*;
pub use api::*;
pub use config::*;
pub use metrics::*;
pub use pool::*;
pub use recorder::*;
pub use records::*;
pub use report::*;
pub use token::*;
pub use worker::*;
