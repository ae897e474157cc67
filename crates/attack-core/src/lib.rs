pub mod attacker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod result;
pub mod tally;
pub mod target;
pub mod transport;

pub use attacker::*;
pub use config::*;
pub use error::*;
pub use metrics::*;
pub use result::*;
pub use tally::*;
pub use target::*;
pub use transport::*;

pub use tokio_util::sync::CancellationToken;
