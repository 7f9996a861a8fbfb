pub mod config;
pub mod error;
pub mod providers;
pub mod refresh;
pub mod store;

pub use config::Config;
pub use error::{ExchangeError, RecordError, RenewalError, StoreError};
pub use refresh::RunSummary;
