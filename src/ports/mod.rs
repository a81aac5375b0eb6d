pub mod clob;
pub mod data_api;
pub mod market_ws;
pub mod onchain;
pub mod persistence;
pub mod secrets;
pub mod user_ws;

pub use clob::ClobRestClient;
pub use data_api::DataApiClient;
pub use market_ws::MarketWsSink;
pub use onchain::UsdcBalanceProbe;
pub use persistence::{FileStore, PersistenceStore};
pub use secrets::SecretStore;
pub use user_ws::UserWsSink;
