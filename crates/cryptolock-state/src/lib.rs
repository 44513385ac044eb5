pub mod config;
pub mod criteria;
pub mod db;
pub mod engine;
pub mod fee;
pub mod ledger;
pub mod multisig;

pub use config::EngineConfig;
pub use criteria::{CriterionStores, StoredCriterion};
pub use db::StateDb;
pub use engine::{LockEngine, LockRequest};
pub use fee::{FeeCharge, FeeMode, FeeSchedule};
pub use ledger::{LocalLedger, LocalOracle, PriceOracle, TokenInfo, TokenLedger};
