pub mod abi;
pub mod constants;
pub mod criterion;
pub mod error;
pub mod lock;
pub mod math;
pub mod types;

pub use constants::*;
pub use criterion::*;
pub use error::LockError;
pub use lock::*;
pub use types::*;
