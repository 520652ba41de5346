mod currency;
mod history;
mod ledger;
mod transaction;
mod wallet;

pub use currency::*;
pub use history::*;
pub use ledger::*;
pub use transaction::*;
pub use wallet::*;

pub use rust_decimal::Decimal;

pub type UserId = u64;
pub type WalletId = u64;
pub type TransactionId = u64;
