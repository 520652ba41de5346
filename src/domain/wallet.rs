use chrono::{DateTime, Utc};

use crate::domain::{Currency, Decimal, UserId, WalletId};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum WalletError {
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },
    #[error("Balance overflow")]
    Overflow,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Wallet {
    id: WalletId,
    owner: UserId,
    currency: Currency,
    balance: Decimal,
    primary: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(id: WalletId, owner: UserId, currency: Currency, primary: bool) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner,
            currency,
            balance: Decimal::ZERO,
            primary,
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds `delta` (negative for debits) to the balance and returns the new balance.
    /// The balance is left untouched when the result would go below zero.
    pub fn apply_delta(&mut self, delta: Decimal) -> Result<Decimal, WalletError> {
        let balance = self
            .balance
            .checked_add(delta)
            .ok_or(WalletError::Overflow)?;
        if balance < Decimal::ZERO {
            return Err(WalletError::InsufficientFunds {
                available: self.balance,
                requested: -delta,
            });
        }
        self.balance = balance;
        self.updated_at = Utc::now();
        Ok(balance)
    }

    pub fn get_id(&self) -> WalletId {
        self.id
    }
    pub fn get_owner(&self) -> UserId {
        self.owner
    }
    pub fn get_currency(&self) -> Currency {
        self.currency
    }
    pub fn get_balance(&self) -> Decimal {
        self.balance
    }
    pub fn is_primary(&self) -> bool {
        self.primary
    }
    pub fn get_created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    pub fn get_updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
