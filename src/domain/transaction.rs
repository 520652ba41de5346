use std::fmt;

use chrono::{DateTime, Utc};

use crate::domain::{Currency, Decimal, TransactionId, UserId, WalletId};

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("Can't move transaction from `{from}` to `{to}`, only `pending` transactions can settle")]
pub struct InvalidStatusTransition {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    CurrencyExchange,
    Payment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
            TransactionType::CurrencyExchange => "currency-exchange",
            TransactionType::Payment => "payment",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
    Pending,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Failed => "failed",
        }
    }

    /// `pending` may settle into `completed` or `failed`. Settled records never move again.
    /// Re-applying the current status is accepted as a no-op.
    pub fn transition_to(
        self,
        next: TransactionStatus,
    ) -> Result<TransactionStatus, InvalidStatusTransition> {
        match (self, next) {
            (current, next) if current == next => Ok(next),
            (TransactionStatus::Pending, TransactionStatus::Completed)
            | (TransactionStatus::Pending, TransactionStatus::Failed) => Ok(next),
            (from, to) => Err(InvalidStatusTransition { from, to }),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Other side of a currency exchange, kept on both legs for audit.
#[derive(serde::Serialize, Debug, PartialEq, Clone)]
pub struct Conversion {
    pub counter_currency: Currency,
    pub counter_amount: Decimal,
    pub rate: Decimal,
}

/// A journal record. Only `status` and `updated_at` change after it is written.
#[derive(serde::Serialize, Debug, PartialEq, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet: WalletId,
    pub owner: UserId,
    pub kind: TransactionType,
    /// Negative for debits.
    pub amount: Decimal,
    pub currency: Currency,
    pub description: String,
    pub reference: String,
    pub status: TransactionStatus,
    pub conversion: Option<Conversion>,
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_credit(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub(crate) fn set_status(
        &mut self,
        status: TransactionStatus,
    ) -> Result<(), InvalidStatusTransition> {
        self.status = self.status.transition_to(status)?;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// A record waiting to be appended; the ledger assigns id, owner and timestamps.
#[derive(Debug, PartialEq, Clone)]
pub struct NewTransaction {
    pub kind: TransactionType,
    pub amount: Decimal,
    pub currency: Currency,
    pub description: String,
    pub reference: String,
    pub status: TransactionStatus,
    pub conversion: Option<Conversion>,
    pub balance_after: Option<Decimal>,
}

impl NewTransaction {
    pub fn new(
        kind: TransactionType,
        amount: Decimal,
        currency: Currency,
        description: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            amount,
            currency,
            description: description.into(),
            reference: reference.into(),
            status: TransactionStatus::Completed,
            conversion: None,
            balance_after: None,
        }
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_conversion(mut self, conversion: Conversion) -> Self {
        self.conversion = Some(conversion);
        self
    }

    pub fn with_balance_after(mut self, balance: Decimal) -> Self {
        self.balance_after = Some(balance);
        self
    }
}
