use std::str::FromStr;

use crate::domain::Currency;
use crate::domain::Decimal;
use crate::domain::UnsupportedCurrency;
use crate::domain::UserId;

#[derive(thiserror::Error, Debug)]
pub enum OperationRecordError {
    #[error("Missing amount field")]
    MissingAmountError,
    #[error("Missing {0} field")]
    MissingFieldError(&'static str),
    #[error("Invalid amount: {0}")]
    AmountError(#[from] rust_decimal::Error),
    #[error("Currency error: {0}")]
    CurrencyError(#[from] UnsupportedCurrency),
    #[error("csv error")]
    CsvError(#[from] csv_async::Error),
}

#[derive(serde::Deserialize, Debug)]
pub struct OperationRecord {
    r#type: OperationType,
    user: UserId,
    currency: Option<String>,
    to_currency: Option<String>,
    // Kept as text so the decimal never passes through a float
    amount: Option<String>,
    reference: Option<String>,
}

#[derive(serde::Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
enum OperationType {
    Open,
    Credit,
    Debit,
    Transfer,
}

/// One row of a replay file.
#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Open {
        user: UserId,
    },
    Credit {
        user: UserId,
        currency: Currency,
        amount: Decimal,
        reference: Option<String>,
    },
    Debit {
        user: UserId,
        currency: Currency,
        amount: Decimal,
        reference: Option<String>,
    },
    Transfer {
        user: UserId,
        from: Currency,
        to: Currency,
        amount: Decimal,
    },
}

impl Operation {
    pub fn get_user(&self) -> UserId {
        match self {
            Operation::Open { user }
            | Operation::Credit { user, .. }
            | Operation::Debit { user, .. }
            | Operation::Transfer { user, .. } => *user,
        }
    }
}

fn amount(value: Option<String>) -> Result<Decimal, OperationRecordError> {
    let value = value.ok_or(OperationRecordError::MissingAmountError)?;
    Ok(Decimal::from_str(&value)?)
}

fn currency(
    value: Option<String>,
    field: &'static str,
) -> Result<Currency, OperationRecordError> {
    let value = value.ok_or(OperationRecordError::MissingFieldError(field))?;
    Ok(value.parse()?)
}

impl TryFrom<OperationRecord> for Operation {
    type Error = OperationRecordError;

    fn try_from(value: OperationRecord) -> Result<Self, Self::Error> {
        let user = value.user;
        let reference = value.reference.filter(|r| !r.is_empty());
        match value.r#type {
            OperationType::Open => Ok(Self::Open { user }),
            OperationType::Credit => Ok(Self::Credit {
                user,
                currency: currency(value.currency, "currency")?,
                amount: amount(value.amount)?,
                reference,
            }),
            OperationType::Debit => Ok(Self::Debit {
                user,
                currency: currency(value.currency, "currency")?,
                amount: amount(value.amount)?,
                reference,
            }),
            OperationType::Transfer => Ok(Self::Transfer {
                user,
                from: currency(value.currency, "currency")?,
                to: currency(value.to_currency, "to_currency")?,
                amount: amount(value.amount)?,
            }),
        }
    }
}
