use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    ApplyOnce, Conversion, Currency, Decimal, Ledger, LedgerError, NewTransaction, Transaction,
    TransactionType, UserId, WalletError, WalletId,
};
use crate::rates::RateCache;

const COMPENSATION_ATTEMPTS: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum TransferError {
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),
    #[error("User `{user}` has no {currency} wallet")]
    WalletNotFound { user: UserId, currency: Currency },
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },
    #[error("Wallet `{wallet}` doesn't belong to user `{user}`")]
    UnauthorizedTransfer { user: UserId, wallet: WalletId },
    #[error("Ledger error: {0}")]
    LedgerError(LedgerError),
}

impl TransferError {
    /// Whether the same request can succeed later without the caller changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::LedgerError(e) if e.is_retryable())
    }
}

impl From<LedgerError> for TransferError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::WalletNotFound { user, currency } => {
                TransferError::WalletNotFound { user, currency }
            }
            LedgerError::WalletError(WalletError::InsufficientFunds {
                available,
                requested,
            }) => TransferError::InsufficientFunds {
                available,
                requested,
            },
            e => TransferError::LedgerError(e),
        }
    }
}

/// Outcome of a transfer between two wallets of one user.
#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct TransferResult {
    pub user: UserId,
    pub from_wallet: WalletId,
    pub to_wallet: WalletId,
    pub debited: Decimal,
    pub from_currency: Currency,
    pub credited: Decimal,
    pub to_currency: Currency,
    /// 1 for same-currency transfers.
    pub rate: Decimal,
    /// Source balance right after the debit.
    pub from_balance: Decimal,
    /// Destination balance right after the credit.
    pub to_balance: Decimal,
    pub debit: Transaction,
    pub credit: Transaction,
}

/// Moves money between a user's own wallets and applies movements that settle
/// through an external payment rail.
pub struct TransferEngine {
    ledger: Arc<Ledger>,
    rates: Arc<RateCache>,
}

impl TransferEngine {
    pub fn new(ledger: Arc<Ledger>, rates: Arc<RateCache>) -> Self {
        Self { ledger, rates }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn rates(&self) -> &Arc<RateCache> {
        &self.rates
    }

    pub async fn transfer(
        &self,
        user: UserId,
        from: Currency,
        to: Currency,
        amount: Decimal,
        description: &str,
    ) -> Result<TransferResult, TransferError> {
        ensure_positive(amount)?;
        let from_wallet = self.ledger.find_wallet_id(user, from)?;
        let to_wallet = self.ledger.find_wallet_id(user, to)?;
        self.move_funds(user, from_wallet, to_wallet, amount, description)
            .await
    }

    /// Like [`TransferEngine::transfer`], addressed by wallet. Both wallets must belong
    /// to `user`.
    pub async fn transfer_between_wallets(
        &self,
        user: UserId,
        from_wallet: WalletId,
        to_wallet: WalletId,
        amount: Decimal,
        description: &str,
    ) -> Result<TransferResult, TransferError> {
        ensure_positive(amount)?;
        self.move_funds(user, from_wallet, to_wallet, amount, description)
            .await
    }

    /// Debits a wallet for money leaving through the payment provider. Replaying a
    /// `reference` returns the first record without debiting again. Reusing it for a different
    /// movement fails with [`LedgerError::DuplicateReference`].
    pub fn record_external_debit(
        &self,
        user: UserId,
        currency: Currency,
        amount: Decimal,
        kind: TransactionType,
        description: &str,
        reference: Option<String>,
    ) -> Result<ApplyOnce, TransferError> {
        ensure_positive(amount)?;
        let reference = reference.unwrap_or_else(|| new_reference("WITHDRAW"));
        self.apply_external(user, currency, -amount, kind, description, reference)
    }

    /// Credits a wallet for money that arrived through the payment provider. Replaying a
    /// `reference` returns the first record without crediting again. Reusing it for a different
    /// movement fails with [`LedgerError::DuplicateReference`].
    pub fn record_external_credit(
        &self,
        user: UserId,
        currency: Currency,
        amount: Decimal,
        kind: TransactionType,
        description: &str,
        reference: Option<String>,
    ) -> Result<ApplyOnce, TransferError> {
        ensure_positive(amount)?;
        let reference = reference.unwrap_or_else(|| new_reference("DEPOSIT"));
        self.apply_external(user, currency, amount, kind, description, reference)
    }

    fn apply_external(
        &self,
        user: UserId,
        currency: Currency,
        delta: Decimal,
        kind: TransactionType,
        description: &str,
        reference: String,
    ) -> Result<ApplyOnce, TransferError> {
        let wallet = self.ledger.find_wallet_id(user, currency)?;
        let entry = NewTransaction::new(kind, delta, currency, description, reference);
        let outcome = self.ledger.apply_once(wallet, entry)?;
        if let ApplyOnce::AlreadyApplied(existing) = &outcome {
            info!(user, reference = %existing.reference, "External movement already recorded");
        }
        Ok(outcome)
    }

    async fn move_funds(
        &self,
        user: UserId,
        from_wallet: WalletId,
        to_wallet: WalletId,
        amount: Decimal,
        description: &str,
    ) -> Result<TransferResult, TransferError> {
        let source = self.ledger.get_wallet_by_id(from_wallet)?;
        let target = self.ledger.get_wallet_by_id(to_wallet)?;
        for wallet in [&source, &target] {
            if wallet.get_owner() != user {
                warn!(user, wallet = wallet.get_id(), "Rejected transfer on foreign wallet");
                return Err(TransferError::UnauthorizedTransfer {
                    user,
                    wallet: wallet.get_id(),
                });
            }
        }
        // Early exit only, the debit below re-checks atomically
        if source.get_balance() < amount {
            return Err(TransferError::InsufficientFunds {
                available: source.get_balance(),
                requested: amount,
            });
        }

        let (from, to) = (source.get_currency(), target.get_currency());
        let exchange = from != to;
        let rate = self.rates.get_rate(from, to).await;
        let credited = amount
            .checked_mul(rate)
            .ok_or(LedgerError::WalletError(WalletError::Overflow))?;
        let (kind, reference) = if exchange {
            (TransactionType::CurrencyExchange, new_reference("EXCHANGE"))
        } else {
            (TransactionType::Transfer, new_reference("TRANSFER"))
        };

        let from_balance = self.ledger.apply_delta(from_wallet, -amount)?;
        let to_balance = match self.ledger.apply_delta(to_wallet, credited) {
            Ok(balance) => balance,
            Err(e) => {
                self.compensate(from_wallet, amount, &reference);
                return Err(e.into());
            }
        };

        let (debit_description, credit_description) = describe(description, exchange, from, to);
        let mut debit = NewTransaction::new(
            kind,
            -amount,
            from,
            debit_description,
            format!("{reference}_OUT"),
        )
        .with_balance_after(from_balance);
        let mut credit = NewTransaction::new(
            kind,
            credited,
            to,
            credit_description,
            format!("{reference}_IN"),
        )
        .with_balance_after(to_balance);
        if exchange {
            debit = debit.with_conversion(Conversion {
                counter_currency: to,
                counter_amount: credited,
                rate,
            });
            credit = credit.with_conversion(Conversion {
                counter_currency: from,
                counter_amount: amount,
                rate,
            });
        }

        let (debit, credit) = match self
            .ledger
            .record_pair((from_wallet, debit), (to_wallet, credit))
        {
            Ok(pair) => pair,
            Err(e) => {
                self.compensate(to_wallet, -credited, &reference);
                self.compensate(from_wallet, amount, &reference);
                return Err(e.into());
            }
        };

        info!(
            user,
            %from,
            %to,
            %amount,
            %credited,
            %rate,
            %reference,
            "Transfer completed"
        );
        Ok(TransferResult {
            user,
            from_wallet,
            to_wallet,
            debited: amount,
            from_currency: from,
            credited,
            to_currency: to,
            rate,
            from_balance,
            to_balance,
            debit,
            credit,
        })
    }

    /// Reverses an applied leg, retrying while the wallet is contended.
    fn compensate(&self, wallet: WalletId, delta: Decimal, reference: &str) {
        for attempt in 1..=COMPENSATION_ATTEMPTS {
            match self.ledger.apply_delta(wallet, delta) {
                Ok(balance) => {
                    warn!(wallet, %delta, %balance, reference, "Reversed transfer leg");
                    return;
                }
                Err(e) if e.is_retryable() && attempt < COMPENSATION_ATTEMPTS => continue,
                Err(e) => {
                    error!(wallet, %delta, reference, "Failed to reverse transfer leg: {e}");
                    return;
                }
            }
        }
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), TransferError> {
    if amount > Decimal::ZERO {
        Ok(())
    } else {
        Err(TransferError::InvalidAmount(amount))
    }
}

fn new_reference(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

fn describe(description: &str, exchange: bool, from: Currency, to: Currency) -> (String, String) {
    let description = description.trim();
    match (description.is_empty(), exchange) {
        (false, _) => (description.to_string(), description.to_string()),
        (true, true) => (
            format!("Currency exchange to {to}"),
            format!("Currency exchange from {from}"),
        ),
        (true, false) => (format!("Transfer to {to}"), format!("Transfer from {from}")),
    }
}
