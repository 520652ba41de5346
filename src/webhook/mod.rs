//! Turns payment provider deposit notifications into ledger credits.
//!
//! A delivery moves through [`ReconciliationState`]: it is received, its signature is
//! verified, the paying user is resolved, and the settlement wallet is credited once per
//! provider reference. Anything that fails along the way is rejected without touching
//! the ledger.

mod payload;
mod signature;

pub use payload::*;
pub use signature::*;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::{
    ApplyOnce, Currency, Decimal, Ledger, LedgerError, NewTransaction, Transaction,
    TransactionId, TransactionType, UserId,
};

/// Looks up the users a notification may refer to.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_id(&self, id: UserId) -> Option<UserId>;
    async fn find_user_by_email(&self, email: &str) -> Option<UserId>;
}

#[derive(thiserror::Error, Debug)]
pub enum WebhookError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("No user matches id {user_id:?} or email {email:?}")]
    UserNotFound {
        user_id: Option<UserId>,
        email: Option<String>,
    },
    #[error("Charge `{reference}` is in {currency}, deposits settle in {settlement}")]
    UnsupportedCurrency {
        reference: String,
        currency: String,
        settlement: Currency,
    },
    #[error("Charge `{0}` has a zero amount")]
    InvalidAmount(String),
    #[error("Ledger error: {0}")]
    LedgerError(#[from] LedgerError),
}

impl WebhookError {
    /// A retryable rejection should be answered so that the provider redelivers.
    pub fn is_retryable(&self) -> bool {
        match self {
            WebhookError::LedgerError(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationState {
    Received,
    SignatureVerified,
    UserResolved,
    Credited,
    Rejected,
}

impl fmt::Display for ReconciliationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReconciliationState::Received => "received",
            ReconciliationState::SignatureVerified => "signature-verified",
            ReconciliationState::UserResolved => "user-resolved",
            ReconciliationState::Credited => "credited",
            ReconciliationState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct DepositReceipt {
    pub user: UserId,
    pub amount: Decimal,
    pub currency: Currency,
    pub new_balance: Decimal,
    pub transaction_id: TransactionId,
    pub reference: String,
}

impl From<&Transaction> for DepositReceipt {
    fn from(transaction: &Transaction) -> Self {
        DepositReceipt {
            user: transaction.owner,
            amount: transaction.amount,
            currency: transaction.currency,
            new_balance: transaction.balance_after,
            transaction_id: transaction.id,
            reference: transaction.reference.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Credited(DepositReceipt),
    /// The reference was credited before; carries the first delivery's receipt.
    Duplicate(DepositReceipt),
    Ignored { event: String },
}

impl Reconciliation {
    pub fn receipt(&self) -> Option<&DepositReceipt> {
        match self {
            Reconciliation::Credited(receipt) | Reconciliation::Duplicate(receipt) => {
                Some(receipt)
            }
            Reconciliation::Ignored { .. } => None,
        }
    }
}

pub struct WebhookReconciler {
    ledger: Arc<Ledger>,
    users: Arc<dyn UserDirectory>,
    secret: Vec<u8>,
}

impl WebhookReconciler {
    pub fn new(
        ledger: Arc<Ledger>,
        users: Arc<dyn UserDirectory>,
        secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            ledger,
            users,
            secret: secret.into(),
        }
    }

    /// `raw` must be the body exactly as received, the signature covers its bytes.
    pub async fn handle_deposit_notification(
        &self,
        raw: &[u8],
        signature: &str,
    ) -> Result<Reconciliation, WebhookError> {
        let result = self.reconcile(raw, signature).await;
        if let Err(e) = &result {
            warn!(
                state = %ReconciliationState::Rejected,
                retryable = e.is_retryable(),
                "Deposit notification rejected: {e}"
            );
        }
        result
    }

    async fn reconcile(&self, raw: &[u8], signature: &str) -> Result<Reconciliation, WebhookError> {
        debug!(state = %ReconciliationState::Received, bytes = raw.len());

        verify_signature(&self.secret, raw, signature)?;
        debug!(state = %ReconciliationState::SignatureVerified);

        let charge = match parse(raw)? {
            Event::ChargeSuccess(charge) => charge,
            Event::Other(event) => {
                info!(%event, "Ignoring notification");
                return Ok(Reconciliation::Ignored { event });
            }
        };

        let settlement = self.ledger.settlement_currency();
        if let Some(currency) = &charge.currency {
            if !currency.trim().eq_ignore_ascii_case(settlement.code()) {
                return Err(WebhookError::UnsupportedCurrency {
                    reference: charge.reference,
                    currency: currency.clone(),
                    settlement,
                });
            }
        }
        if charge.amount == 0 {
            return Err(WebhookError::InvalidAmount(charge.reference));
        }

        let user = self.resolve_user(&charge).await?;
        debug!(state = %ReconciliationState::UserResolved, user, reference = %charge.reference);

        let amount = Decimal::from_i128_with_scale(i128::from(charge.amount), 2);
        let entry = NewTransaction::new(
            TransactionType::Deposit,
            amount,
            settlement,
            format!("Deposit via Paystack - {}", charge.reference),
            charge.reference,
        );

        match self.ledger.apply_once_for_user(user, entry)? {
            ApplyOnce::Applied(transaction) => {
                info!(
                    state = %ReconciliationState::Credited,
                    user,
                    %amount,
                    balance = %transaction.balance_after,
                    reference = %transaction.reference,
                    "Deposit credited"
                );
                Ok(Reconciliation::Credited(DepositReceipt::from(&transaction)))
            }
            ApplyOnce::AlreadyApplied(transaction) => {
                info!(
                    user,
                    reference = %transaction.reference,
                    "Deposit already credited"
                );
                Ok(Reconciliation::Duplicate(DepositReceipt::from(&transaction)))
            }
        }
    }

    async fn resolve_user(&self, charge: &Charge) -> Result<UserId, WebhookError> {
        let user_id = charge.metadata_user_id();
        if let Some(id) = user_id {
            if let Some(user) = self.users.find_user_by_id(id).await {
                return Ok(user);
            }
        }

        let email = charge.customer_email();
        if let Some(email) = email {
            if let Some(user) = self.users.find_user_by_email(email).await {
                return Ok(user);
            }
        }

        Err(WebhookError::UserNotFound {
            user_id,
            email: email.map(str::to_string),
        })
    }
}
