use std::sync::Arc;

use futures::StreamExt;
use tracing::warn;

use crate::csv::{create_operation_stream, Operation};
use crate::domain::TransactionType;
use crate::engine::{TransferEngine, TransferError};

/// Streams operations from `reader` through the engine. Rows that fail are logged and
/// skipped.
pub async fn run<R>(reader: R, engine: Arc<TransferEngine>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut operation_stream = create_operation_stream(reader).await;

    while let Some(operation_result) = operation_stream.next().await {
        match operation_result {
            Ok(operation) => {
                let user = operation.get_user();
                let engine = engine.clone();
                // Each row runs on its own task but is awaited before the next one, so
                // replaying a file is deterministic.
                let result =
                    tokio::task::spawn(async move { execute(&engine, operation).await }).await;

                match result {
                    Ok(engine_result) => {
                        if let Err(e) = engine_result {
                            warn!(user, "Error processing operation: {e}")
                        }
                    }
                    Err(e) => {
                        warn!("Join error: {e}");
                    }
                }
            }
            Err(e) => warn!(?e, "Error in operation stream"),
        }
    }
}

pub async fn execute(engine: &TransferEngine, operation: Operation) -> Result<(), TransferError> {
    match operation {
        Operation::Open { user } => {
            engine.ledger().ensure_wallets(user);
        }
        Operation::Credit {
            user,
            currency,
            amount,
            reference,
        } => {
            engine.record_external_credit(
                user,
                currency,
                amount,
                TransactionType::Deposit,
                "Replayed credit",
                reference,
            )?;
        }
        Operation::Debit {
            user,
            currency,
            amount,
            reference,
        } => {
            engine.record_external_debit(
                user,
                currency,
                amount,
                TransactionType::Withdrawal,
                "Replayed debit",
                reference,
            )?;
        }
        Operation::Transfer {
            user,
            from,
            to,
            amount,
        } => {
            engine.transfer(user, from, to, amount, "").await?;
        }
    }
    Ok(())
}
