use chrono::{DateTime, Utc};
use tokio::io::AsyncWrite;
use tracing::debug;

use crate::domain::{
    Currency, Decimal, HistoryFilter, Ledger, Page, Transaction, TransactionId, TransactionStatus,
    TransactionType, UserId, WalletId,
};

#[derive(thiserror::Error, Debug)]
pub enum HistoryExportError {
    #[error("csv error: {0}")]
    CsvError(#[from] csv_async::Error),
    #[error("Io error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(serde::Serialize, Debug)]
struct HistoryRow<'a> {
    id: TransactionId,
    wallet: WalletId,
    #[serde(rename = "type")]
    kind: TransactionType,
    amount: Decimal,
    currency: Currency,
    description: &'a str,
    reference: &'a str,
    status: TransactionStatus,
    created_at: DateTime<Utc>,
}

impl<'a> From<&'a Transaction> for HistoryRow<'a> {
    fn from(t: &'a Transaction) -> Self {
        HistoryRow {
            id: t.id,
            wallet: t.wallet,
            kind: t.kind,
            amount: t.amount,
            currency: t.currency,
            description: &t.description,
            reference: &t.reference,
            status: t.status,
            created_at: t.created_at,
        }
    }
}

/// Writes a user's statement as CSV, oldest record first, and returns the number of rows.
/// Both bounds are inclusive.
pub async fn export_history<W>(
    ledger: &Ledger,
    user: UserId,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    writer: W,
) -> Result<usize, HistoryExportError>
where
    W: AsyncWrite + Unpin + Send,
{
    let filter = HistoryFilter::for_user(user).between(from, to);
    let mut items = ledger.history(&filter, Page::new(0, usize::MAX)).items;
    items.reverse();

    let mut serializer = csv_async::AsyncSerializer::from_writer(writer);
    for transaction in &items {
        serializer.serialize(HistoryRow::from(transaction)).await?;
    }
    serializer.flush().await?;
    debug!(user, rows = items.len(), "Exported history");
    Ok(items.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewTransaction;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn ledger_with_history() -> Ledger {
        let ledger = Ledger::new();
        ledger.ensure_wallets(1);
        ledger.ensure_wallets(2);
        let ghs = ledger.find_wallet_id(1, Currency::Ghs).unwrap();
        let other = ledger.find_wallet_id(2, Currency::Ghs).unwrap();
        for (wallet, amount, reference) in [
            (ghs, dec!(50), "REF1"),
            (other, dec!(10), "REF2"),
            (ghs, dec!(-20), "REF3"),
        ] {
            ledger
                .apply_once(
                    wallet,
                    NewTransaction::new(
                        if amount.is_sign_negative() {
                            TransactionType::Withdrawal
                        } else {
                            TransactionType::Deposit
                        },
                        amount,
                        Currency::Ghs,
                        "Statement, test",
                        reference,
                    ),
                )
                .unwrap();
        }
        ledger
    }

    #[tokio::test]
    async fn test_export_writes_header_and_user_rows_in_order() {
        let ledger = ledger_with_history();
        let mut output = Vec::new();

        let rows = export_history(&ledger, 1, None, None, &mut output)
            .await
            .unwrap();

        let output = String::from_utf8(output).unwrap();
        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(rows, 2);
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "id,wallet,type,amount,currency,description,reference,status,created_at"
        );
        assert!(lines[1].contains(",deposit,50,GHS,\"Statement, test\",REF1,completed,"));
        assert!(lines[2].contains(",withdrawal,-20,GHS,\"Statement, test\",REF3,completed,"));
    }

    #[tokio::test]
    async fn test_export_respects_date_range() {
        let ledger = ledger_with_history();
        let mut output = Vec::new();
        let future = Utc::now() + Duration::days(1);

        let rows = export_history(&ledger, 1, Some(future), None, &mut output)
            .await
            .unwrap();

        assert_eq!(rows, 0);
        assert!(String::from_utf8(output).unwrap().is_empty());
    }
}
