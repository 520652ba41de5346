use futures::StreamExt;

use super::{Operation, OperationRecord, OperationRecordError};

pub async fn create_operation_stream<R>(
    reader: R,
) -> impl futures::Stream<Item = Result<Operation, OperationRecordError>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    csv_async::AsyncReaderBuilder::new()
        .trim(csv_async::Trim::All)
        // `open` rows stop after the user column
        .flexible(true)
        .create_deserializer(reader)
        .into_deserialize::<OperationRecord>()
        .map(|r| match r {
            Ok(r) => r.try_into(),
            Err(e) => Err(e.into()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, Decimal};

    #[tokio::test]
    async fn test_operation_stream_works_with_whitespaces() {
        let test_data = "
            type, user, currency, to_currency, amount, reference
            open,  1
            credit, 1,  GHS, , 1000.00,  REF1
              transfer, 1, ghs,   usd, 100
        ";
        let mut operation_stream = create_operation_stream(test_data.as_bytes()).await;

        assert_eq!(
            operation_stream.next().await.unwrap().unwrap(),
            Operation::Open { user: 1 }
        );
        assert_eq!(
            operation_stream.next().await.unwrap().unwrap(),
            Operation::Credit {
                user: 1,
                currency: Currency::Ghs,
                amount: Decimal::new(100000, 2),
                reference: Some("REF1".to_string()),
            }
        );
        assert_eq!(
            operation_stream.next().await.unwrap().unwrap(),
            Operation::Transfer {
                user: 1,
                from: Currency::Ghs,
                to: Currency::Usd,
                amount: Decimal::new(100, 0),
            }
        );
    }

    #[tokio::test]
    async fn test_operation_stream_works_with_and_without_trailing_columns() {
        let test_data = "type,user,currency,to_currency,amount,reference
open,2
debit,2,EUR,,1.5
debit,2,EUR,,1.5,
";
        let mut operation_stream = create_operation_stream(test_data.as_bytes()).await;
        let debit = Operation::Debit {
            user: 2,
            currency: Currency::Eur,
            amount: Decimal::new(15, 1),
            reference: None,
        };

        assert_eq!(
            operation_stream.next().await.unwrap().unwrap(),
            Operation::Open { user: 2 }
        );
        assert_eq!(operation_stream.next().await.unwrap().unwrap(), debit);
        assert_eq!(operation_stream.next().await.unwrap().unwrap(), debit);
        assert!(operation_stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_operation_stream_returns_err_for_inexistent_operation_type() {
        let test_data = "
            type, user, currency, to_currency, amount, reference
            refund, 1, GHS, , 2
            open, 1
        ";
        let mut operation_stream = create_operation_stream(test_data.as_bytes()).await;

        assert!(operation_stream.next().await.unwrap().is_err());
        assert_eq!(
            operation_stream.next().await.unwrap().unwrap(),
            Operation::Open { user: 1 }
        );
    }

    #[tokio::test]
    async fn test_operation_stream_returns_err_for_missing_or_unknown_fields() {
        let test_data = "
            type, user, currency, to_currency, amount, reference
            credit, 1, GHS
            debit, 1, , , 5
            transfer, 1, GHS, , 5
            credit, 1, NGN, , 5
            open, 1
        ";
        let mut operation_stream = create_operation_stream(test_data.as_bytes()).await;

        assert!(matches!(
            operation_stream.next().await.unwrap(),
            Err(OperationRecordError::MissingAmountError)
        ));
        assert!(matches!(
            operation_stream.next().await.unwrap(),
            Err(OperationRecordError::MissingFieldError("currency"))
        ));
        assert!(matches!(
            operation_stream.next().await.unwrap(),
            Err(OperationRecordError::MissingFieldError("to_currency"))
        ));
        assert!(matches!(
            operation_stream.next().await.unwrap(),
            Err(OperationRecordError::CurrencyError(_))
        ));
        assert_eq!(
            operation_stream.next().await.unwrap().unwrap(),
            Operation::Open { user: 1 }
        );
    }

    #[tokio::test]
    async fn test_operation_stream_keeps_amount_precision_and_scale() {
        let test_data = "
            type, user, currency, to_currency, amount, reference
            credit, 1, GHS, , 12345678901234567.89
            credit, 1, GHS, , 0.30
            credit, 1, GHS, , ten
        ";
        let mut operation_stream = create_operation_stream(test_data.as_bytes()).await;

        let Operation::Credit { amount, .. } = operation_stream.next().await.unwrap().unwrap()
        else {
            panic!("expected a credit");
        };
        assert_eq!(amount.to_string(), "12345678901234567.89");
        let Operation::Credit { amount, .. } = operation_stream.next().await.unwrap().unwrap()
        else {
            panic!("expected a credit");
        };
        assert_eq!(amount.to_string(), "0.30");
        assert!(matches!(
            operation_stream.next().await.unwrap(),
            Err(OperationRecordError::AmountError(_))
        ));
    }
}
