use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;

use wallet_ledger::domain::{Currency, Decimal, Ledger, TransactionType};
use wallet_ledger::engine::{TransferEngine, TransferError};
use wallet_ledger::rates::{RateCache, RateError, RateProvider};

struct Fixed(Decimal);

#[async_trait]
impl RateProvider for Fixed {
    async fn fetch_rate(&self, _from: Currency, _to: Currency) -> Result<Decimal, RateError> {
        Ok(self.0)
    }
}

struct Offline;

#[async_trait]
impl RateProvider for Offline {
    async fn fetch_rate(&self, from: Currency, to: Currency) -> Result<Decimal, RateError> {
        Err(RateError::MissingPair { from, to })
    }
}

fn engine_with(provider: impl RateProvider + 'static) -> TransferEngine {
    let ledger = Arc::new(Ledger::with_settings(Currency::Ghs, Duration::from_secs(5)));
    TransferEngine::new(ledger, Arc::new(RateCache::new(Arc::new(provider))))
}

fn fund(engine: &TransferEngine, user: u64, currency: Currency, amount: Decimal) {
    engine.ledger().ensure_wallets(user);
    engine
        .record_external_credit(
            user,
            currency,
            amount,
            TransactionType::Deposit,
            "Funding",
            None,
        )
        .unwrap();
}

fn balance(engine: &TransferEngine, user: u64, currency: Currency) -> Decimal {
    engine
        .ledger()
        .get_wallet(user, currency)
        .unwrap()
        .get_balance()
}

#[tokio::test]
async fn test_exchange_ghs_to_usd_at_stubbed_rate() {
    let engine = engine_with(Fixed(dec!(0.12)));
    fund(&engine, 1, Currency::Ghs, dec!(1000.00));

    let result = engine
        .transfer(1, Currency::Ghs, Currency::Usd, dec!(100.00), "")
        .await
        .unwrap();

    assert_eq!(balance(&engine, 1, Currency::Ghs), dec!(900.00));
    assert_eq!(balance(&engine, 1, Currency::Usd), dec!(12.00));
    assert_eq!(result.rate, dec!(0.12));
    for leg in [&result.debit, &result.credit] {
        assert_eq!(leg.kind, TransactionType::CurrencyExchange);
        assert_eq!(leg.conversion.as_ref().unwrap().rate, dec!(0.12));
    }
    assert_eq!(engine.ledger().recent_transactions(1, 10).len(), 3);
    let reference = result.debit.reference.trim_end_matches("_OUT");
    assert_eq!(
        engine.ledger().transfer_legs(reference),
        vec![result.debit.clone(), result.credit.clone()]
    );
}

#[tokio::test]
async fn test_exchange_uses_fallback_rate_when_provider_is_offline() {
    let engine = engine_with(Offline);
    fund(&engine, 1, Currency::Usd, dec!(10));

    let result = engine
        .transfer(1, Currency::Usd, Currency::Ghs, dec!(10), "Top up cedis")
        .await
        .unwrap();

    assert_eq!(result.rate, dec!(8.33));
    assert_eq!(balance(&engine, 1, Currency::Ghs), dec!(83.30));
    assert_eq!(result.debit.description, "Top up cedis");
    assert_eq!(engine.rates().stats().fallbacks, 1);
}

#[tokio::test]
async fn test_over_balance_transfer_changes_nothing() {
    let engine = engine_with(Fixed(dec!(0.12)));
    fund(&engine, 1, Currency::Ghs, dec!(1000.00));

    let result = engine
        .transfer(1, Currency::Ghs, Currency::Usd, dec!(2000.00), "")
        .await;

    assert!(matches!(
        result,
        Err(TransferError::InsufficientFunds { .. })
    ));
    assert_eq!(balance(&engine, 1, Currency::Ghs), dec!(1000.00));
    assert_eq!(balance(&engine, 1, Currency::Usd), dec!(0));
    assert_eq!(engine.ledger().recent_transactions(1, 10).len(), 1);
}

#[tokio::test]
async fn test_transfer_between_users_wallets_is_unauthorized() {
    let engine = engine_with(Fixed(dec!(1)));
    fund(&engine, 1, Currency::Ghs, dec!(10));
    engine.ledger().ensure_wallets(2);
    let mine = engine.ledger().find_wallet_id(1, Currency::Ghs).unwrap();
    let theirs = engine.ledger().find_wallet_id(2, Currency::Ghs).unwrap();

    let result = engine
        .transfer_between_wallets(1, mine, theirs, dec!(5), "")
        .await;

    assert!(matches!(
        result,
        Err(TransferError::UnauthorizedTransfer { user: 1, .. })
    ));
    assert_eq!(balance(&engine, 1, Currency::Ghs), dec!(10));
    assert_eq!(balance(&engine, 2, Currency::Ghs), dec!(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_never_overdraw() {
    let engine = Arc::new(engine_with(Fixed(dec!(0.5))));
    fund(&engine, 1, Currency::Ghs, dec!(500));

    let handles = (0..100)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .transfer(1, Currency::Ghs, Currency::Eur, dec!(10), "")
                    .await
            })
        })
        .collect::<Vec<_>>();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(TransferError::InsufficientFunds { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 50);
    assert_eq!(balance(&engine, 1, Currency::Ghs), dec!(0));
    assert_eq!(balance(&engine, 1, Currency::Eur), dec!(250.0));
    assert_eq!(engine.ledger().transactions_for_user(1, Default::default()).total, 101);
}
