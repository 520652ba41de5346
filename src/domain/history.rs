use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{
    Decimal, Ledger, Transaction, TransactionStatus, TransactionType, UserId, WalletId,
};

/// Every `Some` field must match. Date bounds are inclusive.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HistoryFilter {
    pub user: Option<UserId>,
    pub wallet: Option<WalletId>,
    pub kind: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    pub fn for_user(user: UserId) -> Self {
        Self {
            user: Some(user),
            ..Default::default()
        }
    }

    pub fn for_wallet(wallet: WalletId) -> Self {
        Self {
            wallet: Some(wallet),
            ..Default::default()
        }
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    fn matches(&self, transaction: &Transaction) -> bool {
        self.user.map_or(true, |user| transaction.owner == user)
            && self.wallet.map_or(true, |wallet| transaction.wallet == wallet)
            && self.kind.map_or(true, |kind| transaction.kind == kind)
            && self.status.map_or(true, |status| transaction.status == status)
            && self.from.map_or(true, |from| transaction.created_at >= from)
            && self.to.map_or(true, |to| transaction.created_at <= to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new(0, 20)
    }
}

#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub items: Vec<Transaction>,
    /// Matching records before paging.
    pub total: usize,
}

#[derive(serde::Serialize, Debug, Default, Clone, PartialEq)]
pub struct TypeTotals {
    pub count: u64,
    pub sum: Decimal,
}

#[derive(serde::Serialize, Debug, Default, Clone, PartialEq)]
pub struct HistorySummary {
    pub total: u64,
    pub by_status: HashMap<TransactionStatus, u64>,
    pub by_type: HashMap<TransactionType, TypeTotals>,
    /// Records created at or after the `since` given to [`Ledger::summary`].
    pub recent: u64,
}

impl Ledger {
    /// Newest first.
    pub fn history(&self, filter: &HistoryFilter, page: Page) -> HistoryPage {
        self.with_journal(|entries| {
            let matching = entries
                .iter()
                .rev()
                .filter(|t| filter.matches(t))
                .collect::<Vec<_>>();
            HistoryPage {
                total: matching.len(),
                items: matching
                    .into_iter()
                    .skip(page.offset)
                    .take(page.limit)
                    .cloned()
                    .collect(),
            }
        })
    }

    pub fn transactions_for_wallet(&self, wallet: WalletId, page: Page) -> HistoryPage {
        self.history(&HistoryFilter::for_wallet(wallet), page)
    }

    pub fn transactions_for_user(&self, user: UserId, page: Page) -> HistoryPage {
        self.history(&HistoryFilter::for_user(user), page)
    }

    pub fn recent_transactions(&self, user: UserId, limit: usize) -> Vec<Transaction> {
        self.history(&HistoryFilter::for_user(user), Page::new(0, limit))
            .items
    }

    pub fn transactions_by_status(&self, status: TransactionStatus) -> Vec<Transaction> {
        let filter = HistoryFilter {
            status: Some(status),
            ..Default::default()
        };
        self.with_journal(|entries| {
            entries
                .iter()
                .rev()
                .filter(|t| filter.matches(t))
                .cloned()
                .collect()
        })
    }

    /// Records carrying exactly `reference`.
    pub fn transactions_by_reference(&self, reference: &str) -> Vec<Transaction> {
        self.with_journal(|entries| {
            entries
                .iter()
                .filter(|t| t.reference == reference)
                .cloned()
                .collect()
        })
    }

    /// Both legs of the transfer or exchange recorded under `reference`, debit first.
    pub fn transfer_legs(&self, reference: &str) -> Vec<Transaction> {
        let legs = [format!("{reference}_OUT"), format!("{reference}_IN")];
        self.with_journal(|entries| {
            legs.iter()
                .filter_map(|leg| entries.iter().find(|t| &t.reference == leg))
                .cloned()
                .collect()
        })
    }

    pub fn summary(&self, user: UserId, since: DateTime<Utc>) -> HistorySummary {
        self.with_journal(|entries| {
            entries
                .iter()
                .filter(|t| t.owner == user)
                .fold(HistorySummary::default(), |mut summary, t| {
                    summary.total += 1;
                    *summary.by_status.entry(t.status).or_default() += 1;
                    let totals = summary.by_type.entry(t.kind).or_default();
                    totals.count += 1;
                    totals.sum += t.amount;
                    if t.created_at >= since {
                        summary.recent += 1;
                    }
                    summary
                })
        })
    }
}
