use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info};

use super::{
    Currency, Decimal, InvalidStatusTransition, NewTransaction, Transaction, TransactionId,
    TransactionStatus, UserId, Wallet, WalletError, WalletId,
};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("User `{user}` has no {currency} wallet")]
    WalletNotFound { user: UserId, currency: Currency },
    #[error("Wallet `{0}` does not exist")]
    InexistentWallet(WalletId),
    #[error("Transaction `{0}` does not exist")]
    InexistentTransaction(TransactionId),
    #[error("Reference `{0}` is already recorded")]
    DuplicateReference(String),
    #[error("Wallet `{0}` is locked by another writer")]
    PersistenceConflict(WalletId),
    #[error("Io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Wallet error: {0}")]
    WalletError(#[from] WalletError),
    #[error("Status error: {0}")]
    StatusError(#[from] InvalidStatusTransition),
}

impl LedgerError {
    /// Only lock contention clears up on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::PersistenceConflict(_))
    }
}

/// Result of [`Ledger::apply_once`].
#[derive(Debug, PartialEq, Clone)]
pub enum ApplyOnce {
    Applied(Transaction),
    AlreadyApplied(Transaction),
}

#[derive(Default, Debug)]
struct Accounts {
    wallets: HashMap<WalletId, Mutex<Wallet>>,
    by_owner: HashMap<(UserId, Currency), WalletId>,
}

impl Accounts {
    fn owns_any(&self, user: UserId) -> bool {
        Currency::ALL
            .iter()
            .any(|currency| self.by_owner.contains_key(&(user, *currency)))
    }

    /// One unregistered wallet per currency for `user`, ids continuing the sequence.
    fn new_wallets(&self, user: UserId, settlement: Currency) -> Vec<Wallet> {
        let next = self.wallets.len() as WalletId + 1;
        Currency::ALL
            .into_iter()
            .zip(next..)
            .map(|(currency, id)| Wallet::new(id, user, currency, currency == settlement))
            .collect()
    }

    fn register(&mut self, wallets: Vec<Wallet>) {
        for wallet in wallets {
            let id = wallet.get_id();
            self.by_owner
                .insert((wallet.get_owner(), wallet.get_currency()), id);
            self.wallets.insert(id, Mutex::new(wallet));
        }
    }
}

#[derive(Default, Debug)]
struct Journal {
    entries: Vec<Transaction>,
    by_reference: HashMap<String, TransactionId>,
}

impl Journal {
    fn get(&self, id: TransactionId) -> Option<&Transaction> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.entries.get(index)
    }

    /// The earlier record when `entry` replays it exactly. A reference reused for a
    /// different account, amount, currency or type is a [`LedgerError::DuplicateReference`].
    fn replay_of(
        &self,
        entry: &NewTransaction,
        same_account: impl Fn(&Transaction) -> bool,
    ) -> Result<Option<Transaction>, LedgerError> {
        let Some(existing) = self
            .by_reference
            .get(&entry.reference)
            .and_then(|id| self.get(*id))
        else {
            return Ok(None);
        };
        if same_account(existing)
            && existing.kind == entry.kind
            && existing.currency == entry.currency
            && existing.amount == entry.amount
        {
            Ok(Some(existing.clone()))
        } else {
            Err(LedgerError::DuplicateReference(entry.reference.clone()))
        }
    }

    fn ensure_unused(&self, reference: &str) -> Result<(), LedgerError> {
        if self.by_reference.contains_key(reference) {
            Err(LedgerError::DuplicateReference(reference.to_string()))
        } else {
            Ok(())
        }
    }

    fn append(
        &mut self,
        wallet: WalletId,
        owner: UserId,
        entry: NewTransaction,
        balance_after: Decimal,
    ) -> Transaction {
        let id = self.entries.len() as TransactionId + 1;
        let now = Utc::now();
        let transaction = Transaction {
            id,
            wallet,
            owner,
            kind: entry.kind,
            amount: entry.amount,
            currency: entry.currency,
            description: entry.description,
            reference: entry.reference,
            status: entry.status,
            conversion: entry.conversion,
            balance_after: entry.balance_after.unwrap_or(balance_after),
            created_at: now,
            updated_at: now,
        };
        self.by_reference.insert(transaction.reference.clone(), id);
        self.entries.push(transaction.clone());
        transaction
    }
}

/// Wallets plus their append-only journal.
///
/// Lock order is journal, then the wallet map, then a single wallet. The wallet map is
/// only write-locked while a user's wallets are being opened.
#[derive(Debug)]
pub struct Ledger {
    accounts: RwLock<Accounts>,
    journal: RwLock<Journal>,
    settlement: Currency,
    lock_timeout: Duration,
}

impl Default for Ledger {
    fn default() -> Self {
        Ledger::with_settings(Currency::default(), DEFAULT_LOCK_TIMEOUT)
    }
}

impl Ledger {
    pub fn new() -> Ledger {
        Ledger::default()
    }

    pub fn with_settings(settlement: Currency, lock_timeout: Duration) -> Ledger {
        Ledger {
            accounts: RwLock::default(),
            journal: RwLock::default(),
            settlement,
            lock_timeout,
        }
    }

    pub fn settlement_currency(&self) -> Currency {
        self.settlement
    }

    /// Opens one wallet per supported currency for `user`, the settlement one marked
    /// primary. Does nothing if the user already owns a wallet.
    pub fn ensure_wallets(&self, user: UserId) -> Vec<Wallet> {
        let exists = self.accounts.read().owns_any(user);
        if !exists {
            let mut accounts = self.accounts.write();
            // Another thread may have opened them between the two locks
            if !accounts.owns_any(user) {
                let wallets = accounts.new_wallets(user, self.settlement);
                accounts.register(wallets);
                info!(user, "Opened wallets");
            }
        }
        self.get_wallets(user)
    }

    /// Primary wallet first, the rest in currency order.
    pub fn get_wallets(&self, user: UserId) -> Vec<Wallet> {
        let accounts = self.accounts.read();
        let mut wallets = Currency::ALL
            .iter()
            .filter_map(|currency| accounts.by_owner.get(&(user, *currency)))
            .filter_map(|id| accounts.wallets.get(id))
            .map(|wallet| wallet.lock().clone())
            .collect::<Vec<_>>();
        wallets.sort_by_key(|w| (!w.is_primary(), w.get_currency()));
        wallets
    }

    pub fn get_wallet(&self, user: UserId, currency: Currency) -> Result<Wallet, LedgerError> {
        let id = self.find_wallet_id(user, currency)?;
        self.get_wallet_by_id(id)
    }

    pub fn find_wallet_id(&self, user: UserId, currency: Currency) -> Result<WalletId, LedgerError> {
        self.accounts
            .read()
            .by_owner
            .get(&(user, currency))
            .copied()
            .ok_or(LedgerError::WalletNotFound { user, currency })
    }

    pub fn get_wallet_by_id(&self, wallet: WalletId) -> Result<Wallet, LedgerError> {
        Ok(self
            .get_existing_wallet(wallet)
            .ok_or(LedgerError::InexistentWallet(wallet))?
            .lock()
            .clone())
    }

    pub fn get_balance(&self, wallet: WalletId) -> Result<Decimal, LedgerError> {
        Ok(self
            .get_existing_wallet(wallet)
            .ok_or(LedgerError::InexistentWallet(wallet))?
            .lock()
            .get_balance())
    }

    /// Atomically adds `delta` to the wallet balance and returns the new balance.
    ///
    /// Concurrent calls on one wallet serialize on its mutex. Waiting longer than the
    /// configured lock timeout fails with [`LedgerError::PersistenceConflict`].
    pub fn apply_delta(&self, wallet: WalletId, delta: Decimal) -> Result<Decimal, LedgerError> {
        let slot = self
            .get_existing_wallet(wallet)
            .ok_or(LedgerError::InexistentWallet(wallet))?;
        let mut guard = slot
            .try_lock_for(self.lock_timeout)
            .ok_or(LedgerError::PersistenceConflict(wallet))?;
        let balance = guard.apply_delta(delta)?;
        debug!(wallet, %delta, %balance, "Applied delta");
        Ok(balance)
    }

    /// Appends a record for `wallet`. When the entry carries no `balance_after`, the
    /// wallet's current balance is stored.
    pub fn record_transaction(
        &self,
        wallet: WalletId,
        entry: NewTransaction,
    ) -> Result<Transaction, LedgerError> {
        let (owner, balance) = self.owner_and_balance(wallet)?;
        let mut journal = self.journal.write();
        journal.ensure_unused(&entry.reference)?;
        let transaction = journal.append(wallet, owner, entry, balance);
        info!(
            id = transaction.id,
            wallet,
            kind = %transaction.kind,
            amount = %transaction.amount,
            reference = %transaction.reference,
            "Recorded transaction"
        );
        Ok(transaction)
    }

    /// Appends both legs of a transfer, or neither.
    pub fn record_pair(
        &self,
        debit: (WalletId, NewTransaction),
        credit: (WalletId, NewTransaction),
    ) -> Result<(Transaction, Transaction), LedgerError> {
        let (debit_wallet, debit_entry) = debit;
        let (credit_wallet, credit_entry) = credit;
        let (debit_owner, debit_balance) = self.owner_and_balance(debit_wallet)?;
        let (credit_owner, credit_balance) = self.owner_and_balance(credit_wallet)?;

        let mut journal = self.journal.write();
        journal.ensure_unused(&debit_entry.reference)?;
        journal.ensure_unused(&credit_entry.reference)?;
        if debit_entry.reference == credit_entry.reference {
            return Err(LedgerError::DuplicateReference(credit_entry.reference));
        }
        let out = journal.append(debit_wallet, debit_owner, debit_entry, debit_balance);
        let into = journal.append(credit_wallet, credit_owner, credit_entry, credit_balance);
        info!(
            debit = out.id,
            credit = into.id,
            reference = %out.reference,
            "Recorded transaction pair"
        );
        Ok((out, into))
    }

    /// Applies `entry.amount` to the wallet and journals it, unless the same entry was
    /// already applied to that wallet, in which case the earlier record is returned
    /// untouched. Reusing the reference for anything else fails with
    /// [`LedgerError::DuplicateReference`].
    ///
    /// The reference check, the balance change and the append share one journal lock, so
    /// concurrent calls with the same reference apply it once.
    pub fn apply_once(
        &self,
        wallet: WalletId,
        entry: NewTransaction,
    ) -> Result<ApplyOnce, LedgerError> {
        let mut journal = self.journal.write();
        if let Some(existing) = journal.replay_of(&entry, |t| t.wallet == wallet)? {
            debug!(reference = %entry.reference, id = existing.id, "Reference already applied");
            return Ok(ApplyOnce::AlreadyApplied(existing));
        }

        let (owner, balance) = {
            let slot = self
                .get_existing_wallet(wallet)
                .ok_or(LedgerError::InexistentWallet(wallet))?;
            let mut guard = slot
                .try_lock_for(self.lock_timeout)
                .ok_or(LedgerError::PersistenceConflict(wallet))?;
            (guard.get_owner(), guard.apply_delta(entry.amount)?)
        };
        let transaction = journal.append(wallet, owner, entry, balance);
        info!(
            id = transaction.id,
            wallet,
            amount = %transaction.amount,
            %balance,
            reference = %transaction.reference,
            "Applied once"
        );
        Ok(ApplyOnce::Applied(transaction))
    }

    /// [`Ledger::apply_once`] on the user's `entry.currency` wallet. A user without
    /// wallets gets them opened here, and they only become visible once the entry is
    /// applied, so a rejected entry leaves no trace.
    pub fn apply_once_for_user(
        &self,
        user: UserId,
        entry: NewTransaction,
    ) -> Result<ApplyOnce, LedgerError> {
        let mut journal = self.journal.write();
        let currency = entry.currency;
        if let Some(existing) =
            journal.replay_of(&entry, |t| t.owner == user && t.currency == currency)?
        {
            debug!(reference = %entry.reference, id = existing.id, "Reference already applied");
            return Ok(ApplyOnce::AlreadyApplied(existing));
        }

        let (wallet, balance) = match self.find_wallet_id(user, currency) {
            Ok(wallet) => (wallet, self.apply_delta(wallet, entry.amount)?),
            Err(_) => self.open_wallets_with(user, currency, entry.amount)?,
        };
        let transaction = journal.append(wallet, user, entry, balance);
        info!(
            id = transaction.id,
            wallet,
            amount = %transaction.amount,
            %balance,
            reference = %transaction.reference,
            "Applied once"
        );
        Ok(ApplyOnce::Applied(transaction))
    }

    pub fn update_transaction_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<Transaction, LedgerError> {
        let mut journal = self.journal.write();
        let index = usize::try_from(id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .filter(|index| *index < journal.entries.len())
            .ok_or(LedgerError::InexistentTransaction(id))?;
        let transaction = &mut journal.entries[index];
        transaction.set_status(status)?;
        info!(id, %status, "Updated transaction status");
        Ok(transaction.clone())
    }

    pub fn get_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.journal
            .read()
            .get(id)
            .cloned()
            .ok_or(LedgerError::InexistentTransaction(id))
    }

    pub fn find_by_reference(&self, reference: &str) -> Option<Transaction> {
        let journal = self.journal.read();
        journal
            .by_reference
            .get(reference)
            .and_then(|id| journal.get(*id))
            .cloned()
    }

    /// Gives history queries a consistent view of the journal, oldest record first.
    pub(super) fn with_journal<R>(&self, f: impl FnOnce(&[Transaction]) -> R) -> R {
        f(&self.journal.read().entries)
    }

    pub fn dump_to_writer<W>(&self, w: &mut W) -> Result<(), LedgerError>
    where
        W: std::io::Write,
    {
        let accounts = self.accounts.read();
        let mut ids = accounts.wallets.keys().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        w.write_all("user, currency, balance, primary\n".as_bytes())?;
        for id in ids {
            let wallet = accounts.wallets[&id].lock();
            w.write_all(
                format!(
                    "{}, {}, {}, {}\n",
                    wallet.get_owner(),
                    wallet.get_currency(),
                    wallet.get_balance(),
                    wallet.is_primary()
                )
                .as_bytes(),
            )?;
        }
        w.flush()?;
        Ok(())
    }

    /// Opens the user's wallets with `delta` already applied to the `currency` one.
    /// Nothing is registered when the delta is rejected.
    fn open_wallets_with(
        &self,
        user: UserId,
        currency: Currency,
        delta: Decimal,
    ) -> Result<(WalletId, Decimal), LedgerError> {
        let mut accounts = self.accounts.write();
        if accounts.owns_any(user) {
            // Opened by another thread since the lookup
            let id = accounts
                .by_owner
                .get(&(user, currency))
                .copied()
                .ok_or(LedgerError::WalletNotFound { user, currency })?;
            let slot = accounts
                .wallets
                .get(&id)
                .ok_or(LedgerError::InexistentWallet(id))?;
            let mut guard = slot
                .try_lock_for(self.lock_timeout)
                .ok_or(LedgerError::PersistenceConflict(id))?;
            return Ok((id, guard.apply_delta(delta)?));
        }

        let mut wallets = accounts.new_wallets(user, self.settlement);
        let target = wallets
            .iter_mut()
            .find(|w| w.get_currency() == currency)
            .ok_or(LedgerError::WalletNotFound { user, currency })?;
        let id = target.get_id();
        let balance = target.apply_delta(delta)?;
        accounts.register(wallets);
        info!(user, "Opened wallets");
        Ok((id, balance))
    }

    fn owner_and_balance(&self, wallet: WalletId) -> Result<(UserId, Decimal), LedgerError> {
        let slot = self
            .get_existing_wallet(wallet)
            .ok_or(LedgerError::InexistentWallet(wallet))?;
        let guard = slot.lock();
        Ok((guard.get_owner(), guard.get_balance()))
    }

    /// Returns a MappedRwLockReadGuard because the `Mutex<Wallet>`
    /// references the read-lock.
    fn get_existing_wallet(&self, wallet: WalletId) -> Option<MappedRwLockReadGuard<Mutex<Wallet>>> {
        let read_lock = self.accounts.read();

        RwLockReadGuard::try_map(read_lock, |accounts| accounts.wallets.get(&wallet)).ok()
    }
}
