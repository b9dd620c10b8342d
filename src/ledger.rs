//! Ledger collaborator boundary.
//!
//! Balances, skins and the audit trail live outside the game core; the
//! engine only talks to this trait. The in-memory implementation mirrors the
//! contract the production store guarantees: per-user transactional balance
//! mutation and an insufficient-funds rejection at the storage layer itself,
//! so a stale in-memory pre-check can never overdraw an account.

use crate::errors::LedgerError;
use crate::money::Money;
use crate::types::{Skin, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Which balance a transfer touches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    /// Main cash balance used for tickets and payouts.
    Primary,
    /// Secondary balance credited by ash insurance.
    Secondary,
}

/// Audit classification of a transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    BetStake,
    BetRefund,
    DrawRefund,
    Payout,
    AshInsurance,
    RepairCost,
}

/// One line of the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub user_id: UserId,
    pub amount: Money,
    pub tx_type: TxType,
    pub currency: Currency,
    /// True for withdrawals, false for deposits.
    pub debit: bool,
    pub at: DateTime<Utc>,
}

/// External ledger interface consumed by the game core.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Atomically removes funds, logging a transaction record. Fails without
    /// side effects if the balance is insufficient.
    async fn withdraw(
        &self,
        user: &str,
        amount: Money,
        tx_type: TxType,
        currency: Currency,
    ) -> Result<(), LedgerError>;

    /// Atomically adds funds, logging a transaction record.
    async fn deposit(
        &self,
        user: &str,
        amount: Money,
        tx_type: TxType,
        currency: Currency,
    ) -> Result<(), LedgerError>;

    async fn balance(&self, user: &str, currency: Currency) -> Result<Money, LedgerError>;

    async fn user_exists(&self, user: &str) -> bool;

    /// Current equipped skin.
    async fn skin(&self, user: &str) -> Result<Skin, LedgerError>;

    /// Applies integrity damage to the equipped skin. Returns true if the
    /// skin burned on this hit.
    async fn damage_skin(&self, user: &str, amount: u32) -> Result<bool, LedgerError>;

    /// Restores integrity for a cost withdrawn from the primary balance.
    async fn repair_skin(&self, user: &str, amount: u32, cost: Money) -> Result<(), LedgerError>;
}

#[derive(Debug, Clone)]
struct Account {
    primary: Money,
    secondary: Money,
    skin: Skin,
}

/// Reference in-memory ledger used by the binary and the test suite.
#[derive(Default)]
pub struct MemoryLedger {
    accounts: DashMap<UserId, Account>,
    audit: Mutex<Vec<AuditRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user with a primary balance and an equipped skin.
    pub fn add_user(&self, user: &str, primary: Money, skin: Skin) {
        self.accounts.insert(
            user.to_string(),
            Account {
                primary,
                secondary: Money::ZERO,
                skin,
            },
        );
    }

    /// Snapshot of the audit trail, oldest first.
    pub fn audit_trail(&self) -> Vec<AuditRecord> {
        self.audit.lock().expect("audit lock poisoned").clone()
    }

    fn record(&self, user: &str, amount: Money, tx_type: TxType, currency: Currency, debit: bool) {
        self.audit.lock().expect("audit lock poisoned").push(AuditRecord {
            user_id: user.to_string(),
            amount,
            tx_type,
            currency,
            debit,
            at: Utc::now(),
        });
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn withdraw(
        &self,
        user: &str,
        amount: Money,
        tx_type: TxType,
        currency: Currency,
    ) -> Result<(), LedgerError> {
        let mut account = self
            .accounts
            .get_mut(user)
            .ok_or_else(|| LedgerError::UnknownUser(user.to_string()))?;
        let balance = match currency {
            Currency::Primary => &mut account.primary,
            Currency::Secondary => &mut account.secondary,
        };
        // The storage-layer check: rejects even if the caller pre-checked,
        // guarding against racing withdraws for the same user.
        *balance = balance
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::InsufficientFunds {
                user: user.to_string(),
            })?;
        drop(account);
        self.record(user, amount, tx_type, currency, true);
        Ok(())
    }

    async fn deposit(
        &self,
        user: &str,
        amount: Money,
        tx_type: TxType,
        currency: Currency,
    ) -> Result<(), LedgerError> {
        let mut account = self
            .accounts
            .get_mut(user)
            .ok_or_else(|| LedgerError::UnknownUser(user.to_string()))?;
        match currency {
            Currency::Primary => account.primary += amount,
            Currency::Secondary => account.secondary += amount,
        }
        drop(account);
        self.record(user, amount, tx_type, currency, false);
        Ok(())
    }

    async fn balance(&self, user: &str, currency: Currency) -> Result<Money, LedgerError> {
        let account = self
            .accounts
            .get(user)
            .ok_or_else(|| LedgerError::UnknownUser(user.to_string()))?;
        Ok(match currency {
            Currency::Primary => account.primary,
            Currency::Secondary => account.secondary,
        })
    }

    async fn user_exists(&self, user: &str) -> bool {
        self.accounts.contains_key(user)
    }

    async fn skin(&self, user: &str) -> Result<Skin, LedgerError> {
        self.accounts
            .get(user)
            .map(|a| a.skin.clone())
            .ok_or_else(|| LedgerError::UnknownUser(user.to_string()))
    }

    async fn damage_skin(&self, user: &str, amount: u32) -> Result<bool, LedgerError> {
        let mut account = self
            .accounts
            .get_mut(user)
            .ok_or_else(|| LedgerError::UnknownUser(user.to_string()))?;
        Ok(account.skin.take_damage(amount))
    }

    async fn repair_skin(&self, user: &str, amount: u32, cost: Money) -> Result<(), LedgerError> {
        self.withdraw(user, cost, TxType::RepairCost, Currency::Primary)
            .await?;
        let mut account = self
            .accounts
            .get_mut(user)
            .ok_or_else(|| LedgerError::UnknownUser(user.to_string()))?;
        if !account.skin.repair(amount) {
            drop(account);
            // Burned skins cannot be repaired; hand the cost back.
            self.deposit(user, cost, TxType::BetRefund, Currency::Primary)
                .await?;
            return Err(LedgerError::NoSkinEquipped(user.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(user: &str, balance: Money) -> MemoryLedger {
        let ledger = MemoryLedger::new();
        ledger.add_user(user, balance, Skin::starter());
        ledger
    }

    #[tokio::test]
    async fn test_withdraw_deposit_roundtrip() {
        let ledger = ledger_with("alice", Money::from_whole(10));
        ledger
            .withdraw("alice", Money::from_whole(3), TxType::BetStake, Currency::Primary)
            .await
            .unwrap();
        ledger
            .deposit("alice", Money::from_whole(1), TxType::Payout, Currency::Primary)
            .await
            .unwrap();
        let balance = ledger.balance("alice", Currency::Primary).await.unwrap();
        assert_eq!(balance, Money::from_whole(8));
        assert_eq!(ledger.audit_trail().len(), 2);
    }

    #[tokio::test]
    async fn test_overdraw_rejected_without_mutation() {
        let ledger = ledger_with("bob", Money::from_whole(1));
        let err = ledger
            .withdraw("bob", Money::from_whole(2), TxType::BetStake, Currency::Primary)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(
            ledger.balance("bob", Currency::Primary).await.unwrap(),
            Money::from_whole(1)
        );
        assert!(ledger.audit_trail().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let ledger = MemoryLedger::new();
        let err = ledger
            .deposit("ghost", Money::from_whole(1), TxType::Payout, Currency::Primary)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::UnknownUser("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_damage_reports_burn_once() {
        let ledger = ledger_with("carol", Money::from_whole(1));
        assert!(!ledger.damage_skin("carol", 90).await.unwrap());
        assert!(ledger.damage_skin("carol", 10).await.unwrap());
        // Terminal: a burned skin never burns again.
        assert!(!ledger.damage_skin("carol", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_repair_burned_skin_refunds_cost() {
        let ledger = ledger_with("dave", Money::from_whole(10));
        ledger.damage_skin("dave", 100).await.unwrap();
        let err = ledger
            .repair_skin("dave", 50, Money::from_whole(2))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NoSkinEquipped(_)));
        assert_eq!(
            ledger.balance("dave", Currency::Primary).await.unwrap(),
            Money::from_whole(10)
        );
    }
}
