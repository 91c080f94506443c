//! Margin accounts and the shared collateral ledger.
//!
//! Each account holds a balance and a locked portion. Perpetual margin, option
//! writer collateral and funding settlement all move through this one ledger, and
//! `locked <= balance` must hold after every call.

use crate::types::{AccountId, Hbar, ParseEnumError, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarginMode {
    /// Positions share the account's equity
    Cross,
    /// Each position is ring-fenced by its own margin
    Isolated,
}

impl Default for MarginMode {
    fn default() -> Self {
        Self::Cross
    }
}

impl FromStr for MarginMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CROSS" => Ok(MarginMode::Cross),
            "ISOLATED" => Ok(MarginMode::Isolated),
            _ => Err(ParseEnumError { kind: "margin mode", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginAccount {
    pub account_id: AccountId,
    pub balance_hbar: Hbar,
    pub locked_hbar: Hbar,
    pub mode: MarginMode,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl MarginAccount {
    pub fn new(account_id: AccountId, timestamp: Timestamp) -> Self {
        Self {
            account_id,
            balance_hbar: Hbar::zero(),
            locked_hbar: Hbar::zero(),
            mode: MarginMode::default(),
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    pub fn available(&self) -> Hbar {
        self.balance_hbar.sub(self.locked_hbar).floor_zero()
    }
}

fn require_positive(amount: Hbar) -> Result<(), MarginError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(MarginError::InvalidAmount(amount.value()))
    }
}

fn require_id(account_id: &AccountId) -> Result<(), MarginError> {
    if account_id.is_empty() {
        Err(MarginError::EmptyAccountId)
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarginLedger {
    accounts: BTreeMap<AccountId, MarginAccount>,
}

impl MarginLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_accounts(accounts: BTreeMap<AccountId, MarginAccount>) -> Self {
        Self { accounts }
    }

    pub fn accounts(&self) -> &BTreeMap<AccountId, MarginAccount> {
        &self.accounts
    }

    pub fn get(&self, account_id: &AccountId) -> Option<&MarginAccount> {
        self.accounts.get(account_id)
    }

    fn get_mut(&mut self, account_id: &AccountId) -> Result<&mut MarginAccount, MarginError> {
        self.accounts
            .get_mut(account_id)
            .ok_or_else(|| MarginError::AccountNotFound(account_id.clone()))
    }

    pub fn available(&self, account_id: &AccountId) -> Hbar {
        self.accounts
            .get(account_id)
            .map(MarginAccount::available)
            .unwrap_or_else(Hbar::zero)
    }

    /// Credits the balance, creating the account on first deposit.
    pub fn deposit(&mut self, account_id: &AccountId, amount: Hbar, now: Timestamp) -> Result<&MarginAccount, MarginError> {
        require_id(account_id)?;
        require_positive(amount)?;
        let account = self
            .accounts
            .entry(account_id.clone())
            .or_insert_with(|| MarginAccount::new(account_id.clone(), now));
        account.balance_hbar = account.balance_hbar.add(amount);
        account.updated_at = now;
        Ok(account)
    }

    pub fn withdraw(&mut self, account_id: &AccountId, amount: Hbar, now: Timestamp) -> Result<&MarginAccount, MarginError> {
        require_id(account_id)?;
        require_positive(amount)?;
        let account = self.get_mut(account_id)?;
        let available = account.available();
        if amount > available {
            return Err(MarginError::InsufficientMargin {
                account_id: account_id.clone(),
                requested: amount,
                available,
            });
        }
        account.balance_hbar = account.balance_hbar.sub(amount);
        account.updated_at = now;
        Ok(account)
    }

    pub fn lock(&mut self, account_id: &AccountId, amount: Hbar, now: Timestamp) -> Result<&MarginAccount, MarginError> {
        require_id(account_id)?;
        require_positive(amount)?;
        let account = self.get_mut(account_id)?;
        let available = account.available();
        if amount > available {
            return Err(MarginError::InsufficientMargin {
                account_id: account_id.clone(),
                requested: amount,
                available,
            });
        }
        account.locked_hbar = account.locked_hbar.add(amount);
        account.updated_at = now;
        Ok(account)
    }

    /// Unlocks collateral. Over-release floors at zero.
    pub fn release(&mut self, account_id: &AccountId, amount: Hbar, now: Timestamp) -> Result<&MarginAccount, MarginError> {
        require_id(account_id)?;
        require_positive(amount)?;
        let account = self.get_mut(account_id)?;
        account.locked_hbar = account.locked_hbar.sub(amount).floor_zero();
        account.updated_at = now;
        Ok(account)
    }

    /// Applies a signed pnl or funding amount to the balance, floored at zero.
    /// Returns the part of a debit that could not be collected.
    pub fn apply_balance_delta(
        &mut self,
        account_id: &AccountId,
        delta: Hbar,
        now: Timestamp,
    ) -> Result<Hbar, MarginError> {
        let account = self.get_mut(account_id)?;
        let target = account.balance_hbar.add(delta);
        let shortfall = target.negate().floor_zero();
        account.balance_hbar = target.floor_zero();
        // a debit may eat into locked collateral; keep locked <= balance
        if account.locked_hbar > account.balance_hbar {
            account.locked_hbar = account.balance_hbar;
        }
        account.updated_at = now;
        Ok(shortfall)
    }

    /// Moves free balance from one account to another (premium payments).
    pub fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: Hbar,
        now: Timestamp,
    ) -> Result<(), MarginError> {
        require_positive(amount)?;
        let available = self.get_mut(from)?.available();
        if amount > available {
            return Err(MarginError::InsufficientMargin {
                account_id: from.clone(),
                requested: amount,
                available,
            });
        }
        // credit side may not exist yet
        self.accounts
            .entry(to.clone())
            .or_insert_with(|| MarginAccount::new(to.clone(), now));

        let payer = self.get_mut(from)?;
        payer.balance_hbar = payer.balance_hbar.sub(amount);
        payer.updated_at = now;
        let payee = self.get_mut(to)?;
        payee.balance_hbar = payee.balance_hbar.add(amount);
        payee.updated_at = now;
        Ok(())
    }

    /// Switches margin mode. The caller reports how many OPEN positions exist.
    pub fn set_mode(
        &mut self,
        account_id: &AccountId,
        mode: MarginMode,
        open_positions: usize,
        now: Timestamp,
    ) -> Result<&MarginAccount, MarginError> {
        require_id(account_id)?;
        if open_positions > 0 {
            return Err(MarginError::ModeChangeWithOpenPositions {
                account_id: account_id.clone(),
                open_positions,
            });
        }
        let account = self.get_mut(account_id)?;
        account.mode = mode;
        account.updated_at = now;
        Ok(account)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarginError {
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("Account id is empty")]
    EmptyAccountId,

    #[error("Margin account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Insufficient margin on {account_id}: requested {requested}, available {available}")]
    InsufficientMargin {
        account_id: AccountId,
        requested: Hbar,
        available: Hbar,
    },

    #[error("Cannot change margin mode of {account_id} with {open_positions} open positions")]
    ModeChangeWithOpenPositions { account_id: AccountId, open_positions: usize },

    #[error(transparent)]
    InvalidMode(#[from] ParseEnumError),
}
