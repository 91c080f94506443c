//! Margin ledger operations.

use super::core::Engine;
use crate::account::{MarginAccount, MarginError, MarginMode};
use crate::derivative::Derivative;
use crate::events::EventPayload;
use crate::margin::{compute_initial_margin, compute_maintenance_margin, effective_equity};
use crate::position::PerpError;
use crate::types::{AccountId, Hbar, Leverage};
use rust_decimal::Decimal;
use tracing::info;

impl Engine {
    pub fn deposit_margin(&mut self, account_id: &AccountId, amount: Hbar) -> Result<MarginAccount, MarginError> {
        let account = self.ledger.deposit(account_id, amount, self.current_time)?.clone();
        info!(account = %account_id, amount = %amount.value(), balance = %account.balance_hbar.value(), "margin deposited");
        self.emit_event(EventPayload::MarginDeposited {
            account_id: account_id.clone(),
            amount,
            balance: account.balance_hbar,
        });
        Ok(account)
    }

    pub fn withdraw_margin(&mut self, account_id: &AccountId, amount: Hbar) -> Result<MarginAccount, MarginError> {
        let account = self.ledger.withdraw(account_id, amount, self.current_time)?.clone();
        info!(account = %account_id, amount = %amount.value(), balance = %account.balance_hbar.value(), "margin withdrawn");
        self.emit_event(EventPayload::MarginWithdrawn {
            account_id: account_id.clone(),
            amount,
            balance: account.balance_hbar,
        });
        Ok(account)
    }

    pub fn lock_margin(&mut self, account_id: &AccountId, amount: Hbar) -> Result<MarginAccount, MarginError> {
        let account = self.ledger.lock(account_id, amount, self.current_time)?.clone();
        self.emit_event(EventPayload::MarginLocked {
            account_id: account_id.clone(),
            amount,
            locked: account.locked_hbar,
        });
        Ok(account)
    }

    pub fn release_margin(&mut self, account_id: &AccountId, amount: Hbar) -> Result<MarginAccount, MarginError> {
        let account = self.ledger.release(account_id, amount, self.current_time)?.clone();
        self.emit_event(EventPayload::MarginReleased {
            account_id: account_id.clone(),
            amount,
            locked: account.locked_hbar,
        });
        Ok(account)
    }

    pub fn set_margin_mode(&mut self, account_id: &AccountId, mode: MarginMode) -> Result<MarginAccount, MarginError> {
        let open_positions = self.open_positions_for(account_id).count();
        let account = self
            .ledger
            .set_mode(account_id, mode, open_positions, self.current_time)?
            .clone();
        info!(account = %account_id, ?mode, "margin mode changed");
        self.emit_event(EventPayload::MarginModeChanged {
            account_id: account_id.clone(),
            mode,
        });
        Ok(account)
    }

    pub fn get_margin_account(&self, account_id: &AccountId) -> Option<&MarginAccount> {
        self.ledger.get(account_id)
    }

    pub fn margin_accounts(&self) -> impl Iterator<Item = &MarginAccount> {
        self.ledger.accounts().values()
    }

    pub fn available_margin(&self, account_id: &AccountId) -> Hbar {
        self.ledger.available(account_id)
    }

    /// Balance plus unrealized pnl of OPEN cross positions, as of their last refresh.
    pub fn get_effective_equity(&self, account_id: &AccountId) -> Result<Hbar, MarginError> {
        let account = self
            .ledger
            .get(account_id)
            .ok_or_else(|| MarginError::AccountNotFound(account_id.clone()))?;
        Ok(effective_equity(account.balance_hbar, self.open_positions_for(account_id)))
    }

    pub fn compute_initial_margin(&self, size: Hbar, leverage: Decimal) -> Result<Hbar, PerpError> {
        let leverage = Leverage::new(leverage).ok_or(PerpError::InvalidLeverage(leverage))?;
        Ok(compute_initial_margin(size, leverage))
    }

    pub fn compute_maintenance_margin(&self, size: Hbar, leverage: Decimal) -> Result<Hbar, PerpError> {
        let leverage = Leverage::new(leverage).ok_or(PerpError::InvalidLeverage(leverage))?;
        Ok(compute_maintenance_margin(size, leverage))
    }

    pub(super) fn open_positions_for<'a>(
        &'a self,
        account_id: &'a AccountId,
    ) -> impl Iterator<Item = &'a crate::position::PerpetualPosition> + 'a {
        self.derivatives
            .values()
            .filter_map(Derivative::as_perpetual)
            .filter(move |p| p.is_open() && &p.account_id == account_id)
    }
}
