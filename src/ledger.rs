use crate::state::GameState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinOutcome {
    NotAuthenticated,
    /// Today's cap was already reached
    CapReached,
    Credited {
        amount: u64,
        coins: u64,
        daily_earned: u64,
    },
}

/// Gold coin bookkeeping with a daily earning cap.
#[derive(Debug, Clone, Copy)]
pub struct CurrencyLedger {
    daily_cap: u64,
}

impl CurrencyLedger {
    pub fn new(daily_cap: u64) -> Self {
        Self { daily_cap }
    }

    pub fn daily_cap(&self) -> u64 {
        self.daily_cap
    }

    /// Credit up to `amount` coins, never past today's cap. Guests earn nothing.
    pub fn add_coins(&self, state: &mut GameState, amount: u64) -> CoinOutcome {
        if state.user.is_none() {
            log::info!("Coins not awarded: no signed-in user");
            return CoinOutcome::NotAuthenticated;
        }

        let currency = &mut state.currency;
        if currency.daily_earned >= self.daily_cap {
            log::info!("Daily coin cap of {} reached", self.daily_cap);
            return CoinOutcome::CapReached;
        }

        let granted = amount.min(self.daily_cap - currency.daily_earned);
        if granted > 0 {
            currency.coins += granted;
            currency.daily_earned += granted;
            state.currency_sync.mark_dirty();
        }

        CoinOutcome::Credited {
            amount: granted,
            coins: state.currency.coins,
            daily_earned: state.currency.daily_earned,
        }
    }

    /// Zero today's earnings. The balance is untouched.
    pub fn reset_daily(&self, state: &mut GameState) {
        state.currency.daily_earned = 0;
        state.currency_sync.mark_dirty();
    }
}
