//! Client-side spend guardrails.
//!
//! A [`SpendPolicy`] is fixed for the session. The [`SpendGuard`] wrapping it
//! owns the only mutable part, the running total, and serializes every
//! check-then-increment so concurrent sends cannot overshoot the ceiling.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::error::PayError;

/// Category entry that allows every category.
pub const ANY_CATEGORY: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendPolicy {
    /// Cumulative ceiling for the session.
    pub max_spend: Amount,
    /// Categories payable without manual approval. Stored lowercase.
    pub allowed_categories: BTreeSet<String>,
}

impl SpendPolicy {
    pub fn new<I, S>(max_spend: Amount, allowed_categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            max_spend,
            allowed_categories: allowed_categories
                .into_iter()
                .map(|c| c.as_ref().trim().to_ascii_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    pub fn allows_category(&self, category: &str) -> bool {
        self.allowed_categories.contains(ANY_CATEGORY)
            || self
                .allowed_categories
                .contains(&category.trim().to_ascii_lowercase())
    }
}

#[derive(Debug, Default)]
struct SpendState {
    spent: Amount,
    reserved: Amount,
}

/// Session spend state. `spent` never decreases for the guard's lifetime.
#[derive(Debug)]
pub struct SpendGuard {
    policy: SpendPolicy,
    state: Mutex<SpendState>,
}

impl SpendGuard {
    pub fn new(policy: SpendPolicy) -> Self {
        Self::with_spent(policy, Amount::ZERO)
    }

    /// Resume a session that has already spent `spent`.
    pub fn with_spent(policy: SpendPolicy, spent: Amount) -> Self {
        Self {
            policy,
            state: Mutex::new(SpendState {
                spent,
                reserved: Amount::ZERO,
            }),
        }
    }

    pub fn policy(&self) -> &SpendPolicy {
        &self.policy
    }

    pub fn spent(&self) -> Amount {
        self.state().spent
    }

    /// Headroom left once committed and in-flight spending is counted.
    pub fn remaining(&self) -> Amount {
        let state = self.state();
        self.policy
            .max_spend
            .saturating_sub(state.spent)
            .saturating_sub(state.reserved)
    }

    /// Check `price` in `category` against the policy and hold it.
    ///
    /// The hold counts against the ceiling until the returned reservation is
    /// committed (payment went through) or dropped (it did not).
    pub fn reserve(&self, category: &str, price: Amount) -> Result<Reservation<'_>, PayError> {
        if !self.policy.allows_category(category) {
            return Err(PayError::PolicyRejected(format!(
                "category '{category}' not allowed"
            )));
        }
        self.reserve_amount(price)
    }

    /// Hold `price` against the ceiling alone, for callers that never see
    /// the resource category.
    pub fn reserve_amount(&self, price: Amount) -> Result<Reservation<'_>, PayError> {
        let mut state = self.state();
        let projected = state
            .spent
            .checked_add(state.reserved)
            .and_then(|committed| committed.checked_add(price));
        match projected {
            Some(total) if total <= self.policy.max_spend => {
                state.reserved = state.reserved.checked_add(price).unwrap_or(state.reserved);
                Ok(Reservation {
                    guard: self,
                    amount: price,
                    settled: false,
                })
            }
            _ => Err(PayError::PolicyRejected(format!(
                "price {price} would exceed max spend {} (spent {}, in flight {})",
                self.policy.max_spend, state.spent, state.reserved
            ))),
        }
    }

    fn state(&self) -> MutexGuard<'_, SpendState> {
        match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => {
                tracing::error!("spend guard mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// A held slice of the spend ceiling. Dropping it without
/// [`commit`](Self::commit) releases the hold.
#[must_use = "dropping a reservation releases it"]
pub struct Reservation<'a> {
    guard: &'a SpendGuard,
    amount: Amount,
    settled: bool,
}

impl Reservation<'_> {
    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// The payment went through: move the hold into `spent`.
    pub fn commit(mut self) {
        let mut state = self.guard.state();
        state.reserved = state.reserved.saturating_sub(self.amount);
        state.spent = state.spent.checked_add(self.amount).unwrap_or(state.spent);
        self.settled = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let mut state = self.guard.state();
            state.reserved = state.reserved.saturating_sub(self.amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn usdc(s: &str) -> Amount {
        Amount::parse(s, 6).unwrap()
    }

    fn weather_policy() -> SpendPolicy {
        SpendPolicy::new(usdc("1.00"), ["weather"])
    }

    #[test]
    fn test_allowed_category_within_budget() {
        let guard = SpendGuard::new(weather_policy());
        let r = guard.reserve("weather", usdc("0.01")).unwrap();
        assert_eq!(guard.remaining(), usdc("0.99"));
        r.commit();
        assert_eq!(guard.spent(), usdc("0.01"));
        assert_eq!(guard.remaining(), usdc("0.99"));
    }

    #[test]
    fn test_over_budget_rejected() {
        let guard = SpendGuard::with_spent(weather_policy(), usdc("0.99"));
        assert!(matches!(
            guard.reserve("weather", usdc("0.05")),
            Err(PayError::PolicyRejected(_))
        ));
        assert_eq!(guard.spent(), usdc("0.99"));
    }

    #[test]
    fn test_amount_only_reservation_ignores_category() {
        let guard = SpendGuard::new(weather_policy());
        guard.reserve_amount(usdc("0.60")).unwrap().commit();
        assert!(guard.reserve_amount(usdc("0.50")).is_err());
        assert_eq!(guard.spent(), usdc("0.60"));
    }

    #[test]
    fn test_exact_ceiling_is_allowed() {
        let guard = SpendGuard::with_spent(weather_policy(), usdc("0.95"));
        guard.reserve("weather", usdc("0.05")).unwrap().commit();
        assert_eq!(guard.spent(), usdc("1.00"));
        assert!(guard.reserve("weather", usdc("0.000001")).is_err());
    }

    #[test]
    fn test_disallowed_category_rejected() {
        let guard = SpendGuard::new(weather_policy());
        assert!(matches!(
            guard.reserve("trading", usdc("0.01")),
            Err(PayError::PolicyRejected(_))
        ));
    }

    #[test]
    fn test_category_match_is_case_insensitive_and_wildcard() {
        let guard = SpendGuard::new(SpendPolicy::new(usdc("1"), [" Weather "]));
        assert!(guard.reserve("WEATHER", usdc("0.01")).is_ok());

        let open = SpendGuard::new(SpendPolicy::new(usdc("1"), [ANY_CATEGORY]));
        assert!(open.reserve("anything", usdc("0.01")).is_ok());
    }

    #[test]
    fn test_dropped_reservation_releases_hold() {
        let guard = SpendGuard::new(weather_policy());
        {
            let _r = guard.reserve("weather", usdc("0.60")).unwrap();
            assert!(guard.reserve("weather", usdc("0.60")).is_err());
        }
        assert_eq!(guard.spent(), Amount::ZERO);
        assert!(guard.reserve("weather", usdc("0.60")).is_ok());
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_ceiling() {
        let guard = Arc::new(SpendGuard::new(weather_policy()));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let g = guard.clone();
                std::thread::spawn(move || match g.reserve("weather", usdc("0.10")) {
                    Ok(r) => {
                        r.commit();
                        true
                    }
                    Err(_) => false,
                })
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 10);
        assert_eq!(guard.spent(), usdc("1.00"));
    }
}
