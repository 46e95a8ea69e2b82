//! Checkout orchestration: turns a user's cart into an immutable order
//!
//! ```text
//! Idle -> LockAcquired -> SnapshotTaken -> Priced -> Numbered -> Recorded
//!      -> CouponSettled -> CartCleared -> Done
//! ```
//!
//! Any state may end in `Failed`. The per-user lock is released exactly once on the
//! way out, whatever the outcome. Appending to the ledger is the commit point: before
//! it nothing is visible to other callers except a consumed sequence number, after it
//! the order stands even if the remaining steps fail.
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn};

use super::cart::CartStore;
use super::config::CheckoutConfig;
use super::coupon::{CouponRegistry, CouponValidation};
use super::error::{CheckoutError, CouponError, ErrorKind, LockError};
use super::ledger::OrderLedger;
use super::lock::CheckoutLock;
use super::pricing::Totals;
use super::snapshot::CartSnapshotReader;
use super::types::{Coupon, Order, OrderDraft, OrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckoutState {
    Idle,
    LockAcquired,
    SnapshotTaken,
    Priced,
    Numbered,
    Recorded,
    CouponSettled,
    CartCleared,
    Done,
    Failed(ErrorKind),
}

/// What a successful checkout hands back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutReceipt {
    pub order: Order,
    pub generated_coupon: Option<Coupon>,
}

/// Whether `order_number` earns a milestone coupon
pub fn is_milestone(order_number: u64, interval: u64) -> bool {
    interval > 0 && order_number % interval == 0
}

#[derive(Debug, Clone)]
struct AppliedCoupon {
    code: String,
    discount_percent: u8,
}

pub struct CheckoutOrchestrator {
    carts: CartStore,
    snapshots: CartSnapshotReader,
    coupons: CouponRegistry,
    ledger: OrderLedger,
    locks: Arc<dyn CheckoutLock>,
    lock_lease: Duration,
    milestone_interval: u64,
}

impl CheckoutOrchestrator {
    pub fn new(
        carts: CartStore,
        snapshots: CartSnapshotReader,
        coupons: CouponRegistry,
        ledger: OrderLedger,
        locks: Arc<dyn CheckoutLock>,
        config: &CheckoutConfig,
    ) -> Self {
        Self {
            carts,
            snapshots,
            coupons,
            ledger,
            locks,
            lock_lease: config.lock_lease,
            milestone_interval: config.milestone_interval,
        }
    }

    pub fn checkout(&self, user_id: &str) -> Result<CheckoutReceipt, CheckoutError> {
        if user_id.trim().is_empty() {
            return Err(CheckoutError::MissingUserId);
        }
        let span = info_span!("checkout", user_id);
        let _entered = span.enter();

        let mut state = CheckoutState::Idle;
        let handle = match self.locks.acquire(user_id, self.lock_lease) {
            Ok(handle) => handle,
            Err(LockError::Unavailable(_)) => {
                warn!("checkout already in progress");
                return Err(CheckoutError::LockUnavailable(user_id.to_string()));
            }
            Err(err) => return Err(CheckoutError::Internal(err.into())),
        };
        advance(&mut state, CheckoutState::LockAcquired);

        let outcome = self.run_locked(user_id, &mut state);

        match self.locks.release(handle) {
            Ok(()) => debug!("checkout lock released"),
            // the order, if any, is already final; a late release cannot undo it
            Err(LockError::Lost(_)) => error!("checkout lease expired before release"),
            Err(err) => error!(error = %err, "failed to release checkout lock"),
        }

        match &outcome {
            Ok(receipt) => {
                advance(&mut state, CheckoutState::Done);
                info!(
                    order_id = %receipt.order.id,
                    order_number = receipt.order.order_number,
                    total_cents = receipt.order.total_cents,
                    "checkout complete"
                );
            }
            Err(err) => {
                advance(&mut state, CheckoutState::Failed(err.kind()));
                match err {
                    CheckoutError::Internal(_) | CheckoutError::ProductNotFound(_) => {
                        error!(error = %err, "checkout failed")
                    }
                    _ => warn!(error = %err, "checkout rejected"),
                }
            }
        }
        outcome
    }

    fn run_locked(
        &self,
        user_id: &str,
        state: &mut CheckoutState,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let priced = self.snapshots.snapshot(user_id)?;
        advance(state, CheckoutState::SnapshotTaken);

        let applied = self.claim_coupon(priced.cart.applied_coupon.as_deref(), user_id)?;
        let totals = Totals::compute(
            priced.subtotal_cents,
            applied.as_ref().map(|coupon| coupon.discount_percent),
        );
        advance(state, CheckoutState::Priced);

        let draft = OrderDraft {
            order_number: 0,
            user_id: user_id.to_string(),
            items: priced.cart.items,
            subtotal_cents: totals.subtotal_cents,
            discount_cents: totals.discount_cents,
            total_cents: totals.total_cents,
            coupon_code_applied: applied.as_ref().map(|coupon| coupon.code.clone()),
            status: OrderStatus::Success,
        };
        let order = match self.number_and_record(draft, state) {
            Ok(order) => order,
            Err(err) => {
                if let Some(coupon) = &applied {
                    self.release_coupon(&coupon.code, user_id);
                }
                return Err(err);
            }
        };

        if let Some(coupon) = &applied {
            self.consume_coupon(&coupon.code, &order.id, user_id);
        }
        let generated_coupon = if is_milestone(order.order_number, self.milestone_interval) {
            self.issue_milestone(&order.id, user_id)
        } else {
            None
        };
        advance(state, CheckoutState::CouponSettled);

        self.carts.clear_cart(user_id)?;
        advance(state, CheckoutState::CartCleared);

        Ok(CheckoutReceipt {
            order,
            generated_coupon,
        })
    }

    // the number is spent as soon as it is taken, whether or not the order lands
    fn number_and_record(
        &self,
        mut draft: OrderDraft,
        state: &mut CheckoutState,
    ) -> Result<Order, CheckoutError> {
        draft.order_number = self.ledger.next_sequence_number()?;
        advance(state, CheckoutState::Numbered);

        let order = self.ledger.append(draft)?;
        advance(state, CheckoutState::Recorded);
        info!(order_id = %order.id, order_number = order.order_number, "order recorded");
        Ok(order)
    }

    // an applied coupon that went stale since it was put on the cart costs the discount,
    // not the purchase
    fn claim_coupon(
        &self,
        code: Option<&str>,
        user_id: &str,
    ) -> Result<Option<AppliedCoupon>, CheckoutError> {
        let Some(code) = code else {
            return Ok(None);
        };
        let lease = chrono::Duration::from_std(self.lock_lease).map_err(anyhow::Error::from)?;
        match self.coupons.claim(code, user_id, lease)? {
            CouponValidation::Valid { discount_percent } => Ok(Some(AppliedCoupon {
                code: code.to_string(),
                discount_percent,
            })),
            CouponValidation::Invalid(reason) => {
                warn!(coupon = code, %reason, "dropping discount for coupon that is not usable");
                Ok(None)
            }
        }
    }

    fn release_coupon(&self, code: &str, user_id: &str) {
        if let Err(err) = self.coupons.release_claim(code, user_id) {
            error!(coupon = code, error = %err, "failed to release coupon claim");
        }
    }

    fn consume_coupon(&self, code: &str, order_id: &str, user_id: &str) {
        match self.coupons.mark_used(code, order_id, user_id) {
            Ok(_) => {}
            Err(CouponError::AlreadyUsed(_)) => {
                warn!(coupon = code, order_id, "coupon claim lapsed and another order used it")
            }
            Err(err) => {
                error!(coupon = code, order_id, error = %err, "failed to mark coupon used")
            }
        }
    }

    fn issue_milestone(&self, order_id: &str, user_id: &str) -> Option<Coupon> {
        match self.coupons.issue_milestone_coupon(order_id, user_id) {
            Ok(coupon) => Some(coupon),
            Err(err) => {
                error!(order_id, error = %err, "failed to issue milestone coupon");
                None
            }
        }
    }
}

fn advance(state: &mut CheckoutState, next: CheckoutState) {
    debug!(from = ?*state, to = ?next, "checkout transition");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_fifth_order_is_a_milestone() {
        let milestones: Vec<u64> = (1..=20).filter(|n| is_milestone(*n, 5)).collect();
        assert_eq!(milestones, vec![5, 10, 15, 20]);
    }

    #[test]
    fn zero_interval_never_rewards() {
        assert!(!is_milestone(0, 0));
        assert!(!is_milestone(10, 0));
    }
}
