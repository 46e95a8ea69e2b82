//! Coupon registry: lookup, validation, single-use consumption and milestone issuance
//!
//! Every coupon lives under `coupon:{code}` and is indexed under `coupons:ids:` in the
//! same transaction that creates it. Claims and consumption are compare-and-swap writes
//! on the coupon key, so two workers can never both create the same code or both price
//! an order with the same coupon.
//!
//! A checkout first claims the coupon it prices with. The claim is a lease: it blocks
//! other checkouts until it lapses, is settled by `mark_used`, or is handed back with
//! `release_claim`. `used` itself only ever moves from false to true.
use std::fmt;
use std::sync::Arc;

use sled::Db;
use tracing::{debug, info};

use super::clock::Clock;
use super::error::CouponError;
use super::store::{self, keys};
use super::types::{Coupon, TimeStamp};
use super::utils::{self, IdGenerator};

/// Fresh codes tried before milestone issuance gives up
pub const MAX_CODE_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidReason {
    NotFound,
    AlreadyUsed,
    Expired,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::NotFound => "COUPON_NOT_FOUND",
            InvalidReason::AlreadyUsed => "COUPON_ALREADY_USED",
            InvalidReason::Expired => "COUPON_EXPIRED",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of checking a code. Invalid coupons are data, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponValidation {
    Valid { discount_percent: u8 },
    Invalid(InvalidReason),
}

impl CouponValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, CouponValidation::Valid { .. })
    }
}

#[derive(Clone)]
pub struct CouponRegistry {
    instance: Arc<Db>,
    clock: Arc<dyn Clock>,
    milestone_percent: u8,
    codes: IdGenerator,
}

impl CouponRegistry {
    pub fn new(instance: Arc<Db>, clock: Arc<dyn Clock>, milestone_percent: u8) -> Self {
        Self {
            instance,
            clock,
            milestone_percent,
            codes: utils::coupon_codes(),
        }
    }

    /// Replace the source of milestone codes
    pub fn with_code_generator(mut self, codes: IdGenerator) -> Self {
        self.codes = codes;
        self
    }

    pub fn lookup(&self, code: &str) -> anyhow::Result<Option<Coupon>> {
        store::load(&self.instance, &keys::coupon(code))
    }

    pub fn validate(&self, code: &str) -> anyhow::Result<CouponValidation> {
        let Some(coupon) = self.lookup(code)? else {
            return Ok(CouponValidation::Invalid(InvalidReason::NotFound));
        };

        let validation = if coupon.used {
            CouponValidation::Invalid(InvalidReason::AlreadyUsed)
        } else if coupon.is_expired_at(self.clock.timestamp()) {
            CouponValidation::Invalid(InvalidReason::Expired)
        } else {
            CouponValidation::Valid {
                discount_percent: coupon.discount_percent,
            }
        };
        Ok(validation)
    }

    /// Register an externally issued coupon. The code must not exist yet.
    pub fn create(&self, coupon: Coupon) -> Result<Coupon, CouponError> {
        if coupon.discount_percent > 100 {
            return Err(CouponError::InvalidPercent(coupon.discount_percent));
        }
        if !self.insert_new(&coupon)? {
            return Err(CouponError::Duplicate(coupon.code));
        }
        info!(code = %coupon.code, percent = coupon.discount_percent, "coupon created");
        Ok(coupon)
    }

    /// Validate `code` and reserve it for `user_id`'s checkout for `lease`, in one
    /// atomic step. A coupon claimed by another live checkout reports `AlreadyUsed`.
    pub fn claim(
        &self,
        code: &str,
        user_id: &str,
        lease: chrono::Duration,
    ) -> anyhow::Result<CouponValidation> {
        let now = self.clock.timestamp();
        let until: TimeStamp = now
            .to_datetime_utc()
            .checked_add_signed(lease)
            .ok_or_else(|| anyhow::anyhow!("claim lease of {lease} is out of range"))?
            .into();
        let claimed = self.swap(code, |coupon| {
            if coupon.used || coupon.is_claimed_by_other_at(user_id, now) {
                return Err(CouponError::AlreadyUsed(code.to_string()));
            }
            if coupon.is_expired_at(now) {
                return Err(CouponError::Expired(code.to_string()));
            }
            coupon.claimed_by = Some(user_id.to_string());
            coupon.claimed_until = Some(until);
            Ok(())
        });

        let validation = match claimed {
            Ok(coupon) => {
                debug!(code, user_id, "coupon claimed");
                CouponValidation::Valid {
                    discount_percent: coupon.discount_percent,
                }
            }
            Err(CouponError::NotFound(_)) => CouponValidation::Invalid(InvalidReason::NotFound),
            Err(CouponError::AlreadyUsed(_)) => {
                CouponValidation::Invalid(InvalidReason::AlreadyUsed)
            }
            Err(CouponError::Expired(_)) => CouponValidation::Invalid(InvalidReason::Expired),
            Err(err) => return Err(err.into()),
        };
        Ok(validation)
    }

    /// Drop `user_id`'s claim without consuming the coupon. A claim held by someone
    /// else, or already gone, is left alone.
    pub fn release_claim(&self, code: &str, user_id: &str) -> Result<(), CouponError> {
        self.swap(code, |coupon| {
            if coupon.claimed_by.as_deref() == Some(user_id) {
                coupon.claimed_by = None;
                coupon.claimed_until = None;
            }
            Ok(())
        })?;
        debug!(code, user_id, "coupon claim released");
        Ok(())
    }

    /// Consume a coupon for an order. A second call on the same code fails with
    /// `AlreadyUsed` and leaves the stored record as the first call wrote it.
    pub fn mark_used(
        &self,
        code: &str,
        order_id: &str,
        user_id: &str,
    ) -> Result<Coupon, CouponError> {
        let now = self.clock.timestamp();
        let coupon = self.swap(code, |coupon| {
            if coupon.used {
                return Err(CouponError::AlreadyUsed(code.to_string()));
            }
            coupon.used = true;
            coupon.used_by_order_id = Some(order_id.to_string());
            coupon.used_at = Some(now);
            coupon.claimed_by = None;
            coupon.claimed_until = None;
            Ok(())
        })?;
        info!(code, order_id, user_id, "coupon consumed");
        Ok(coupon)
    }

    /// Mint the reward coupon for a milestone order
    pub fn issue_milestone_coupon(
        &self,
        order_id: &str,
        user_id: &str,
    ) -> Result<Coupon, CouponError> {
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let mut coupon = Coupon::promotional(
                (self.codes)()?,
                self.milestone_percent,
                self.clock.timestamp(),
                None,
            );
            coupon.issued_for_order_id = Some(order_id.to_string());
            coupon.issued_to_user_id = Some(user_id.to_string());

            if self.insert_new(&coupon)? {
                info!(code = %coupon.code, order_id, user_id, "milestone coupon issued");
                return Ok(coupon);
            }
            debug!(code = %coupon.code, attempt, "coupon code collision");
        }
        Err(CouponError::CodeSpaceExhausted(MAX_CODE_ATTEMPTS))
    }

    /// The current offer: the most recently created coupon that is still usable, if any
    pub fn list_available(&self) -> anyhow::Result<Vec<Coupon>> {
        let now = self.clock.timestamp();
        let mut latest = None;
        for coupon in self.list_all()? {
            if coupon.is_usable_at(now) {
                latest = Some(coupon);
            }
        }
        Ok(latest.into_iter().collect())
    }

    /// Every coupon in creation order
    pub fn list_all(&self) -> anyhow::Result<Vec<Coupon>> {
        let mut coupons = vec![];
        for code in store::scan_index(&self.instance, keys::COUPON_INDEX)? {
            if let Some(coupon) = self.lookup(&code)? {
                coupons.push(coupon);
            }
        }
        Ok(coupons)
    }

    // false when the code is already taken
    fn insert_new(&self, coupon: &Coupon) -> anyhow::Result<bool> {
        store::create_indexed(
            &self.instance,
            &keys::coupon(&coupon.code),
            &minicbor::to_vec(coupon)?,
            keys::COUPON_INDEX,
            &coupon.code,
        )
    }

    // re-read and apply `change` until the compare-and-swap lands; an error from
    // `change` abandons the update without writing
    fn swap<F>(&self, code: &str, change: F) -> Result<Coupon, CouponError>
    where
        F: Fn(&mut Coupon) -> Result<(), CouponError>,
    {
        let key = keys::coupon(code);
        loop {
            let Some(current) = self.instance.get(&key).map_err(anyhow::Error::from)? else {
                return Err(CouponError::NotFound(code.to_string()));
            };
            let mut coupon: Coupon = minicbor::decode(&current).map_err(anyhow::Error::from)?;
            change(&mut coupon)?;
            let next = minicbor::to_vec(&coupon).map_err(anyhow::Error::from)?;

            let swapped = self
                .instance
                .compare_and_swap(&key, Some(current), Some(next))
                .map_err(anyhow::Error::from)?;
            if swapped.is_ok() {
                return Ok(coupon);
            }
            debug!(code, "coupon changed concurrently, retrying");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::TimeStamp;
    use chrono::{DateTime, Duration};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    type Fixture = (TempDir, Arc<ManualClock>, CouponRegistry);

    fn open_registry(name: &str) -> anyhow::Result<Fixture> {
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join(name))?);
        let start = DateTime::from_timestamp(1_735_689_600, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let registry = CouponRegistry::new(db, clock.clone(), 10);
        Ok((temp_dir, clock, registry))
    }

    #[test]
    fn unknown_code_is_not_found() -> anyhow::Result<()> {
        let (_dir, _, registry) = open_registry("coupon_unknown.db")?;

        assert_eq!(
            registry.validate("NOPE")?,
            CouponValidation::Invalid(InvalidReason::NotFound)
        );
        assert!(matches!(
            registry.mark_used("NOPE", "order_x", "user-a"),
            Err(CouponError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn consumed_coupon_reports_already_used() -> anyhow::Result<()> {
        let (_dir, clock, registry) = open_registry("coupon_consumed.db")?;
        registry.create(Coupon::promotional("WELCOME", 15, clock.timestamp(), None))?;

        assert_eq!(
            registry.validate("WELCOME")?,
            CouponValidation::Valid {
                discount_percent: 15
            }
        );

        let used = registry.mark_used("WELCOME", "order_1", "user-a")?;
        assert!(used.used);
        assert_eq!(used.used_by_order_id.as_deref(), Some("order_1"));

        assert_eq!(
            registry.validate("WELCOME")?,
            CouponValidation::Invalid(InvalidReason::AlreadyUsed)
        );
        // second consumption fails cleanly and keeps the first order link
        assert!(matches!(
            registry.mark_used("WELCOME", "order_2", "user-b"),
            Err(CouponError::AlreadyUsed(_))
        ));
        let stored = registry.lookup("WELCOME")?.unwrap();
        assert_eq!(stored.used_by_order_id.as_deref(), Some("order_1"));
        Ok(())
    }

    #[test]
    fn coupon_expires_at_deadline() -> anyhow::Result<()> {
        let (_dir, clock, registry) = open_registry("coupon_expiry.db")?;
        let deadline: TimeStamp = (clock.now() + Duration::hours(1)).into();
        registry.create(Coupon::promotional("HOUR", 20, clock.timestamp(), Some(deadline)))?;

        assert!(registry.validate("HOUR")?.is_valid());

        clock.advance(Duration::hours(1));
        assert_eq!(
            registry.validate("HOUR")?,
            CouponValidation::Invalid(InvalidReason::Expired)
        );
        Ok(())
    }

    #[test]
    fn duplicate_and_out_of_range_coupons_are_rejected() -> anyhow::Result<()> {
        let (_dir, clock, registry) = open_registry("coupon_duplicate.db")?;
        registry.create(Coupon::promotional("TWICE", 5, clock.timestamp(), None))?;

        assert!(matches!(
            registry.create(Coupon::promotional("TWICE", 50, clock.timestamp(), None)),
            Err(CouponError::Duplicate(_))
        ));
        assert!(matches!(
            registry.create(Coupon::promotional("GREEDY", 101, clock.timestamp(), None)),
            Err(CouponError::InvalidPercent(101))
        ));
        assert_eq!(registry.lookup("TWICE")?.map(|c| c.discount_percent), Some(5));
        Ok(())
    }

    #[test]
    fn milestone_coupon_is_linked_and_unused() -> anyhow::Result<()> {
        let (_dir, _, registry) = open_registry("coupon_milestone.db")?;

        let coupon = registry.issue_milestone_coupon("order_5", "user-a")?;

        assert!(coupon.code.starts_with(utils::COUPON_CODE_PREFIX));
        assert_eq!(coupon.discount_percent, 10);
        assert!(!coupon.used);
        assert_eq!(coupon.issued_for_order_id.as_deref(), Some("order_5"));
        assert_eq!(coupon.issued_to_user_id.as_deref(), Some("user-a"));
        assert_eq!(registry.lookup(&coupon.code)?, Some(coupon));
        Ok(())
    }

    #[test]
    fn only_the_latest_usable_coupon_is_offered() -> anyhow::Result<()> {
        let (_dir, clock, registry) = open_registry("coupon_available.db")?;
        assert!(registry.list_available()?.is_empty());

        registry.create(Coupon::promotional("FIRST", 10, clock.timestamp(), None))?;
        registry.create(Coupon::promotional("SECOND", 10, clock.timestamp(), None))?;
        let offer = registry.list_available()?;
        assert_eq!(offer.len(), 1);
        assert_eq!(offer[0].code, "SECOND");

        registry.mark_used("SECOND", "order_1", "user-a")?;
        let offer = registry.list_available()?;
        assert_eq!(offer[0].code, "FIRST");
        assert_eq!(registry.list_all()?.len(), 2);
        Ok(())
    }

    // hands out the scripted codes in order, then repeats the last one
    fn scripted_codes(codes: &[&str]) -> IdGenerator {
        let queue = Mutex::new(codes.iter().map(|c| c.to_string()).collect::<VecDeque<_>>());
        Arc::new(move || {
            let mut queue = queue.lock().unwrap();
            let code = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
            code.ok_or_else(|| anyhow::anyhow!("no scripted codes"))
        })
    }

    #[test]
    fn milestone_code_collision_tries_a_fresh_code() -> anyhow::Result<()> {
        let (_dir, clock, registry) = open_registry("coupon_collision.db")?;
        registry.create(Coupon::promotional("COUPON-TAKEN", 50, clock.timestamp(), None))?;
        let registry =
            registry.with_code_generator(scripted_codes(&["COUPON-TAKEN", "COUPON-FRESH"]));

        let coupon = registry.issue_milestone_coupon("order_5", "user-a")?;

        assert_eq!(coupon.code, "COUPON-FRESH");
        // the existing coupon is untouched
        assert_eq!(registry.lookup("COUPON-TAKEN")?.map(|c| c.discount_percent), Some(50));
        assert_eq!(registry.list_all()?.len(), 2);
        Ok(())
    }

    #[test]
    fn milestone_issue_gives_up_when_every_code_is_taken() -> anyhow::Result<()> {
        let (_dir, clock, registry) = open_registry("coupon_exhausted.db")?;
        registry.create(Coupon::promotional("COUPON-TAKEN", 50, clock.timestamp(), None))?;
        let registry = registry.with_code_generator(scripted_codes(&["COUPON-TAKEN"]));

        assert!(matches!(
            registry.issue_milestone_coupon("order_5", "user-a"),
            Err(CouponError::CodeSpaceExhausted(MAX_CODE_ATTEMPTS))
        ));
        assert_eq!(registry.list_all()?.len(), 1);
        Ok(())
    }

    #[test]
    fn claim_blocks_other_checkouts_until_it_lapses() -> anyhow::Result<()> {
        let (_dir, clock, registry) = open_registry("coupon_claim.db")?;
        registry.create(Coupon::promotional("SHARED", 20, clock.timestamp(), None))?;
        let lease = Duration::seconds(2);

        assert!(registry.claim("SHARED", "user-a", lease)?.is_valid());
        assert_eq!(
            registry.claim("SHARED", "user-b", lease)?,
            CouponValidation::Invalid(InvalidReason::AlreadyUsed)
        );
        // the holder may claim again, for instance on a retried checkout
        assert!(registry.claim("SHARED", "user-a", lease)?.is_valid());

        clock.advance(lease);
        assert!(registry.claim("SHARED", "user-b", lease)?.is_valid());
        Ok(())
    }

    #[test]
    fn released_claim_leaves_the_coupon_unused() -> anyhow::Result<()> {
        let (_dir, clock, registry) = open_registry("coupon_release.db")?;
        registry.create(Coupon::promotional("SHARED", 20, clock.timestamp(), None))?;
        let lease = Duration::seconds(2);

        registry.claim("SHARED", "user-a", lease)?;
        // only the holder can hand the claim back
        registry.release_claim("SHARED", "user-b")?;
        assert!(!registry.claim("SHARED", "user-b", lease)?.is_valid());

        registry.release_claim("SHARED", "user-a")?;
        let coupon = registry.lookup("SHARED")?.unwrap();
        assert!(!coupon.used);
        assert_eq!(coupon.claimed_by, None);
        assert!(registry.claim("SHARED", "user-b", lease)?.is_valid());
        Ok(())
    }

    #[test]
    fn settling_a_claim_consumes_the_coupon() -> anyhow::Result<()> {
        let (_dir, clock, registry) = open_registry("coupon_settle.db")?;
        let deadline: TimeStamp = (clock.now() + Duration::hours(1)).into();
        registry.create(Coupon::promotional("ONCE", 20, clock.timestamp(), Some(deadline)))?;

        registry.claim("ONCE", "user-a", Duration::seconds(2))?;
        let used = registry.mark_used("ONCE", "order_1", "user-a")?;

        assert!(used.used);
        assert_eq!(used.claimed_by, None);
        assert_eq!(
            registry.claim("ONCE", "user-a", Duration::seconds(2))?,
            CouponValidation::Invalid(InvalidReason::AlreadyUsed)
        );

        clock.advance(Duration::hours(2));
        registry.create(Coupon::promotional("LATE", 20, clock.timestamp(), Some(deadline)))?;
        assert_eq!(
            registry.claim("LATE", "user-a", Duration::seconds(2))?,
            CouponValidation::Invalid(InvalidReason::Expired)
        );
        Ok(())
    }
}
