//! Core records persisted by the checkout workflow
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    /// Builds a timestamp from calendar fields, `None` when the fields do not name a valid instant
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A catalog entry. Prices are whole cents.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Product {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub price_cents: u64,
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price_cents: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price_cents,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct CartItem {
    #[n(0)]
    pub product_id: String,
    #[n(1)]
    pub quantity: u32, // never stored as zero, the line is dropped instead
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    #[n(0)]
    pub user_id: String,
    #[n(1)]
    pub items: Vec<CartItem>,
    #[n(2)]
    pub applied_coupon: Option<String>,
}

impl Cart {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            items: vec![],
            applied_coupon: None,
        }
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Single-use discount. Moves from unused to used exactly once and never back.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Coupon {
    #[n(0)]
    pub code: String,
    #[n(1)]
    pub discount_percent: u8,
    #[n(2)]
    pub created_at: TimeStamp,
    #[n(3)]
    pub used: bool,
    #[n(4)]
    pub issued_for_order_id: Option<String>,
    #[n(5)]
    pub issued_to_user_id: Option<String>,
    #[n(6)]
    pub used_by_order_id: Option<String>,
    #[n(7)]
    pub expires_at: Option<TimeStamp>,
    #[n(8)]
    pub used_at: Option<TimeStamp>,
    #[n(9)]
    pub claimed_by: Option<String>, // user whose checkout is pricing with this coupon
    #[n(10)]
    pub claimed_until: Option<TimeStamp>,
}

impl Coupon {
    /// A promotional coupon not tied to any order
    pub fn promotional(
        code: impl Into<String>,
        discount_percent: u8,
        created_at: TimeStamp,
        expires_at: Option<TimeStamp>,
    ) -> Self {
        Self {
            code: code.into(),
            discount_percent,
            created_at,
            used: false,
            issued_for_order_id: None,
            issued_to_user_id: None,
            used_by_order_id: None,
            expires_at,
            used_at: None,
            claimed_by: None,
            claimed_until: None,
        }
    }
    pub fn is_expired_at(&self, now: TimeStamp) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }
    pub fn is_usable_at(&self, now: TimeStamp) -> bool {
        !self.used && !self.is_expired_at(now)
    }
    /// Whether a checkout other than `user_id`'s holds a live claim on this coupon
    pub fn is_claimed_by_other_at(&self, user_id: &str, now: TimeStamp) -> bool {
        self.claimed_until.is_some_and(|until| now < until)
            && self.claimed_by.as_deref() != Some(user_id)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    #[n(0)]
    Success,
    #[n(1)]
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Success => "SUCCESS",
            OrderStatus::Failed => "FAILED",
        }
    }
}

// immutable once appended to the ledger
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Order {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub order_number: u64,
    #[n(2)]
    pub user_id: String,
    #[n(3)]
    pub items: Vec<CartItem>,
    #[n(4)]
    pub subtotal_cents: u64,
    #[n(5)]
    pub discount_cents: u64,
    #[n(6)]
    pub total_cents: u64,
    #[n(7)]
    pub coupon_code_applied: Option<String>,
    #[n(8)]
    pub created_at: TimeStamp,
    #[n(9)]
    pub status: OrderStatus,
}

/// Everything about an order except what the ledger assigns on append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub order_number: u64,
    pub user_id: String,
    pub items: Vec<CartItem>,
    pub subtotal_cents: u64,
    pub discount_cents: u64,
    pub total_cents: u64,
    pub coupon_code_applied: Option<String>,
    pub status: OrderStatus,
}
