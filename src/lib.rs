//! Shopping-cart checkout backed by an embedded sled store.
//!
//! [`ShopService`] is the entry point. Checkouts for the same user are serialized by
//! a leased lock, every order takes a number from one global sequence, and every
//! fifth order (by default) mints a single-use reward coupon.

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod clock;
pub mod config;
pub mod coupon;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod pricing;
pub mod report;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod utils;

pub use checkout::{CheckoutOrchestrator, CheckoutReceipt};
pub use config::CheckoutConfig;
pub use coupon::{CouponRegistry, CouponValidation, InvalidReason};
pub use error::{CheckoutError, ErrorKind};
pub use lock::{CheckoutLock, InMemoryLockManager, RetryPolicy, StoreLockManager};
pub use service::{ApplyCouponOutcome, ShopService};
pub use types::{Cart, CartItem, Coupon, Order, OrderStatus, Product, TimeStamp};
