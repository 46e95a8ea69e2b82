//! Service layer API consumed by the transport layer
use std::sync::Arc;

use sled::Db;
use tracing::info;

use super::cart::CartStore;
use super::catalog::Catalog;
use super::checkout::{CheckoutOrchestrator, CheckoutReceipt};
use super::clock::{Clock, SystemClock};
use super::config::CheckoutConfig;
use super::coupon::{CouponRegistry, CouponValidation, InvalidReason};
use super::error::{CartError, CheckoutError, CouponError};
use super::ledger::OrderLedger;
use super::lock::{CheckoutLock, StoreLockManager};
use super::report::SalesReport;
use super::snapshot::CartSnapshotReader;
use super::types::{Cart, Coupon, Order, Product};

/// Answer to an apply-coupon request. Checkout validates the code again regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyCouponOutcome {
    pub valid: bool,
    pub cart: Cart,
    pub discount_percent: Option<u8>,
    pub rejection: Option<InvalidReason>,
}

pub struct ShopService {
    catalog: Catalog,
    carts: CartStore,
    coupons: CouponRegistry,
    ledger: OrderLedger,
    checkout: CheckoutOrchestrator,
}

impl ShopService {
    /// Wire every component over one database, coordinating checkouts through lease
    /// records stored in that same database
    pub fn new(instance: Arc<Db>, config: &CheckoutConfig, clock: Arc<dyn Clock>) -> Self {
        let locks = Arc::new(StoreLockManager::new(
            instance.clone(),
            clock.clone(),
            config.lock_retry,
        ));
        Self::with_lock(instance, config, clock, locks)
    }

    pub fn with_lock(
        instance: Arc<Db>,
        config: &CheckoutConfig,
        clock: Arc<dyn Clock>,
        locks: Arc<dyn CheckoutLock>,
    ) -> Self {
        let catalog = Catalog::new(instance.clone());
        let carts = CartStore::new(instance.clone());
        let coupons =
            CouponRegistry::new(instance.clone(), clock.clone(), config.milestone_percent);
        let ledger = OrderLedger::new(instance, clock);
        let checkout = CheckoutOrchestrator::new(
            carts.clone(),
            CartSnapshotReader::new(carts.clone(), catalog.clone()),
            coupons.clone(),
            ledger.clone(),
            locks,
            config,
        );

        Self {
            catalog,
            carts,
            coupons,
            ledger,
            checkout,
        }
    }

    /// Open the database at `config.db_path` with the system clock
    pub fn open(config: &CheckoutConfig) -> anyhow::Result<Self> {
        let db = sled::open(&config.db_path)?;
        info!(path = %config.db_path.display(), "checkout store opened");
        Ok(Self::new(Arc::new(db), config, Arc::new(SystemClock)))
    }

    pub fn seed_catalog(&self, products: &[Product]) -> anyhow::Result<usize> {
        let added = self.catalog.seed(products)?;
        info!(added, total = products.len(), "catalog seeded");
        Ok(added)
    }

    pub fn list_products(&self) -> anyhow::Result<Vec<Product>> {
        self.catalog.list_products()
    }

    pub fn cart(&self, user_id: &str) -> anyhow::Result<Cart> {
        self.carts.get_cart(user_id)
    }

    /// Add a product to the cart. Unknown products are rejected up front.
    pub fn add_item(
        &self,
        user_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> Result<Cart, CartError> {
        if self.catalog.get_product(product_id)?.is_none() {
            return Err(CartError::ProductNotFound(product_id.to_string()));
        }
        self.carts.add_item(user_id, product_id, quantity)
    }

    pub fn remove_item(&self, user_id: &str, product_id: &str) -> anyhow::Result<Cart> {
        self.carts.remove_item(user_id, product_id)
    }

    pub fn reduce_item(
        &self,
        user_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> Result<Cart, CartError> {
        self.carts.reduce_item(user_id, product_id, quantity)
    }

    /// Validate a code and, when valid, attach it to the user's cart. An invalid code
    /// leaves the cart as it was.
    pub fn apply_coupon(&self, user_id: &str, code: &str) -> anyhow::Result<ApplyCouponOutcome> {
        let code = code.trim();
        let validation = if code.is_empty() {
            CouponValidation::Invalid(InvalidReason::NotFound)
        } else {
            self.coupons.validate(code)?
        };

        match validation {
            CouponValidation::Valid { discount_percent } => Ok(ApplyCouponOutcome {
                valid: true,
                cart: self.carts.set_applied_coupon(user_id, Some(code.to_string()))?,
                discount_percent: Some(discount_percent),
                rejection: None,
            }),
            CouponValidation::Invalid(reason) => Ok(ApplyCouponOutcome {
                valid: false,
                cart: self.carts.get_cart(user_id)?,
                discount_percent: None,
                rejection: Some(reason),
            }),
        }
    }

    pub fn available_coupons(&self) -> anyhow::Result<Vec<Coupon>> {
        self.coupons.list_available()
    }

    pub fn create_coupon(&self, coupon: Coupon) -> Result<Coupon, CouponError> {
        self.coupons.create(coupon)
    }

    pub fn coupon(&self, code: &str) -> anyhow::Result<Option<Coupon>> {
        self.coupons.lookup(code)
    }

    pub fn checkout(&self, user_id: &str) -> Result<CheckoutReceipt, CheckoutError> {
        self.checkout.checkout(user_id)
    }

    pub fn orders(&self) -> anyhow::Result<Vec<Order>> {
        self.ledger.list_all()
    }

    /// Last order number handed out, including numbers whose order was never written
    pub fn current_order_number(&self) -> anyhow::Result<u64> {
        self.ledger.current_sequence_number()
    }

    pub fn sales_report(&self) -> anyhow::Result<SalesReport> {
        Ok(SalesReport::from_orders(self.ledger.list_all()?))
    }
}
