//! Resolves a cart against live catalog prices
use anyhow::anyhow;

use super::cart::CartStore;
use super::catalog::Catalog;
use super::error::CheckoutError;
use super::pricing;
use super::types::{Cart, CartItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub item: CartItem,
    pub unit_price_cents: u64,
    pub line_total_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub cart: Cart,
    pub lines: Vec<PricedLine>,
    pub subtotal_cents: u64,
}

#[derive(Clone)]
pub struct CartSnapshotReader {
    carts: CartStore,
    catalog: Catalog,
}

impl CartSnapshotReader {
    pub fn new(carts: CartStore, catalog: Catalog) -> Self {
        Self { carts, catalog }
    }

    /// Price every line in listed order. A line whose product has disappeared fails
    /// the whole snapshot rather than being skipped.
    pub fn snapshot(&self, user_id: &str) -> Result<PricedCart, CheckoutError> {
        let cart = self.carts.get_cart(user_id)?;
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let mut lines = Vec::with_capacity(cart.items.len());
        let mut subtotal_cents: u64 = 0;
        for item in &cart.items {
            let product = self
                .catalog
                .get_product(&item.product_id)?
                .ok_or_else(|| CheckoutError::ProductNotFound(item.product_id.clone()))?;

            let line_total_cents = pricing::line_total(product.price_cents, item.quantity)
                .ok_or_else(|| anyhow!("line total overflow on product {}", item.product_id))?;
            subtotal_cents = subtotal_cents
                .checked_add(line_total_cents)
                .ok_or_else(|| anyhow!("subtotal overflow on product {}", item.product_id))?;

            lines.push(PricedLine {
                item: item.clone(),
                unit_price_cents: product.price_cents,
                line_total_cents,
            });
        }

        Ok(PricedCart {
            cart,
            lines,
            subtotal_cents,
        })
    }
}
