//! Per-user cart storage. Plain last-write-wins CRUD; checkout only ever reads
//! a cart and clears it.
use std::sync::Arc;

use sled::Db;

use super::error::CartError;
use super::store::{self, keys};
use super::types::{Cart, CartItem};

#[derive(Clone)]
pub struct CartStore {
    instance: Arc<Db>,
}

impl CartStore {
    pub fn new(instance: Arc<Db>) -> Self {
        Self { instance }
    }

    /// A user without a stored cart has an empty one
    pub fn get_cart(&self, user_id: &str) -> anyhow::Result<Cart> {
        let cart = store::load(&self.instance, &keys::cart(user_id))?;
        Ok(cart.unwrap_or_else(|| Cart::empty(user_id)))
    }

    pub fn save_cart(&self, cart: &Cart) -> anyhow::Result<()> {
        store::save(&self.instance, &keys::cart(&cart.user_id), cart)
    }

    pub fn clear_cart(&self, user_id: &str) -> anyhow::Result<()> {
        self.instance.remove(keys::cart(user_id))?;
        Ok(())
    }

    pub fn add_item(
        &self,
        user_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> Result<Cart, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        let mut cart = self.get_cart(user_id)?;

        match cart.items.iter_mut().find(|item| item.product_id == product_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(quantity),
            None => cart.items.push(CartItem {
                product_id: product_id.to_string(),
                quantity,
            }),
        }

        self.save_cart(&cart)?;
        Ok(cart)
    }

    pub fn remove_item(&self, user_id: &str, product_id: &str) -> anyhow::Result<Cart> {
        let mut cart = self.get_cart(user_id)?;
        cart.items.retain(|item| item.product_id != product_id);
        self.save_cart(&cart)?;
        Ok(cart)
    }

    /// Decrease a line by `quantity`, dropping it once nothing would be left
    pub fn reduce_item(
        &self,
        user_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> Result<Cart, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        let mut cart = self.get_cart(user_id)?;

        if let Some(existing) = cart.items.iter_mut().find(|item| item.product_id == product_id) {
            existing.quantity = existing.quantity.saturating_sub(quantity);
        }
        cart.items.retain(|item| item.quantity > 0);

        self.save_cart(&cart)?;
        Ok(cart)
    }

    pub fn set_applied_coupon(&self, user_id: &str, code: Option<String>) -> anyhow::Result<Cart> {
        let mut cart = self.get_cart(user_id)?;
        cart.applied_coupon = code;
        self.save_cart(&cart)?;
        Ok(cart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cart_store(name: &str) -> anyhow::Result<(tempfile::TempDir, CartStore)> {
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join(name))?);
        Ok((temp_dir, CartStore::new(db)))
    }

    #[test]
    fn missing_cart_reads_as_empty() -> anyhow::Result<()> {
        let (_dir, carts) = cart_store("missing_cart.db")?;

        let cart = carts.get_cart("user-a")?;
        assert!(cart.is_empty());
        assert_eq!(cart.user_id, "user-a");
        Ok(())
    }

    #[test]
    fn adding_the_same_product_merges_lines() -> anyhow::Result<()> {
        let (_dir, carts) = cart_store("merge_lines.db")?;

        carts.add_item("user-a", "p1", 1)?;
        carts.add_item("user-a", "p2", 1)?;
        let cart = carts.add_item("user-a", "p1", 2)?;

        assert_eq!(cart.items.len(), 2);
        assert_eq!(
            cart.items[0],
            CartItem {
                product_id: "p1".into(),
                quantity: 3
            }
        );
        Ok(())
    }

    #[test]
    fn zero_quantity_is_rejected() -> anyhow::Result<()> {
        let (_dir, carts) = cart_store("zero_quantity.db")?;

        assert!(matches!(carts.add_item("user-a", "p1", 0), Err(CartError::InvalidQuantity)));
        assert!(matches!(carts.reduce_item("user-a", "p1", 0), Err(CartError::InvalidQuantity)));
        Ok(())
    }

    #[test]
    fn reducing_to_zero_removes_the_line() -> anyhow::Result<()> {
        let (_dir, carts) = cart_store("reduce_line.db")?;

        carts.add_item("user-a", "p1", 3)?;
        let cart = carts.reduce_item("user-a", "p1", 1)?;
        assert_eq!(cart.items[0].quantity, 2);

        let cart = carts.reduce_item("user-a", "p1", 5)?;
        assert!(cart.is_empty());
        Ok(())
    }

    #[test]
    fn clear_and_remove() -> anyhow::Result<()> {
        let (_dir, carts) = cart_store("clear_remove.db")?;

        carts.add_item("user-a", "p1", 1)?;
        carts.add_item("user-a", "p2", 1)?;
        let cart = carts.remove_item("user-a", "p1")?;
        assert_eq!(cart.items.len(), 1);

        carts.clear_cart("user-a")?;
        assert!(carts.get_cart("user-a")?.is_empty());
        Ok(())
    }
}
