//! Read side of the product catalog
use std::sync::Arc;

use sled::Db;

use super::store::{self, keys};
use super::types::Product;

#[derive(Clone)]
pub struct Catalog {
    instance: Arc<Db>,
}

impl Catalog {
    pub fn new(instance: Arc<Db>) -> Self {
        Self { instance }
    }

    pub fn get_product(&self, id: &str) -> anyhow::Result<Option<Product>> {
        store::load(&self.instance, &keys::product(id))
    }

    /// All products in the order they were first seeded
    pub fn list_products(&self) -> anyhow::Result<Vec<Product>> {
        let mut products = vec![];
        for id in store::scan_index(&self.instance, keys::PRODUCT_INDEX)? {
            if let Some(product) = self.get_product(&id)? {
                products.push(product);
            }
        }
        Ok(products)
    }

    /// Upsert products. A new id is written together with its index entry; a known id
    /// only has its record replaced, so reseeding on every start is safe. Returns how
    /// many products were new.
    pub fn seed(&self, products: &[Product]) -> anyhow::Result<usize> {
        let mut added = 0;
        for product in products {
            let key = keys::product(&product.id);
            let encoded = minicbor::to_vec(product)?;
            let created = store::create_indexed(
                &self.instance,
                &key,
                &encoded,
                keys::PRODUCT_INDEX,
                &product.id,
            )?;
            if created {
                added += 1;
            } else {
                self.instance.insert(key, encoded)?;
            }
        }
        Ok(added)
    }
}

pub fn default_products() -> Vec<Product> {
    vec![
        Product::new("p1", "T-shirt", 999),
        Product::new("p2", "Mug", 499),
        Product::new("p3", "Cap", 799),
    ]
}
