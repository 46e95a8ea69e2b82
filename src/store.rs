//! Key layout and CBOR helpers over the shared sled keyspace
//!
//! | Key | Value |
//! |-----|-------|
//! | `product:{id}` | [`Product`](crate::types::Product) |
//! | `products:ids:{seq}` | product id |
//! | `cart:{user_id}` | [`Cart`](crate::types::Cart) |
//! | `order:{id}` | [`Order`](crate::types::Order) |
//! | `orders:ids:{seq}` | order id |
//! | `coupon:{code}` | [`Coupon`](crate::types::Coupon) |
//! | `coupons:ids:{seq}` | coupon code |
//! | `global:ordersCounter` | big-endian `u64` |
//! | `lock:checkout:{user_id}` | lease record |
//!
//! `{seq}` is a big-endian id from [`sled::Db::generate_id`], so a prefix scan of an
//! index walks records in insertion order. A record and its index entry are always
//! written in one transaction, so an indexed record is never missing from its listing.
use anyhow::anyhow;
use sled::Db;
use sled::transaction::ConflictableTransactionResult;

pub mod keys {
    pub const ORDER_COUNTER: &[u8] = b"global:ordersCounter";
    pub const PRODUCT_INDEX: &[u8] = b"products:ids:";
    pub const ORDER_INDEX: &[u8] = b"orders:ids:";
    pub const COUPON_INDEX: &[u8] = b"coupons:ids:";

    pub fn product(id: &str) -> Vec<u8> {
        format!("product:{id}").into_bytes()
    }
    pub fn cart(user_id: &str) -> Vec<u8> {
        format!("cart:{user_id}").into_bytes()
    }
    pub fn order(id: &str) -> Vec<u8> {
        format!("order:{id}").into_bytes()
    }
    pub fn coupon(code: &str) -> Vec<u8> {
        format!("coupon:{code}").into_bytes()
    }
    pub fn checkout_lock(user_id: &str) -> Vec<u8> {
        format!("lock:checkout:{user_id}").into_bytes()
    }
    pub fn indexed(prefix: &[u8], seq: u64) -> Vec<u8> {
        let mut key = prefix.to_vec();
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }
}

/// Load and decode a record, `None` when the key is absent
pub fn load<T>(db: &Db, key: &[u8]) -> anyhow::Result<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match db.get(key)? {
        Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
        None => Ok(None),
    }
}

pub fn save<T>(db: &Db, key: &[u8], value: &T) -> anyhow::Result<()>
where
    T: minicbor::Encode<()>,
{
    db.insert(key, minicbor::to_vec(value)?)?;
    Ok(())
}

/// Write a new record together with its index entry. Returns `false`, writing
/// nothing, when `key` already holds a value.
pub fn create_indexed(
    db: &Db,
    key: &[u8],
    value: &[u8],
    index: &[u8],
    id: &str,
) -> anyhow::Result<bool> {
    db.transaction(|tx| -> ConflictableTransactionResult<bool> {
        if tx.get(key)?.is_some() {
            return Ok(false);
        }
        tx.insert(key, value)?;
        tx.insert(keys::indexed(index, tx.generate_id()?), id.as_bytes())?;
        Ok(true)
    })
    .map_err(|err| {
        let key = String::from_utf8_lossy(key);
        anyhow!("indexed write of {key} failed: {err:?}")
    })
}

/// Every id stored under an index prefix, oldest first
pub fn scan_index(db: &Db, prefix: &[u8]) -> anyhow::Result<Vec<String>> {
    let mut ids = vec![];
    for entry in db.scan_prefix(prefix) {
        let (_, value) = entry?;
        ids.push(String::from_utf8(value.to_vec())?);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Product;
    use tempfile::tempdir;

    #[test]
    fn index_keys_sort_by_sequence() {
        let low = keys::indexed(keys::ORDER_INDEX, 9);
        let high = keys::indexed(keys::ORDER_INDEX, 256);

        assert!(low < high);
        assert!(low.starts_with(keys::ORDER_INDEX));
    }

    #[test]
    fn index_scan_preserves_insertion_order() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = sled::open(temp_dir.path().join("index_scan.db"))?;

        for id in ["zeta", "alpha", "mid"] {
            create_indexed(&db, &keys::product(id), b"{}", keys::PRODUCT_INDEX, id)?;
        }

        assert_eq!(scan_index(&db, keys::PRODUCT_INDEX)?, vec!["zeta", "alpha", "mid"]);
        Ok(())
    }

    #[test]
    fn indexed_create_refuses_taken_keys() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = sled::open(temp_dir.path().join("indexed_create.db"))?;
        let key = keys::coupon("SPRING");

        assert!(create_indexed(&db, &key, b"first", keys::COUPON_INDEX, "SPRING")?);
        assert!(!create_indexed(&db, &key, b"second", keys::COUPON_INDEX, "SPRING")?);

        assert_eq!(db.get(&key)?.as_deref(), Some(&b"first"[..]));
        assert_eq!(scan_index(&db, keys::COUPON_INDEX)?, vec!["SPRING"]);
        Ok(())
    }

    #[test]
    fn records_round_trip_through_the_store() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = sled::open(temp_dir.path().join("records.db"))?;
        let product = Product::new("p1", "T-shirt", 999);

        save(&db, &keys::product("p1"), &product)?;

        assert_eq!(load::<Product>(&db, &keys::product("p1"))?, Some(product));
        assert_eq!(load::<Product>(&db, &keys::product("p2"))?, None);
        Ok(())
    }
}
