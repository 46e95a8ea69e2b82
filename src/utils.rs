//! Identifier generation for orders, lock leases and coupon codes

use std::sync::Arc;

use bech32::Bech32m;
use uuid7::uuid7;

pub const COUPON_CODE_PREFIX: &str = "COUPON-";

/// Source of fresh identifiers held by the components that mint them
pub type IdGenerator = Arc<dyn Fn() -> anyhow::Result<String> + Send + Sync>;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

pub fn new_order_id() -> anyhow::Result<String> {
    new_uuid_to_bech32("order_")
}

pub fn new_lease_token() -> anyhow::Result<String> {
    new_uuid_to_bech32("lease_")
}

/// Short human-typeable code. The tail of a uuid7 is random, the head is a timestamp
/// and counter, so only the last four bytes are used. Callers must still check for
/// collisions against the registry.
pub fn new_coupon_code() -> String {
    let id = uuid7();
    let bytes = id.as_bytes();
    format!("{COUPON_CODE_PREFIX}{}", hex::encode_upper(&bytes[12..]))
}

pub fn order_ids() -> IdGenerator {
    Arc::new(new_order_id)
}

pub fn coupon_codes() -> IdGenerator {
    Arc::new(|| Ok(new_coupon_code()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_ids_are_prefixed_and_unique() {
        let a = new_order_id().unwrap();
        let b = new_order_id().unwrap();

        assert!(a.starts_with("order_1"));
        assert_ne!(a, b);
    }

    #[test]
    fn coupon_codes_are_uppercase_hex() {
        let code = new_coupon_code();
        let tail = code.strip_prefix(COUPON_CODE_PREFIX).unwrap();

        assert_eq!(tail.len(), 8);
        assert!(tail.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn empty_hrp_is_rejected() {
        assert!(new_uuid_to_bech32("").is_err());
    }
}
