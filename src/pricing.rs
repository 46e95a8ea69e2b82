//! Integer cent arithmetic for order totals

/// `price × quantity`, `None` on overflow
pub fn line_total(price_cents: u64, quantity: u32) -> Option<u64> {
    price_cents.checked_mul(u64::from(quantity))
}

/// `subtotal × percent / 100`, rounding half a cent up. Percent is clamped to 100 so
/// the discount never exceeds the subtotal.
pub fn discount_cents(subtotal_cents: u64, percent: u8) -> u64 {
    let scaled = u128::from(subtotal_cents) * u128::from(percent.min(100));
    // at most subtotal_cents, fits in u64
    ((scaled + 50) / 100) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal_cents: u64,
    pub discount_cents: u64,
    pub total_cents: u64,
}

impl Totals {
    pub fn compute(subtotal_cents: u64, discount_percent: Option<u8>) -> Self {
        let discount_cents = discount_percent
            .map(|percent| discount_cents(subtotal_cents, percent))
            .unwrap_or(0);

        Self {
            subtotal_cents,
            discount_cents,
            total_cents: subtotal_cents - discount_cents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_percent_of_1998_rounds_up() {
        assert_eq!(discount_cents(1998, 10), 200);
        assert_eq!(Totals::compute(1998, Some(10)).total_cents, 1798);
    }

    #[test]
    fn exact_half_cent_rounds_up() {
        // 5 × 10% = 0.5
        assert_eq!(discount_cents(5, 10), 1);
        // 4 × 10% = 0.4
        assert_eq!(discount_cents(4, 10), 0);
    }

    #[test]
    fn no_coupon_means_no_discount() {
        assert_eq!(
            Totals::compute(1998, None),
            Totals {
                subtotal_cents: 1998,
                discount_cents: 0,
                total_cents: 1998
            }
        );
    }

    #[test]
    fn oversized_percent_is_capped() {
        assert_eq!(Totals::compute(700, Some(250)).total_cents, 0);
    }

    #[test]
    fn line_total_detects_overflow() {
        assert_eq!(line_total(999, 2), Some(1998));
        assert_eq!(line_total(u64::MAX, 2), None);
    }
}
