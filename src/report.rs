//! Read-only sales aggregation over the ledger
use super::types::Order;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesReport {
    pub total_orders: usize,
    /// Sum of subtotals, before discounts
    pub total_amount_cents: u64,
    pub total_discount_cents: u64,
    pub orders: Vec<Order>,
}

impl SalesReport {
    pub fn from_orders(orders: Vec<Order>) -> Self {
        let (total_amount_cents, total_discount_cents) =
            orders.iter().fold((0u64, 0u64), |(amount, discount), order| {
                (
                    amount.saturating_add(order.subtotal_cents),
                    discount.saturating_add(order.discount_cents),
                )
            });

        Self {
            total_orders: orders.len(),
            total_amount_cents,
            total_discount_cents,
            orders,
        }
    }
}
