//! Append-only order ledger and the global order sequence
//!
//! # Durability
//!
//! `append` flushes the database before returning, so an order handed back to the
//! caller survives a crash. The flush also persists every earlier counter increment,
//! which keeps a restarted counter ahead of every recorded order number.
use std::sync::Arc;

use anyhow::anyhow;
use sled::Db;

use super::clock::Clock;
use super::store::{self, keys};
use super::types::{Order, OrderDraft};
use super::utils::{self, IdGenerator};

#[derive(Clone)]
pub struct OrderLedger {
    instance: Arc<Db>,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
}

fn decode_counter(bytes: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(bytes).ok().map(u64::from_be_bytes)
}

impl OrderLedger {
    pub fn new(instance: Arc<Db>, clock: Arc<dyn Clock>) -> Self {
        Self {
            instance,
            clock,
            ids: utils::order_ids(),
        }
    }

    /// Replace the source of order ids
    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Atomic fetch-and-increment of the global sequence. Numbers handed out here are
    /// never returned, even when the order they were meant for is never written.
    pub fn next_sequence_number(&self) -> anyhow::Result<u64> {
        let updated = self.instance.update_and_fetch(keys::ORDER_COUNTER, |old| {
            let current = old.and_then(decode_counter).unwrap_or(0);
            Some((current + 1).to_be_bytes().to_vec())
        })?;

        updated
            .as_deref()
            .and_then(decode_counter)
            .ok_or_else(|| anyhow!("order counter unreadable after increment"))
    }

    /// Last number handed out, zero before the first checkout
    pub fn current_sequence_number(&self) -> anyhow::Result<u64> {
        Ok(self
            .instance
            .get(keys::ORDER_COUNTER)?
            .as_deref()
            .and_then(decode_counter)
            .unwrap_or(0))
    }

    /// Assign an id and creation time, then persist the order and its index entry in one
    /// transaction. An id that is already recorded is refused, never overwritten.
    pub fn append(&self, draft: OrderDraft) -> anyhow::Result<Order> {
        let order = Order {
            id: (self.ids)()?,
            order_number: draft.order_number,
            user_id: draft.user_id,
            items: draft.items,
            subtotal_cents: draft.subtotal_cents,
            discount_cents: draft.discount_cents,
            total_cents: draft.total_cents,
            coupon_code_applied: draft.coupon_code_applied,
            created_at: self.clock.timestamp(),
            status: draft.status,
        };

        let created = store::create_indexed(
            &self.instance,
            &keys::order(&order.id),
            &minicbor::to_vec(&order)?,
            keys::ORDER_INDEX,
            &order.id,
        )?;
        if !created {
            return Err(anyhow!("order {} is already recorded", order.id));
        }
        self.instance.flush()?;

        Ok(order)
    }

    pub fn get(&self, id: &str) -> anyhow::Result<Option<Order>> {
        store::load(&self.instance, &keys::order(id))
    }

    /// Every order in insertion order
    pub fn list_all(&self) -> anyhow::Result<Vec<Order>> {
        let mut orders = vec![];
        for id in store::scan_index(&self.instance, keys::ORDER_INDEX)? {
            if let Some(order) = self.get(&id)? {
                orders.push(order);
            }
        }
        Ok(orders)
    }
}
