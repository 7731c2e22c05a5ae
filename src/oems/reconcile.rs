//! In-memory reconciliation tables: `local_order_id -> request` and the
//! reverse `exchange_order_id -> local_order_id`, per `spec.md` §4.6.
//! Every terminal order state removes its entry from both maps.

use std::collections::HashMap;

use crate::frames::{ExchangeId, OrderRequest};

pub struct ReconciliationTable {
    by_local: HashMap<u64, (String, OrderRequest)>,
    by_exchange: HashMap<String, u64>,
}

impl ReconciliationTable {
    pub fn new() -> Self {
        Self {
            by_local: HashMap::new(),
            by_exchange: HashMap::new(),
        }
    }

    pub fn insert(&mut self, local_order_id: u64, exchange_order_id: &str, req: OrderRequest) {
        self.by_exchange.insert(exchange_order_id.to_string(), local_order_id);
        self.by_local.insert(local_order_id, (exchange_order_id.to_string(), req));
    }

    pub fn local_order_id(&self, exchange_order_id: &str) -> Option<u64> {
        self.by_exchange.get(exchange_order_id).copied()
    }

    /// Looks up the exchange-side order id and exchange for a still-open
    /// local order, for cancel requests that only carry the local id.
    pub fn peek(&self, local_order_id: u64) -> Option<(String, ExchangeId)> {
        self.by_local
            .get(&local_order_id)
            .map(|(exchange_order_id, req)| (exchange_order_id.clone(), req.exchange_id))
    }

    /// Removes the entry addressed by `exchange_order_id`, returning the
    /// original request so the caller can release its risk reservation.
    pub fn remove(&mut self, exchange_order_id: &str) -> Option<OrderRequest> {
        let local_order_id = self.by_exchange.remove(exchange_order_id)?;
        self.by_local.remove(&local_order_id).map(|(_, req)| req)
    }

    pub fn len(&self) -> usize {
        self.by_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_local.is_empty()
    }
}

impl Default for ReconciliationTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{OrdType, Side};

    #[test]
    fn insert_then_remove_by_exchange_id() {
        let mut table = ReconciliationTable::new();
        let req = OrderRequest::new(0, 7, 0, 0, 1, Side::Buy, OrdType::Limit, 1.0, 1.0, 0, "s");
        table.insert(7, "ex-1", req);
        assert_eq!(table.local_order_id("ex-1"), Some(7));
        assert_eq!(table.len(), 1);

        let removed = table.remove("ex-1").expect("present");
        assert_eq!(removed.local_order_id, 7);
        assert!(table.is_empty());
        assert_eq!(table.local_order_id("ex-1"), None);
    }
}
