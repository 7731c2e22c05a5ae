//! Symbol/exchange interning.
//!
//! `spec.md` §3 and §9 require `symbol_id`/`exchange_id` to be interned
//! once at startup and treated as process-wide constants thereafter. The
//! table is built from the config's `exchanges`/`symbols` arrays in
//! declaration order and never mutated again.

use std::collections::HashMap;

use crate::frames::{ExchangeId, SymbolId, UNKNOWN_EXCHANGE, UNKNOWN_SYMBOL};

/// Immutable, process-wide interning table.
#[derive(Debug)]
pub struct SymbolTable {
    exchange_ids: HashMap<String, ExchangeId>,
    exchange_names: Vec<String>,
    symbol_ids: HashMap<String, SymbolId>,
    symbol_names: Vec<String>,
}

impl SymbolTable {
    /// Builds the table once at startup. `exchanges` and `symbols` are
    /// assigned dense ids in the order given.
    pub fn build(exchanges: &[String], symbols: &[String]) -> Self {
        let mut exchange_ids = HashMap::with_capacity(exchanges.len());
        let mut exchange_names = Vec::with_capacity(exchanges.len());
        for (i, name) in exchanges.iter().enumerate() {
            exchange_ids.insert(name.clone(), i as ExchangeId);
            exchange_names.push(name.clone());
        }

        let mut symbol_ids = HashMap::with_capacity(symbols.len());
        let mut symbol_names = Vec::with_capacity(symbols.len());
        for (i, name) in symbols.iter().enumerate() {
            symbol_ids.insert(name.clone(), i as SymbolId);
            symbol_names.push(name.clone());
        }

        Self {
            exchange_ids,
            exchange_names,
            symbol_ids,
            symbol_names,
        }
    }

    pub fn exchange_id(&self, name: &str) -> ExchangeId {
        self.exchange_ids.get(name).copied().unwrap_or(UNKNOWN_EXCHANGE)
    }

    pub fn exchange_name(&self, id: ExchangeId) -> &str {
        self.exchange_names
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or("UNKNOWN")
    }

    pub fn symbol_id(&self, name: &str) -> SymbolId {
        self.symbol_ids.get(name).copied().unwrap_or(UNKNOWN_SYMBOL)
    }

    pub fn symbol_name(&self, id: SymbolId) -> &str {
        self.symbol_names
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or("UNKNOWN")
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbol_names
    }

    pub fn exchanges(&self) -> &[String] {
        &self.exchange_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interns_in_declaration_order() {
        let table = SymbolTable::build(
            &["binance".to_string(), "okx".to_string()],
            &["BTC-USDT-SWAP".to_string(), "ETH-USDT-SWAP".to_string()],
        );
        assert_eq!(table.exchange_id("binance"), 0);
        assert_eq!(table.exchange_id("okx"), 1);
        assert_eq!(table.symbol_id("ETH-USDT-SWAP"), 1);
        assert_eq!(table.symbol_name(0), "BTC-USDT-SWAP");
    }

    #[test]
    fn unknown_name_maps_to_sentinel() {
        let table = SymbolTable::build(&["binance".to_string()], &[]);
        assert_eq!(table.exchange_id("nonexistent"), UNKNOWN_EXCHANGE);
    }
}
