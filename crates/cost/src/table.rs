//! Static per-kind request weights.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

/// Kinds of light-client requests the server meters.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestKind {
    BlockHeaders,
    BlockBodies,
    Receipts,
    Code,
    Proofs,
    HelperTrieProofs,
    SendTx,
    TxStatus,
}

impl RequestKind {
    /// Default weights, in nanoseconds of expected serving time.
    pub const fn default_cost(self) -> RequestCost {
        match self {
            Self::BlockHeaders => RequestCost::new(150_000, 30_000, 192),
            Self::BlockBodies => RequestCost::new(0, 700_000, 32),
            Self::Receipts => RequestCost::new(0, 1_000_000, 128),
            Self::Code => RequestCost::new(0, 450_000, 64),
            Self::Proofs => RequestCost::new(0, 600_000, 64),
            Self::HelperTrieProofs => RequestCost::new(0, 1_000_000, 64),
            Self::SendTx => RequestCost::new(0, 450_000, 64),
            Self::TxStatus => RequestCost::new(0, 250_000, 256),
        }
    }
}

/// Cost of one request kind: `base + per_unit * min(size, max_size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCost {
    pub base: u64,
    pub per_unit: u64,
    /// Sizes above this are charged as this.
    pub max_size: u64,
}

impl RequestCost {
    pub const fn new(base: u64, per_unit: u64, max_size: u64) -> Self {
        Self {
            base,
            per_unit,
            max_size,
        }
    }

    pub fn cost(&self, size: u64) -> u64 {
        self.per_unit
            .saturating_mul(size.min(self.max_size))
            .saturating_add(self.base)
    }

    /// Cost of the largest request of this kind.
    pub fn max_cost(&self) -> u64 {
        self.cost(self.max_size)
    }
}

/// Per-kind weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostTable {
    costs: HashMap<RequestKind, RequestCost>,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            costs: RequestKind::iter().map(|k| (k, k.default_cost())).collect(),
        }
    }
}

impl CostTable {
    /// Override the weights of one kind.
    pub fn with(mut self, kind: RequestKind, cost: RequestCost) -> Self {
        self.costs.insert(kind, cost);
        self
    }

    pub fn get(&self, kind: RequestKind) -> RequestCost {
        self.costs
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_cost())
    }

    pub fn estimate(&self, kind: RequestKind, size: u64) -> u64 {
        self.get(kind).cost(size)
    }

    /// Most expensive single request over all kinds.
    pub fn max_request_cost(&self) -> u64 {
        RequestKind::iter()
            .map(|k| self.get(k).max_cost())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_formula() {
        let table = CostTable::default();
        assert_eq!(table.estimate(RequestKind::BlockHeaders, 0), 150_000);
        assert_eq!(table.estimate(RequestKind::BlockHeaders, 10), 450_000);
        // Clamped at max_size.
        assert_eq!(
            table.estimate(RequestKind::BlockHeaders, 10_000),
            table.estimate(RequestKind::BlockHeaders, 192)
        );
    }

    #[test]
    fn test_override() {
        let table = CostTable::default().with(RequestKind::Code, RequestCost::new(7, 1, 4));
        assert_eq!(table.estimate(RequestKind::Code, 2), 9);
        assert_eq!(table.estimate(RequestKind::Code, 100), 11);
    }

    #[test]
    fn test_max_request_cost() {
        let table = CostTable::default();
        assert_eq!(table.max_request_cost(), 128_000_000);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(RequestKind::HelperTrieProofs.to_string(), "helper_trie_proofs");
        assert_eq!("tx_status".parse::<RequestKind>().unwrap(), RequestKind::TxStatus);
    }
}
