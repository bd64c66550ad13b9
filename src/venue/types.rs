//! Concrete, typed wire records (spec §9 "Dynamic field access & loose JSON"). Every
//! venue's parser translates its JSON into these at the adapter boundary; no code above
//! this layer does stringly-typed field access.

use serde::{Deserialize, Serialize};

use crate::config::Venue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookEventKind {
    Snapshot,
    Delta,
}

/// A single (price, size) level. `size == 0.0` in a delta means "remove this level".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub size: f64,
}

/// Normalized book update, contract-multiplier already applied so downstream sees coin
/// units (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookEvent {
    pub venue: Venue,
    pub venue_symbol: String,
    pub kind: BookEventKind,
    pub ts_ms: i64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

/// Private order-channel event. Duplicates allowed; consumer dedupes by
/// `(client_id, fill_index)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub venue_symbol: String,
    pub side: Side,
    pub fill_size: f64,
    pub fill_index: u64,
    pub client_id: String,
    pub price: f64,
    pub ts_ms: i64,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillReport {
    pub order_id: String,
    pub filled_size: f64,
    pub avg_price: f64,
}

/// Generate a client order id of the form `<strategy-prefix><10 random alphanumerics>`
/// (spec §4.4).
pub fn generate_client_id(strategy_prefix: &str) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..10)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("{strategy_prefix}{suffix}")
}

/// Derive a hedge-venue client id from the quoting-venue fill's client id, with a
/// 4-char disambiguation suffix where the hedge venue disallows duplicate ids.
pub fn hedge_client_id(quoting_client_id: &str, disambiguate: bool) -> String {
    if !disambiguate {
        return quoting_client_id.to_string();
    }
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("{quoting_client_id}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_has_prefix_and_length() {
        let id = generate_client_id("mm");
        assert!(id.starts_with("mm"));
        assert_eq!(id.len(), "mm".len() + 10);
    }

    #[test]
    fn side_opposite_is_involution() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }
}
