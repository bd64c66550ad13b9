//! The Venue Adapter contract (spec §4.1): one WebSocket session per (venue, channel),
//! three logical streams (public book, private order, order-entry request/response).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Venue;
use crate::errors::VenueResult;
use crate::venue::types::{BookEvent, FillReport, OrderAck, OrderEvent, Side};

/// Order-entry API: request/response, not a stream.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    async fn place_post_only(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        price: f64,
    ) -> VenueResult<OrderAck>;

    async fn amend(
        &self,
        order_id: &str,
        symbol: &str,
        side: Side,
        qty: f64,
        price: f64,
    ) -> VenueResult<OrderAck>;

    async fn cancel(&self, order_id: &str, symbol: &str) -> VenueResult<()>;

    async fn place_market(&self, symbol: &str, side: Side, qty: f64) -> VenueResult<FillReport>;
}

/// Handle to a running public book stream for a venue.
pub struct BookStreamHandle {
    pub events: mpsc::Receiver<BookEvent>,
}

/// Handle to a running private order-event stream for a venue.
pub struct OrderStreamHandle {
    pub events: mpsc::Receiver<OrderEvent>,
}

/// Bounded channel capacity for the book-event hand-off from the receiving task to the
/// Assembler (spec §4.1 "Rate-limit and back-pressure"). Deltas are dropped before
/// snapshots when this fills up.
pub const BOOK_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Fixed reconnect delay per spec §4.1 ("wait 5 s and reconnect").
pub const RECONNECT_DELAY_SECS: u64 = 5;

/// After this many consecutive failures on the same channel, continue retrying but the
/// caller must record an error into the global error budget (spec §4.1).
pub const CONSECUTIVE_FAILURE_BUDGET_THRESHOLD: u32 = 3;
