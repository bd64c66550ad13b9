//! Cross-exchange market-making and hedging engine library.
//!
//! Exposes the core modules shared by the three binaries (`quote-engine`, `hedge`,
//! `md-aggregator`): venue adapters, order-book assembly, spread aggregation, trading
//! bands, the quoting loop, and the hedge executor.

pub mod alert;
pub mod bands;
pub mod config;
pub mod errors;
pub mod external;
pub mod hedge;
pub mod orderbook;
pub mod quoting;
pub mod spread;
pub mod state;
pub mod venue;
