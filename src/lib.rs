//! carchain: a permissioned, replicated vehicle-registration ledger.
//!
//! Each node keeps an append-only chain of registration records. A master
//! node proposes a candidate block, every peer validates it against its own
//! chain tip and votes, and the block is committed once a 2/3-majority
//! quorum of yes-votes is collected - tolerating out-of-order and duplicate
//! delivery, but not forged messages.
//!
//! ## Structure
//! - `chain` - block codec and the append-only chain store
//! - `consensus` - candidate buffer, orphan votes, quorum decisions
//! - `peers` - peer directory the quorum is computed over
//! - `network` - actix-web routes and reqwest broadcast
//! - `stats` - voting-pipeline timing instrumentation
//! - `logger` - tracing setup

pub mod chain;
pub mod consensus;
pub mod logger;
pub mod network;
pub mod peers;
pub mod stats;
