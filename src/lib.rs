//! Routing-failure triage service.
//!
//! Watches the Kafka topic that a routing layer sends unclassifiable messages
//! to, asks a language model why each message failed to route, and reports the
//! likely cause as a Backstage notification. A fallback path guarantees a
//! notification even when the analysis itself fails.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod providers;

pub mod backstage;
pub mod fallback;
pub mod tools;

pub mod agent;
pub mod monitor;

pub mod server;
pub mod supervisor;
