//! Use cases orchestrated over the domain ports and provider adapters.
//!
//! [`ledger::Ledger`] owns every wallet mutation; the other modules decide
//! *when* to mutate and call into it.

pub mod activation;
pub mod exchange;
pub mod ledger;
pub mod payments;
pub mod pin_gate;
pub mod poller;
pub mod router;
pub mod webhooks;
