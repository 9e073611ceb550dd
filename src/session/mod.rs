//! Session Store: durable per-session state, history, and usage persistence.

mod store;

pub use store::SessionStore;
