//! Telegram bot console with real-time webhook fan-out.
//!
//! The server side receives webhook callbacks ([`ingress`]) and fans them out
//! to every open push connection ([`hub`], served by [`api`]). The client side
//! subscribes to that stream ([`push`]) and reconciles what it receives with
//! polls and its own actions ([`console`]) into a bounded, expiring message
//! log ([`store`]).

pub mod api;
pub mod config;
pub mod console;
pub mod credentials;
pub mod hub;
pub mod ingress;
pub mod push;
pub mod storage;
pub mod store;
pub mod telegram;

pub use tgdash_protocol as protocol;
