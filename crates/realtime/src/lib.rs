#![forbid(unsafe_code)]

pub mod broker;
pub mod client;
pub mod hub;
pub mod ws;

pub use hub::{
    ConnectionId, FanoutHub, HubError, PollingHub, PushHub, DEFAULT_POLL_INTERVAL,
};
