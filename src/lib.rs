//! GATT client library for Bluetooth LE peripherals managed by BlueZ.
//!
//! The library does not talk to a controller. It connects to devices, discovers
//! their attribute databases, and reads and writes attributes through the
//! object model that BlueZ exports on the bus ([`bus::Bus`]). Attributes are
//! addressed by UUID or by ATT handle, with handles recovered from BlueZ
//! object paths.
//!
//! The core API is async and runs on [tokio]. [`blocking`] wraps it in
//! blocking and callback-completed calls serviced by one worker thread.
//!
//! [tokio]: https://tokio.rs

pub use {
    access::WriteMode,
    adapter::Adapter,
    addr::{AddrType, RawAddr},
    agent::Agent,
    config::{Config, ConnectOptions},
    conn::Connection,
    error::{Error, Result, Status},
    handle::{Handle, HandleRange},
    uuid::Uuid,
};

pub mod access;
pub mod adapter;
pub mod addr;
pub mod agent;
pub mod blocking;
pub mod bus;
pub mod config;
pub mod conn;
pub mod discover;
mod error;
pub mod handle;
pub mod notify;
pub mod path;
pub mod resolve;
pub mod uuid;
mod util;
