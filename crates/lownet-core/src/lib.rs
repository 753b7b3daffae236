//! Core LowNet protocol stack: frame codec, keystore, crypto primitives,
//! link dispatch, time sync, and the individual application protocols
//! (chat, ping, command, crane) layered on top.

pub mod crc;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod identity;
pub mod keystore;
pub mod link;
pub mod protocols;
pub mod time;
pub mod util;

pub use error::{LinkError, Result};
pub use link::{LinkCore, RadioTransport};
