pub mod chat;
pub mod command;
pub mod crane;
pub mod ping;

pub const PROTOCOL_CHAT: u8 = 0x02;
pub const PROTOCOL_PING: u8 = 0x03;
pub const PROTOCOL_COMMAND: u8 = 0x04;
pub const PROTOCOL_CRANE: u8 = 0x05;

/// Formats a node id the way the firmware's `format_id` does: `"0x{id:x}"`,
/// no zero padding.
pub fn format_id(id: u8) -> String {
    format!("0x{id:x}")
}
