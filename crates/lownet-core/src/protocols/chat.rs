use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::frame::PlainFrame;
use crate::identity::BROADCAST_ID;
use crate::link::LinkCore;

use super::{format_id, PROTOCOL_CHAT};

/// Unicast/broadcast plaintext messaging, the network's simplest protocol.
pub struct ChatChannel {
    core: Arc<LinkCore>,
}

impl ChatChannel {
    /// Registers the chat handler against `core`. `core` must not already
    /// have a handler for [`PROTOCOL_CHAT`].
    pub fn register(core: Arc<LinkCore>) -> Result<Arc<ChatChannel>> {
        let channel = Arc::new(ChatChannel { core: core.clone() });
        let receiver = Arc::clone(&channel);
        core.register_handler(PROTOCOL_CHAT, move |frame| receiver.on_frame(frame))?;
        Ok(channel)
    }

    pub fn shout(&self, message: &str) -> Result<()> {
        self.tell(message, BROADCAST_ID)
    }

    pub fn tell(&self, message: &str, destination: u8) -> Result<()> {
        let Some(len) = crate::util::valid_chat_message(message, crate::frame::PAYLOAD_SIZE) else {
            return Ok(());
        };
        self.core.send(destination, PROTOCOL_CHAT, &message.as_bytes()[..len])
    }

    fn on_frame(&self, frame: &PlainFrame) {
        let local = self.core.local_id();
        if frame.destination != local && frame.destination != BROADCAST_ID {
            return;
        }
        let text = String::from_utf8_lossy(&frame.payload[..frame.length as usize]);
        let verb = if frame.destination == BROADCAST_ID {
            "shouts"
        } else {
            "says"
        };
        info!("{} {}: {}", format_id(frame.source), verb, text);
    }
}
