//! UDP broadcast stand-in for the 2.4GHz radio driver the firmware talks to.
//! Every node listens on the same port and broadcasts frames to it; the
//! link layer itself is unaware this isn't a real radio.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use lownet_core::link::RadioTransport;
use lownet_core::LinkCore;
use tracing::{debug, warn};

pub struct UdpBroadcastRadio {
    socket: UdpSocket,
    broadcast_addr: SocketAddr,
}

impl UdpBroadcastRadio {
    pub fn bind(bind_addr: &str, broadcast_addr: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_broadcast(true)?;
        let broadcast_addr = broadcast_addr
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        Ok(UdpBroadcastRadio {
            socket,
            broadcast_addr,
        })
    }

    /// Spawns a blocking receive loop on its own OS thread, feeding every
    /// received datagram into `core.inbound_raw`. The socket is duplicated
    /// so sends on the original handle are unaffected.
    pub fn spawn_receive_loop(&self, core: Arc<LinkCore>) -> std::io::Result<()> {
        let socket = self.socket.try_clone()?;
        std::thread::spawn(move || {
            let mut buf = [0u8; lownet_core::frame::SECURE_FRAME_SIZE];
            loop {
                match socket.recv_from(&mut buf) {
                    Ok((n, _addr)) => core.inbound_raw(&buf[..n]),
                    Err(e) => {
                        warn!("radio receive error: {e}");
                        break;
                    }
                }
            }
        });
        Ok(())
    }
}

impl RadioTransport for UdpBroadcastRadio {
    fn transmit(&self, bytes: &[u8]) -> std::io::Result<()> {
        let sent = self.socket.send_to(bytes, self.broadcast_addr)?;
        if sent != bytes.len() {
            debug!(sent, expected = bytes.len(), "short send on radio socket");
        }
        Ok(())
    }
}
