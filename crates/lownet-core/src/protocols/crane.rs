//! The crane protocol: a connection-oriented command channel on top of
//! LowNet, with a SYN/SYN-ACK/ACK handshake, sliding-sequence ACKs carried
//! on STATUS packets, and bounded retransmission of ACTION commands.

use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::Result;
use crate::frame::PlainFrame;
use crate::link::LinkCore;

use super::PROTOCOL_CRANE;

const PACKET_SIZE: usize = 8;
const ACK_QUEUE_CAPACITY: usize = 8;
const ACK_WAIT: Duration = Duration::from_secs(5);
const RETRY_ATTEMPTS: usize = 5;
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const IDLE_POLL_ATTEMPTS: usize = 100;
const CLOSE_LINGER: Duration = Duration::from_millis(500);
const HANDSHAKE_POLL_ATTEMPTS: usize = 30;

const CONNECT: u8 = 0x01;
const STATUS: u8 = 0x02;
const ACTION: u8 = 0x03;
const CLOSE: u8 = 0x04;

const SYN: u8 = 1 << 0;
const ACK: u8 = 1 << 1;
const NAK: u8 = 1 << 2;
const TEST: u8 = 1 << 3;

#[allow(dead_code)]
pub mod actions {
    pub const NULL: u8 = 0x00;
    pub const STOP: u8 = 0x01;
    pub const FWD: u8 = 0x02;
    pub const REV: u8 = 0x03;
    pub const UP: u8 = 0x04;
    pub const DOWN: u8 = 0x05;
    pub const LIGHT_ON: u8 = 0x06;
    pub const LIGHT_OFF: u8 = 0x07;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disconnected,
    Handshake,
    Connected,
}

struct CranePacket {
    kind: u8,
    flags: u8,
    seq: u16,
    data: [u8; 4],
}

impl CranePacket {
    fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        let mut out = [0u8; PACKET_SIZE];
        out[0] = self.kind;
        out[1] = self.flags;
        out[2..4].copy_from_slice(&self.seq.to_le_bytes());
        out[4..8].copy_from_slice(&self.data);
        out
    }

    fn from_bytes(bytes: &[u8]) -> CranePacket {
        CranePacket {
            kind: bytes[0],
            flags: bytes[1],
            seq: u16::from_le_bytes(bytes[2..4].try_into().unwrap()),
            data: bytes[4..8].try_into().unwrap(),
        }
    }

    fn challenge(&self) -> u32 {
        u32::from_le_bytes(self.data)
    }
}

struct CraneInner {
    seq: u16,
    crane: u8,
    state: State,
    last_status_seq: u16,
    last_backlog: u8,
}

impl CraneInner {
    fn fresh() -> CraneInner {
        CraneInner {
            seq: 0,
            crane: 0,
            state: State::Disconnected,
            last_status_seq: 0,
            last_backlog: 0,
        }
    }
}

/// A single connection's worth of crane state. Like the firmware, only one
/// flow is tracked at a time.
pub struct CraneChannel {
    core: Arc<LinkCore>,
    inner: StdMutex<CraneInner>,
    acks_tx: mpsc::Sender<u16>,
    acks_rx: AsyncMutex<mpsc::Receiver<u16>>,
}

impl CraneChannel {
    pub fn register(core: Arc<LinkCore>) -> Result<Arc<CraneChannel>> {
        let (acks_tx, acks_rx) = mpsc::channel(ACK_QUEUE_CAPACITY);
        let channel = Arc::new(CraneChannel {
            core: core.clone(),
            inner: StdMutex::new(CraneInner::fresh()),
            acks_tx,
            acks_rx: AsyncMutex::new(acks_rx),
        });
        let receiver = Arc::clone(&channel);
        core.register_handler(PROTOCOL_CRANE, move |frame| receiver.on_frame(frame))?;
        Ok(channel)
    }

    fn send_packet(&self, destination: u8, packet: &CranePacket) -> Result<()> {
        self.core.send(destination, PROTOCOL_CRANE, &packet.to_bytes())
    }

    /// Begins the SYN handshake with `id`. No-op if already connecting or
    /// connected.
    pub fn connect(&self, id: u8) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != State::Disconnected {
            return;
        }
        inner.crane = id;
        inner.state = State::Handshake;
        inner.seq = 0;
        drop(inner);

        let packet = CranePacket {
            kind: CONNECT,
            flags: SYN,
            seq: 0,
            data: [0u8; 4],
        };
        let _ = self.send_packet(id, &packet);
    }

    /// Sends CLOSE, waits briefly for a possible ACK, then resets state
    /// unconditionally regardless of whether one arrived.
    pub async fn disconnect(&self) {
        let (crane, seq) = {
            let inner = self.inner.lock().unwrap();
            (inner.crane, inner.seq)
        };
        let packet = CranePacket {
            kind: CLOSE,
            flags: 0,
            seq,
            data: [0u8; 4],
        };
        let _ = self.send_packet(crane, &packet);
        info!("sent CLOSE packet to crane {:#04x}", crane);

        tokio::time::sleep(CLOSE_LINGER).await;

        let mut inner = self.inner.lock().unwrap();
        inner.state = State::Disconnected;
        inner.seq = 0;
    }

    async fn read_acks(&self) -> u16 {
        let mut rx = self.acks_rx.lock().await;
        let mut seq = match timeout(ACK_WAIT, rx.recv()).await {
            Ok(Some(seq)) => seq,
            _ => 0,
        };
        while let Ok(other) = rx.try_recv() {
            seq = seq.max(other);
        }
        seq
    }

    /// Sends an ACTION command and blocks (asynchronously) for its ACK,
    /// retransmitting up to [`RETRY_ATTEMPTS`] times on silence.
    pub async fn action(&self, action: u8) -> i32 {
        let (crane, seq, connected) = {
            let inner = self.inner.lock().unwrap();
            (inner.crane, inner.seq, inner.state == State::Connected)
        };
        if !connected {
            warn!("cannot send action, not connected");
            return -1;
        }
        if crane == 0x00 {
            warn!("crane id is 0x00, refusing to send");
            self.inner.lock().unwrap().state = State::Disconnected;
            return -1;
        }

        let packet = CranePacket {
            kind: ACTION,
            flags: 0,
            seq,
            data: [action, 0, 0, 0],
        };
        info!("sending ACTION cmd={} seq={}", action, seq);
        let _ = self.send_packet(crane, &packet);

        for attempt in 0..RETRY_ATTEMPTS {
            let ack = self.read_acks().await;

            if ack == 0 {
                warn!("no ACK, retransmitting (try {})", attempt + 1);
                let _ = self.send_packet(crane, &packet);
                continue;
            }
            if ack == 0xFFFF {
                warn!("spurious ACK seq 0xFFFF, ignoring");
                continue;
            }
            if ack > seq {
                warn!("unexpected ACK seq ({} > {})", ack, seq);
                self.disconnect().await;
                return -2;
            }
            if ack == seq {
                self.inner.lock().unwrap().seq = seq.wrapping_add(1);
                info!("ACK received for seq {}", ack);
                return 0;
            }
        }

        warn!("received no ack from crane {:#04x}", crane);
        self.disconnect().await;
        -1
    }

    async fn wait_until_idle(&self) {
        for _ in 0..IDLE_POLL_ATTEMPTS {
            if self.inner.lock().unwrap().last_backlog == 0 {
                return;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
        let backlog = self.inner.lock().unwrap().last_backlog;
        warn!("timeout waiting for backlog to drain (backlog={})", backlog);
    }

    /// Runs the scripted test sequence: connect with the TEST flag, cycle
    /// the light and drive motions, then disconnect.
    pub async fn run_test(&self, id: u8) {
        info!("starting automated crane test with {:#04x}", id);
        {
            let mut inner = self.inner.lock().unwrap();
            inner.crane = id;
            inner.state = State::Handshake;
            inner.seq = 0;
        }

        let packet = CranePacket {
            kind: CONNECT,
            flags: SYN | TEST,
            seq: 0,
            data: [0u8; 4],
        };
        let _ = self.send_packet(id, &packet);

        let mut connected = false;
        for _ in 0..HANDSHAKE_POLL_ATTEMPTS {
            if self.inner.lock().unwrap().state == State::Connected {
                connected = true;
                break;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
        if !connected {
            warn!("handshake failed");
            return;
        }

        let pattern: &[u8] = &[
            actions::LIGHT_ON,
            actions::FWD,
            actions::FWD,
            actions::REV,
        ];
        for action in pattern {
            if self.action(*action).await != 0 {
                warn!("crane action {} failed, aborting test pattern", action);
                return;
            }
        }
        self.wait_until_idle().await;

        let pattern: &[u8] = &[actions::DOWN, actions::DOWN];
        for action in pattern {
            if self.action(*action).await != 0 {
                warn!("crane action {} failed, aborting test pattern", action);
                return;
            }
        }
        self.wait_until_idle().await;

        let pattern: &[u8] = &[
            actions::UP,
            actions::UP,
            actions::REV,
            actions::LIGHT_OFF,
        ];
        for action in pattern {
            if self.action(*action).await != 0 {
                warn!("crane action {} failed, aborting test pattern", action);
                return;
            }
        }
        self.wait_until_idle().await;

        self.disconnect().await;
        info!("test sequence completed");
    }

    fn on_frame(&self, frame: &PlainFrame) {
        if (frame.length as usize) < PACKET_SIZE {
            return;
        }
        let packet = CranePacket::from_bytes(&frame.payload[..PACKET_SIZE]);
        match packet.kind {
            CONNECT => self.recv_connect(frame.source, &packet),
            STATUS => self.recv_status(&packet),
            ACTION => {}
            CLOSE => self.recv_close(),
            _ => {}
        }
    }

    fn recv_connect(&self, source: u8, packet: &CranePacket) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != State::Handshake {
            return;
        }
        if packet.flags & (SYN | ACK) != (SYN | ACK) {
            warn!("invalid handshake flags, expected SYN|ACK");
            return;
        }

        let mut reply_flags = ACK;
        if packet.flags & TEST != 0 {
            reply_flags |= TEST;
        }
        let reply = CranePacket {
            kind: CONNECT,
            flags: reply_flags,
            seq: 0,
            data: (!packet.challenge()).to_le_bytes(),
        };

        let crane = inner.crane;
        inner.seq = 1;
        inner.state = State::Connected;
        drop(inner);

        let _ = self.send_packet(crane, &reply);
        info!("connection established with crane {}", super::format_id(source));
    }

    fn recv_close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.seq = 0;
        inner.state = State::Disconnected;
        inner.crane = 0;
    }

    fn recv_status(&self, packet: &CranePacket) {
        if packet.flags & NAK != 0 {
            return;
        }

        if packet.seq != 0 && packet.seq != 0xFFFF {
            let _ = self.acks_tx.try_send(packet.seq);
        }

        let mut inner = self.inner.lock().unwrap();
        inner.last_status_seq = packet.seq;
        inner.last_backlog = packet.data[0];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::RadioTransport;
    use std::sync::Mutex;

    struct LoopbackTransport {
        core: Mutex<Option<Arc<LinkCore>>>,
    }

    impl RadioTransport for LoopbackTransport {
        fn transmit(&self, bytes: &[u8]) -> std::io::Result<()> {
            if let Some(core) = self.core.lock().unwrap().as_ref() {
                core.inbound_raw(bytes);
            }
            Ok(())
        }
    }

    fn new_core(id: u8) -> Arc<LinkCore> {
        let transport = Arc::new(LoopbackTransport {
            core: Mutex::new(None),
        });
        let core = LinkCore::new(id, transport.clone() as Arc<dyn RadioTransport>);
        *transport.core.lock().unwrap() = Some(Arc::clone(&core));
        core
    }

    #[tokio::test]
    async fn handshake_completes_and_advances_sequence_to_one() {
        let core = new_core(0x01);
        let crane = CraneChannel::register(Arc::clone(&core)).unwrap();

        crane.connect(0x02);
        assert_eq!(crane.inner.lock().unwrap().state, State::Handshake);

        // Simulate the crane's SYN|ACK reply arriving from 0x02.
        let reply = CranePacket {
            kind: CONNECT,
            flags: SYN | ACK,
            seq: 0,
            data: 0u32.to_le_bytes(),
        };
        let mut frame = PlainFrame::new(0x02, 0x01, PROTOCOL_CRANE, &reply.to_bytes());
        frame.crc = frame.compute_crc();
        core.inbound_raw(&frame.to_bytes());

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let inner = crane.inner.lock().unwrap();
        assert_eq!(inner.state, State::Connected);
        assert_eq!(inner.seq, 1);
    }

    #[test]
    fn status_nak_does_not_update_backlog() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let core = new_core(0x01);
            let crane = CraneChannel::register(core).unwrap();
            crane.inner.lock().unwrap().last_backlog = 9;

            let packet = CranePacket {
                kind: STATUS,
                flags: NAK,
                seq: 4,
                data: [3, 0, 0, 0],
            };
            crane.recv_status(&packet);
            assert_eq!(crane.inner.lock().unwrap().last_backlog, 9);
        });
    }

    #[test]
    fn status_ack_queues_only_for_sane_sequence_numbers() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let core = new_core(0x01);
            let crane = CraneChannel::register(core).unwrap();

            let sentinel = CranePacket {
                kind: STATUS,
                flags: 0,
                seq: 0xFFFF,
                data: [2, 0, 0, 0],
            };
            crane.recv_status(&sentinel);
            assert_eq!(crane.inner.lock().unwrap().last_backlog, 2);

            let mut rx = crane.acks_rx.lock().await;
            assert!(rx.try_recv().is_err());
        });
    }
}
