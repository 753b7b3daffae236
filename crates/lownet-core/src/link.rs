//! The link core: frame send/receive path, protocol registry, and the two
//! background tasks (decrypt worker, dispatcher) that drive inbound traffic.

use std::sync::{Arc, Mutex};

use rand::RngCore;
use rand::rngs::OsRng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::crypto;
use crate::error::{LinkError, Result};
use crate::frame::{ENCRYPTED_SIZE, FRAME_SIZE, IVT_SIZE, PAYLOAD_SIZE, PlainFrame, SECURE_FRAME_SIZE, SecureFrame};
use crate::identity::BROADCAST_ID;
use crate::time::{Time, TimeSync};

pub const MAX_PROTOCOLS: usize = 10;
const QUEUE_CAPACITY: usize = 16;

/// The out-of-scope radio/broadcast driver's contract: a single blocking
/// transmit call. Concrete transports (e.g. UDP broadcast) implement this.
pub trait RadioTransport: Send + Sync {
    fn transmit(&self, bytes: &[u8]) -> std::io::Result<()>;
}

type ProtocolHandler = Arc<dyn Fn(&PlainFrame) + Send + Sync>;

struct ProtocolEntry {
    protocol: u8,
    handler: ProtocolHandler,
}

pub struct LinkCore {
    local_id: u8,
    transport: Arc<dyn RadioTransport>,
    protocols: Mutex<Vec<ProtocolEntry>>,
    active_key: Mutex<Option<[u8; 32]>>,
    time_sync: Mutex<TimeSync>,
    inbound_tx: mpsc::Sender<PlainFrame>,
    decrypt_tx: mpsc::Sender<SecureFrame>,
}

impl LinkCore {
    pub fn new(local_id: u8, transport: Arc<dyn RadioTransport>) -> Arc<LinkCore> {
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (decrypt_tx, decrypt_rx) = mpsc::channel(QUEUE_CAPACITY);

        let core = Arc::new(LinkCore {
            local_id,
            transport,
            protocols: Mutex::new(Vec::with_capacity(MAX_PROTOCOLS)),
            active_key: Mutex::new(None),
            time_sync: Mutex::new(TimeSync::new()),
            inbound_tx: inbound_tx.clone(),
            decrypt_tx,
        });

        let dispatcher_core = Arc::clone(&core);
        tokio::spawn(async move { dispatcher_core.run_dispatcher(inbound_rx).await });

        let decrypt_core = Arc::clone(&core);
        tokio::spawn(async move { decrypt_core.run_decrypt_worker(decrypt_rx, inbound_tx).await });

        core
    }

    pub fn local_id(&self) -> u8 {
        self.local_id
    }

    /// Registers a synchronous frame handler for `protocol`. Handlers must
    /// not block indefinitely; the dispatcher calls them inline.
    pub fn register_handler(
        &self,
        protocol: u8,
        handler: impl Fn(&PlainFrame) + Send + Sync + 'static,
    ) -> Result<()> {
        let mut protocols = self.protocols.lock().unwrap();
        if protocols.iter().any(|p| p.protocol == protocol) {
            return Err(LinkError::ProtocolAlreadyRegistered(protocol));
        }
        if protocols.len() >= MAX_PROTOCOLS {
            return Err(LinkError::RegistryFull(MAX_PROTOCOLS));
        }
        protocols.push(ProtocolEntry {
            protocol,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    fn handler_for(&self, protocol: u8) -> Option<ProtocolHandler> {
        let protocols = self.protocols.lock().unwrap();
        protocols
            .iter()
            .find(|p| p.protocol == protocol)
            .map(|p| Arc::clone(&p.handler))
    }

    pub fn set_active_key(&self, key: Option<[u8; 32]>) {
        *self.active_key.lock().unwrap() = key;
    }

    pub fn has_active_key(&self) -> bool {
        self.active_key.lock().unwrap().is_some()
    }

    pub fn get_time(&self) -> Time {
        self.time_sync.lock().unwrap().get()
    }

    pub fn set_time(&self, time: Time) {
        self.time_sync.lock().unwrap().set(time);
    }

    /// Builds a frame, encrypts it if a key is active, and hands the wire
    /// bytes to the transport. `destination` may be [`BROADCAST_ID`].
    pub fn send(&self, destination: u8, protocol: u8, payload: &[u8]) -> Result<()> {
        if payload.len() > PAYLOAD_SIZE {
            return Err(LinkError::PayloadTooLarge(payload.len(), PAYLOAD_SIZE));
        }

        let mut frame = PlainFrame::new(self.local_id, destination, protocol, payload);
        let mut rng = OsRng;
        frame.pad_with_entropy(&mut rng);
        frame.crc = frame.compute_crc();

        let key = *self.active_key.lock().unwrap();
        let wire = match key {
            Some(key) => {
                let plain_bytes = frame.to_bytes();
                let body_plain = &plain_bytes[FRAME_SIZE - ENCRYPTED_SIZE..];
                debug_assert_eq!(body_plain.len(), ENCRYPTED_SIZE);

                let mut iv = [0u8; IVT_SIZE];
                rng.fill_bytes(&mut iv);
                let encrypted = crypto::aes256_cbc_encrypt(&key, &iv, body_plain);

                let mut body = [0u8; ENCRYPTED_SIZE];
                body.copy_from_slice(&encrypted);
                let secure = SecureFrame {
                    source: self.local_id,
                    destination,
                    iv,
                    body,
                };
                secure.to_bytes()
            }
            None => frame.to_bytes(),
        };

        self.transport.transmit(&wire).map_err(LinkError::Transport)
    }

    /// Radio callback: classifies and enqueues inbound wire bytes. Must not
    /// block — uses a non-blocking send on the appropriate queue, dropping
    /// the frame if that queue is full.
    pub fn inbound_raw(&self, data: &[u8]) {
        let key_active = self.has_active_key();
        if data.len() == FRAME_SIZE && !key_active {
            if let Some(frame) = PlainFrame::from_bytes(data)
                && self.inbound_tx.try_send(frame).is_err()
            {
                debug!("inbound queue full, dropping plain frame");
            }
        } else if data.len() == SECURE_FRAME_SIZE && key_active {
            if let Some(secure) = SecureFrame::from_bytes(data)
                && self.decrypt_tx.try_send(secure).is_err()
            {
                debug!("decrypt queue full, dropping secure frame");
            }
        }
    }

    async fn run_decrypt_worker(
        self: Arc<Self>,
        mut decrypt_rx: mpsc::Receiver<SecureFrame>,
        inbound_tx: mpsc::Sender<PlainFrame>,
    ) {
        while let Some(secure) = decrypt_rx.recv().await {
            let key = match *self.active_key.lock().unwrap() {
                Some(key) => key,
                None => continue,
            };
            let plain_body = crypto::aes256_cbc_decrypt(&key, &secure.iv, &secure.body);

            let protocol = plain_body[0];
            let length = plain_body[1];
            let mut payload = [0u8; PAYLOAD_SIZE];
            payload.copy_from_slice(&plain_body[4..4 + PAYLOAD_SIZE]);
            let crc = u32::from_le_bytes(plain_body[4 + PAYLOAD_SIZE..].try_into().unwrap());

            let frame = PlainFrame {
                source: secure.source,
                destination: secure.destination,
                protocol,
                length,
                payload,
                crc,
            };

            if inbound_tx.try_send(frame).is_err() {
                debug!("inbound queue full, dropping decrypted frame");
            }
        }
    }

    async fn run_dispatcher(self: Arc<Self>, mut inbound_rx: mpsc::Receiver<PlainFrame>) {
        while let Some(frame) = inbound_rx.recv().await {
            if !frame.crc_is_valid() {
                debug!("CRC error, dropping frame");
                continue;
            }
            if frame.source == BROADCAST_ID {
                continue;
            }
            if frame.destination != self.local_id && frame.destination != BROADCAST_ID {
                continue;
            }

            let tag = frame.protocol & 0b0011_1111;
            match self.handler_for(tag) {
                Some(handler) => handler(&frame),
                None => debug!(protocol = format!("{tag:#04x}"), "no handler registered"),
            }
        }
        warn!("dispatcher task exiting, inbound channel closed");
    }
}

/// Convenience used by the keystore-backed `/setkey` flow.
pub fn activate_key(core: &LinkCore, key: Option<[u8; 32]>) {
    core.set_active_key(key);
    match key {
        Some(_) => info!("encryption enabled"),
        None => info!("encryption disabled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    #[tokio::test]
    async fn plain_send_is_received_by_a_registered_handler() {
        let transport = Arc::new(LoopbackTransport {
            core: Mutex::new(None),
        });
        let core = LinkCore::new(0x01, transport.clone() as Arc<dyn RadioTransport>);
        *transport.core.lock().unwrap() = Some(Arc::clone(&core));

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);
        core.register_handler(0x02, move |_frame| {
            received_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        core.send(BROADCAST_ID, 0x02, b"hi").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn encrypted_round_trip_reaches_the_handler() {
        let transport = Arc::new(LoopbackTransport {
            core: Mutex::new(None),
        });
        let core = LinkCore::new(0x01, transport.clone() as Arc<dyn RadioTransport>);
        *transport.core.lock().unwrap() = Some(Arc::clone(&core));
        core.set_active_key(Some([7u8; 32]));

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);
        core.register_handler(0x02, move |frame| {
            assert_eq!(&frame.payload[..5], b"hello");
            received_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        core.send(BROADCAST_ID, 0x02, b"hello").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registering_the_same_protocol_twice_errors() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let transport = Arc::new(LoopbackTransport {
                core: Mutex::new(None),
            });
            let core = LinkCore::new(0x01, transport as Arc<dyn RadioTransport>);
            core.register_handler(0x02, |_| {}).unwrap();
            assert!(core.register_handler(0x02, |_| {}).is_err());
        });
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let transport = Arc::new(LoopbackTransport {
                core: Mutex::new(None),
            });
            let core = LinkCore::new(0x01, transport as Arc<dyn RadioTransport>);
            let oversized = vec![0u8; PAYLOAD_SIZE + 1];
            assert!(core.send(BROADCAST_ID, 0x02, &oversized).is_err());
        });
    }
}
