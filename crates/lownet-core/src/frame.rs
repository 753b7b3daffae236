//! Wire layout of the two frame kinds exchanged over the radio: the plain
//! 212-byte frame and the 228-byte secure frame wrapping it.

use bytes::{Buf, BufMut, BytesMut};
use rand::RngCore;

pub const PLAIN_MAGIC: [u8; 2] = [0x10, 0x4e];
pub const CIPHER_MAGIC: [u8; 2] = [0x20, 0x4e];

pub const PAYLOAD_SIZE: usize = 200;
pub const FRAME_SIZE: usize = 212;
pub const SECURE_FRAME_SIZE: usize = 228;
pub const IVT_SIZE: usize = 16;
/// Bytes of a secure frame left unencrypted: magic + source + destination.
pub const UNENCRYPTED_SIZE: usize = 4;
/// Bytes of a secure frame that are encrypted: protocol..crc.
pub const ENCRYPTED_SIZE: usize = 208;

/// The 212-byte unencrypted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainFrame {
    pub source: u8,
    pub destination: u8,
    pub protocol: u8,
    pub length: u8,
    pub payload: [u8; PAYLOAD_SIZE],
    pub crc: u32,
}

impl PlainFrame {
    pub fn new(source: u8, destination: u8, protocol: u8, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= PAYLOAD_SIZE);
        let mut buf = [0u8; PAYLOAD_SIZE];
        buf[..payload.len()].copy_from_slice(payload);
        PlainFrame {
            source,
            destination,
            protocol,
            length: payload.len() as u8,
            payload: buf,
            crc: 0,
        }
    }

    /// Fills unused payload bytes with RNG noise, as the send path does to
    /// improve frame entropy ahead of encryption.
    pub fn pad_with_entropy(&mut self, rng: &mut impl RngCore) {
        let used = self.length as usize;
        if used < PAYLOAD_SIZE {
            let mut noise = vec![0u8; PAYLOAD_SIZE - used];
            rng.fill_bytes(&mut noise);
            self.payload[used..].copy_from_slice(&noise);
        }
    }

    /// The header+payload bytes the CRC is computed over (everything but
    /// the trailing CRC field itself).
    fn crc_region(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_SIZE - 4);
        buf.put_slice(&PLAIN_MAGIC);
        buf.put_u8(self.source);
        buf.put_u8(self.destination);
        buf.put_u8(self.protocol);
        buf.put_u8(self.length);
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_slice(&self.payload);
        buf
    }

    pub fn compute_crc(&self) -> u32 {
        crate::crc::crc25(&self.crc_region())
    }

    pub fn with_computed_crc(mut self) -> Self {
        self.crc = self.compute_crc();
        self
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = self.crc_region();
        buf.put_u32_le(self.crc);
        buf
    }

    pub fn from_bytes(mut data: &[u8]) -> Option<Self> {
        if data.len() != FRAME_SIZE {
            return None;
        }
        if data[0..2] != PLAIN_MAGIC {
            return None;
        }
        data.advance(2);
        let source = data.get_u8();
        let destination = data.get_u8();
        let protocol = data.get_u8();
        let length = data.get_u8();
        data.advance(2);
        let mut payload = [0u8; PAYLOAD_SIZE];
        data.copy_to_slice(&mut payload);
        let crc = data.get_u32_le();
        Some(PlainFrame {
            source,
            destination,
            protocol,
            length,
            payload,
            crc,
        })
    }

    pub fn crc_is_valid(&self) -> bool {
        self.compute_crc() == self.crc
    }
}

/// The 228-byte encrypted frame: a 4-byte plaintext header, a 16-byte IV,
/// and a 208-byte encrypted region covering everything the plain frame
/// carries after its own header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureFrame {
    pub source: u8,
    pub destination: u8,
    pub iv: [u8; IVT_SIZE],
    /// `protocol, length, padding[2], payload[200], crc` — plaintext before
    /// encryption, ciphertext after.
    pub body: [u8; ENCRYPTED_SIZE],
}

impl SecureFrame {
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(SECURE_FRAME_SIZE);
        buf.put_slice(&CIPHER_MAGIC);
        buf.put_u8(self.source);
        buf.put_u8(self.destination);
        buf.put_slice(&self.iv);
        buf.put_slice(&self.body);
        buf
    }

    pub fn from_bytes(mut data: &[u8]) -> Option<Self> {
        if data.len() != SECURE_FRAME_SIZE {
            return None;
        }
        if data[0..2] != CIPHER_MAGIC {
            return None;
        }
        data.advance(2);
        let source = data.get_u8();
        let destination = data.get_u8();
        let mut iv = [0u8; IVT_SIZE];
        data.copy_to_slice(&mut iv);
        let mut body = [0u8; ENCRYPTED_SIZE];
        data.copy_to_slice(&mut body);
        Some(SecureFrame {
            source,
            destination,
            iv,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn plain_frame_roundtrips_through_bytes() {
        let mut frame = PlainFrame::new(0x01, 0x02, 0x02, b"hello");
        frame.crc = frame.compute_crc();
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), FRAME_SIZE);

        let parsed = PlainFrame::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, frame);
        assert!(parsed.crc_is_valid());
    }

    #[test]
    fn invalid_magic_is_rejected() {
        let mut bytes = PlainFrame::new(1, 2, 2, b"x").with_computed_crc().to_bytes();
        bytes[0] = 0x00;
        assert!(PlainFrame::from_bytes(&bytes).is_none());
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(PlainFrame::from_bytes(&[0u8; 10]).is_none());
    }

    #[test]
    fn entropy_padding_only_touches_unused_bytes() {
        let mut frame = PlainFrame::new(1, 2, 2, b"hi");
        let mut rng = StepRng::new(0xAA, 1);
        frame.pad_with_entropy(&mut rng);
        assert_eq!(&frame.payload[0..2], b"hi");
        assert_ne!(frame.payload[2], 0);
    }

    #[test]
    fn secure_frame_roundtrips_through_bytes() {
        let secure = SecureFrame {
            source: 1,
            destination: 2,
            iv: [9u8; IVT_SIZE],
            body: [1u8; ENCRYPTED_SIZE],
        };
        let bytes = secure.to_bytes();
        assert_eq!(bytes.len(), SECURE_FRAME_SIZE);
        let parsed = SecureFrame::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, secure);
    }
}
