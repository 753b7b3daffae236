use crate::error::{LinkError, Result};

pub const KEYSTORE_SIZE: usize = 4;

/// Fixed-slot table of AES-256 keys, addressed by a one-byte index.
/// Slots 0 and 1 are pre-loaded with the network's well-known shared keys.
pub struct Keystore {
    slots: [Option<[u8; 32]>; KEYSTORE_SIZE],
}

/// Baseline pre-shared keys, reproduced from the firmware's
/// `base_shared_key` / `alt_shared_key` little-endian word arrays.
fn words_to_key(words: [u32; 8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    for (i, word) in words.iter().enumerate() {
        key[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    key
}

const BASE_SHARED_KEY_WORDS: [u32; 8] = [
    0xc0c71cc5, 0x748ce81a, 0x4b0e4aa7, 0x70c0d55e, 0x58957e01, 0xed51d8cc, 0x26b844c4, 0x49c50530,
];

const ALT_SHARED_KEY_WORDS: [u32; 8] = [
    0x0b7b9b81, 0x350ecef1, 0x7a7b0fbb, 0xe9f134d2, 0x33bffa82, 0xc7c82730, 0x4861bba3, 0x44e44aba,
];

/// The command channel's RSA-2048 signing public key, embedded at build
/// time exactly as the firmware's `lownet_public_key` constant is.
pub const SIGNING_PUBLIC_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAxG9VF9wuocepQnwBkxUb
4YxCo1NJ1MAKAGoaK2csfPABSRkjlESev42rFVzejGtOp2pxKcyihDXVe1BEzD0q
HXxEgtkRy0/bJNhGxoMmWTbikO3BmIMIO9zIk3leaNtyy49U27CKDgUHOPp6zd3c
dgD3nE4fIE7tU3mCJ4xh5xMHeyoqa/MV3EkE9VDV2vCTP3KyKDFObYqig6XWydeQ
CPmSAr0rRYiriguOvQGGxPeaCWPaUAG+t2W7ydpeju+Dkzl6NHm0q9JdLfpg8zje
BgLekdFxyM4jAK2hCX+vswUrYqbm5m9rptxQUuSYpk27Ew7uWRaomAWWeMLIg+zt
rwIDAQAB
-----END PUBLIC KEY-----";

impl Keystore {
    pub fn empty() -> Self {
        Keystore {
            slots: [None; KEYSTORE_SIZE],
        }
    }

    /// Keystore pre-filled with the network's baseline pre-shared keys,
    /// as `lownet_init` does at bring-up.
    pub fn with_baseline() -> Self {
        let mut store = Self::empty();
        store.write(0, words_to_key(BASE_SHARED_KEY_WORDS)).unwrap();
        store.write(1, words_to_key(ALT_SHARED_KEY_WORDS)).unwrap();
        store
    }

    pub fn write(&mut self, index: u8, key: [u8; 32]) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(LinkError::InvalidKeystoreSlot(index))?;
        *slot = Some(key);
        Ok(())
    }

    pub fn read(&self, index: u8) -> Option<[u8; 32]> {
        self.slots.get(index as usize).copied().flatten()
    }

    pub fn clear(&mut self, index: u8) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(LinkError::InvalidKeystoreSlot(index))?;
        *slot = None;
        Ok(())
    }
}

impl Default for Keystore {
    fn default() -> Self {
        Self::with_baseline()
    }
}
