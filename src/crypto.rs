//! LoRaWAN application payload cipher.
//!
//! FRMPayload is encrypted by XOR with a keystream made of AES-128 encryptions of
//! the `A_i` counter blocks:
//!
//! ```text
//! 0x01 | 0x00 x4 | dir | DevAddr (LE) | FCnt (LE, 32 bit) | 0x00 | i
//! ```
//!
//! Only uplinks are handled (`dir = 0`). The block index `i` is a single byte and
//! wraps mod 256, so payloads longer than 4096 bytes reuse keystream. The radio
//! layer caps FRMPayload far below that.

use crate::error::{BridgeError, Result};
use crate::types::parse_dev_addr;
use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use std::collections::HashMap;

const BLOCK: usize = 16;

fn counter_block(dev_addr: &[u8; 4], fcnt: u32, index: usize) -> [u8; BLOCK] {
    let ctr = fcnt.to_le_bytes();
    [
        0x01,
        0x00,
        0x00,
        0x00,
        0x00,
        0x00,
        dev_addr[3],
        dev_addr[2],
        dev_addr[1],
        dev_addr[0],
        ctr[0],
        ctr[1],
        ctr[2],
        ctr[3],
        0x00,
        (index & 0xFF) as u8,
    ]
}

/// Decrypts an uplink FRMPayload. `dev_addr` is big-endian, as operators print it.
pub fn decrypt_payload(data: &[u8], dev_addr: &[u8; 4], app_skey: &[u8; 16], fcnt: u32) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(app_skey));
    let mut out = Vec::with_capacity(data.len());
    for (n, chunk) in data.chunks(BLOCK).enumerate() {
        let mut keystream = GenericArray::clone_from_slice(&counter_block(dev_addr, fcnt, n + 1));
        cipher.encrypt_block(&mut keystream);
        out.extend(chunk.iter().zip(keystream.iter()).map(|(c, k)| c ^ k));
    }
    out
}

/// Encryption is the same keystream XOR.
pub fn encrypt_payload(data: &[u8], dev_addr: &[u8; 4], app_skey: &[u8; 16], fcnt: u32) -> Vec<u8> {
    decrypt_payload(data, dev_addr, app_skey, fcnt)
}

/// Session material for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceKeys {
    pub dev_addr: Option<[u8; 4]>,
    pub app_skey: [u8; 16],
}

impl DeviceKeys {
    pub fn from_hex(dev_addr: Option<&str>, app_skey: &str) -> Result<Self> {
        let key = hex::decode(app_skey.trim())
            .map_err(|e| BridgeError::Crypto(format!("AppSKey is not hex: {}", e)))?;
        let app_skey: [u8; 16] = key
            .try_into()
            .map_err(|_| BridgeError::Crypto("AppSKey must be 16 bytes".into()))?;
        let dev_addr = dev_addr.map(parse_dev_addr).transpose()?;
        Ok(Self { dev_addr, app_skey })
    }
}

/// Device keys indexed by lower-case EUI.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    keys: HashMap<String, DeviceKeys>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, eui: &str, keys: DeviceKeys) {
        self.keys.insert(eui.to_ascii_lowercase(), keys);
    }

    pub fn get(&self, eui: &str) -> Option<&DeviceKeys> {
        self.keys.get(&eui.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: [u8; 4] = [0x26, 0x01, 0x1b, 0xda];
    const KEY: [u8; 16] = [
        0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f,
        0x3c,
    ];

    #[test]
    fn test_known_uplink_vector() {
        // PHYPayload 40F17DBE4900020001954378762B11FF0D: DevAddr 49BE7DF1, FCnt 2, FRMPayload 95437876
        let app_skey: [u8; 16] = hex::decode("ec925802ae430ca77fd3dd73cb2cc588")
            .unwrap()
            .try_into()
            .unwrap();
        let plain = decrypt_payload(&[0x95, 0x43, 0x78, 0x76], &[0x49, 0xbe, 0x7d, 0xf1], &app_skey, 2);
        assert_eq!(plain, b"test");
    }

    #[test]
    fn test_round_trip_lengths() {
        for len in [1usize, 15, 16, 17, 4096] {
            let plain: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let cipher = encrypt_payload(&plain, &ADDR, &KEY, 0x0001_0203);
            assert_eq!(cipher.len(), len);
            if len >= 15 {
                assert_ne!(cipher, plain, "length {} was not transformed", len);
            }
            assert_eq!(decrypt_payload(&cipher, &ADDR, &KEY, 0x0001_0203), plain);
        }
    }

    #[test]
    fn test_block_index_wraps_after_4096_bytes() {
        let keystream = encrypt_payload(&[0u8; 4112], &ADDR, &KEY, 7);
        // block 256 uses index 0, still distinct from block 1
        assert_ne!(keystream[4080..4096], keystream[0..16]);
        assert_eq!(keystream[4096..4112], keystream[0..16]);
    }

    #[test]
    fn test_counter_changes_keystream() {
        let plain = [0u8; 16];
        let a = encrypt_payload(&plain, &ADDR, &KEY, 1);
        let b = encrypt_payload(&plain, &ADDR, &KEY, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_counter_block_layout() {
        let block = counter_block(&[0x49, 0xbe, 0x7d, 0xf1], 0x0403_0201, 258);
        assert_eq!(
            block,
            [1, 0, 0, 0, 0, 0, 0xf1, 0x7d, 0xbe, 0x49, 1, 2, 3, 4, 0, 2]
        );
    }

    #[test]
    fn test_device_keys_from_hex() {
        let keys = DeviceKeys::from_hex(Some("26011BDA"), "2B7E151628AED2A6ABF7158809CF4F3C").unwrap();
        assert_eq!(keys.dev_addr, Some(ADDR));
        assert_eq!(keys.app_skey, KEY);
        assert!(DeviceKeys::from_hex(None, "2b7e15").is_err());
    }
}
