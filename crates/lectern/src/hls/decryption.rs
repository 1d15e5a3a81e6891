// Segment decryption: AES-128-CBC with PKCS#7 padding.

use aes::Aes128;
use bytes::Bytes;
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};

use crate::hls::HlsError;
use crate::hls::config::IvPolicy;
use crate::hls::keys::ResolvedKey;
use crate::hls::playlist::MediaSegment;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// IV for a key directive without an explicit one: the sequence number as a
/// 16-byte big-endian integer.
pub fn derive_iv(sequence: impl Into<u128>) -> [u8; 16] {
    sequence.into().to_be_bytes()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentDecryptor {
    iv_policy: IvPolicy,
    media_sequence: u64,
}

impl SegmentDecryptor {
    pub fn new(iv_policy: IvPolicy, media_sequence: u64) -> Self {
        Self {
            iv_policy,
            media_sequence,
        }
    }

    pub fn iv_for(&self, segment: &MediaSegment) -> [u8; 16] {
        if let Some(iv) = segment.iv {
            return iv;
        }
        match self.iv_policy {
            IvPolicy::SegmentIndex => derive_iv(segment.index),
            // the sum may exceed u64::MAX
            IvPolicy::MediaSequence => {
                derive_iv(u128::from(self.media_sequence) + u128::from(segment.index))
            }
        }
    }

    /// Decrypts one segment body. Without a key the data passes through.
    pub fn decrypt(
        &self,
        segment: &MediaSegment,
        key: Option<&ResolvedKey>,
        data: Bytes,
    ) -> Result<Bytes, HlsError> {
        let Some(key) = key else {
            return Ok(data);
        };
        decrypt_aes128_cbc(&data, key.as_bytes(), &self.iv_for(segment)).map_err(|reason| {
            HlsError::DecryptionFailed {
                segment: segment.index,
                reason,
            }
        })
    }
}

fn decrypt_aes128_cbc(data: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Result<Bytes, String> {
    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| format!("Failed to initialize AES decryptor: {e}"))?;
    let plain = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|e| format!("Decryption failed: {e}"))?;
    Ok(Bytes::from(plain))
}
