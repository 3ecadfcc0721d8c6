// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Authenticated packet framing with a shared 32 byte network key.
//!
//! A sealed datagram is `nonce(12) || tag(16) || ciphertext`, produced with
//! ChaCha20Poly1305: the ChaCha20 keystream obfuscates the plaintext and the
//! 128-bit Poly1305 tag authenticates it under the nonce. Peers that do not
//! hold the same key cannot produce a verifying tag, so the key choice
//! partitions overlays: a keyed node drops plain packets (no tag verifies)
//! and an unkeyed node drops sealed ones (the strict codec rejects them).

use crate::error::{Error, Result};
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use rand::Rng;
use std::fmt::{self, Debug, Formatter};

/// Nonce prefix length of a sealed datagram.
pub const NONCE_LEN: usize = 12;
/// Authentication tag length.
pub const TAG_LEN: usize = 16;
/// Total length a sealed datagram adds on top of its plaintext.
pub const SEAL_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// A shared 32 byte secret authenticating all traffic of an overlay.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkKey([u8; 32]);

impl NetworkKey {
    /// The length of a network key in bytes.
    pub const LEN: usize = 32;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Accepts exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| Error::BadKeyLength)?;
        Ok(Self(bytes))
    }

    /// Seal a plaintext datagram: fresh random nonce, then
    /// `nonce || tag || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce);

        let mut body = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), &[], &mut body)
            .expect("datagram-sized plaintext is within AEAD limits");

        let mut wire = Vec::with_capacity(SEAL_OVERHEAD + body.len());
        wire.extend_from_slice(&nonce);
        wire.extend_from_slice(&tag);
        wire.extend_from_slice(&body);
        wire
    }

    /// Open a sealed datagram. Any framing or tag failure collapses into
    /// [`Error::AuthFailed`]; the caller drops the packet without replying.
    pub fn open(&self, wire: &[u8]) -> Result<Vec<u8>> {
        if wire.len() < SEAL_OVERHEAD {
            return Err(Error::AuthFailed);
        }
        let (nonce, rest) = wire.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let mut body = ciphertext.to_vec();
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                &[],
                &mut body,
                Tag::from_slice(tag),
            )
            .map_err(|_| Error::AuthFailed)?;
        Ok(body)
    }
}

impl Debug for NetworkKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // never log key material
        write!(f, "NetworkKey(..)")
    }
}
