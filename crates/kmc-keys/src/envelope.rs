//! Self-describing buffer ciphertext layout
//!
//! `version(1) | domain_id(i32 BE) | key_id(i32 BE) | nonce(12) | ciphertext || tag(16)`
//!
//! The 9-byte prefix is bound to the ciphertext as associated data.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{KeyError, KeyResult};
use crate::key_types::{DomainId, KeyId};

pub const ENVELOPE_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 9;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Key reference carried in front of every ciphertext
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub domain_id: DomainId,
    pub key_id: KeyId,
}

impl EnvelopeHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = ENVELOPE_VERSION;
        out[1..5].copy_from_slice(&self.domain_id.to_be_bytes());
        out[5..9].copy_from_slice(&self.key_id.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> KeyResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(invalid("header truncated"));
        }
        if bytes[0] != ENVELOPE_VERSION {
            return Err(invalid(&format!("unsupported version {}", bytes[0])));
        }
        let domain_id = DomainId::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let key_id = KeyId::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        if domain_id < 0 || key_id < 0 {
            return Err(invalid("negative key reference"));
        }
        Ok(Self { domain_id, key_id })
    }
}

/// Borrowed view of a decoded envelope
#[derive(Debug)]
pub struct Envelope<'a> {
    pub header: EnvelopeHeader,
    pub nonce: [u8; NONCE_LEN],
    pub sealed: &'a [u8],
}

pub fn encode(header: &EnvelopeHeader, nonce: &[u8; NONCE_LEN], sealed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + sealed.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(nonce);
    out.extend_from_slice(sealed);
    out
}

pub fn decode(bytes: &[u8]) -> KeyResult<Envelope<'_>> {
    if bytes.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
        return Err(invalid("ciphertext too short"));
    }
    let header = EnvelopeHeader::decode(&bytes[..HEADER_LEN])?;
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&bytes[HEADER_LEN..HEADER_LEN + NONCE_LEN]);

    Ok(Envelope {
        header,
        nonce,
        sealed: &bytes[HEADER_LEN + NONCE_LEN..],
    })
}

fn invalid(reason: &str) -> KeyError {
    KeyError::Crypto(format!("Invalid ciphertext: {}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = EnvelopeHeader {
            domain_id: 1,
            key_id: 7,
        };
        assert_eq!(header.encode(), [1, 0, 0, 0, 1, 0, 0, 0, 7]);
        assert_eq!(EnvelopeHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(decode(&[1u8; 20]), Err(KeyError::Crypto(_))));

        let mut bytes = encode(
            &EnvelopeHeader {
                domain_id: 2,
                key_id: 3,
            },
            &[0u8; NONCE_LEN],
            &[0u8; TAG_LEN],
        );
        assert!(decode(&bytes).is_ok());

        bytes[0] = 9;
        assert!(matches!(decode(&bytes), Err(KeyError::Crypto(_))));

        bytes[0] = ENVELOPE_VERSION;
        bytes[1] = 0x80;
        assert!(matches!(decode(&bytes), Err(KeyError::Crypto(_))));
    }
}
