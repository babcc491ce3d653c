//! SSH public key parsing and fingerprints
//!
//! EC2 reports the fingerprint of an imported key pair in a form that
//! depends on the key type: RSA keys get the MD5 digest of their X.509
//! `SubjectPublicKeyInfo` DER encoding, ed25519 keys get the base64 SHA-256
//! digest of the OpenSSH key blob.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("public key is empty")]
    Empty,
    #[error("public key has no key material after type {0:?}")]
    MissingBody(String),
    #[error("unsupported public key type {0:?}; only RSA and ed25519 keys can be imported")]
    UnsupportedType(String),
    #[error("public key is not valid base64: {0}")]
    InvalidEncoding(String),
    #[error("malformed {key_type} public key: {reason}")]
    Malformed { key_type: KeyType, reason: String },
}

/// Algorithm of an OpenSSH public key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Rsa,
    Ed25519,
}

impl KeyType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ssh-rsa" => Some(Self::Rsa),
            "ssh-ed25519" => Some(Self::Ed25519),
            _ => None,
        }
    }

    /// Key type as the cloud API names it
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ed25519 => "ed25519",
        }
    }

    fn algorithm(&self) -> &'static str {
        match self {
            Self::Rsa => "ssh-rsa",
            Self::Ed25519 => "ssh-ed25519",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Material {
    /// Big-endian two's complement integers, as in the wire format
    Rsa { exponent: Vec<u8>, modulus: Vec<u8> },
    Ed25519,
}

/// A parsed `authorized_keys` style line: `<type> <base64 blob> [comment]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub key_type: KeyType,
    blob: Vec<u8>,
    material: Material,
}

impl PublicKey {
    pub fn parse(line: &str) -> Result<Self, KeyError> {
        let mut fields = line.split_whitespace();
        let algorithm = fields.next().ok_or(KeyError::Empty)?;
        let key_type = KeyType::parse(algorithm)
            .ok_or_else(|| KeyError::UnsupportedType(algorithm.to_string()))?;
        let body = fields
            .next()
            .ok_or_else(|| KeyError::MissingBody(algorithm.to_string()))?;
        let blob = STANDARD
            .decode(body)
            .map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;

        let malformed = |reason: &str| KeyError::Malformed {
            key_type,
            reason: reason.to_string(),
        };
        let mut reader = blob.as_slice();
        let name = read_string(&mut reader).ok_or_else(|| malformed("truncated key type"))?;
        if name != key_type.algorithm().as_bytes() {
            return Err(malformed("encoded key type does not match"));
        }

        let material = match key_type {
            KeyType::Rsa => {
                let exponent = read_string(&mut reader).ok_or_else(|| malformed("truncated exponent"))?;
                let modulus = read_string(&mut reader).ok_or_else(|| malformed("truncated modulus"))?;
                if exponent.is_empty() || modulus.is_empty() {
                    return Err(malformed("empty integer"));
                }
                Material::Rsa {
                    exponent: exponent.to_vec(),
                    modulus: modulus.to_vec(),
                }
            }
            KeyType::Ed25519 => {
                let point = read_string(&mut reader).ok_or_else(|| malformed("truncated key"))?;
                if point.len() != 32 {
                    return Err(malformed("key is not 32 bytes"));
                }
                Material::Ed25519
            }
        };
        if !reader.is_empty() {
            return Err(malformed("trailing data"));
        }

        Ok(Self {
            key_type,
            blob,
            material,
        })
    }

    /// Fingerprint in the form EC2 reports for an imported key, with the
    /// ed25519 form normalized to what `ssh-keygen -lf` prints
    pub fn cloud_fingerprint(&self) -> String {
        match &self.material {
            Material::Rsa { exponent, modulus } => {
                colon_hex(&Md5::digest(rsa_public_key_info(exponent, modulus)))
            }
            Material::Ed25519 => format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(&self.blob))),
        }
    }

    /// MD5 fingerprint of the key blob (`ssh-keygen -E md5 -lf`), used in
    /// generated key pair names
    pub fn openssh_fingerprint(&self) -> String {
        colon_hex(&Md5::digest(&self.blob))
    }
}

/// Read one length-prefixed string of the SSH wire format
fn read_string<'a>(buf: &mut &'a [u8]) -> Option<&'a [u8]> {
    let (len, rest) = buf.split_first_chunk::<4>()?;
    let len = u32::from_be_bytes(*len) as usize;
    if rest.len() < len {
        return None;
    }
    let (value, rest) = rest.split_at(len);
    *buf = rest;
    Some(value)
}

/// rsaEncryption, 1.2.840.113549.1.1.1
const RSA_ENCRYPTION_OID: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];

/// One DER tag-length-value element
fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

/// `SubjectPublicKeyInfo` of an RSA key in DER
///
/// SSH mpints are already minimal two's complement, so they are valid DER
/// INTEGER contents as they are.
fn rsa_public_key_info(exponent: &[u8], modulus: &[u8]) -> Vec<u8> {
    let key = der(0x30, &[der(0x02, modulus), der(0x02, exponent)].concat());
    let algorithm = der(0x30, &[der(0x06, &RSA_ENCRYPTION_OID), vec![0x05, 0x00]].concat());
    let bit_string = der(0x03, &[&[0x00][..], &key[..]].concat());
    der(0x30, &[algorithm, bit_string].concat())
}

fn colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Fingerprint of a public key line as the cloud reports it
pub fn cloud_fingerprint(public_key: &str) -> Result<String, KeyError> {
    Ok(PublicKey::parse(public_key)?.cloud_fingerprint())
}

/// Real keys shared by tests across the crate
#[cfg(test)]
pub mod fixtures {
    pub const RSA: &str = "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQCiP1zXWhvN73/+OhetX7J7QrmI3ekpQjcDiBCDpqASJoDbVS657Glu7UFD32mHJJmjW3TAISUp/VNBC8LqJC7rcl2rLWNkF+sKK29TUlpxJOsfDg2PFIcNUMQX7eNFu+g31um8CwozZs+cK7M+FwtDFMhpKUS2wysFKX46EwKUxXBfutik1UQAMMgSn1fT5Fo61KbdEqCr4x90oDSKbMvFR9kBEiVRoeC2R7n3R9s57TFdEAbnc691idW8Tlr9AMbOjMvlLrK4Tm7lrPu0Qj+alN7kBfEF2dNDHux0806kJonThHkNTtUFb/mqq2Sv8tj05klKVTWcKZMbcNAjxVDj admin@example";
    pub const ED25519: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIMEFsEQ2fkQ5O8+5j8hIwAyQOhMkkW2EdxorZzLjCkuv admin@example";
}
