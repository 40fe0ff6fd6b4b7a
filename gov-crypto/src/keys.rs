// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

use std::{convert::TryFrom, fmt};

use ed25519_zebra as ed25519;
use rand::RngCore;
use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use zeroize::Zeroize;

pub const PUBLICKEYBYTES: usize = 32;
pub const SIGNATUREBYTES: usize = 64;

/// An actor's Ed25519 signing key.
///
/// Only the 32-byte seed is retained; the expanded key is derived on demand
/// and the seed is wiped on drop.
#[derive(Clone, Zeroize)]
#[cfg_attr(test, derive(Debug))]
#[zeroize(drop)]
pub struct SecretKey([u8; 32]);

/// The public part of a [`SecretKey`].
///
/// On the wire this is the padded base64 of the 32 raw bytes, as it appears
/// in the `publicKey` field of actor records.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; PUBLICKEYBYTES]);

/// A signature produced by [`SecretKey::sign`].
///
/// On the wire: base64 of the 64 raw bytes, 86 significant chars plus `==`
/// padding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Signature(ed25519::Signature);

// SecretKey

#[allow(clippy::new_without_default)]
impl SecretKey {
    pub fn new() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self(seed)
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self(seed)
    }

    pub fn public(&self) -> PublicKey {
        let vk = ed25519::VerificationKey::from(&ed25519::SigningKey::from(self.0));
        PublicKey(vk.into())
    }

    pub fn sign(&self, data: &[u8]) -> Signature {
        Signature(ed25519::SigningKey::from(self.0).sign(data))
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.public().fmt(f)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IntoSecretKeyError {
    #[error("invalid length")]
    InvalidSliceLength,
}

impl TryFrom<&[u8]> for SecretKey {
    type Error = IntoSecretKeyError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        <[u8; 32]>::try_from(bytes)
            .map(Self)
            .map_err(|_| IntoSecretKeyError::InvalidSliceLength)
    }
}

// PublicKey

impl PublicKey {
    pub fn verify(&self, sig: &Signature, data: &[u8]) -> bool {
        ed25519::VerificationKey::try_from(self.0)
            .and_then(|vk| vk.verify(&sig.0, data))
            .is_ok()
    }

    pub fn from_slice(bs: &[u8]) -> Option<PublicKey> {
        <[u8; PUBLICKEYBYTES]>::try_from(bs).map(PublicKey).ok()
    }
}

impl From<SecretKey> for PublicKey {
    fn from(k: SecretKey) -> Self {
        k.public()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base64::encode(self.0))
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        base64::encode(self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PublicKeyVisitor;

        impl<'de> Visitor<'de> for PublicKeyVisitor {
            type Value = PublicKey;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a base64-encoded ed25519 public key")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let bytes = base64::decode(s).map_err(serde::de::Error::custom)?;
                PublicKey::from_slice(&bytes).ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "invalid length {} for ed25519 public key",
                        bytes.len()
                    ))
                })
            }
        }

        deserializer.deserialize_str(PublicKeyVisitor)
    }
}

// Signature

impl Signature {
    pub fn verify(&self, data: &[u8], pk: &PublicKey) -> bool {
        pk.verify(self, data)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bytes: [u8; SIGNATUREBYTES] = self.0.into();
        f.write_str(&base64::encode(bytes))
    }
}

impl From<Signature> for [u8; SIGNATUREBYTES] {
    fn from(sig: Signature) -> [u8; SIGNATUREBYTES] {
        sig.0.into()
    }
}

impl From<[u8; SIGNATUREBYTES]> for Signature {
    fn from(bytes: [u8; SIGNATUREBYTES]) -> Self {
        Self(ed25519::Signature::from(bytes))
    }
}

#[derive(Debug, Error)]
#[error("invalid length for an ed25519 signature")]
pub struct InvalidSignatureLength;

impl TryFrom<&[u8]> for Signature {
    type Error = InvalidSignatureLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        <[u8; SIGNATUREBYTES]>::try_from(bytes)
            .map(Self::from)
            .map_err(|_| InvalidSignatureLength)
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bytes: [u8; SIGNATUREBYTES] = self.0.into();
        base64::encode(bytes).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SignatureVisitor;

        impl<'de> Visitor<'de> for SignatureVisitor {
            type Value = Signature;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a base64-encoded ed25519 signature")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let bytes = base64::decode(s).map_err(serde::de::Error::custom)?;
                Signature::try_from(bytes.as_slice()).map_err(|_| {
                    serde::de::Error::custom(format!(
                        "invalid length {} for ed25519 signature",
                        bytes.len()
                    ))
                })
            }
        }

        deserializer.deserialize_str(SignatureVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let key = SecretKey::new();
        let sig = key.sign(b"in governance we trust");
        assert!(key.public().verify(&sig, b"in governance we trust"));
        assert!(!key.public().verify(&sig, b"in governance we rust"));
    }

    #[test]
    fn seed_determines_public_key() {
        let a = SecretKey::from_seed([7u8; 32]);
        let b = SecretKey::from_seed([7u8; 32]);
        assert_eq!(a.public(), b.public());
    }

    #[test]
    fn signature_wire_format_is_88_chars_padded() {
        let key = SecretKey::from_seed([3u8; 32]);
        let encoded = key.sign(b"x").to_string();
        assert_eq!(encoded.len(), 88);
        assert!(encoded.ends_with("=="));
    }

    #[test]
    fn serde_roundtrip() {
        let key = SecretKey::from_seed([9u8; 32]);
        let sig = key.sign(b"payload");

        let pk_json = serde_json::to_string(&key.public()).unwrap();
        let pk: PublicKey = serde_json::from_str(&pk_json).unwrap();
        assert_eq!(pk, key.public());

        let sig_json = serde_json::to_string(&sig).unwrap();
        let sig2: Signature = serde_json::from_str(&sig_json).unwrap();
        assert_eq!(sig2, sig);
    }
}
