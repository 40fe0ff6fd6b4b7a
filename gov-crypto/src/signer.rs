// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

use std::error::Error as StdError;

use thiserror::Error;

use crate::keys::{PublicKey, SecretKey, Signature};

/// Something that can produce Ed25519 signatures on behalf of an actor.
///
/// The identity adapter hands the engine one of these rather than the raw
/// key material, so that key storage (file, agent, remote KMS) stays out of
/// the signing path.
pub trait Signer: Send + Sync + dyn_clone::DynClone + 'static {
    fn public_key(&self) -> PublicKey;

    fn sign(&self, data: &[u8]) -> Result<Signature, BoxedSignError>;
}

/// A boxed error used as the uniform error type of dynamic signers.
///
/// Key storage backends fail in backend-specific ways; by the time a
/// signer reaches the engine those are erased to this.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BoxedSignError(Box<dyn StdError + Send + Sync + 'static>);

impl BoxedSignError {
    /// Turn any error into a `BoxedSignError`.
    pub fn from_std_error<T>(other: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        Self(Box::new(other))
    }
}

/// A dynamic [`Signer`].
pub struct BoxedSigner {
    signer: Box<dyn Signer>,
}

impl BoxedSigner {
    pub fn new<S>(signer: S) -> Self
    where
        S: Signer,
    {
        BoxedSigner {
            signer: Box::new(signer),
        }
    }
}

impl Clone for BoxedSigner {
    fn clone(&self) -> Self {
        BoxedSigner {
            signer: dyn_clone::clone_box(&*self.signer),
        }
    }
}

impl std::fmt::Debug for BoxedSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedSigner").finish_non_exhaustive()
    }
}

impl Signer for BoxedSigner {
    fn public_key(&self) -> PublicKey {
        self.signer.public_key()
    }

    fn sign(&self, data: &[u8]) -> Result<Signature, BoxedSignError> {
        self.signer.sign(data)
    }
}

impl Signer for SecretKey {
    fn public_key(&self) -> PublicKey {
        self.public()
    }

    fn sign(&self, data: &[u8]) -> Result<Signature, BoxedSignError> {
        Ok(SecretKey::sign(self, data))
    }
}

impl From<SecretKey> for BoxedSigner {
    fn from(key: SecretKey) -> Self {
        BoxedSigner::new(key)
    }
}
