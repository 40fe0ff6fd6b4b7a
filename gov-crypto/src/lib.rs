// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

mod keys;
pub use keys::{
    IntoSecretKeyError,
    InvalidSignatureLength,
    PublicKey,
    SecretKey,
    Signature,
    PUBLICKEYBYTES,
    SIGNATUREBYTES,
};

mod signer;
pub use signer::{BoxedSignError, BoxedSigner, Signer};
