//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use hmac::digest::block_buffer::Eager;
use hmac::digest::core_api::{
    BlockSizeUser, BufferKindUser, CoreProxy, FixedOutputCore, UpdateCore,
};
use hmac::digest::typenum::{IsLess, Le, NonZero, U256};
use hmac::digest::{HashMarker, KeyInit, Mac};
use hmac::Hmac;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum CryptoAlgo {
    HmacSha1,
    HmacSha256,
}

// ===== impl CryptoAlgo =====

impl CryptoAlgo {
    pub fn digest_size(&self) -> u8 {
        match self {
            CryptoAlgo::HmacSha1 => 20,
            CryptoAlgo::HmacSha256 => 32,
        }
    }
}

// ===== helper functions =====

fn hmac_digest<H>(data: &[u8], key: &[u8]) -> Vec<u8>
where
    H: CoreProxy,
    H::Core: HashMarker
        + UpdateCore
        + FixedOutputCore
        + BufferKindUser<BufferKind = Eager>
        + Default
        + Clone,
    <H::Core as BlockSizeUser>::BlockSize: IsLess<U256>,
    Le<<H::Core as BlockSizeUser>::BlockSize, U256>: NonZero,
{
    // HMAC accepts keys of any length.
    let mut mac = <Hmac<H> as KeyInit>::new_from_slice(key)
        .expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

// ===== global functions =====

/// Computes the HMAC of `data` with the given algorithm and key.
pub fn message_digest(data: &[u8], algo: CryptoAlgo, key: &[u8]) -> Vec<u8> {
    match algo {
        CryptoAlgo::HmacSha1 => hmac_digest::<Sha1>(data, key),
        CryptoAlgo::HmacSha256 => hmac_digest::<Sha256>(data, key),
    }
}

// ===== unit tests =====
