//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::{Buf, BufMut, Bytes, BytesMut};
use holo_utils::bytes::BytesExt;
use holo_utils::crypto::{self, CryptoAlgo};
use num_traits::FromPrimitive;

use crate::packet::consts::KeyId;
use crate::packet::error::{DecodeError, DecodeResult};

// Messages carrying a Key ID and authentication data.
//
// The authentication data is an HMAC computed over the whole message, encoded
// with the authentication data field filled with zeros.
pub trait Authenticated {
    fn key_id(&self) -> KeyId;

    fn auth_data(&self) -> &[u8];

    fn set_auth_data(&mut self, auth_data: Vec<u8>);

    // Encodes the message using the provided authentication data in place of
    // its own.
    fn encode_with_auth(&self, auth_data: &[u8], buf: &mut BytesMut);
}

// ===== impl KeyId =====

impl KeyId {
    pub fn algo(&self) -> Option<CryptoAlgo> {
        match self {
            KeyId::None => None,
            KeyId::HmacSha1_96 => Some(CryptoAlgo::HmacSha1),
            KeyId::HmacSha256_128 => Some(CryptoAlgo::HmacSha256),
        }
    }

    // Length of the authentication data field for this Key ID.
    pub fn auth_len(&self) -> usize {
        self.algo()
            .map(|algo| algo.digest_size() as usize)
            .unwrap_or(0)
    }
}

// ===== global functions =====

// Computes the authentication data of a message using the message's Key ID.
pub fn compute_auth<M: Authenticated>(msg: &M, key: &[u8]) -> Vec<u8> {
    let Some(algo) = msg.key_id().algo() else {
        return vec![];
    };

    let zeros = vec![0; algo.digest_size() as usize];
    let mut buf = BytesMut::new();
    msg.encode_with_auth(&zeros, &mut buf);
    crypto::message_digest(&buf, algo, key)
}

// Checks whether the authentication data of a message is valid for the given
// key.
pub fn verify_auth<M: Authenticated>(msg: &M, key: &[u8]) -> bool {
    msg.auth_data() == compute_auth(msg, key).as_slice()
}

// Fills in the authentication data of a message.
pub fn insert_auth<M: Authenticated>(msg: &mut M, key: &[u8]) {
    let auth_data = compute_auth(msg, key);
    msg.set_auth_data(auth_data);
}

pub(crate) fn encode_auth_fields(
    buf: &mut BytesMut,
    key_id: KeyId,
    auth_data: &[u8],
) {
    buf.put_u16(key_id as u16);
    buf.put_u16(auth_data.len() as u16);
    buf.put_slice(auth_data);
}

pub(crate) fn decode_auth_fields(
    buf: &mut Bytes,
) -> DecodeResult<(KeyId, Vec<u8>)> {
    let key_id = buf.try_get_u16()?;
    let key_id =
        KeyId::from_u16(key_id).ok_or(DecodeError::UnknownKeyId(key_id))?;
    let auth_len = buf.try_get_u16()?;
    if auth_len as usize != key_id.auth_len() {
        return Err(DecodeError::InvalidAuthLength(auth_len));
    }
    let auth_data = buf.try_split_to(auth_len as usize)?.to_vec();

    Ok((key_id, auth_data))
}
