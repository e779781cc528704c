//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::packet::auth::{
    Authenticated, decode_auth_fields, encode_auth_fields,
};
use crate::packet::consts::{KeyId, MessageType};
use crate::packet::error::DecodeResult;
use crate::packet::record::MappingRecord;

//
// Map-Register message.
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |Type=3 |P|S|I|       Reserved        |E|T|a|R|M| Record Count  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Nonce . . .                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         . . . Nonce                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |            Key ID             |  Authentication Data Length   |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// ~                     Authentication Data                       ~
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Records  ...                            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     xTR-ID (128 bits, if I) ...               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Site-ID (64 bits, if I) ...               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MapRegister {
    pub proxy_map_reply: bool,
    pub for_rtr: bool,
    pub want_map_notify: bool,
    pub nonce: u64,
    pub key_id: KeyId,
    pub auth_data: Vec<u8>,
    pub records: Vec<MappingRecord>,
    // I flag. The xTR-ID and site-ID trailer is present only when set.
    pub xtr_id_present: bool,
    pub xtr_id: u128,
    pub site_id: u64,
}

//
// Map-Notify message.
//
// Shares the Map-Register layout, with type 4 and the I and R flags moved
// into the first byte.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MapNotify {
    pub for_rtr: bool,
    pub nonce: u64,
    pub key_id: KeyId,
    pub auth_data: Vec<u8>,
    pub records: Vec<MappingRecord>,
    pub xtr_id_present: bool,
    pub xtr_id: u128,
    pub site_id: u64,
}

// ===== impl MapRegister =====

impl MapRegister {
    const FLAG_P: u8 = 0x08;
    const FLAG_I: u8 = 0x02;
    const FLAG_R: u8 = 0x02;
    const FLAG_M: u8 = 0x01;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.encode_with_auth(&self.auth_data, buf);
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let flags = buf.try_get_u8()?;
        let proxy_map_reply = flags & Self::FLAG_P != 0;
        let xtr_id_present = flags & Self::FLAG_I != 0;
        let _reserved = buf.try_get_u8()?;
        let flags = buf.try_get_u8()?;
        let for_rtr = flags & Self::FLAG_R != 0;
        let want_map_notify = flags & Self::FLAG_M != 0;
        let record_count = buf.try_get_u8()?;
        let nonce = buf.try_get_u64()?;
        let (key_id, auth_data) = decode_auth_fields(buf)?;
        let records = (0..record_count)
            .map(|_| MappingRecord::decode(buf))
            .collect::<DecodeResult<Vec<_>>>()?;
        let (xtr_id, site_id) = decode_xtr_site_id(buf, xtr_id_present)?;

        Ok(MapRegister {
            proxy_map_reply,
            for_rtr,
            want_map_notify,
            nonce,
            key_id,
            auth_data,
            records,
            xtr_id_present,
            xtr_id,
            site_id,
        })
    }
}

impl Authenticated for MapRegister {
    fn key_id(&self) -> KeyId {
        self.key_id
    }

    fn auth_data(&self) -> &[u8] {
        &self.auth_data
    }

    fn set_auth_data(&mut self, auth_data: Vec<u8>) {
        self.auth_data = auth_data;
    }

    fn encode_with_auth(&self, auth_data: &[u8], buf: &mut BytesMut) {
        let mut flags = (MessageType::MapRegister as u8) << 4;
        if self.proxy_map_reply {
            flags |= Self::FLAG_P;
        }
        if self.xtr_id_present {
            flags |= Self::FLAG_I;
        }
        buf.put_u8(flags);
        buf.put_u8(0);
        let mut flags = 0;
        if self.for_rtr {
            flags |= Self::FLAG_R;
        }
        if self.want_map_notify {
            flags |= Self::FLAG_M;
        }
        buf.put_u8(flags);
        buf.put_u8(self.records.len() as u8);
        buf.put_u64(self.nonce);
        encode_auth_fields(buf, self.key_id, auth_data);
        for record in &self.records {
            record.encode(buf);
        }
        if self.xtr_id_present {
            buf.put_u128(self.xtr_id);
            buf.put_u64(self.site_id);
        }
    }
}

// ===== impl MapNotify =====

impl MapNotify {
    const FLAG_I: u8 = 0x08;
    const FLAG_R: u8 = 0x04;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.encode_with_auth(&self.auth_data, buf);
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let flags = buf.try_get_u8()?;
        let xtr_id_present = flags & Self::FLAG_I != 0;
        let for_rtr = flags & Self::FLAG_R != 0;
        let _reserved = buf.try_get_u16()?;
        let record_count = buf.try_get_u8()?;
        let nonce = buf.try_get_u64()?;
        let (key_id, auth_data) = decode_auth_fields(buf)?;
        let records = (0..record_count)
            .map(|_| MappingRecord::decode(buf))
            .collect::<DecodeResult<Vec<_>>>()?;
        let (xtr_id, site_id) = decode_xtr_site_id(buf, xtr_id_present)?;

        Ok(MapNotify {
            for_rtr,
            nonce,
            key_id,
            auth_data,
            records,
            xtr_id_present,
            xtr_id,
            site_id,
        })
    }
}

impl Authenticated for MapNotify {
    fn key_id(&self) -> KeyId {
        self.key_id
    }

    fn auth_data(&self) -> &[u8] {
        &self.auth_data
    }

    fn set_auth_data(&mut self, auth_data: Vec<u8>) {
        self.auth_data = auth_data;
    }

    fn encode_with_auth(&self, auth_data: &[u8], buf: &mut BytesMut) {
        let mut flags = (MessageType::MapNotify as u8) << 4;
        if self.xtr_id_present {
            flags |= Self::FLAG_I;
        }
        if self.for_rtr {
            flags |= Self::FLAG_R;
        }
        buf.put_u8(flags);
        buf.put_u16(0);
        buf.put_u8(self.records.len() as u8);
        buf.put_u64(self.nonce);
        encode_auth_fields(buf, self.key_id, auth_data);
        for record in &self.records {
            record.encode(buf);
        }
        if self.xtr_id_present {
            buf.put_u128(self.xtr_id);
            buf.put_u64(self.site_id);
        }
    }
}

impl From<&MapRegister> for MapNotify {
    // Builds the acknowledgment of a Map-Register. Authentication data must
    // be recomputed by the caller.
    fn from(register: &MapRegister) -> MapNotify {
        MapNotify {
            for_rtr: register.for_rtr,
            nonce: register.nonce,
            key_id: register.key_id,
            auth_data: vec![],
            records: register.records.clone(),
            xtr_id_present: register.xtr_id_present,
            xtr_id: register.xtr_id,
            site_id: register.site_id,
        }
    }
}

// ===== helper functions =====

fn decode_xtr_site_id(
    buf: &mut Bytes,
    present: bool,
) -> DecodeResult<(u128, u64)> {
    if !present {
        return Ok((0, 0));
    }
    let xtr_id = buf.try_get_u128()?;
    let site_id = buf.try_get_u64()?;
    Ok((xtr_id, site_id))
}
