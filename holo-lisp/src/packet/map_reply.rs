//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::packet::consts::MessageType;
use crate::packet::error::DecodeResult;
use crate::packet::record::MappingRecord;

//
// Map-Reply message.
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |Type=2 |P|E|S|          Reserved               | Record Count  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Nonce . . .                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         . . . Nonce                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Records  ...                            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MapReply {
    pub probe: bool,
    #[new(default)]
    pub echo_nonce: bool,
    #[new(default)]
    pub security: bool,
    pub nonce: u64,
    pub records: Vec<MappingRecord>,
}

// ===== impl MapReply =====

impl MapReply {
    const FLAG_P: u8 = 0x08;
    const FLAG_E: u8 = 0x04;
    const FLAG_S: u8 = 0x02;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let mut flags = (MessageType::MapReply as u8) << 4;
        if self.probe {
            flags |= Self::FLAG_P;
        }
        if self.echo_nonce {
            flags |= Self::FLAG_E;
        }
        if self.security {
            flags |= Self::FLAG_S;
        }
        buf.put_u8(flags);
        buf.put_u16(0);
        buf.put_u8(self.records.len() as u8);
        buf.put_u64(self.nonce);
        for record in &self.records {
            record.encode(buf);
        }
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let flags = buf.try_get_u8()?;
        let probe = flags & Self::FLAG_P != 0;
        let echo_nonce = flags & Self::FLAG_E != 0;
        let security = flags & Self::FLAG_S != 0;
        let _reserved = buf.try_get_u16()?;
        let record_count = buf.try_get_u8()?;
        let nonce = buf.try_get_u64()?;
        let records = (0..record_count)
            .map(|_| MappingRecord::decode(buf))
            .collect::<DecodeResult<Vec<_>>>()?;

        Ok(MapReply {
            probe,
            echo_nonce,
            security,
            nonce,
            records,
        })
    }
}
