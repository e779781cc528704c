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
use crate::packet::record::ReferralRecord;

//
// Map-Referral message (RFC 8111).
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |Type=6 |                Reserved               | Record Count  |
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
pub struct MapReferral {
    pub nonce: u64,
    pub records: Vec<ReferralRecord>,
}

// ===== impl MapReferral =====

impl MapReferral {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((MessageType::MapReferral as u8) << 4);
        buf.put_u16(0);
        buf.put_u8(self.records.len() as u8);
        buf.put_u64(self.nonce);
        for record in &self.records {
            record.encode(buf);
        }
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let _type_reserved = buf.try_get_u8()?;
        let _reserved = buf.try_get_u16()?;
        let record_count = buf.try_get_u8()?;
        let nonce = buf.try_get_u64()?;
        let records = (0..record_count)
            .map(|_| ReferralRecord::decode(buf))
            .collect::<DecodeResult<Vec<_>>>()?;

        Ok(MapReferral { nonce, records })
    }
}
