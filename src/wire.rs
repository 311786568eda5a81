//! Just enough of the protobuf wire format to read the reaction lists and
//! write the chat colour blobs stored in message and recipient rows.

use anyhow::{anyhow, Result};

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Upper bound on a single length-delimited field.
pub const MAX_FIELD_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reaction {
    pub emoji: String,
    pub author: u64,
    pub sent_time: u64,
    pub received_time: u64,
}

/// Decodes a `ReactionList { repeated Reaction reactions = 1; }` blob.
pub fn decode_reaction_list(bytes: &[u8]) -> Result<Vec<Reaction>> {
    let mut reader = Reader::new(bytes);
    let mut reactions = Vec::new();
    while let Some((field, wire_type)) = reader.key()? {
        if field == 1 && wire_type == WIRE_LEN {
            reactions.push(decode_reaction(reader.bytes()?)?);
        } else {
            reader.skip(wire_type)?;
        }
    }
    Ok(reactions)
}

fn decode_reaction(bytes: &[u8]) -> Result<Reaction> {
    let mut reader = Reader::new(bytes);
    let mut reaction = Reaction::default();
    while let Some((field, wire_type)) = reader.key()? {
        match (field, wire_type) {
            (1, WIRE_LEN) => {
                reaction.emoji = String::from_utf8(reader.bytes()?.to_vec())
                    .map_err(|_| anyhow!("Reaction emoji is not UTF-8"))?;
            }
            (2, WIRE_VARINT) => reaction.author = reader.varint()?,
            (3, WIRE_VARINT) => reaction.sent_time = reader.varint()?,
            (4, WIRE_VARINT) => reaction.received_time = reader.varint()?,
            (_, other) => reader.skip(other)?,
        }
    }
    Ok(reaction)
}

pub fn encode_reaction_list(reactions: &[Reaction]) -> Vec<u8> {
    let mut out = Writer::default();
    for reaction in reactions {
        let mut inner = Writer::default();
        inner.bytes(1, reaction.emoji.as_bytes());
        inner.varint(2, reaction.author);
        inner.varint(3, reaction.sent_time);
        inner.varint(4, reaction.received_time);
        out.bytes(1, &inner.finish());
    }
    out.finish()
}

/// `ChatColor { SingleColor singleColor = 1; }` with `SingleColor { int32 color = 1; }`.
pub fn encode_single_chat_color(argb: u32) -> Vec<u8> {
    let mut single = Writer::default();
    // int32 fields are sign-extended on the wire.
    single.varint(1, i64::from(argb as i32) as u64);
    let mut out = Writer::default();
    out.bytes(1, &single.finish());
    out.finish()
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn key(&mut self) -> Result<Option<(u64, u8)>> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let key = self.varint()?;
        let field = key >> 3;
        if field == 0 {
            return Err(anyhow!("Invalid field number 0"));
        }
        Ok(Some((field, (key & 0x7) as u8)))
    }

    fn varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| anyhow!("Truncated varint"))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(anyhow!("Varint is too long"))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| anyhow!("Field runs past the end of the message"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = usize::try_from(self.varint()?).map_err(|_| anyhow!("Field length overflow"))?;
        if len > MAX_FIELD_SIZE {
            return Err(anyhow!("Field too large: {len} bytes (max {MAX_FIELD_SIZE})"));
        }
        self.take(len)
    }

    fn skip(&mut self, wire_type: u8) -> Result<()> {
        match wire_type {
            WIRE_VARINT => self.varint().map(|_| ()),
            WIRE_FIXED64 => self.take(8).map(|_| ()),
            WIRE_LEN => self.bytes().map(|_| ()),
            WIRE_FIXED32 => self.take(4).map(|_| ()),
            other => Err(anyhow!("Unsupported wire type {other}")),
        }
    }
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn raw_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    fn varint(&mut self, field: u64, value: u64) {
        self.raw_varint(field << 3 | u64::from(WIRE_VARINT));
        self.raw_varint(value);
    }

    fn bytes(&mut self, field: u64, value: &[u8]) {
        self.raw_varint(field << 3 | u64::from(WIRE_LEN));
        self.raw_varint(value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_hand_built_reaction() {
        // emoji "+", author 7, sent 300, received 301
        let reaction = [
            0x0a, 0x01, b'+', 0x10, 0x07, 0x18, 0xac, 0x02, 0x20, 0xad, 0x02,
        ];
        let mut list = vec![0x0a, reaction.len() as u8];
        list.extend_from_slice(&reaction);

        let decoded = decode_reaction_list(&list).unwrap();
        assert_eq!(
            decoded,
            vec![Reaction {
                emoji: "+".to_string(),
                author: 7,
                sent_time: 300,
                received_time: 301,
            }]
        );
    }

    #[test]
    fn test_skips_unknown_fields() {
        let mut list = vec![0x15, 1, 2, 3, 4]; // field 2, fixed32
        list.extend(encode_reaction_list(&[Reaction {
            received_time: 9,
            ..Reaction::default()
        }]));
        let decoded = decode_reaction_list(&list).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].received_time, 9);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(decode_reaction_list(&[0x0a, 0x05, 0x01]).is_err());
        assert!(decode_reaction_list(&[0xff; 12]).is_err());
        assert!(decode_reaction_list(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_single_color_sign_extends() {
        let blob = encode_single_chat_color(0xff2c6bed);
        // outer key, outer len, inner key, then a 10 byte negative varint
        assert_eq!(blob[0], 0x0a);
        assert_eq!(blob[1] as usize, blob.len() - 2);
        assert_eq!(blob[2], 0x08);
        assert_eq!(blob.len(), 2 + 1 + 10);
    }
}
