//! Chunk-level parser for the compiled binary XML format.
//!
//! A document is a sequence of little-endian chunks: an 8-byte file header,
//! a string pool, an optional resource map, then a flat stream of tag
//! records. Every chunk starts with a u32 type word (record type in the
//! low half, header size in the high half) and a u32 total size, so
//! unknown chunks can be skipped without understanding them.
//!
//! The reader is a single forward-only cursor. The string pool is decoded
//! up front; everything after it resolves names and values by integer
//! index into the pool.

use std::str;

pub(crate) const CHUNK_DOCUMENT: u32 = 0x0008_0003;
pub(crate) const CHUNK_STRING_POOL: u32 = 0x001C_0001;
pub(crate) const CHUNK_RESOURCE_MAP: u32 = 0x0008_0180;
pub(crate) const CHUNK_START_NAMESPACE: u32 = 0x0010_0100;
pub(crate) const CHUNK_END_NAMESPACE: u32 = 0x0010_0101;
pub(crate) const CHUNK_START_TAG: u32 = 0x0010_0102;
pub(crate) const CHUNK_END_TAG: u32 = 0x0010_0103;
pub(crate) const CHUNK_TEXT: u32 = 0x0010_0104;

/// String pool flag bit: strings are UTF-8 rather than UTF-16.
pub(crate) const UTF8_FLAG: u32 = 1 << 8;

/// Sentinel index meaning "no string".
pub(crate) const NIL: u32 = 0xFFFF_FFFF;

/// Typed-value data type for string attribute values.
pub(crate) const TYPE_STRING: u8 = 0x03;
/// Inclusive range of integer data types (decimal, hex, booleans).
pub(crate) const TYPE_INT_FIRST: u8 = 0x10;
pub(crate) const TYPE_INT_LAST: u8 = 0x1f;

/// Errors raised while decoding a binary XML document.
#[derive(Debug, thiserror::Error)]
pub enum AxmlError {
    #[error("unexpected end of binary XML data")]
    UnexpectedEof,

    #[error("not a binary XML document (magic {0:#010x})")]
    BadMagic(u32),

    #[error("expected string pool chunk, found {0:#010x}")]
    MissingStringPool(u32),

    #[error("chunk size smaller than its header")]
    TruncatedChunk,

    #[error("malformed UTF-8 string in pool")]
    MalformedUtf8,

    #[error("malformed UTF-16 string in pool")]
    MalformedUtf16,
}

/// Forward-only cursor over the document bytes.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_u8(&mut self) -> Result<u8, AxmlError> {
        let byte = *self.data.get(self.pos).ok_or(AxmlError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, AxmlError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 2)
            .ok_or(AxmlError::UnexpectedEof)?;
        self.pos += 2;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, AxmlError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or(AxmlError::UnexpectedEof)?;
        self.pos += 4;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Advance to an absolute position. Moving backward is a malformed
    /// chunk size, not a supported operation.
    fn skip_to(&mut self, pos: usize) -> Result<(), AxmlError> {
        if pos < self.pos {
            return Err(AxmlError::TruncatedChunk);
        }
        if pos > self.data.len() {
            return Err(AxmlError::UnexpectedEof);
        }
        self.pos = pos;
        Ok(())
    }
}

/// The document's string pool, fully decoded.
pub(crate) struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    /// Parse the pool chunk at the cursor, leaving the cursor at the chunk
    /// after it.
    fn parse(cursor: &mut Cursor<'_>) -> Result<Self, AxmlError> {
        let chunk_start = cursor.pos();
        let chunk_type = cursor.read_u32()?;
        if chunk_type != CHUNK_STRING_POOL {
            return Err(AxmlError::MissingStringPool(chunk_type));
        }
        let chunk_size = cursor.read_u32()? as usize;
        let string_count = cursor.read_u32()? as usize;
        let style_count = cursor.read_u32()? as usize;
        let flags = cursor.read_u32()?;
        let strings_start = cursor.read_u32()? as usize;
        let _styles_start = cursor.read_u32()?;

        let mut offsets = Vec::with_capacity(string_count);
        for _ in 0..string_count {
            offsets.push(cursor.read_u32()? as usize);
        }
        for _ in 0..style_count {
            cursor.read_u32()?;
        }

        let data_start = chunk_start + strings_start;
        let data_end = chunk_start + chunk_size;
        if data_end > cursor.data.len() || data_start > data_end {
            return Err(AxmlError::UnexpectedEof);
        }
        let data = &cursor.data[data_start..data_end];

        let utf8 = flags & UTF8_FLAG != 0;
        let mut strings = Vec::with_capacity(string_count);
        for offset in offsets {
            let string = if utf8 {
                decode_utf8(data, offset)?
            } else {
                decode_utf16(data, offset)?
            };
            strings.push(string);
        }

        cursor.skip_to(chunk_start + chunk_size)?;
        Ok(Self { strings })
    }

    pub(crate) fn get(&self, index: u32) -> Option<&str> {
        if index == NIL {
            return None;
        }
        self.strings.get(index as usize).map(String::as_str)
    }
}

/// A UTF-8 pool entry: character count, then byte count, each 1 or 2
/// bytes (high bit of the first byte selects the wide form), then the
/// bytes themselves.
fn decode_utf8(data: &[u8], mut pos: usize) -> Result<String, AxmlError> {
    let (_char_count, next) = read_length8(data, pos)?;
    pos = next;
    let (byte_count, next) = read_length8(data, pos)?;
    pos = next;
    let bytes = data
        .get(pos..pos + byte_count)
        .ok_or(AxmlError::UnexpectedEof)?;
    str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| AxmlError::MalformedUtf8)
}

fn read_length8(data: &[u8], pos: usize) -> Result<(usize, usize), AxmlError> {
    let first = *data.get(pos).ok_or(AxmlError::UnexpectedEof)? as usize;
    if first & 0x80 != 0 {
        let second = *data.get(pos + 1).ok_or(AxmlError::UnexpectedEof)? as usize;
        Ok((((first & 0x7f) << 8) | second, pos + 2))
    } else {
        Ok((first, pos + 1))
    }
}

/// A UTF-16 pool entry: code-unit count as 1 or 2 u16s (high bit of the
/// first unit selects the wide form), then that many little-endian units.
fn decode_utf16(data: &[u8], mut pos: usize) -> Result<String, AxmlError> {
    let (unit_count, next) = read_length16(data, pos)?;
    pos = next;
    let mut units = Vec::with_capacity(unit_count);
    for _ in 0..unit_count {
        let bytes = data
            .get(pos..pos + 2)
            .ok_or(AxmlError::UnexpectedEof)?;
        units.push(u16::from_le_bytes([bytes[0], bytes[1]]));
        pos += 2;
    }
    String::from_utf16(&units).map_err(|_| AxmlError::MalformedUtf16)
}

fn read_length16(data: &[u8], pos: usize) -> Result<(usize, usize), AxmlError> {
    let first = read_unit(data, pos)? as usize;
    if first & 0x8000 != 0 {
        let second = read_unit(data, pos + 2)? as usize;
        Ok((((first & 0x7fff) << 16) | second, pos + 4))
    } else {
        Ok((first, pos + 2))
    }
}

fn read_unit(data: &[u8], pos: usize) -> Result<u16, AxmlError> {
    let bytes = data.get(pos..pos + 2).ok_or(AxmlError::UnexpectedEof)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// One attribute of a start tag, unresolved.
///
/// Names and string values stay as pool indices; callers resolve only the
/// attributes they care about.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawAttribute {
    pub name: u32,
    pub raw_value: u32,
    pub data_type: u8,
    pub data: u32,
}

/// A record from the tag stream.
#[derive(Debug)]
pub(crate) enum Event {
    StartTag {
        name: u32,
        attributes: Vec<RawAttribute>,
    },
    EndTag,
    Text,
    EndDocument,
}

/// Streaming reader over a binary XML document.
pub(crate) struct AxmlReader<'a> {
    cursor: Cursor<'a>,
    pool: StringPool,
}

impl<'a> AxmlReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Result<Self, AxmlError> {
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32()?;
        if magic != CHUNK_DOCUMENT {
            return Err(AxmlError::BadMagic(magic));
        }
        let _file_size = cursor.read_u32()?;
        let pool = StringPool::parse(&mut cursor)?;
        Ok(Self { cursor, pool })
    }

    /// Resolve a pool index. `NIL` and out-of-range resolve to `None`.
    pub(crate) fn string(&self, index: u32) -> Option<&str> {
        self.pool.get(index)
    }

    /// Resolve an attribute's string value: the raw value if present,
    /// otherwise a typed string reference.
    pub(crate) fn attribute_string(&self, attribute: &RawAttribute) -> Option<&str> {
        if attribute.raw_value != NIL {
            return self.string(attribute.raw_value);
        }
        if attribute.data_type == TYPE_STRING {
            return self.string(attribute.data);
        }
        None
    }

    /// Resolve an attribute's integer value, if it carries one.
    pub(crate) fn attribute_int(&self, attribute: &RawAttribute) -> Option<u32> {
        if (TYPE_INT_FIRST..=TYPE_INT_LAST).contains(&attribute.data_type) {
            Some(attribute.data)
        } else {
            None
        }
    }

    /// Advance to the next record. Unknown chunk types and namespace
    /// records are skipped by their declared size. Running out of bytes
    /// is the end of the document.
    pub(crate) fn next_event(&mut self) -> Result<Event, AxmlError> {
        loop {
            if self.cursor.is_at_end() {
                return Ok(Event::EndDocument);
            }
            let chunk_start = self.cursor.pos();
            let chunk_type = self.cursor.read_u32()?;
            let chunk_size = self.cursor.read_u32()? as usize;
            if chunk_size < 8 {
                return Err(AxmlError::TruncatedChunk);
            }
            let chunk_end = chunk_start + chunk_size;

            match chunk_type {
                CHUNK_START_TAG => {
                    let _line = self.cursor.read_u32()?;
                    let _comment = self.cursor.read_u32()?;
                    let _namespace = self.cursor.read_u32()?;
                    let name = self.cursor.read_u32()?;
                    let _attribute_start = self.cursor.read_u16()?;
                    let _attribute_size = self.cursor.read_u16()?;
                    let attribute_count = self.cursor.read_u16()? as usize;
                    let _id_index = self.cursor.read_u16()?;
                    let _class_index = self.cursor.read_u16()?;
                    let _style_index = self.cursor.read_u16()?;

                    let mut attributes = Vec::with_capacity(attribute_count);
                    for _ in 0..attribute_count {
                        let _namespace = self.cursor.read_u32()?;
                        let name = self.cursor.read_u32()?;
                        let raw_value = self.cursor.read_u32()?;
                        let _size = self.cursor.read_u16()?;
                        let _res0 = self.cursor.read_u8()?;
                        let data_type = self.cursor.read_u8()?;
                        let data = self.cursor.read_u32()?;
                        attributes.push(RawAttribute {
                            name,
                            raw_value,
                            data_type,
                            data,
                        });
                    }

                    self.cursor.skip_to(chunk_end)?;
                    return Ok(Event::StartTag { name, attributes });
                }
                CHUNK_END_TAG => {
                    self.cursor.skip_to(chunk_end)?;
                    return Ok(Event::EndTag);
                }
                CHUNK_TEXT => {
                    self.cursor.skip_to(chunk_end)?;
                    return Ok(Event::Text);
                }
                CHUNK_RESOURCE_MAP | CHUNK_START_NAMESPACE | CHUNK_END_NAMESPACE => {
                    self.cursor.skip_to(chunk_end)?;
                }
                _ => {
                    // Unknown chunk, skip by declared size.
                    self.cursor.skip_to(chunk_end)?;
                }
            }
        }
    }
}
