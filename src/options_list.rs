use bytes::BufMut;
use crate::buffer::{Buffer, Cursor};
use crate::error::CodecError;
use crate::option::CoapOption;
use crate::varint::ExtendedInt;

/// Marks the end of the options and the start of the payload
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// The options of a message, always sorted ascending by option number.
///
/// On the wire, each option's number is the delta to its predecessor's number, so the order is
///  part of the encoding:
///
/// ```ascii
/// 0: delta nibble (4 bits) | length nibble (4 bits)
/// *: delta extension (0-2 bytes)
/// *: length extension (0-2 bytes)
/// *: value
/// ```
///
/// Options with equal numbers (e.g. several Uri-Path segments) keep their relative order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptionsList {
    options: Vec<CoapOption>,
}

impl OptionsList {
    pub fn new(mut options: Vec<CoapOption>) -> OptionsList {
        options.sort_by_key(|o| o.number());
        OptionsList { options }
    }

    pub fn empty() -> OptionsList {
        OptionsList::default()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoapOption> {
        self.options.iter()
    }

    pub fn as_slice(&self) -> &[CoapOption] {
        &self.options
    }

    pub fn at(&self, index: usize) -> Option<&CoapOption> {
        self.options.get(index)
    }

    /// A new list with the options of both lists. The result is sorted, so the inputs may
    ///  interleave; when `other`'s options all follow `self`'s, this is plain concatenation.
    pub fn merge(&self, other: &OptionsList) -> OptionsList {
        let mut options = Vec::with_capacity(self.len() + other.len());
        options.extend_from_slice(&self.options);
        options.extend_from_slice(&other.options);
        OptionsList::new(options)
    }

    /// Index of the first option at or after `start` with the given number
    pub fn get_index(&self, start: usize, number: u16) -> Option<usize> {
        self.options.iter()
            .enumerate()
            .skip(start)
            .find(|(_, o)| o.number() == number)
            .map(|(i, _)| i)
    }

    pub fn get(&self, number: u16) -> Option<&CoapOption> {
        self.get_index(0, number)
            .map(|i| &self.options[i])
    }

    pub fn get_all(&self, number: u16) -> impl Iterator<Item = &CoapOption> {
        self.options.iter()
            .filter(move |o| o.number() == number)
    }

    /// Number of bytes the serialized options occupy
    pub fn buffer_size(&self) -> Result<usize, CodecError> {
        let mut prev_number = 0;
        let mut size = 0;
        for option in &self.options {
            size += option.serialized_len(prev_number)?;
            prev_number = option.number();
        }
        Ok(size)
    }

    /// Append the serialized options to `buf`. The payload marker is not part of the options.
    ///
    /// If an option does not fit, the error reports the position in `buf` where it would have
    ///  started; the options before it are already written at that point.
    pub fn ser(&self, buf: &mut Buffer) -> Result<(), CodecError> {
        let mut prev_number = 0;
        for option in &self.options {
            let delta = ExtendedInt::encode((option.number() - prev_number) as u32)?;
            let len = ExtendedInt::encode(option.value().len() as u32)?;

            let required = 1 + delta.extension_len() + len.extension_len() + option.value().len();
            if buf.remaining_mut() < required {
                return Err(CodecError::BufferOverflow { position: buf.len() });
            }

            buf.put_u8((delta.nibble() << 4) | len.nibble());
            delta.put_extension(buf);
            len.put_extension(buf);
            buf.put_slice(option.value());

            prev_number = option.number();
        }
        Ok(())
    }

    /// Count the options up to the payload marker or the end of the data, validating their
    ///  framing without decoding them
    pub fn count_options(data: &[u8]) -> Result<usize, CodecError> {
        Self::count_from(Cursor::new(data))
    }

    fn count_from(mut cursor: Cursor) -> Result<usize, CodecError> {
        let mut prev_number = 0u16;
        let mut count = 0;
        while let Some((number, len)) = Self::next_option_header(&mut cursor, prev_number)? {
            cursor.next_slice(len)?;
            prev_number = number;
            count += 1;
        }
        Ok(count)
    }

    /// Decode options starting at the cursor, leaving it at the payload marker (if any)
    pub fn deser(cursor: &mut Cursor) -> Result<OptionsList, CodecError> {
        let count = Self::count_from(cursor.clone())?;

        let mut options = Vec::with_capacity(count);
        let mut prev_number = 0u16;
        while let Some((number, len)) = Self::next_option_header(cursor, prev_number)? {
            let value = cursor.next_slice(len)?;
            options.push(CoapOption::new(number, value.to_vec()));
            prev_number = number;
        }
        debug_assert_eq!(options.len(), count);

        Ok(OptionsList { options })
    }

    /// reads an option header, returning the absolute option number and the value length, or
    ///  None at the end of the options
    fn next_option_header(cursor: &mut Cursor, prev_number: u16) -> Result<Option<(u16, usize)>, CodecError> {
        match cursor.peek_u8() {
            None | Some(PAYLOAD_MARKER) => return Ok(None),
            Some(_) => {}
        }

        let header_offset = cursor.position();
        let head = cursor.next_u8()?;
        let delta = ExtendedInt::decode(head >> 4, header_offset, cursor)?.value();
        let len = ExtendedInt::decode(head & 0x0f, header_offset, cursor)?.value();

        let number = u16::try_from(prev_number as u32 + delta)
            .map_err(|_| CodecError::OptionNumberOverflow(header_offset))?;
        Ok(Some((number, len as usize)))
    }
}

impl From<Vec<CoapOption>> for OptionsList {
    fn from(options: Vec<CoapOption>) -> Self {
        OptionsList::new(options)
    }
}
