use crate::parser::{self, ParserInput};
use crate::{Error, Object, Result, Stream};
use std::str::FromStr;

use log::warn;

/// The members of a `/Type /ObjStm` stream, in the order of its index block.
#[derive(Debug, Default)]
pub struct ObjectStream {
    pub objects: Vec<(u32, Object)>,
}

impl ObjectStream {
    pub fn new(stream: &Stream) -> Result<ObjectStream> {
        let content = stream.decompressed_content()?;
        if content.is_empty() {
            return Ok(ObjectStream::default());
        }

        let first_offset = stream
            .dict
            .get(b"First")
            .and_then(Object::as_i64)
            .ok()
            .and_then(|first| usize::try_from(first).ok())
            .ok_or_else(|| Error::InvalidStream("object stream has no valid First".to_string()))?;
        let index_block = content
            .get(..first_offset)
            .ok_or_else(|| Error::InvalidStream(format!("First {} is past the end of the stream", first_offset)))?;

        let numbers: Vec<_> = std::str::from_utf8(index_block)?
            .split_whitespace()
            .map(|number| usize::from_str(number).ok())
            .collect();

        if let Ok(n) = stream.dict.get(b"N").and_then(Object::as_i64) {
            if i64::try_from(numbers.len() / 2).ok() != Some(n) {
                warn!("object stream declares {} objects but indexes {}", n, numbers.len() / 2);
            }
        }

        let objects = numbers
            .chunks_exact(2)
            .filter_map(|pair| {
                let id = u32::try_from(pair[0]?).ok()?;
                let offset = first_offset + pair[1]?;
                if offset >= content.len() {
                    warn!("object {} has an out-of-bounds offset in its object stream", id);
                    return None;
                }
                let object = parser::direct_object(ParserInput::new_extra(&content[offset..], "object stream"))?;
                Some((id, object))
            })
            .collect();

        Ok(ObjectStream { objects })
    }

    /// Member `index`, provided it really is object `id`.
    pub fn get(&self, id: u32, index: u16) -> Option<&Object> {
        match self.objects.get(usize::from(index)) {
            Some((found, object)) if *found == id => Some(object),
            _ => self.objects.iter().find(|(found, _)| *found == id).map(|(_, object)| object),
        }
    }
}
