use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use crate::error::ParseError;
use crate::{Dictionary, Object, Result, Stream};

#[derive(Debug, Clone)]
pub struct Xref {
    /// Entries of this section, or of the whole chain once merged.
    pub entries: BTreeMap<u32, XrefEntry>,

    /// Total number of entries declared by the trailer `Size`.
    pub size: u32,

    pub xref_type: XrefType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefType {
    /// Classic `xref` keyword table.
    CrossReferenceTable,
    /// `/Type /XRef` stream.
    CrossReferenceStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    Free { next: u32, generation: u16 },
    Normal { offset: u32, generation: u16 },
    Compressed { container: u32, index: u16 },
}

/// One cross-reference section of the file, newest first in `Document::revisions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// Offset of the section, relative to the `%PDF-` header.
    pub offset: usize,
    pub xref_type: XrefType,
    /// Object numbers this section marks in use.
    pub objects: Vec<u32>,
}

impl Xref {
    pub fn new(size: u32, xref_type: XrefType) -> Xref {
        Xref {
            entries: BTreeMap::new(),
            size,
            xref_type,
        }
    }

    pub fn get(&self, id: u32) -> Option<&XrefEntry> {
        self.entries.get(&id)
    }

    pub fn insert(&mut self, id: u32, entry: XrefEntry) {
        self.entries.insert(id, entry);
    }

    /// Fold in an older section. Entries already present shadow the older ones.
    pub fn merge(&mut self, older: Xref) {
        for (id, entry) in older.entries {
            self.entries.entry(id).or_insert(entry);
        }
    }

    /// Fold in the `XRefStm` stream of a hybrid section.
    ///
    /// The stream describes the same revision as the table, which lists
    /// object-stream members as free; its entries replace those rows.
    pub fn merge_hybrid(&mut self, stream: Xref) {
        for (id, entry) in stream.entries {
            match self.entries.get(&id) {
                Some(XrefEntry::Normal { .. }) | Some(XrefEntry::Compressed { .. }) => {}
                Some(XrefEntry::Free { .. }) | None => {
                    self.entries.insert(id, entry);
                }
            }
        }
    }

    pub fn max_id(&self) -> u32 {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }

    /// Object numbers marked in use, either at an offset or inside an object stream.
    pub fn in_use(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries
            .iter()
            .filter(|(_, entry)| !matches!(entry, XrefEntry::Free { .. }))
            .map(|(id, _)| *id)
    }

    pub fn clear(&mut self) {
        self.entries.clear()
    }
}

/// Decode a cross-reference stream into its entries and its trailer dictionary.
pub fn decode_xref_stream(mut stream: Stream) -> Result<(Xref, Dictionary)> {
    if stream.is_compressed() {
        stream.decompress()?;
    }
    let mut dict = stream.dict;
    let mut reader = Cursor::new(stream.content);
    let size = dict
        .get(b"Size")
        .and_then(Object::as_i64)
        .ok()
        .and_then(|size| u32::try_from(size).ok())
        .ok_or(ParseError::InvalidXref)?;
    let mut xref = Xref::new(size, XrefType::CrossReferenceStream);

    let section_indice = dict
        .get(b"Index")
        .and_then(parse_integer_array)
        .unwrap_or_else(|_| vec![0, i64::from(size)]);
    let field_widths = dict
        .get(b"W")
        .and_then(parse_integer_array)
        .map_err(|_| ParseError::InvalidXref)?;

    if field_widths.len() < 3 || field_widths.iter().any(|w| !(0..=8).contains(w)) {
        return Err(ParseError::InvalidXref.into());
    }

    let mut bytes1 = vec![0_u8; field_widths[0] as usize];
    let mut bytes2 = vec![0_u8; field_widths[1] as usize];
    let mut bytes3 = vec![0_u8; field_widths[2] as usize];

    for section in section_indice.chunks_exact(2) {
        let (start, count) = (section[0], section[1]);
        if start < 0 || count < 0 {
            return Err(ParseError::InvalidXref.into());
        }

        for j in 0..count {
            let id = u32::try_from(start + j).map_err(|_| ParseError::InvalidXref)?;
            // A missing type field means "in use at an offset".
            let entry_type = if bytes1.is_empty() {
                1
            } else {
                read_big_endian_integer(&mut reader, &mut bytes1)?
            };
            let field2 = read_big_endian_integer(&mut reader, &mut bytes2)?;
            let field3 = if bytes3.is_empty() {
                0
            } else {
                read_big_endian_integer(&mut reader, &mut bytes3)?
            };
            let entry = match entry_type {
                0 => XrefEntry::Free {
                    next: field2 as u32,
                    generation: field3 as u16,
                },
                1 => XrefEntry::Normal {
                    offset: field2 as u32,
                    generation: field3 as u16,
                },
                2 => XrefEntry::Compressed {
                    container: field2 as u32,
                    index: field3 as u16,
                },
                // Unknown types are treated as null references.
                _ => continue,
            };
            xref.insert(id, entry);
        }
    }

    dict.remove(b"Type");
    dict.remove(b"Length");
    dict.remove(b"W");
    dict.remove(b"Index");
    dict.remove(b"Filter");
    dict.remove(b"DecodeParms");
    Ok((xref, dict))
}

/// Encode `xref` as the rows of an xref stream; returns the row bytes and the `W` array.
pub fn encode_xref_rows(xref: &Xref) -> (Vec<u8>, [u8; 3]) {
    let widest = xref
        .entries
        .values()
        .map(|entry| match *entry {
            XrefEntry::Free { next, .. } => next,
            XrefEntry::Normal { offset, .. } => offset,
            XrefEntry::Compressed { container, .. } => container,
        })
        .max()
        .unwrap_or(0);
    let middle = (4 - widest.leading_zeros() as u8 / 8).max(1);
    let widths = [1, middle, 2];

    let mut rows = Vec::with_capacity(xref.entries.len() * usize::from(widths.iter().sum::<u8>()));
    for entry in xref.entries.values() {
        let (kind, field2, field3) = match *entry {
            XrefEntry::Free { next, generation } => (0, next, generation),
            XrefEntry::Normal { offset, generation } => (1, offset, generation),
            XrefEntry::Compressed { container, index } => (2, container, index),
        };
        rows.push(kind);
        rows.extend_from_slice(&field2.to_be_bytes()[4 - usize::from(middle)..]);
        rows.extend_from_slice(&field3.to_be_bytes());
    }
    (rows, widths)
}

/// `Index` pairs for the runs of consecutive object numbers in `xref`.
pub fn subsections(xref: &Xref) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &id in xref.entries.keys() {
        match runs.last_mut() {
            Some((start, count)) if *start + *count == id => *count += 1,
            _ => runs.push((id, 1)),
        }
    }
    runs
}

fn read_big_endian_integer(reader: &mut Cursor<Vec<u8>>, buffer: &mut [u8]) -> Result<u64> {
    reader.read_exact(buffer)?;
    let mut value = 0;
    for &mut byte in buffer {
        value = (value << 8) + u64::from(byte);
    }
    Ok(value)
}

fn parse_integer_array(array: &Object) -> Result<Vec<i64>> {
    let array = array.as_array()?;
    let mut out = Vec::with_capacity(array.len());

    for n in array {
        out.push(n.as_i64()?);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;

    #[test]
    fn newer_entries_shadow_older_ones() {
        let mut newer = Xref::new(3, XrefType::CrossReferenceTable);
        newer.insert(2, XrefEntry::Normal { offset: 300, generation: 0 });
        let mut older = Xref::new(3, XrefType::CrossReferenceTable);
        older.insert(1, XrefEntry::Normal { offset: 15, generation: 0 });
        older.insert(2, XrefEntry::Normal { offset: 90, generation: 0 });

        newer.merge(older);
        assert_eq!(newer.get(1), Some(&XrefEntry::Normal { offset: 15, generation: 0 }));
        assert_eq!(newer.get(2), Some(&XrefEntry::Normal { offset: 300, generation: 0 }));
        assert_eq!(newer.max_id(), 2);
    }

    #[test]
    fn hybrid_stream_replaces_free_rows_of_its_table() {
        let mut table = Xref::new(4, XrefType::CrossReferenceTable);
        table.insert(1, XrefEntry::Normal { offset: 15, generation: 0 });
        table.insert(2, XrefEntry::Free { next: 0, generation: 0 });
        let mut stream = Xref::new(4, XrefType::CrossReferenceStream);
        stream.insert(1, XrefEntry::Normal { offset: 99, generation: 0 });
        stream.insert(2, XrefEntry::Compressed { container: 3, index: 0 });

        table.merge_hybrid(stream);
        assert_eq!(table.get(1), Some(&XrefEntry::Normal { offset: 15, generation: 0 }));
        assert_eq!(table.get(2), Some(&XrefEntry::Compressed { container: 3, index: 0 }));
        assert_eq!(table.xref_type, XrefType::CrossReferenceTable);
    }

    #[test]
    fn stream_rows_decode_all_entry_kinds() {
        let rows = vec![
            0, 0, 0, 0xFF, 0xFF, // free head
            1, 0, 17, 0, 0, // offset 17
            2, 0, 5, 0, 3, // in object stream 5, index 3
        ];
        let dict = dictionary! {
            "Type" => "XRef",
            "Size" => 3,
            "W" => vec![1.into(), 2.into(), 2.into()],
        };
        let (xref, trailer) = decode_xref_stream(Stream::new(dict, rows)).unwrap();
        assert_eq!(xref.get(0), Some(&XrefEntry::Free { next: 0, generation: 65535 }));
        assert_eq!(xref.get(1), Some(&XrefEntry::Normal { offset: 17, generation: 0 }));
        assert_eq!(xref.get(2), Some(&XrefEntry::Compressed { container: 5, index: 3 }));
        assert!(!trailer.has(b"W"));
        assert_eq!(xref.in_use().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn encoded_rows_decode_back() {
        let mut xref = Xref::new(4, XrefType::CrossReferenceStream);
        xref.insert(0, XrefEntry::Free { next: 0, generation: 65535 });
        xref.insert(1, XrefEntry::Normal { offset: 70_000, generation: 0 });
        xref.insert(3, XrefEntry::Compressed { container: 1, index: 0 });
        let (rows, widths) = encode_xref_rows(&xref);
        assert_eq!(widths, [1, 3, 2]);

        let index: Vec<Object> = subsections(&xref)
            .into_iter()
            .flat_map(|(start, count)| [Object::from(start), Object::from(count)])
            .collect();
        let dict = dictionary! {
            "Size" => 4,
            "Index" => index,
            "W" => widths.iter().map(|&w| Object::from(i64::from(w))).collect::<Vec<_>>(),
        };
        let (decoded, _) = decode_xref_stream(Stream::new(dict, rows)).unwrap();
        assert_eq!(decoded.entries, xref.entries);
    }

    #[test]
    fn consecutive_ids_form_one_subsection() {
        let mut xref = Xref::new(0, XrefType::CrossReferenceTable);
        for id in [0, 1, 2, 5, 6, 9] {
            xref.insert(id, XrefEntry::Normal { offset: 0, generation: 0 });
        }
        assert_eq!(subsections(&xref), vec![(0, 3), (5, 2), (9, 1)]);
    }
}
