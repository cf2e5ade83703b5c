//! Stream filter engine.
//!
//! Flate is the only filter that is both decoded and encoded. LZW, ASCIIHex,
//! ASCII85 and RunLength are decoded so their streams can be re-filtered;
//! image codecs are recognised but never touched.

pub mod png;

use crate::error::DecompressError;
use crate::{Dictionary, Error, Object, Result};
use flate2::Compression as FlateLevel;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::warn;
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Flate,
    Lzw,
    AsciiHex,
    Ascii85,
    RunLength,
    Dct,
    Jpx,
    CcittFax,
    Jbig2,
}

impl Filter {
    /// Map a `/Filter` name (full or inline-image abbreviation) to a filter.
    pub fn from_name(name: &[u8]) -> Result<Filter> {
        Ok(match name {
            b"FlateDecode" | b"Fl" => Filter::Flate,
            b"LZWDecode" | b"LZW" => Filter::Lzw,
            b"ASCIIHexDecode" | b"AHx" => Filter::AsciiHex,
            b"ASCII85Decode" | b"A85" => Filter::Ascii85,
            b"RunLengthDecode" | b"RL" => Filter::RunLength,
            b"DCTDecode" | b"DCT" => Filter::Dct,
            b"JPXDecode" => Filter::Jpx,
            b"CCITTFaxDecode" | b"CCF" => Filter::CcittFax,
            b"JBIG2Decode" => Filter::Jbig2,
            other => return Err(Error::UnsupportedFilter(String::from_utf8_lossy(other).into_owned())),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Filter::Flate => "FlateDecode",
            Filter::Lzw => "LZWDecode",
            Filter::AsciiHex => "ASCIIHexDecode",
            Filter::Ascii85 => "ASCII85Decode",
            Filter::RunLength => "RunLengthDecode",
            Filter::Dct => "DCTDecode",
            Filter::Jpx => "JPXDecode",
            Filter::CcittFax => "CCITTFaxDecode",
            Filter::Jbig2 => "JBIG2Decode",
        }
    }

    /// Image codecs: their payload is carried verbatim, never decoded.
    pub fn is_image_codec(self) -> bool {
        matches!(self, Filter::Dct | Filter::Jpx | Filter::CcittFax | Filter::Jbig2)
    }
}

/// Encode `raw` with `filter`. Only Flate can be produced.
pub fn encode(raw: &[u8], filter: Filter, level: u32) -> Result<Vec<u8>> {
    match filter {
        Filter::Flate => {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), FlateLevel::new(level.min(9)));
            encoder.write_all(raw)?;
            Ok(encoder.finish()?)
        }
        other => Err(Error::UnsupportedFilter(other.name().to_string())),
    }
}

/// Decode `encoded` with `filter`, applying predictors from `params`.
pub fn decode(encoded: &[u8], filter: Filter, params: Option<&Dictionary>) -> Result<Vec<u8>> {
    let data = match filter {
        Filter::Flate => inflate(encoded)?,
        Filter::Lzw => decode_lzw(encoded, params)?,
        Filter::AsciiHex => decode_ascii_hex(encoded)?,
        Filter::Ascii85 => decode_ascii85(encoded)?,
        Filter::RunLength => decode_run_length(encoded)?,
        other => return Err(Error::UnsupportedFilter(other.name().to_string())),
    };
    match filter {
        Filter::Flate | Filter::Lzw => apply_predictor(data, params),
        _ => Ok(data),
    }
}

fn inflate(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(input.len() * 2);
    if input.is_empty() {
        return Ok(output);
    }
    let mut decoder = ZlibDecoder::new(input);
    if let Err(err) = decoder.read_to_end(&mut output) {
        // Truncated streams are common; keep whatever inflated cleanly.
        if output.is_empty() {
            return Err(DecompressError::Flate(err).into());
        }
        warn!("flate stream ended early after {} bytes: {}", output.len(), err);
    }
    Ok(output)
}

fn decode_lzw(input: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    use weezl::{BitOrder, decode::Decoder};

    let early_change = params
        .and_then(|p| p.get(b"EarlyChange").ok())
        .and_then(|p| p.as_i64().ok())
        .map(|v| v != 0)
        .unwrap_or(true);

    let mut decoder = if early_change {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        Decoder::new(BitOrder::Msb, 8)
    };
    decoder
        .decode(input)
        .map_err(|err| DecompressError::Lzw(err.to_string()).into())
}

fn decode_ascii_hex(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(input.len() / 2);
    let mut pending: Option<u8> = None;
    for &byte in input {
        let nibble = match byte {
            b'>' => break,
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            b' ' | b'\t' | b'\r' | b'\n' | b'\x0C' | b'\0' => continue,
            _ => return Err(DecompressError::AsciiHex("invalid hex digit").into()),
        };
        pending = match pending {
            Some(high) => {
                output.push(high << 4 | nibble);
                None
            }
            None => Some(nibble),
        };
    }
    if let Some(high) = pending {
        output.push(high << 4);
    }
    Ok(output)
}

fn decode_ascii85(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(input.len() * 4 / 5);
    let mut group = [0_u8; 5];
    let mut count = 0;

    let input = input.strip_prefix(b"<~").unwrap_or(input);
    for &byte in input {
        match byte {
            b'~' => break,
            b'z' if count == 0 => output.extend_from_slice(&[0; 4]),
            b'!'..=b'u' => {
                group[count] = byte - b'!';
                count += 1;
                if count == 5 {
                    output.extend_from_slice(&ascii85_group(&group)?);
                    count = 0;
                }
            }
            b' ' | b'\t' | b'\r' | b'\n' | b'\x0C' | b'\0' => {}
            _ => return Err(DecompressError::Ascii85("invalid character").into()),
        }
    }
    if count == 1 {
        return Err(DecompressError::Ascii85("dangling final character").into());
    }
    if count > 1 {
        for slot in group.iter_mut().skip(count) {
            *slot = b'u' - b'!';
        }
        output.extend_from_slice(&ascii85_group(&group)?[..count - 1]);
    }
    Ok(output)
}

fn ascii85_group(group: &[u8; 5]) -> Result<[u8; 4]> {
    let value = group
        .iter()
        .try_fold(0_u64, |acc, &digit| {
            let next = acc * 85 + u64::from(digit);
            (next <= u64::from(u32::MAX)).then_some(next)
        })
        .ok_or(DecompressError::Ascii85("group overflow"))?;
    Ok((value as u32).to_be_bytes())
}

fn decode_run_length(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(input.len() * 2);
    let mut pos = 0;
    while pos < input.len() {
        let length = input[pos];
        pos += 1;
        match length {
            128 => break,
            0..=127 => {
                let end = pos + usize::from(length) + 1;
                let run = input.get(pos..end).ok_or(DecompressError::RunLength("literal run truncated"))?;
                output.extend_from_slice(run);
                pos = end;
            }
            _ => {
                let byte = *input.get(pos).ok_or(DecompressError::RunLength("repeat run truncated"))?;
                output.extend(std::iter::repeat_n(byte, 257 - usize::from(length)));
                pos += 1;
            }
        }
    }
    Ok(output)
}

fn apply_predictor(data: Vec<u8>, params: Option<&Dictionary>) -> Result<Vec<u8>> {
    let Some(params) = params else {
        return Ok(data);
    };
    let int = |key: &[u8], default: i64| params.get(key).and_then(Object::as_i64).unwrap_or(default);
    let predictor = int(b"Predictor", 1);
    let columns = int(b"Columns", 1).max(1) as usize;
    let colors = int(b"Colors", 1).max(1) as usize;
    let bits = int(b"BitsPerComponent", 8).max(1) as usize;
    match predictor {
        1 => Ok(data),
        2 if bits == 8 => Ok(decode_tiff_rows(data, columns * colors, colors)),
        10..=15 => {
            let bytes_per_pixel = (colors * bits).div_ceil(8);
            let bytes_per_row = (columns * colors * bits).div_ceil(8);
            png::decode_frame(&data, bytes_per_pixel, bytes_per_row).map_err(|err| DecompressError::Predictor(err).into())
        }
        other => Err(DecompressError::UnsupportedPredictor { predictor: other, bits }.into()),
    }
}

/// Undo TIFF predictor 2 on 8-bit samples: each sample is stored as the
/// difference from the same component of the pixel to its left.
fn decode_tiff_rows(mut data: Vec<u8>, bytes_per_row: usize, colors: usize) -> Vec<u8> {
    for row in data.chunks_mut(bytes_per_row) {
        for i in colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - colors]);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;

    #[test]
    fn flate_round_trip() {
        let inputs: [&[u8]; 4] = [b"", b"a", b"hello hello hello hello", &[0, 255, 1, 254, 0, 0, 0]];
        for raw in inputs {
            let encoded = encode(raw, Filter::Flate, 6).unwrap();
            assert_eq!(decode(&encoded, Filter::Flate, None).unwrap(), raw);
        }
    }

    #[test]
    fn unknown_filter_name_is_unsupported() {
        match Filter::from_name(b"CryptoMagic") {
            Err(Error::UnsupportedFilter(name)) => assert_eq!(name, "CryptoMagic"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn only_flate_encodes() {
        assert!(matches!(encode(b"x", Filter::Lzw, 6), Err(Error::UnsupportedFilter(_))));
    }

    #[test]
    fn image_codecs_are_not_decoded() {
        assert!(Filter::Dct.is_image_codec());
        assert!(matches!(decode(b"\xFF\xD8", Filter::Dct, None), Err(Error::UnsupportedFilter(_))));
    }

    #[test]
    fn ascii_hex_decodes_with_whitespace_and_odd_length() {
        assert_eq!(decode(b"48 65 6c6C 6>", Filter::AsciiHex, None).unwrap(), b"Hell`");
    }

    #[test]
    fn ascii85_decodes_reference_sample() {
        assert_eq!(decode(b"<~87cURD]j7BEbo80~>", Filter::Ascii85, None).unwrap(), b"Hello world!");
        assert_eq!(decode(b"z~>", Filter::Ascii85, None).unwrap(), vec![0; 4]);
    }

    #[test]
    fn run_length_expands_both_run_kinds() {
        let encoded = [2, b'a', b'b', b'c', 254, b'z', 128];
        assert_eq!(decode(&encoded, Filter::RunLength, None).unwrap(), b"abczzz");
    }

    #[test]
    fn lzw_decodes_early_change_sample() {
        // Example from the PDF reference, section 7.4.4.2.
        let encoded = [0x80, 0x0B, 0x60, 0x50, 0x22, 0x0C, 0x0C, 0x85, 0x01];
        assert_eq!(
            decode(&encoded, Filter::Lzw, None).unwrap(),
            vec![45, 45, 45, 45, 45, 65, 45, 45, 45, 66]
        );
    }

    #[test]
    fn flate_with_tiff_predictor() {
        let rows = [10_u8, 1, 1, 1, 200, 100, 0, 0];
        let encoded = encode(&rows, Filter::Flate, 6).unwrap();
        let params = dictionary! { "Predictor" => 2, "Columns" => 2, "Colors" => 2 };
        assert_eq!(
            decode(&encoded, Filter::Flate, Some(&params)).unwrap(),
            vec![10, 1, 11, 2, 200, 100, 200, 100]
        );
    }

    #[test]
    fn unsupported_predictor_is_an_error() {
        let encoded = encode(b"abcd", Filter::Flate, 6).unwrap();
        for params in [
            dictionary! { "Predictor" => 3, "Columns" => 4 },
            dictionary! { "Predictor" => 2, "Columns" => 4, "BitsPerComponent" => 4 },
        ] {
            assert!(matches!(
                decode(&encoded, Filter::Flate, Some(&params)),
                Err(Error::Decompress(DecompressError::UnsupportedPredictor { .. }))
            ));
        }
    }

    #[test]
    fn flate_with_png_predictor() {
        let rows = [2_u8, 1, 2, 2, 0, 0];
        let encoded = encode(&rows, Filter::Flate, 6).unwrap();
        let params = dictionary! { "Predictor" => 12, "Columns" => 2 };
        assert_eq!(decode(&encoded, Filter::Flate, Some(&params)).unwrap(), vec![1, 2, 1, 2]);
    }
}
