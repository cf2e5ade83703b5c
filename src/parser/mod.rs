use crate::error::ParseError;
use crate::xref::{Xref, XrefEntry, XrefType, decode_xref_stream};
use crate::{Dictionary, Object, ObjectId, Stream, StringFormat};
use std::str::{self, FromStr};

use nom::branch::alt;
use nom::bytes::complete::{tag, take, take_while, take_while1, take_while_m_n};
use nom::character::complete::{digit0, digit1, one_of, space0};
use nom::combinator::{map, map_opt, map_res, opt, verify};
use nom::error::{ErrorKind, ParseError as _};
use nom::multi::{fold_many0, fold_many1, many0, many0_count};
use nom::sequence::{delimited, pair, preceded, separated_pair, terminated};
use nom::{AsBytes, AsChar, IResult, Input, Parser};
use nom_locate::LocatedSpan;

pub(crate) type ParserInput<'a> = LocatedSpan<&'a [u8], &'a str>;
pub(crate) type NomError<'a> = nom::error::Error<ParserInput<'a>>;
pub(crate) type NomResult<'a, O, E = NomError<'a>> = IResult<ParserInput<'a>, O, E>;

/// Looks up the value of an indirect `/Length` while a stream is parsed.
pub(crate) type LengthResolver<'r> = &'r dyn Fn(ObjectId) -> Option<i64>;

/// Maximum allowed nesting of literal strings.
pub const MAX_BRACKET: usize = 100;

#[inline]
fn strip_nom<O>(r: NomResult<O>) -> Option<O> {
    r.ok().map(|(_, o)| o)
}

#[inline]
fn convert_result<O, E>(result: Result<O, E>, input: ParserInput, error_kind: ErrorKind) -> NomResult<O> {
    result
        .map(|o| (input, o))
        .map_err(|_| nom::Err::Error(NomError::from_error_kind(input, error_kind)))
}

pub(crate) fn eol(input: ParserInput) -> NomResult<ParserInput> {
    alt((tag(&b"\r\n"[..]), tag(&b"\n"[..]), tag(&b"\r"[..]))).parse(input)
}

pub(crate) fn comment(input: ParserInput) -> NomResult<()> {
    map(
        (tag(&b"%"[..]), take_while(|c: u8| !b"\r\n".contains(&c)), eol),
        |_| (),
    )
    .parse(input)
}

#[inline]
fn is_whitespace(c: u8) -> bool {
    b" \t\n\r\0\x0C".contains(&c)
}

#[inline]
fn is_delimiter(c: u8) -> bool {
    b"()<>[]{}/%".contains(&c)
}

#[inline]
fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

#[inline]
fn is_direct_literal_string(c: u8) -> bool {
    !b"()\\\r\n".contains(&c)
}

fn white_space(input: ParserInput) -> NomResult<()> {
    map(take_while(is_whitespace), |_| ()).parse(input)
}

pub(crate) fn space(input: ParserInput) -> NomResult<()> {
    fold_many0(
        alt((map(take_while1(is_whitespace), |_| ()), comment)),
        || {},
        |_, _| (),
    )
    .parse(input)
}

fn integer(input: ParserInput) -> NomResult<i64> {
    let (i, _) = pair(opt(one_of("+-")), digit1).parse(input)?;

    let int_input = &input[..input.len() - i.len()];
    convert_result(
        str::from_utf8(int_input).map_err(drop).and_then(|s| i64::from_str(s).map_err(drop)),
        i,
        ErrorKind::Digit,
    )
}

fn real(input: ParserInput) -> NomResult<f64> {
    let (i, _) = pair(
        opt(one_of("+-")),
        alt((
            map((digit1, tag(&b"."[..]), digit0), |_| ()),
            map(pair(tag(&b"."[..]), digit1), |_| ()),
        )),
    )
    .parse(input)?;

    let float_input = &input[..input.len() - i.len()];
    convert_result(
        str::from_utf8(float_input).map_err(drop).and_then(|s| f64::from_str(s).map_err(drop)),
        i,
        ErrorKind::Float,
    )
}

fn hex_char(input: ParserInput) -> NomResult<u8> {
    map_res(
        verify(take(2usize), |h: &ParserInput| h.as_bytes().iter().copied().all(AsChar::is_hex_digit)),
        |x: ParserInput| u8::from_str_radix(str::from_utf8(&x).unwrap_or("zz"), 16),
    )
    .parse(input)
}

fn oct_char(input: ParserInput) -> NomResult<u8> {
    map_res(
        take_while_m_n(1, 3, AsChar::is_oct_digit),
        // Overflow is ignored, "\777" is 0xFF.
        |x: ParserInput| u16::from_str_radix(str::from_utf8(&x).unwrap_or("z"), 8).map(|o| o as u8),
    )
    .parse(input)
}

pub(crate) fn name(input: ParserInput) -> NomResult<Vec<u8>> {
    preceded(
        tag(&b"/"[..]),
        many0(alt((
            preceded(tag(&b"#"[..]), hex_char),
            map_opt(take(1usize), |c: ParserInput| {
                if c[0] != b'#' && is_regular(c[0]) { Some(c[0]) } else { None }
            }),
        ))),
    )
    .parse(input)
}

fn escape_sequence(input: ParserInput) -> NomResult<Option<u8>> {
    preceded(
        tag(&b"\\"[..]),
        alt((
            map(oct_char, Some),
            map(eol, |_| None),
            map(tag(&b"n"[..]), |_| Some(b'\n')),
            map(tag(&b"r"[..]), |_| Some(b'\r')),
            map(tag(&b"t"[..]), |_| Some(b'\t')),
            map(tag(&b"b"[..]), |_| Some(b'\x08')),
            map(tag(&b"f"[..]), |_| Some(b'\x0C')),
            map(take(1usize), |c: ParserInput| Some(c[0])),
        )),
    )
    .parse(input)
}

enum InnerLiteralString<'a> {
    Direct(ParserInput<'a>),
    Escape(Option<u8>),
    Eol(ParserInput<'a>),
    Nested(Vec<u8>),
}

impl InnerLiteralString<'_> {
    fn push(&self, output: &mut Vec<u8>) {
        match self {
            InnerLiteralString::Direct(s) | InnerLiteralString::Eol(s) => output.extend_from_slice(s),
            InnerLiteralString::Escape(e) => output.extend(e),
            InnerLiteralString::Nested(n) => output.extend_from_slice(n),
        }
    }
}

fn inner_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        fold_many0(
            alt((
                map(take_while1(is_direct_literal_string), InnerLiteralString::Direct),
                map(escape_sequence, InnerLiteralString::Escape),
                map(eol, InnerLiteralString::Eol),
                map(nested_literal_string(depth), InnerLiteralString::Nested),
            )),
            Vec::new,
            |mut out: Vec<u8>, value| {
                value.push(&mut out);
                out
            },
        )
        .parse(input)
    }
}

fn nested_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        if depth == 0 {
            Err(nom::Err::Error(NomError::from_error_kind(input, ErrorKind::TooLarge)))
        } else {
            map(
                delimited(tag(&b"("[..]), inner_literal_string(depth - 1), tag(&b")"[..])),
                |mut content| {
                    content.insert(0, b'(');
                    content.push(b')');
                    content
                },
            )
            .parse(input)
        }
    }
}

fn literal_string(input: ParserInput) -> NomResult<Vec<u8>> {
    delimited(tag(&b"("[..]), inner_literal_string(MAX_BRACKET), tag(&b")"[..])).parse(input)
}

#[inline]
fn hex_digit(input: ParserInput) -> NomResult<u8> {
    map_opt(take(1usize), |c: ParserInput| (c[0] as char).to_digit(16).map(|d| d as u8)).parse(input)
}

fn hexadecimal_string(input: ParserInput) -> NomResult<Object> {
    map(
        delimited(
            tag(&b"<"[..]),
            terminated(
                fold_many0(
                    preceded(white_space, hex_digit),
                    || -> (Vec<u8>, bool) { (Vec::new(), false) },
                    |state, c| match state {
                        (mut out, false) => {
                            out.push(c << 4);
                            (out, true)
                        }
                        (mut out, true) => {
                            if let Some(last) = out.last_mut() {
                                *last |= c;
                            }
                            (out, false)
                        }
                    },
                ),
                white_space,
            ),
            tag(&b">"[..]),
        ),
        |(bytes, _)| match bytes.strip_prefix(b"\xFE\xFF") {
            Some(units) => Object::String(units.to_vec(), StringFormat::Utf16),
            None => Object::String(bytes, StringFormat::Hexadecimal),
        },
    )
    .parse(input)
}

fn boolean(input: ParserInput) -> NomResult<Object> {
    alt((
        map(tag(&b"true"[..]), |_| Object::Boolean(true)),
        map(tag(&b"false"[..]), |_| Object::Boolean(false)),
    ))
    .parse(input)
}

fn null(input: ParserInput) -> NomResult<Object> {
    map(tag(&b"null"[..]), |_| Object::Null).parse(input)
}

fn array(input: ParserInput) -> NomResult<Vec<Object>> {
    delimited(pair(tag(&b"["[..]), space), many0(_direct_object), tag(&b"]"[..])).parse(input)
}

pub(crate) fn dictionary(input: ParserInput) -> NomResult<Dictionary> {
    delimited(pair(tag(&b"<<"[..]), space), inner_dictionary, tag(&b">>"[..])).parse(input)
}

fn inner_dictionary(input: ParserInput) -> NomResult<Dictionary> {
    fold_many0(
        pair(terminated(name, space), _direct_object),
        Dictionary::new,
        |mut dict, (key, value)| {
            dict.set(key, value);
            dict
        },
    )
    .parse(input)
}

fn stream<'a>(input: ParserInput<'a>, resolve_length: LengthResolver) -> NomResult<'a, Object> {
    let (i, dict) = terminated(dictionary, (space, tag(&b"stream"[..]), space0, eol)).parse(input)?;

    let declared = dict.get(b"Length").ok().and_then(|value| match value {
        Object::Reference(id) => resolve_length(*id),
        other => other.as_i64().ok(),
    });

    if let Some(length) = declared.and_then(|length| usize::try_from(length).ok()) {
        let declared_body = terminated(
            take(length),
            (opt(eol), space0, tag(&b"endstream"[..])),
        )
        .parse(i);
        if let Ok((rest, data)) = declared_body {
            return Ok((rest, Object::Stream(Stream::new(dict, data.to_vec()))));
        }
    }

    // Missing or wrong Length: fall back to scanning for the keyword.
    let body = i.fragment();
    let Some(end) = body.windows(9).position(|w| w == b"endstream") else {
        return Err(nom::Err::Failure(NomError::from_error_kind(i, ErrorKind::LengthValue)));
    };
    let mut data_end = end;
    if body[..data_end].ends_with(b"\r\n") {
        data_end -= 2;
    } else if body[..data_end].ends_with(b"\n") || body[..data_end].ends_with(b"\r") {
        data_end -= 1;
    }
    let data = body[..data_end].to_vec();
    let keyword: NomResult<(ParserInput, ParserInput)> = (take(end), tag(&b"endstream"[..])).parse(i);
    let (rest, _) = keyword?;
    Ok((rest, Object::Stream(Stream::new(dict, data))))
}

fn unsigned_int<I: FromStr>(input: ParserInput) -> NomResult<I> {
    map_res(digit1, |digits: ParserInput| {
        str::from_utf8(&digits).map_err(drop).and_then(|s| I::from_str(s).map_err(drop))
    })
    .parse(input)
}

fn object_id(input: ParserInput) -> NomResult<ObjectId> {
    pair(terminated(unsigned_int, space), terminated(unsigned_int, space)).parse(input)
}

fn reference(input: ParserInput) -> NomResult<Object> {
    map(terminated(object_id, tag(&b"R"[..])), Object::Reference).parse(input)
}

fn _direct_objects(input: ParserInput) -> NomResult<Object> {
    alt((
        null,
        boolean,
        reference,
        map(real, Object::Real),
        map(integer, Object::Integer),
        map(name, Object::Name),
        map(literal_string, Object::string_literal),
        hexadecimal_string,
        map(array, Object::Array),
        map(dictionary, Object::Dictionary),
    ))
    .parse(input)
}

fn _direct_object(input: ParserInput) -> NomResult<Object> {
    terminated(_direct_objects, space).parse(input)
}

pub fn direct_object(input: ParserInput) -> Option<Object> {
    strip_nom(_direct_object.parse(input))
}

/// Parse a single direct object token such as `<</Type/Catalog>>` or `[1 0 R 2.5]`.
///
/// The whole input, apart from surrounding white space, must be consumed.
pub fn parse_object(bytes: &[u8]) -> crate::Result<Object> {
    let input = ParserInput::new_extra(bytes, "object");
    let parsed = preceded(space, _direct_object).parse(input);
    match parsed {
        Ok((rest, object)) if rest.is_empty() => Ok(object),
        _ => {
            let token: Vec<u8> = bytes
                .iter()
                .copied()
                .skip_while(|&c| is_whitespace(c))
                .take_while(|&c| is_regular(c))
                .collect();
            if token.first().is_some_and(|c| b"+-.0123456789".contains(c)) {
                Err(ParseError::InvalidNumber(String::from_utf8_lossy(&token).into_owned()).into())
            } else {
                Err(ParseError::InvalidObject.into())
            }
        }
    }
}

fn object<'a>(input: ParserInput<'a>, resolve_length: LengthResolver) -> NomResult<'a, Object> {
    let (i, object) = match stream(input, resolve_length) {
        Err(nom::Err::Error(_)) => _direct_objects(input)?,
        parsed => parsed?,
    };
    let (i, _) = space(i)?;
    Ok((i, object))
}

/// Parse `N G obj ... endobj` starting at `offset` of `input`.
pub(crate) fn indirect_object(
    input: &[u8], offset: usize, expected_id: Option<ObjectId>, resolve_length: LengthResolver,
) -> crate::Result<(ObjectId, Object)> {
    let input = ParserInput::new_extra(input, "indirect object");
    if offset > input.len() {
        return Err(ParseError::IndirectObject { offset }.into());
    }
    let input = input.take_from(offset);

    let (i, (_, object_id)) = terminated((space, object_id), pair(tag(&b"obj"[..]), space))
        .parse(input)
        .map_err(|_| ParseError::IndirectObject { offset })?;
    if let Some(expected) = expected_id {
        if object_id != expected {
            return Err(ParseError::ObjectIdMismatch { offset, expected }.into());
        }
    }

    let (_, object) = object(i, resolve_length).map_err(|_| ParseError::IndirectObject { offset })?;

    Ok((object_id, object))
}

pub fn header(input: ParserInput) -> Option<String> {
    strip_nom(
        map_res(
            delimited(
                tag(&b"%PDF-"[..]),
                take_while(|c: u8| !b"\r\n".contains(&c)),
                pair(eol, many0_count(comment)),
            ),
            |v: ParserInput| str::from_utf8(&v).map(|s| s.trim().to_string()),
        )
        .parse(input),
    )
}

/// The comment on the line after the header, used to flag binary content.
pub fn binary_mark(input: ParserInput) -> Option<Vec<u8>> {
    strip_nom(
        map(
            delimited(tag(&b"%"[..]), take_while(|c: u8| !b"\r\n".contains(&c)), eol),
            |v: ParserInput| v.to_vec(),
        )
        .parse(input),
    )
}

/// Decode a classic cross-reference table.
fn xref(input: ParserInput) -> NomResult<Xref> {
    let xref_eol = map(pair(opt(tag(&b" "[..])), eol), |_| ());
    let xref_entry = pair(
        separated_pair(unsigned_int::<u32>, tag(&b" "[..]), unsigned_int::<u32>),
        delimited(tag(&b" "[..]), map(one_of("nf"), |k| k == 'n'), xref_eol),
    );

    let xref_section = pair(
        separated_pair(unsigned_int::<u32>, tag(&b" "[..]), unsigned_int::<u32>),
        preceded(pair(opt(tag(&b" "[..])), eol), many0(xref_entry)),
    );

    delimited(
        pair(tag(&b"xref"[..]), eol),
        fold_many1(
            xref_section,
            || Xref::new(0, XrefType::CrossReferenceTable),
            |mut xref, ((start, _count), entries)| {
                for (index, ((value, generation), in_use)) in entries.into_iter().enumerate() {
                    let id = start + index as u32;
                    // Generations above 65535 do not fit and are dropped.
                    let Ok(generation) = u16::try_from(generation) else {
                        continue;
                    };
                    let entry = if in_use {
                        XrefEntry::Normal { offset: value, generation }
                    } else {
                        XrefEntry::Free { next: value, generation }
                    };
                    xref.insert(id, entry);
                }
                xref
            },
        ),
        space,
    )
    .parse(input)
}

fn trailer(input: ParserInput) -> NomResult<Dictionary> {
    delimited(pair(tag(&b"trailer"[..]), space), dictionary, space).parse(input)
}

/// Parse the cross-reference section at the start of `input`: either a
/// classic table followed by `trailer`, or an xref stream object.
pub(crate) fn xref_and_trailer(input: &[u8], resolve_length: LengthResolver) -> crate::Result<(Xref, Dictionary)> {
    let span = ParserInput::new_extra(input, "xref");
    if let Ok((_, (mut xref, trailer))) = pair(xref, trailer).parse(span) {
        xref.size = trailer
            .get(b"Size")
            .and_then(Object::as_i64)
            .ok()
            .and_then(|size| u32::try_from(size).ok())
            .ok_or(ParseError::InvalidTrailer)?;
        return Ok((xref, trailer));
    }
    match indirect_object(input, 0, None, resolve_length) {
        Ok((_, Object::Stream(stream))) => decode_xref_stream(stream),
        Ok(_) => Err(ParseError::InvalidXref.into()),
        Err(_) => Err(ParseError::InvalidTrailer.into()),
    }
}

pub fn xref_start(input: ParserInput) -> Option<i64> {
    strip_nom(
        delimited(
            pair(tag(&b"startxref"[..]), eol),
            delimited(space0, integer, space0),
            (eol, tag(&b"%%EOF"[..])),
        )
        .parse(input),
    )
}
