use nom::branch::alt;
use nom::character::complete::{char, i64, u64};
use nom::combinator::map;
use nom::multi::{length_data, many0};
use nom::sequence::{delimited, pair, terminated};
use nom::{IResult, Parser};

use crate::BencodeValue;

/// Error for input that is not well-formed bencode
#[derive(Debug, PartialEq)]
pub struct MalformedEncoding;

impl std::fmt::Display for MalformedEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed bencoded data")
    }
}

impl std::error::Error for MalformedEncoding {}

/// Decode the first bencode value in `data`, returning it together with the
/// number of bytes consumed.
///
/// Bytes after the first complete value are left untouched and simply not
/// counted. If a dictionary repeats a key, the last occurrence wins.
pub fn decode(data: &[u8]) -> Result<(BencodeValue, usize), MalformedEncoding> {
    match value(data) {
        Ok((leftover, parsed)) => Ok((parsed, data.len() - leftover.len())),
        Err(_) => Err(MalformedEncoding),
    }
}

fn value(input: &[u8]) -> IResult<&[u8], BencodeValue> {
    alt((integer, byte_string, list, dict)).parse(input)
}

fn integer(input: &[u8]) -> IResult<&[u8], BencodeValue> {
    map(delimited(char('i'), i64, char('e')), BencodeValue::Integer).parse(input)
}

fn byte_string(input: &[u8]) -> IResult<&[u8], BencodeValue> {
    map(byte_string_raw, BencodeValue::ByteString).parse(input)
}

fn byte_string_raw(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    map(length_data(terminated(u64, char(':'))), |bytes: &[u8]| {
        bytes.to_vec()
    })
    .parse(input)
}

fn list(input: &[u8]) -> IResult<&[u8], BencodeValue> {
    map(delimited(char('l'), many0(value), char('e')), BencodeValue::List).parse(input)
}

fn dict(input: &[u8]) -> IResult<&[u8], BencodeValue> {
    map(
        delimited(char('d'), many0(pair(byte_string_raw, value)), char('e')),
        |pairs| BencodeValue::Dict(pairs.into_iter().collect()),
    )
    .parse(input)
}
