//! Store serialisation.
//!
//! # Binary layout
//!
//! The authoritative on-disk form is the bincode encoding (fixed-width
//! integers, little-endian) of [`Store`]:
//!
//! | field        | type  | notes                                   |
//! |--------------|-------|-----------------------------------------|
//! | version      | u32   | `memstore_types::STORE_VERSION`         |
//! | vector_dim   | u64   |                                         |
//! | records      | u64 + | length prefix, then each record below   |
//! | ├ id         | u128  |                                         |
//! | ├ ts         | i64   | Unix seconds                            |
//! | ├ kind       | str   | u64 length + UTF-8 bytes                |
//! | ├ weight     | f32   |                                         |
//! | ├ text       | str   | u64 length + UTF-8 bytes                |
//! | └ vector     | [f32] | u64 length + `vector_dim` floats        |
//!
//! # Text layout
//!
//! A line-oriented alternative used for export and import:
//!
//! ```text
//! memstore|1|256
//! 1718000000123|1718000000|profile|3|user prefers\nthe dark theme|0,0.5,…
//! ```
//!
//! `kind` and `text` escape `\` as `\\`, newline as `\n`, carriage return as
//! `\r` and `|` as `\|`. Floats are written in Rust's shortest round-trip
//! form, so decoding reproduces every value bit for bit.
//!
//! The legacy five-field log (`id|ts|kind|weight|text`, no vectors) can be
//! read with [`decode_legacy_log`]; its records come back with empty vectors
//! for the caller to re-embed.

use bincode::Options;
use memstore_types::{Record, Store};
use thiserror::Error;

/// First field of the text header line.
pub const TEXT_MAGIC: &str = "memstore";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise while encoding or decoding a store.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("binary encoding failed: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("{0}")]
    Integrity(String),
}

fn malformed(line: usize, reason: impl Into<String>) -> CodecError {
    CodecError::Malformed {
        line,
        reason: reason.into(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Binary
// ─────────────────────────────────────────────────────────────────────────────

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

/// Serialise `store` to its binary form.
pub fn encode_binary(store: &Store) -> Result<Vec<u8>, CodecError> {
    Ok(bincode_options().serialize(store)?)
}

/// Parse and validate a binary store.
///
/// Truncated input, trailing bytes, an unknown version, a record whose vector
/// length differs from the header, and duplicate ids are all rejected.
pub fn decode_binary(bytes: &[u8]) -> Result<Store, CodecError> {
    let store: Store = bincode_options()
        .with_limit(bytes.len() as u64)
        .reject_trailing_bytes()
        .deserialize(bytes)?;
    store.check_integrity().map_err(CodecError::Integrity)?;
    Ok(store)
}

// ─────────────────────────────────────────────────────────────────────────────
// Escaping
// ─────────────────────────────────────────────────────────────────────────────

/// Escape the field separator, backslash and line breaks.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '|' => out.push_str("\\|"),
            _ => out.push(ch),
        }
    }
    out
}

/// Split one line on unescaped `|`, unescaping each field.
fn split_fields(line: &str, line_no: usize) -> Result<Vec<String>, CodecError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('\\') => current.push('\\'),
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                Some('|') => current.push('|'),
                Some(other) => {
                    return Err(malformed(line_no, format!("unknown escape \\{other}")));
                }
                None => return Err(malformed(line_no, "dangling escape at end of line")),
            },
            '|' => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    Ok(fields)
}

// ─────────────────────────────────────────────────────────────────────────────
// Text
// ─────────────────────────────────────────────────────────────────────────────

/// Encode one record as a single line (no trailing newline).
pub fn encode_record_line(record: &Record) -> String {
    let vector = record
        .vector
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{}|{}|{}|{}|{}|{}",
        record.id,
        record.ts,
        escape(&record.kind),
        record.weight,
        escape(&record.text),
        vector
    )
}

/// Encode the whole store: header line, then one line per record.
pub fn encode_text(store: &Store) -> String {
    let mut out = format!("{TEXT_MAGIC}|{}|{}\n", store.version, store.vector_dim);
    for record in &store.records {
        out.push_str(&encode_record_line(record));
        out.push('\n');
    }
    out
}

fn parse_num<T: std::str::FromStr>(field: &str, what: &str, line_no: usize) -> Result<T, CodecError> {
    field
        .parse()
        .map_err(|_| malformed(line_no, format!("invalid {what} {field:?}")))
}

fn record_from_fields(fields: &[String], line_no: usize) -> Result<Record, CodecError> {
    Ok(Record {
        id: parse_num(&fields[0], "id", line_no)?,
        ts: parse_num(&fields[1], "timestamp", line_no)?,
        kind: fields[2].clone(),
        weight: parse_num(&fields[3], "weight", line_no)?,
        text: fields[4].clone(),
        vector: Vec::new(),
    })
}

/// Decode one six-field record line.
pub fn decode_record_line(line: &str, line_no: usize) -> Result<Record, CodecError> {
    let fields = split_fields(line, line_no)?;
    if fields.len() != 6 {
        return Err(malformed(
            line_no,
            format!("expected 6 fields, found {}", fields.len()),
        ));
    }
    let mut record = record_from_fields(&fields, line_no)?;
    if !fields[5].is_empty() {
        record.vector = fields[5]
            .split(',')
            .map(|v| parse_num(v, "vector value", line_no))
            .collect::<Result<_, _>>()?;
    }
    Ok(record)
}

/// Decode a text dump produced by [`encode_text`].
///
/// Blank lines are skipped. The decoded store passes the same integrity
/// checks as a binary one.
pub fn decode_text(input: &str) -> Result<Store, CodecError> {
    let mut lines = input.lines().enumerate().map(|(i, l)| (i + 1, l));
    let (header_no, header) = lines
        .by_ref()
        .find(|(_, l)| !l.trim().is_empty())
        .ok_or_else(|| malformed(1, "missing header line"))?;

    let header_fields = split_fields(header, header_no)?;
    if header_fields.len() != 3 || header_fields[0] != TEXT_MAGIC {
        return Err(malformed(
            header_no,
            format!("expected header `{TEXT_MAGIC}|<version>|<dim>`"),
        ));
    }
    let mut store = Store {
        version: parse_num(&header_fields[1], "version", header_no)?,
        vector_dim: parse_num(&header_fields[2], "vector dimension", header_no)?,
        records: Vec::new(),
    };

    for (line_no, line) in lines {
        if line.is_empty() {
            continue;
        }
        store.records.push(decode_record_line(line, line_no)?);
    }
    store.check_integrity().map_err(CodecError::Integrity)?;
    Ok(store)
}

/// Decode the legacy five-field log. Returned records have empty vectors.
pub fn decode_legacy_log(input: &str) -> Result<Vec<Record>, CodecError> {
    let mut records = Vec::new();
    for (i, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_fields(line, i + 1)?;
        if fields.len() != 5 {
            return Err(malformed(
                i + 1,
                format!("expected 5 fields, found {}", fields.len()),
            ));
        }
        records.push(record_from_fields(&fields, i + 1)?);
    }
    Ok(records)
}

/// True when `input` starts with a text-dump header rather than log lines.
pub fn looks_like_text_dump(input: &str) -> bool {
    input
        .lines()
        .find(|l| !l.trim().is_empty())
        .is_some_and(|l| l.starts_with(&format!("{TEXT_MAGIC}|")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
