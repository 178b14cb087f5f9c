//! Codec errors for TC string processing
//!
//! Decode failures carry enough context (field name, bit offset, available
//! bits) to tell a truncated cookie from a tampered one when reading logs.
//! Callers treat every `DecodeError` as "no prior consent".

use thiserror::Error;

/// TC string decoding errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    /// Input was empty or only separators
    #[error("Empty consent string")]
    Empty,

    /// Character outside the base64url alphabet
    #[error("Invalid character {ch:?} at position {position}")]
    InvalidCharacter { ch: char, position: usize },

    /// Core segment shorter than the fixed-width header
    #[error("Core segment too short: {len} chars, need at least {min}")]
    TooShort { len: usize, min: usize },

    /// base64url payload could not be decoded
    #[error("Invalid base64url segment {segment}: {reason}")]
    Base64 { segment: usize, reason: String },

    /// Field extends past the end of the segment
    #[error("Truncated field {field}: need {needed} bits at offset {offset}, segment has {available}")]
    Truncated {
        field: &'static str,
        needed: u32,
        offset: usize,
        available: usize,
    },

    /// Only version 2 strings are understood
    #[error("Unsupported TC string version {0}: supported version is 2")]
    UnsupportedVersion(u8),

    /// Letter field outside A-Z
    #[error("Invalid letter value {value} in field {field}")]
    InvalidLetter { field: &'static str, value: u8 },

    /// Segment type tag not defined by TCF v2
    #[error("Unknown segment type {segment_type} in segment {segment}")]
    UnknownSegmentType { segment_type: u8, segment: usize },

    /// Range entry with end before start
    #[error("Invalid vendor range {start}-{end} in {field}")]
    InvalidRange {
        field: &'static str,
        start: u32,
        end: u32,
    },
}

impl DecodeError {
    pub fn truncated(field: &'static str, needed: u32, offset: usize, available: usize) -> Self {
        Self::Truncated {
            field,
            needed,
            offset,
            available,
        }
    }

    pub fn base64(segment: usize, reason: impl ToString) -> Self {
        Self::Base64 {
            segment,
            reason: reason.to_string(),
        }
    }
}

/// TC string encoding errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Value does not fit in the field's bit width
    #[error("Field {field} overflow: {value} does not fit in {bits} bits")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        bits: u32,
    },

    /// Two-letter code (language, country) is not A-Z
    #[error("Invalid two-letter code for {field}: {value:?}")]
    InvalidLetters { field: &'static str, value: String },

    /// Timestamp before the Unix epoch
    #[error("Timestamp for {field} is before the Unix epoch")]
    InvalidTimestamp { field: &'static str },
}

impl CodecError {
    pub fn overflow(field: &'static str, value: u64, bits: u32) -> Self {
        Self::FieldOverflow { field, value, bits }
    }

    pub fn invalid_letters(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidLetters {
            field,
            value: value.into(),
        }
    }
}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

pub type CodecResult<T> = std::result::Result<T, CodecError>;
