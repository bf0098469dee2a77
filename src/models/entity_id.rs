//! Entity identifiers and entity-id value ranges.
//!
//! An [`EntityId`] is an entity kind plus a 58-bit value. Its canonical string
//! form, `"{Kind}:{value}"`, encodes the value as exactly ten characters of a
//! 59-symbol alphabet. The alphabet is in ascending ASCII order, so for a fixed
//! kind the byte-wise order of the strings matches the numeric order of the
//! values. Range queries over the database rely on that.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of value bits in an entity id.
pub const ENTITY_ID_VALUE_BITS: u32 = 58;

/// Exclusive upper bound of entity id values.
pub const ENTITY_ID_MAX_VALUE: u64 = 1 << ENTITY_ID_VALUE_BITS;

/// Symbols used to encode entity id values (1, I and l omitted).
const VALUE_ALPHABET: &[u8; 59] = b"023456789ABCDEFGHJKLMNOPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Length of the encoded value part.
pub const ENTITY_ID_VALUE_LEN: usize = 10;

/// Name of a persisted entity type, e.g. `Player`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKind(String);

impl EntityKind {
    /// Creates an entity kind from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the kind name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Errors from parsing an entity id string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityIdParseError {
    /// The string has no `Kind:` prefix.
    #[error("entity id '{0}' is missing the ':' separator")]
    MissingSeparator(String),

    /// The kind part is empty.
    #[error("entity id '{0}' has an empty kind")]
    EmptyKind(String),

    /// The value part has the wrong length.
    #[error("entity id values must be exactly {ENTITY_ID_VALUE_LEN} characters, got {len} in '{input}'")]
    InvalidLength {
        /// Length of the value part.
        len: usize,
        /// The full input.
        input: String,
    },

    /// The value part contains a character outside the alphabet.
    #[error("invalid entity id character '{ch}' in '{input}'")]
    InvalidCharacter {
        /// The offending character.
        ch: char,
        /// The full input.
        input: String,
    },

    /// The decoded value does not fit in the value bits.
    #[error("entity id value out of range in '{0}'")]
    ValueOutOfRange(String),

    /// A numeric value does not fit in the value bits.
    #[error("entity id value {0} is not below {ENTITY_ID_MAX_VALUE}")]
    ValueTooLarge(u64),
}

/// Identifier of a persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    kind: EntityKind,
    value: u64,
}

impl EntityId {
    /// Creates an entity id. The value is masked to the value bits.
    #[must_use]
    pub const fn new(kind: EntityKind, value: u64) -> Self {
        Self {
            kind,
            value: value & (ENTITY_ID_MAX_VALUE - 1),
        }
    }

    /// Creates an entity id, refusing values that do not fit in the value bits.
    ///
    /// # Errors
    ///
    /// Returns `EntityIdParseError::ValueTooLarge` if `value` is not below
    /// [`ENTITY_ID_MAX_VALUE`].
    pub fn try_new(kind: EntityKind, value: u64) -> Result<Self, EntityIdParseError> {
        if value >= ENTITY_ID_MAX_VALUE {
            return Err(EntityIdParseError::ValueTooLarge(value));
        }
        Ok(Self { kind, value })
    }

    /// Returns the kind.
    #[must_use]
    pub const fn kind(&self) -> &EntityKind {
        &self.kind
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.value
    }

    /// Encodes a value as its fixed-width string form.
    #[must_use]
    pub fn value_to_string(mut value: u64) -> String {
        let base = VALUE_ALPHABET.len() as u64;
        let mut chars = [0u8; ENTITY_ID_VALUE_LEN];
        for slot in chars.iter_mut().rev() {
            #[allow(clippy::cast_possible_truncation)]
            let digit = (value % base) as usize;
            *slot = VALUE_ALPHABET[digit];
            value /= base;
        }
        chars.iter().map(|&b| char::from(b)).collect()
    }

    /// Parses an entity id from its canonical `Kind:value` form.
    ///
    /// # Errors
    ///
    /// Returns `EntityIdParseError` if the string is malformed.
    pub fn parse(input: &str) -> Result<Self, EntityIdParseError> {
        let (kind, encoded) = input
            .split_once(':')
            .ok_or_else(|| EntityIdParseError::MissingSeparator(input.to_string()))?;
        if kind.is_empty() {
            return Err(EntityIdParseError::EmptyKind(input.to_string()));
        }
        if encoded.len() != ENTITY_ID_VALUE_LEN {
            return Err(EntityIdParseError::InvalidLength {
                len: encoded.len(),
                input: input.to_string(),
            });
        }

        let base = VALUE_ALPHABET.len() as u64;
        let mut value: u64 = 0;
        for ch in encoded.chars() {
            let digit = u8::try_from(ch)
                .ok()
                .and_then(|b| VALUE_ALPHABET.iter().position(|&a| a == b))
                .ok_or_else(|| EntityIdParseError::InvalidCharacter {
                    ch,
                    input: input.to_string(),
                })?;
            value = value
                .checked_mul(base)
                .and_then(|v| v.checked_add(digit as u64))
                .ok_or_else(|| EntityIdParseError::ValueOutOfRange(input.to_string()))?;
        }
        if value >= ENTITY_ID_MAX_VALUE {
            return Err(EntityIdParseError::ValueOutOfRange(input.to_string()));
        }

        Ok(Self {
            kind: EntityKind::new(kind),
            value,
        })
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, Self::value_to_string(self.value))
    }
}

impl FromStr for EntityId {
    type Err = EntityIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for EntityId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Inclusive range of entity id values of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityIdRange {
    /// Kind of the ids in the range.
    pub kind: EntityKind,
    /// First value in the range.
    pub first_inclusive: u64,
    /// Last value in the range.
    pub last_inclusive: u64,
}

impl EntityIdRange {
    /// Creates a range.
    #[must_use]
    pub const fn new(kind: EntityKind, first_inclusive: u64, last_inclusive: u64) -> Self {
        Self {
            kind,
            first_inclusive,
            last_inclusive,
        }
    }

    /// Key of the first entity id in the range.
    ///
    /// # Errors
    ///
    /// Returns `EntityIdParseError::ValueTooLarge` if the value has no key.
    pub fn first_key(&self) -> Result<String, EntityIdParseError> {
        Ok(EntityId::try_new(self.kind.clone(), self.first_inclusive)?.to_string())
    }

    /// Key of the last entity id in the range.
    ///
    /// # Errors
    ///
    /// Returns `EntityIdParseError::ValueTooLarge` if the value has no key.
    pub fn last_key(&self) -> Result<String, EntityIdParseError> {
        Ok(EntityId::try_new(self.kind.clone(), self.last_inclusive)?.to_string())
    }

    /// Returns true if the value lies within the range.
    #[must_use]
    pub const fn contains(&self, value: u64) -> bool {
        value >= self.first_inclusive && value <= self.last_inclusive
    }
}
