// cinder is the trust engine implementing the upload/download protocol shared logic.
// Copyright (C) 2024  Himbeer <himbeerserverde@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Prefixed identifiers: `SN` session, `LK` link, `FL` file, `US` owner.
//!
//! Each kind is a distinct type (`Id<SessionKind>` and friends), so a
//! `LinkId` can never be passed where a `SessionId` is expected. Parsing
//! rejects an unrecognized prefix at the boundary, before any state is
//! touched, rather than constructing a value that later fails deep in a
//! use case (see the prefix-validation design note).

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CinderError, CinderResult};

/// Associates an [`Id`] marker type with its two-character textual prefix.
pub trait IdKind {
    const PREFIX: &'static str;
}

/// A UUID-shaped value prefixed by a two-character type tag. Equality
/// compares only the value, never the prefix — the prefix is purely a
/// compile-time witness of kind.
pub struct Id<K> {
    value: String,
    _kind: PhantomData<K>,
}

impl<K: IdKind> Id<K> {
    /// Generates a fresh, UUID-shaped identifier value.
    pub fn generate() -> Self {
        Self {
            value: Uuid::new_v4().to_string(),
            _kind: PhantomData,
        }
    }

    /// Wraps an existing raw value without the prefix, e.g. for ids
    /// recovered verbatim from a persisted column.
    pub fn from_raw(value: impl Into<String>) -> CinderResult<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(CinderError::FormatError(
                "identifier value must not be empty".to_string(),
            ));
        }
        Ok(Self {
            value,
            _kind: PhantomData,
        })
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl<K: IdKind> FromStr for Id<K> {
    type Err = CinderError;

    /// Parses `<prefix><value>`, splitting at the two-character boundary.
    /// A prefix other than `K::PREFIX` fails immediately with
    /// `FormatError` — no partial `Id` is ever constructed for an
    /// unrecognized prefix.
    fn from_str(s: &str) -> CinderResult<Self> {
        if s.len() < 2 {
            return Err(CinderError::FormatError(format!(
                "identifier '{s}' is shorter than the two-character prefix"
            )));
        }
        let (prefix, rest) = s.split_at(2);
        if prefix != K::PREFIX {
            return Err(CinderError::FormatError(format!(
                "unrecognized identifier prefix '{prefix}', expected '{}'",
                K::PREFIX
            )));
        }
        if rest.is_empty() {
            return Err(CinderError::FormatError(
                "identifier value must not be empty".to_string(),
            ));
        }
        Ok(Self {
            value: rest.to_string(),
            _kind: PhantomData,
        })
    }
}

impl<K: IdKind> fmt::Display for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", K::PREFIX, self.value)
    }
}

impl<K> fmt::Debug for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Id").field(&self.value).finish()
    }
}

impl<K> Clone for Id<K> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K> PartialEq for Id<K> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<K> Eq for Id<K> {}

impl<K> Hash for Id<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<K> Serialize for Id<K> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, K> Deserialize<'de> for Id<K> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self {
            value,
            _kind: PhantomData,
        })
    }
}

macro_rules! id_kind {
    ($kind:ident, $alias:ident, $prefix:literal) => {
        #[doc = concat!("Marker type for the `", $prefix, "`-prefixed identifier kind.")]
        pub struct $kind;
        impl IdKind for $kind {
            const PREFIX: &'static str = $prefix;
        }
        #[doc = concat!("A `", $prefix, "`-prefixed identifier.")]
        pub type $alias = Id<$kind>;
    };
}

id_kind!(SessionKind, SessionId, "SN");
id_kind!(LinkKind, LinkId, "LK");
id_kind!(FileKind, FileId, "FL");
id_kind!(UserKind, UserId, "US");

/// An opaque, server-chosen reference to a stored blob. Never derived
/// from user input; not a prefixed `Id`, since it carries no type tag on
/// the wire, only an object path or key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathReference(String);

impl PathReference {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PathReference {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for PathReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
