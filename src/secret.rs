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

//! The safe-secret family (C1): fixed-capacity byte and character
//! containers that move their source buffer on construction, expose a
//! read-only view until consumed exactly once, and guarantee
//! zeroization on every exit path.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{CinderError, CinderResult};

/// Describes the size and alignment constraints a [`SecretKind`] enforces
/// on construction, covering every variant the specification names:
/// fixed (`min == max`), min-only, max-only, min+max, and unconstrained,
/// plus an optional alignment where `0` disables the check.
trait SecretKind {
    const MIN: Option<usize> = None;
    const MAX: Option<usize> = None;
    const ALIGN: usize = 0;
    const NAME: &'static str;

    fn validate_len(len: usize) -> CinderResult<()> {
        if let Some(min) = Self::MIN {
            if len < min {
                return Err(CinderError::SizeError(format!(
                    "{} must be at least {min} bytes, got {len}",
                    Self::NAME
                )));
            }
        }
        if let Some(max) = Self::MAX {
            if len > max {
                return Err(CinderError::SizeError(format!(
                    "{} must be at most {max} bytes, got {len}",
                    Self::NAME
                )));
            }
        }
        if Self::ALIGN > 0 && len % Self::ALIGN != 0 {
            return Err(CinderError::SizeError(format!(
                "{} length {len} is not a multiple of {}",
                Self::NAME,
                Self::ALIGN
            )));
        }
        Ok(())
    }
}

enum State {
    Live(Vec<u8>),
    Consumed,
}

impl Drop for State {
    fn drop(&mut self) {
        if let State::Live(bytes) = self {
            bytes.zeroize();
        }
    }
}

/// A fixed-capacity byte container enforcing the size constraints of `K`.
///
/// Constructing one moves the source buffer: its bytes are copied in and
/// the caller's buffer is zeroized in place. The container can be read
/// (`len`, `byte_at`, `view`, `to_base64`, `ct_eq`) any number of times
/// until it is consumed exactly once via [`SafeBlob::resolve`] or
/// destroyed via [`SafeBlob::close`]; any further access after either
/// fails with [`CinderError::StateError`].
pub struct SafeBlob<K> {
    state: State,
    _kind: PhantomData<K>,
}

impl<K: SecretKind> SafeBlob<K> {
    /// Moves `source` into a new `SafeBlob`, zeroizing `source` in place.
    pub fn new(source: &mut [u8]) -> CinderResult<Self> {
        if source.is_empty() {
            return Err(CinderError::NullOrEmpty);
        }
        K::validate_len(source.len())?;

        let bytes = source.to_vec();
        source.zeroize();

        Ok(Self {
            state: State::Live(bytes),
            _kind: PhantomData,
        })
    }

    fn live(&self) -> CinderResult<&[u8]> {
        match &self.state {
            State::Live(bytes) => Ok(bytes),
            State::Consumed => Err(CinderError::StateError),
        }
    }

    /// Returns the length of the secret in bytes.
    pub fn len(&self) -> CinderResult<usize> {
        Ok(self.live()?.len())
    }

    /// Reports whether the secret is empty. Never true for a live secret,
    /// since construction rejects empty input; only meaningful once the
    /// state check itself is the point of the call.
    pub fn is_empty(&self) -> CinderResult<bool> {
        Ok(self.live()?.is_empty())
    }

    /// Returns the byte at `index`, bounds-checked.
    pub fn byte_at(&self, index: usize) -> CinderResult<u8> {
        self.live()?
            .get(index)
            .copied()
            .ok_or(CinderError::SizeError(format!(
                "index {index} out of bounds"
            )))
    }

    /// Returns a read-only view of the secret bytes.
    pub fn view(&self) -> CinderResult<&[u8]> {
        self.live()
    }

    /// Encodes the secret as base64, itself held in a [`SafeString`] so the
    /// encoded form does not linger uncontrolled either.
    pub fn to_base64(&self) -> CinderResult<SafeString> {
        let mut encoded = BASE64.encode(self.live()?);
        SafeString::new(&mut encoded)
    }

    /// Compares two secrets for equality in constant time. Secrets of
    /// differing length are unequal; the comparison of the bytes
    /// themselves never branches on content.
    pub fn ct_eq(&self, other: &Self) -> CinderResult<bool> {
        let (a, b) = (self.live()?, other.live()?);
        if a.len() != b.len() {
            return Ok(false);
        }
        Ok(a.ct_eq(b).into())
    }

    /// Consumes the container exactly once, returning its bytes and
    /// marking the container consumed. A second call fails with
    /// [`CinderError::StateError`].
    pub fn resolve(&mut self) -> CinderResult<Vec<u8>> {
        match std::mem::replace(&mut self.state, State::Consumed) {
            State::Live(bytes) => Ok(bytes),
            State::Consumed => {
                // Nothing was taken; restore the terminal state and report.
                self.state = State::Consumed;
                Err(CinderError::StateError)
            }
        }
    }

    /// Destroys the container, overwriting its bytes with zeros. Idempotent:
    /// closing an already-closed or already-resolved container is not an
    /// error, matching the requirement that `close()` run unconditionally
    /// on every exit path of a scope holding a secret.
    pub fn close(&mut self) {
        self.state = State::Consumed;
    }
}

impl<K> fmt::Debug for SafeBlob<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeBlob").field("state", &"<redacted>").finish()
    }
}

enum StringState {
    Live(String),
    Consumed,
}

impl Drop for StringState {
    fn drop(&mut self) {
        if let StringState::Live(s) = self {
            let len = s.chars().count();
            *s = "x".repeat(len);
        }
    }
}

/// The character-typed analogue of [`SafeBlob`]: a string whose bytes must
/// not linger in memory once consumed. Construction moves the caller's
/// `String`, overwriting its characters with `'x'` rather than zero, since
/// a `String` must remain valid UTF-8 throughout its lifetime.
pub struct SafeString {
    state: StringState,
}

impl SafeString {
    /// Moves `source` into a new `SafeString`, overwriting `source` with
    /// `'x'` characters of the same length.
    pub fn new(source: &mut String) -> CinderResult<Self> {
        if source.is_empty() {
            return Err(CinderError::NullOrEmpty);
        }

        let moved = std::mem::take(source);
        let char_count = moved.chars().count();
        *source = "x".repeat(char_count);

        Ok(Self {
            state: StringState::Live(moved),
        })
    }

    fn live(&self) -> CinderResult<&str> {
        match &self.state {
            StringState::Live(s) => Ok(s.as_str()),
            StringState::Consumed => Err(CinderError::StateError),
        }
    }

    /// Returns the number of bytes in the secret.
    pub fn len(&self) -> CinderResult<usize> {
        Ok(self.live()?.len())
    }

    /// Reports whether the secret is empty (never true for a live secret).
    pub fn is_empty(&self) -> CinderResult<bool> {
        Ok(self.live()?.is_empty())
    }

    /// Returns a read-only view of the secret.
    pub fn view(&self) -> CinderResult<&str> {
        self.live()
    }

    /// Compares two secrets for equality in constant time over their bytes.
    pub fn ct_eq(&self, other: &Self) -> CinderResult<bool> {
        let (a, b) = (self.live()?.as_bytes(), other.live()?.as_bytes());
        if a.len() != b.len() {
            return Ok(false);
        }
        Ok(a.ct_eq(b).into())
    }

    /// Consumes the container exactly once, returning its string.
    pub fn resolve(&mut self) -> CinderResult<String> {
        match std::mem::replace(&mut self.state, StringState::Consumed) {
            StringState::Live(s) => Ok(s),
            StringState::Consumed => {
                self.state = StringState::Consumed;
                Err(CinderError::StateError)
            }
        }
    }

    /// Destroys the container, overwriting its characters with `'x'`.
    /// Idempotent.
    pub fn close(&mut self) {
        self.state = StringState::Consumed;
    }

    /// Deprecated: builds a `SafeString` directly from an immutable `&str`.
    /// The underlying bytes of the literal or borrowed string cannot be
    /// reliably erased, so this should only be used at the extreme
    /// boundary (e.g. reading a line from stdin) and converted immediately
    /// into a container built from an owned, moved `String`.
    #[deprecated(
        note = "bytes borrowed from an immutable &str cannot be erased; convert to an owned String and use SafeString::new instead"
    )]
    pub fn from_str_lossy(value: &str) -> CinderResult<Self> {
        let mut owned = value.to_string();
        Self::new(&mut owned)
    }
}

impl fmt::Debug for SafeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeString").field("state", &"<redacted>").finish()
    }
}

macro_rules! secret_kind {
    ($kind:ident, $alias:ident, $name:literal, min = $min:expr, max = $max:expr, align = $align:expr) => {
        struct $kind;
        impl SecretKind for $kind {
            const MIN: Option<usize> = $min;
            const MAX: Option<usize> = $max;
            const ALIGN: usize = $align;
            const NAME: &'static str = $name;
        }
        #[doc = concat!("A `", $name, "` safe-secret container.")]
        pub type $alias = SafeBlob<$kind>;
    };
}

secret_kind!(SaltKind, Salt, "Salt", min = Some(16), max = Some(64), align = 8);
secret_kind!(HmacKind, Hmac, "Hmac", min = Some(32), max = Some(64), align = 32);
secret_kind!(
    SessionSecretKind,
    SessionSecret,
    "SessionSecret",
    min = Some(4),
    max = None,
    align = 4
);
secret_kind!(
    GateHashKind,
    GateHash,
    "GateHash",
    min = Some(20),
    max = Some(64),
    align = 4
);
secret_kind!(EnvelopeKind, Envelope, "Envelope", min = None, max = None, align = 0);

struct AccessHashKind;
impl SecretKind for AccessHashKind {
    const MIN: Option<usize> = Some(20);
    const MAX: Option<usize> = Some(64);
    const ALIGN: usize = 4;
    const NAME: &'static str = "AccessHash";
}

/// A downloader-supplied answer hash. Identical size constraints to
/// [`GateHash`]; adds [`AccessHash::can_unlock`], the constant-time gate
/// comparison the download use case drives.
pub struct AccessHash(SafeBlob<AccessHashKind>);

impl AccessHash {
    /// Moves `source` into a new `AccessHash`, zeroizing `source` in place.
    pub fn new(source: &mut [u8]) -> CinderResult<Self> {
        Ok(Self(SafeBlob::new(source)?))
    }

    /// Reports whether this access hash unlocks `gate` in constant time.
    /// Requires equal lengths; a mismatch is reported, never silently
    /// treated as "false".
    pub fn can_unlock(&self, gate: &GateHash) -> CinderResult<bool> {
        let (a, b) = (self.0.view()?, gate.view()?);
        if a.len() != b.len() {
            return Err(CinderError::SizeMismatch);
        }
        Ok(a.ct_eq(b).into())
    }

    /// Consumes the container exactly once, returning its bytes.
    pub fn resolve(&mut self) -> CinderResult<Vec<u8>> {
        self.0.resolve()
    }

    /// Destroys the container, overwriting its bytes with zeros.
    pub fn close(&mut self) {
        self.0.close()
    }
}

impl Deref for AccessHash {
    type Target = SafeBlob<AccessHashKind>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for AccessHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessHash").field("state", &"<redacted>").finish()
    }
}
