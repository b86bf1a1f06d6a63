//! Minimal DER reader for PKCS#1 RSA private keys
//!
//! Only the subset of DER needed for an `RSAPrivateKey` structure (RFC 8017,
//! appendix A.1.2) is understood: a SEQUENCE of INTEGERs. Lengths may use the
//! short form or the long form with up to three length octets.

use rsa::{BigUint, RsaPrivateKey};

use crate::error::{KeyError, Result};

/// ASN.1 universal tag for INTEGER
pub const TAG_INTEGER: u8 = 0x02;
/// ASN.1 universal tag for a constructed SEQUENCE
pub const TAG_SEQUENCE: u8 = 0x30;

/// Longest supported long-form length prefix, in octets
const MAX_LENGTH_OCTETS: usize = 3;

/// Cursor over a DER-encoded byte slice
#[derive(Debug, Clone)]
pub struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    /// Create a reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset into the input
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether every byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read a SEQUENCE header and return a reader over its contents.
    ///
    /// The outer reader is advanced past the whole SEQUENCE.
    ///
    /// # Errors
    ///
    /// Fails when the tag is not `0x30`, the length is malformed, or the
    /// declared length runs past the input.
    pub fn read_sequence(&mut self) -> Result<DerReader<'a>> {
        let content = self.read_element(TAG_SEQUENCE)?;
        Ok(DerReader::new(content))
    }

    /// Read an INTEGER and return its big-endian content octets.
    ///
    /// # Errors
    ///
    /// Fails when the tag is not `0x02`, the length is malformed or zero, or
    /// the content runs past the input.
    pub fn read_integer_bytes(&mut self) -> Result<&'a [u8]> {
        let offset = self.pos;
        let content = self.read_element(TAG_INTEGER)?;
        if content.is_empty() {
            return Err(KeyError::InvalidLength { offset: offset + 1 });
        }
        Ok(content)
    }

    /// Read a non-negative INTEGER as an unsigned big integer.
    ///
    /// # Errors
    ///
    /// See [`read_integer_bytes`](Self::read_integer_bytes); additionally fails
    /// when the two's-complement sign bit is set.
    pub fn read_integer(&mut self) -> Result<BigUint> {
        let offset = self.pos;
        let content = self.read_integer_bytes()?;
        if content[0] & 0x80 != 0 {
            return Err(KeyError::NegativeInteger { offset });
        }
        Ok(BigUint::from_bytes_be(content))
    }

    fn read_element(&mut self, expected: u8) -> Result<&'a [u8]> {
        let offset = self.pos;
        let found = self.read_byte()?;
        if found != expected {
            return Err(KeyError::UnexpectedTag {
                expected,
                found,
                offset,
            });
        }
        let len = self.read_length()?;
        self.take(len)
    }

    fn read_byte(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.pos).ok_or(KeyError::UnexpectedEof {
            offset: self.pos,
            needed: 1,
        })?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(KeyError::UnexpectedEof {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_length(&mut self) -> Result<usize> {
        let offset = self.pos;
        let first = self.read_byte()?;
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }
        // 0x80 is the BER indefinite form, which DER forbids
        let octets = usize::from(first & 0x7f);
        if octets == 0 || octets > MAX_LENGTH_OCTETS {
            return Err(KeyError::InvalidLength { offset });
        }
        let mut len = 0usize;
        for _ in 0..octets {
            len = (len << 8) | usize::from(self.read_byte()?);
        }
        Ok(len)
    }
}

/// Encode a DER length prefix (short form below 128, long form otherwise)
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

/// The nine INTEGER fields of a PKCS#1 `RSAPrivateKey`
#[derive(Clone, PartialEq, Eq)]
pub struct Pkcs1Components {
    /// Modulus `n`
    pub modulus: BigUint,
    /// Public exponent `e`
    pub public_exponent: BigUint,
    /// Private exponent `d`
    pub private_exponent: BigUint,
    /// First prime factor `p`
    pub prime1: BigUint,
    /// Second prime factor `q`
    pub prime2: BigUint,
    /// `d mod (p - 1)`
    pub exponent1: BigUint,
    /// `d mod (q - 1)`
    pub exponent2: BigUint,
    /// `q^-1 mod p`
    pub coefficient: BigUint,
}

impl std::fmt::Debug for Pkcs1Components {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs1Components")
            .field("modulus_bits", &self.modulus.bits())
            .field("public_exponent", &self.public_exponent)
            .finish_non_exhaustive()
    }
}

impl Pkcs1Components {
    /// Build an RSA private key from the parsed components.
    ///
    /// The CRT values are recomputed by the `rsa` crate from `d`, `p` and `q`;
    /// the resulting key is validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidKey`] when the components do not form a
    /// consistent RSA key.
    pub fn to_private_key(&self) -> Result<RsaPrivateKey> {
        let key = RsaPrivateKey::from_components(
            self.modulus.clone(),
            self.public_exponent.clone(),
            self.private_exponent.clone(),
            vec![self.prime1.clone(), self.prime2.clone()],
        )?;
        key.validate()?;
        Ok(key)
    }
}

/// Parse a PKCS#1 `RSAPrivateKey` DER structure.
///
/// # Errors
///
/// Fails with the DER errors of [`DerReader`], or with
/// [`KeyError::UnsupportedVersion`] when the version INTEGER is not zero.
pub fn parse_pkcs1_private_key(der: &[u8]) -> Result<Pkcs1Components> {
    let mut outer = DerReader::new(der);
    let mut seq = outer.read_sequence()?;

    let version = seq.read_integer_bytes()?;
    if version.iter().any(|b| *b != 0) {
        let shown = if version[0] & 0x80 != 0 {
            "<negative>".to_string()
        } else {
            BigUint::from_bytes_be(version).to_string()
        };
        return Err(KeyError::UnsupportedVersion(shown));
    }

    Ok(Pkcs1Components {
        modulus: seq.read_integer()?,
        public_exponent: seq.read_integer()?,
        private_exponent: seq.read_integer()?,
        prime1: seq.read_integer()?,
        prime2: seq.read_integer()?,
        exponent1: seq.read_integer()?,
        exponent2: seq.read_integer()?,
        coefficient: seq.read_integer()?,
    })
}

/// Parse PKCS#1 DER straight into a validated [`RsaPrivateKey`]
///
/// # Errors
///
/// See [`parse_pkcs1_private_key`] and [`Pkcs1Components::to_private_key`].
pub fn rsa_private_key_from_pkcs1(der: &[u8]) -> Result<RsaPrivateKey> {
    parse_pkcs1_private_key(der)?.to_private_key()
}

/// Check that `der` is exactly one SEQUENCE with a consistent length.
///
/// Used as a sanity check for certificate blocks; the contents are not
/// interpreted.
///
/// # Errors
///
/// Fails when the outer element is not a SEQUENCE, is truncated, or is
/// followed by trailing bytes.
pub fn check_single_sequence(der: &[u8]) -> Result<()> {
    let mut reader = DerReader::new(der);
    reader.read_sequence()?;
    if !reader.is_empty() {
        return Err(KeyError::InvalidLength {
            offset: reader.position(),
        });
    }
    Ok(())
}
