//! RSA keys stored as DER with PKCS#1 v1.5 / SHA-256 signatures.
//!
//! Each key owns one byte buffer. Key fields are [`FieldView`] ranges into
//! that buffer: a decoded key keeps the DER input it was parsed from, and a
//! generated key keeps a packed copy of its big-endian components. All views
//! are validated when the key is constructed and bounds-checked on access.
//!
//! Big-number arithmetic and blinded signing come from the `rsa` crate.

use crate::crypto::asn1::{self, DerReader, RSA_ENCRYPTION_OID, TAG_SEQUENCE};
use crate::error::{constants, ProtocolError, Result};
use bytes::Bytes;
use rand_core::OsRng;
use ::rsa::traits::{PrivateKeyParts, PublicKeyParts};
use ::rsa::{BigUint, Pkcs1v15Sign};
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::Range;
use subtle::{Choice, ConstantTimeEq};
use tracing::debug;

/// Smallest accepted modulus in bytes
pub const MIN_MODULUS_LEN: usize = 64;

/// DER `DigestInfo` header for SHA-256 (RFC 8017 section 9.2)
const SHA256_DIGEST_INFO: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
    0x00, 0x04, 0x20,
];

/// Bounds-checked range into a key buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldView {
    start: usize,
    len: usize,
}

impl FieldView {
    fn from_range(range: Range<usize>) -> Self {
        Self {
            start: range.start,
            len: range.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The viewed bytes, or `None` if the view does not fit `buf`
    pub fn get<'a>(&self, buf: &'a [u8]) -> Option<&'a [u8]> {
        let end = self.start.checked_add(self.len)?;
        buf.get(self.start..end)
    }

    fn slice<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        self.get(buf).unwrap_or_default()
    }
}

fn check_views(buf: &[u8], views: &[FieldView], err: &'static str) -> Result<()> {
    if views.iter().all(|v| v.get(buf).is_some()) {
        Ok(())
    } else {
        Err(ProtocolError::Incorrect(err))
    }
}

/// Pack trimmed components into one buffer and return views over them
fn pack(parts: &[&[u8]]) -> (Bytes, Vec<FieldView>) {
    let mut buf = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    let mut views = Vec::with_capacity(parts.len());
    for part in parts {
        let part = asn1::trim_leading_zeros(part);
        views.push(FieldView {
            start: buf.len(),
            len: part.len(),
        });
        buf.extend_from_slice(part);
    }
    (Bytes::from(buf), views)
}

fn ct_fields_eq(a: &[u8], a_views: &[FieldView], b: &[u8], b_views: &[FieldView]) -> bool {
    let mut equal = Choice::from(u8::from(a_views.len() == b_views.len()));
    for (va, vb) in a_views.iter().zip(b_views) {
        equal &= va.slice(a).ct_eq(vb.slice(b));
    }
    equal.into()
}

fn bit_length(modulus: &[u8]) -> usize {
    match modulus.first() {
        Some(top) => modulus.len() * 8 - top.leading_zeros() as usize,
        None => 0,
    }
}

const N: usize = 0;
const E: usize = 1;
const D: usize = 2;
const P: usize = 3;
const Q: usize = 4;
const DP: usize = 5;
const DQ: usize = 6;
const IQ: usize = 7;

/// RSA private key: modulus, exponents, primes and CRT values
pub struct RsaPrivateKey {
    buf: Bytes,
    fields: [FieldView; 8],
    bits: usize,
}

impl RsaPrivateKey {
    /// Generate a fresh key with public exponent 65537
    pub fn generate(bits: usize) -> Result<Self> {
        if bits < MIN_MODULUS_LEN * 8 {
            return Err(ProtocolError::Incorrect(constants::ERR_KEY_SIZE));
        }
        let key = ::rsa::RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| ProtocolError::Crypto(e.to_string()))?;

        let primes = key.primes();
        let (p, q) = match primes {
            [p, q] => (p, q),
            _ => return Err(ProtocolError::Crypto("expected a two-prime key".into())),
        };
        let one = BigUint::from(1u8);
        let dp = key.d() % (p - &one);
        let dq = key.d() % (q - &one);
        let iq = key
            .crt_coefficient()
            .ok_or_else(|| ProtocolError::Crypto("missing CRT coefficient".into()))?;

        let generated = Self::from_components(
            &key.n().to_bytes_be(),
            &key.e().to_bytes_be(),
            &key.d().to_bytes_be(),
            &p.to_bytes_be(),
            &q.to_bytes_be(),
            &dp.to_bytes_be(),
            &dq.to_bytes_be(),
            &iq.to_bytes_be(),
        )?;
        debug!(bits = generated.bits, "Generated RSA key");
        Ok(generated)
    }

    /// Build a key from big-endian components; leading zero octets are trimmed
    #[allow(clippy::too_many_arguments)]
    pub fn from_components(
        n: &[u8],
        e: &[u8],
        d: &[u8],
        p: &[u8],
        q: &[u8],
        dp: &[u8],
        dq: &[u8],
        iq: &[u8],
    ) -> Result<Self> {
        let (buf, views) = pack(&[n, e, d, p, q, dp, dq, iq]);
        let fields: [FieldView; 8] = views
            .try_into()
            .map_err(|_| ProtocolError::Incorrect(constants::ERR_INCORRECT_PRIVATE_KEY))?;
        Self::from_parts(buf, fields)
    }

    fn from_parts(buf: Bytes, fields: [FieldView; 8]) -> Result<Self> {
        check_views(&buf, &fields, constants::ERR_INCORRECT_PRIVATE_KEY)?;
        if fields[N].len() < MIN_MODULUS_LEN {
            return Err(ProtocolError::Incorrect(constants::ERR_MODULUS_TOO_SMALL));
        }
        if fields[E].is_empty() {
            return Err(ProtocolError::Incorrect(constants::ERR_INCORRECT_PRIVATE_KEY));
        }
        let bits = bit_length(fields[N].slice(&buf));
        Ok(Self { buf, fields, bits })
    }

    /// Parse `SEQUENCE { 0, n, e, d, p, q, dp, dq, iq }`.
    ///
    /// The key keeps `der` and refers into it.
    pub fn from_der(der: impl Into<Bytes>) -> Result<Self> {
        let buf: Bytes = der.into();
        let err = constants::ERR_INCORRECT_PRIVATE_KEY;
        let mut outer = DerReader::new(&buf, err);
        let mut seq = outer.enter(TAG_SEQUENCE)?;
        outer.finish()?;

        if !seq.read_unsigned()?.is_empty() {
            return Err(ProtocolError::Incorrect(err));
        }
        let mut fields = [FieldView::default(); 8];
        for field in fields.iter_mut() {
            *field = FieldView::from_range(seq.read_unsigned()?);
        }
        seq.finish()?;

        Self::from_parts(buf, fields)
    }

    pub fn to_der(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.buf.len() + 32);
        asn1::write_unsigned(&[], &mut body);
        for view in &self.fields {
            asn1::write_unsigned(view.slice(&self.buf), &mut body);
        }
        let mut out = Vec::with_capacity(body.len() + 4);
        asn1::write_tlv(TAG_SEQUENCE, &body, &mut out);
        out
    }

    fn field(&self, index: usize) -> &[u8] {
        self.fields[index].slice(&self.buf)
    }

    pub fn modulus(&self) -> &[u8] {
        self.field(N)
    }

    pub fn public_exponent(&self) -> &[u8] {
        self.field(E)
    }

    pub fn private_exponent(&self) -> &[u8] {
        self.field(D)
    }

    pub fn primes(&self) -> (&[u8], &[u8]) {
        (self.field(P), self.field(Q))
    }

    /// CRT values `(dp, dq, iq)`
    pub fn crt_values(&self) -> (&[u8], &[u8], &[u8]) {
        (self.field(DP), self.field(DQ), self.field(IQ))
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Public half in a buffer of its own
    pub fn public_key(&self) -> RsaPublicKey {
        let (buf, views) = pack(&[self.field(N), self.field(E)]);
        RsaPublicKey {
            buf,
            n: views[0],
            e: views[1],
            bits: self.bits,
        }
    }

    fn to_rsa(&self) -> Result<::rsa::RsaPrivateKey> {
        let mut key = ::rsa::RsaPrivateKey::from_components(
            BigUint::from_bytes_be(self.field(N)),
            BigUint::from_bytes_be(self.field(E)),
            BigUint::from_bytes_be(self.field(D)),
            vec![
                BigUint::from_bytes_be(self.field(P)),
                BigUint::from_bytes_be(self.field(Q)),
            ],
        )
        .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
        key.precompute()
            .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
        Ok(key)
    }

    /// PKCS#1 v1.5 signature over the SHA-256 digest of `message`
    pub fn sign(&self, message: &[u8]) -> Result<RsaSignature> {
        let digest = Sha256::digest(message);
        let signature = self
            .to_rsa()?
            .sign_with_rng(&mut OsRng, Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
        Ok(RsaSignature::from_bytes(signature))
    }

    pub fn verify(&self, signature: &RsaSignature, message: &[u8]) -> bool {
        self.public_key().verify(signature, message)
    }
}

impl Clone for RsaPrivateKey {
    fn clone(&self) -> Self {
        Self {
            buf: Bytes::copy_from_slice(&self.buf),
            fields: self.fields,
            bits: self.bits,
        }
    }
}

impl PartialEq for RsaPrivateKey {
    fn eq(&self, other: &Self) -> bool {
        ct_fields_eq(&self.buf, &self.fields, &other.buf, &other.fields)
    }
}

impl Eq for RsaPrivateKey {}

impl fmt::Debug for RsaPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPrivateKey")
            .field("bits", &self.bits)
            .finish_non_exhaustive()
    }
}

/// RSA public key `(n, e)`
pub struct RsaPublicKey {
    buf: Bytes,
    n: FieldView,
    e: FieldView,
    bits: usize,
}

impl RsaPublicKey {
    /// Parse a SubjectPublicKeyInfo carrying an rsaEncryption key.
    ///
    /// The key keeps `der` and refers into it.
    pub fn from_der(der: impl Into<Bytes>) -> Result<Self> {
        let buf: Bytes = der.into();
        let err = constants::ERR_INCORRECT_PUBLIC_KEY;
        let mut outer = DerReader::new(&buf, err);
        let mut spki = outer.enter(TAG_SEQUENCE)?;
        outer.finish()?;

        let mut algorithm = spki.enter(TAG_SEQUENCE)?;
        algorithm.expect_oid(&RSA_ENCRYPTION_OID)?;
        algorithm.read_null()?;
        algorithm.finish()?;

        let bits_range = spki.read_bit_string()?;
        spki.finish()?;

        let mut inner = DerReader::with_range(&buf, bits_range, err)?;
        let mut key = inner.enter(TAG_SEQUENCE)?;
        inner.finish()?;
        let n = FieldView::from_range(key.read_unsigned()?);
        let e = FieldView::from_range(key.read_unsigned()?);
        key.finish()?;

        check_views(&buf, &[n, e], err)?;
        if n.len() < MIN_MODULUS_LEN {
            return Err(ProtocolError::Incorrect(constants::ERR_MODULUS_TOO_SMALL));
        }
        if e.is_empty() {
            return Err(ProtocolError::Incorrect(err));
        }
        let bits = bit_length(n.slice(&buf));
        Ok(Self { buf, n, e, bits })
    }

    pub fn to_der(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.buf.len() + 16);
        asn1::write_unsigned(self.modulus(), &mut key);
        asn1::write_unsigned(self.public_exponent(), &mut key);
        let mut rsa_key = Vec::with_capacity(key.len() + 4);
        asn1::write_tlv(TAG_SEQUENCE, &key, &mut rsa_key);

        let mut algorithm = Vec::with_capacity(16);
        asn1::write_tlv(asn1::TAG_OID, &RSA_ENCRYPTION_OID, &mut algorithm);
        asn1::write_tlv(asn1::TAG_NULL, &[], &mut algorithm);

        let mut bit_string = Vec::with_capacity(rsa_key.len() + 1);
        bit_string.push(0);
        bit_string.extend_from_slice(&rsa_key);

        let mut body = Vec::with_capacity(bit_string.len() + 24);
        asn1::write_tlv(TAG_SEQUENCE, &algorithm, &mut body);
        asn1::write_tlv(asn1::TAG_BIT_STRING, &bit_string, &mut body);

        let mut out = Vec::with_capacity(body.len() + 4);
        asn1::write_tlv(TAG_SEQUENCE, &body, &mut out);
        out
    }

    pub fn modulus(&self) -> &[u8] {
        self.n.slice(&self.buf)
    }

    pub fn public_exponent(&self) -> &[u8] {
        self.e.slice(&self.buf)
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Check a PKCS#1 v1.5 / SHA-256 signature over `message`.
    ///
    /// The recovered block is compared with the expected encoding over its
    /// full length in constant time.
    pub fn verify(&self, signature: &RsaSignature, message: &[u8]) -> bool {
        let modulus = self.modulus();
        let k = modulus.len();
        let sig = signature.as_bytes();
        let digest = Sha256::digest(message);
        let t_len = SHA256_DIGEST_INFO.len() + digest.len();
        if sig.len() != k || k < t_len + 11 {
            return false;
        }

        let n = BigUint::from_bytes_be(modulus);
        let s = BigUint::from_bytes_be(sig);
        if s >= n {
            return false;
        }
        let m = s.modpow(&BigUint::from_bytes_be(self.public_exponent()), &n).to_bytes_be();
        if m.len() > k {
            return false;
        }
        let mut recovered = vec![0u8; k];
        recovered[k - m.len()..].copy_from_slice(&m);

        let mut expected = vec![0xffu8; k];
        expected[0] = 0x00;
        expected[1] = 0x01;
        expected[k - t_len - 1] = 0x00;
        expected[k - t_len..k - digest.len()].copy_from_slice(&SHA256_DIGEST_INFO);
        expected[k - digest.len()..].copy_from_slice(&digest);

        recovered.ct_eq(&expected).into()
    }
}

impl Clone for RsaPublicKey {
    fn clone(&self) -> Self {
        Self {
            buf: Bytes::copy_from_slice(&self.buf),
            n: self.n,
            e: self.e,
            bits: self.bits,
        }
    }
}

impl PartialEq for RsaPublicKey {
    fn eq(&self, other: &Self) -> bool {
        ct_fields_eq(&self.buf, &[self.n, self.e], &other.buf, &[other.n, other.e])
    }
}

impl Eq for RsaPublicKey {}

impl fmt::Debug for RsaPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPublicKey")
            .field("bits", &self.bits)
            .finish_non_exhaustive()
    }
}

/// Raw signature bytes, no DER wrapper
#[derive(Clone, PartialEq, Eq)]
pub struct RsaSignature(Bytes);

impl RsaSignature {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Debug for RsaSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RsaSignature({} bytes)", self.0.len())
    }
}
