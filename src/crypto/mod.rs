//! # Key Material
//!
//! RSA keys and signatures for peer identities.
//!
//! ## Components
//! - **ASN.1**: strict DER reader/writer for the key structures
//! - **RSA**: private/public keys over a single owned buffer, PKCS#1 v1.5
//!   signatures with SHA-256
//!
//! ## Formats
//! ```text
//! private: SEQUENCE { 0, n, e, d, p, q, dp, dq, iq }
//! public:  SEQUENCE { SEQUENCE { rsaEncryption, NULL }, BIT STRING { SEQUENCE { n, e } } }
//! signature: raw bytes, modulus length
//! ```
//!
//! ## Security
//! - Minimum modulus: 512 bits
//! - Key equality and signature checks compare in constant time
//! - Signing is blinded by the `rsa` crate

pub mod asn1;
pub mod rsa;

pub use self::rsa::{FieldView, RsaPrivateKey, RsaPublicKey, RsaSignature};
