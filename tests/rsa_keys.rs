//! RSA key interop with keys and signatures produced by OpenSSL

#![allow(clippy::expect_used, clippy::unwrap_used)]

use p2p_protocol::{ProtocolError, RsaPrivateKey, RsaPublicKey, RsaSignature};

const PRIVATE_DER: &[u8] = include_bytes!("fixtures/rsa1024_private.der");
const PUBLIC_DER: &[u8] = include_bytes!("fixtures/rsa1024_public.der");
const SIGNATURE: &[u8] = include_bytes!("fixtures/rsa1024_message.sig");
const MESSAGE: &[u8] = b"signed by openssl";

#[test]
fn test_openssl_private_key_roundtrip() {
    let key = RsaPrivateKey::from_der(PRIVATE_DER).unwrap();
    assert_eq!(key.bits(), 1024);
    assert_eq!(key.modulus().len(), 128);
    assert_eq!(key.public_exponent(), &[0x01, 0x00, 0x01]);
    assert_eq!(key.to_der(), PRIVATE_DER);
}

#[test]
fn test_openssl_public_key_roundtrip() {
    let public = RsaPublicKey::from_der(PUBLIC_DER).unwrap();
    assert_eq!(public.bits(), 1024);
    assert_eq!(public.to_der(), PUBLIC_DER);

    let derived = RsaPrivateKey::from_der(PRIVATE_DER).unwrap().public_key();
    assert_eq!(derived, public);
}

#[test]
fn test_verifies_openssl_signature() {
    let public = RsaPublicKey::from_der(PUBLIC_DER).unwrap();
    let signature = RsaSignature::from_bytes(SIGNATURE);
    assert!(public.verify(&signature, MESSAGE));
    assert!(!public.verify(&signature, b"signed by someone else"));
}

#[test]
fn test_signature_is_deterministic_and_matches_openssl() {
    // PKCS#1 v1.5 is deterministic, blinding does not change the result.
    let key = RsaPrivateKey::from_der(PRIVATE_DER).unwrap();
    let signature = key.sign(MESSAGE).unwrap();
    assert_eq!(signature.as_bytes(), SIGNATURE);
    assert!(key.verify(&signature, MESSAGE));
}

#[test]
fn test_private_key_rejected_as_public() {
    assert!(matches!(
        RsaPublicKey::from_der(PRIVATE_DER),
        Err(ProtocolError::Incorrect(_))
    ));
    assert!(matches!(
        RsaPrivateKey::from_der(PUBLIC_DER),
        Err(ProtocolError::Incorrect(_))
    ));
}

#[test]
fn test_truncated_der_rejected() {
    for cut in [0, 1, 10, PRIVATE_DER.len() / 2, PRIVATE_DER.len() - 1] {
        assert!(RsaPrivateKey::from_der(&PRIVATE_DER[..cut]).is_err(), "cut at {cut}");
    }
    let mut trailing = PUBLIC_DER.to_vec();
    trailing.push(0);
    assert!(RsaPublicKey::from_der(trailing).is_err());
}

#[test]
fn test_signature_length_must_match_modulus() {
    let public = RsaPublicKey::from_der(PUBLIC_DER).unwrap();
    let mut padded = vec![0u8];
    padded.extend_from_slice(SIGNATURE);
    assert!(!public.verify(&RsaSignature::from_bytes(padded), MESSAGE));
    assert!(!public.verify(&RsaSignature::from_bytes(&SIGNATURE[1..]), MESSAGE));
}
