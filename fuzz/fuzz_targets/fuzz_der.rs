#![no_main]

use libfuzzer_sys::fuzz_target;
use p2p_protocol::{RsaPrivateKey, RsaPublicKey, RsaSignature};

fuzz_target!(|data: &[u8]| {
    if let Ok(key) = RsaPrivateKey::from_der(data.to_vec()) {
        let _ = key.to_der();
    }
    if let Ok(key) = RsaPublicKey::from_der(data.to_vec()) {
        // Any parsed key must survive re-encoding and reject garbage signatures
        let _ = RsaPublicKey::from_der(key.to_der());
        let _ = key.verify(&RsaSignature::from_bytes(data.to_vec()), data);
    }
});
