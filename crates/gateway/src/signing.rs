//! The gateway's MD5 parameter signature.
//!
//! The same algorithm signs outbound payment forms, verifies inbound
//! notifications and mints manual refund handoff tokens:
//!
//! 1. drop `sign`, `sign_type` and every empty value,
//! 2. order the remaining keys by byte value,
//! 3. join as `key=value` with `&`, without URL-encoding,
//! 4. append the merchant key with no separator,
//! 5. lowercase hex of one MD5 digest.

use std::collections::BTreeMap;

use md5::{Digest, Md5};

use cardvault_core::Secret;

/// Request/notification parameters. `BTreeMap` keeps keys in byte order.
pub type Params = BTreeMap<String, String>;

const EXCLUDED: [&str; 2] = ["sign", "sign_type"];

/// Merchant identity at the gateway: public id plus shared key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merchant {
    pub pid: String,
    pub key: Secret,
}

impl Merchant {
    pub fn new(pid: impl Into<String>, key: impl Into<Secret>) -> Self {
        Self {
            pid: pid.into(),
            key: key.into(),
        }
    }

    pub fn sign(&self, params: &Params) -> String {
        sign(params, self.key.expose_secret())
    }

    pub fn verify(&self, params: &Params, received: &str) -> bool {
        verify_signature(params, self.key.expose_secret(), received)
    }
}

/// The exact string that gets hashed, minus the key.
pub fn signing_string(params: &Params) -> String {
    params
        .iter()
        .filter(|(k, v)| !v.is_empty() && !EXCLUDED.contains(&k.as_str()))
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn sign(params: &Params, key: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(signing_string(params).as_bytes());
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a received signature against the recomputed one.
///
/// The comparison does not short-circuit on the first differing byte.
pub fn verify_signature(params: &Params, key: &str, received: &str) -> bool {
    let expected = sign(params, key);
    let received = received.trim().to_ascii_lowercase();
    if expected.len() != received.len() {
        return false;
    }
    expected
        .bytes()
        .zip(received.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
