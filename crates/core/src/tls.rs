// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-cluster TLS credentials.
//!
//! Certificate generation itself is an external collaborator; the gateway
//! only needs the contract. [`EphemeralKeypairs`] is the development
//! implementation: it mints random PEM-framed material so that staging,
//! encryption at rest, and the launcher file map are exercised end to end
//! without a real certificate authority.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

/// A cluster's TLS credentials. The certificate is public; the key is a
/// secret and is encrypted at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keypair {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// Source of per-cluster TLS keypairs.
pub trait KeypairGenerator: Send + Sync {
    fn new_keypair(&self, cluster_name: &str) -> Keypair;
}

/// Development keypair source producing random, PEM-framed material.
#[derive(Debug, Clone, Copy, Default)]
pub struct EphemeralKeypairs;

impl KeypairGenerator for EphemeralKeypairs {
    fn new_keypair(&self, cluster_name: &str) -> Keypair {
        Keypair {
            cert: pem_block("CERTIFICATE", cluster_name),
            key: pem_block("PRIVATE KEY", cluster_name),
        }
    }
}

fn pem_block(label: &str, cluster_name: &str) -> Vec<u8> {
    let mut material = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut material);
    format!(
        "-----BEGIN {label}-----\n# {cluster_name}\n{}\n-----END {label}-----\n",
        BASE64.encode(material)
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypairs_are_unique_per_call() {
        let a = EphemeralKeypairs.new_keypair("c1");
        let b = EphemeralKeypairs.new_keypair("c1");
        assert_ne!(a.key, b.key);
        assert_ne!(a.cert, b.cert);
    }

    #[test]
    fn material_is_pem_framed() {
        let pair = EphemeralKeypairs.new_keypair("c1");
        let cert = String::from_utf8(pair.cert).unwrap();
        assert!(cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(cert.trim_end().ends_with("-----END CERTIFICATE-----"));
    }
}
