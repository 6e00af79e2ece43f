// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn round_trip_with_single_key() {
    let chain = KeyChain::new(vec![EncryptionKey::generate()]);
    let sealed = chain.encrypt(b"super secret token").unwrap();
    assert_ne!(&sealed, b"super secret token");
    assert_eq!(chain.decrypt(&sealed).unwrap(), b"super secret token");
}

#[test]
fn sealing_twice_yields_distinct_ciphertexts() {
    let chain = KeyChain::new(vec![EncryptionKey::generate()]);
    let a = chain.encrypt(b"x").unwrap();
    let b = chain.encrypt(b"x").unwrap();
    assert_ne!(a, b, "nonce must be random per value");
}

#[test]
fn rotation_decrypts_values_sealed_by_an_older_key() {
    let old = EncryptionKey::generate();
    let sealed = KeyChain::new(vec![old.clone()]).encrypt(b"v").unwrap();

    // New key prepended; old key kept for reads.
    let rotated = KeyChain::new(vec![EncryptionKey::generate(), old]);
    assert_eq!(rotated.decrypt(&sealed).unwrap(), b"v");

    // New writes use the first key only.
    let fresh = rotated.encrypt(b"v2").unwrap();
    let new_only = KeyChain::parse(&rotated.keys[0].to_base64()).unwrap();
    assert_eq!(new_only.decrypt(&fresh).unwrap(), b"v2");
}

#[test]
fn unrelated_key_fails_cleanly() {
    let sealed = KeyChain::new(vec![EncryptionKey::generate()])
        .encrypt(b"v")
        .unwrap();
    let other = KeyChain::new(vec![EncryptionKey::generate()]);
    assert!(matches!(
        other.decrypt(&sealed),
        Err(SecretsError::DecryptFailed)
    ));
}

#[test]
fn tampered_ciphertext_is_rejected() {
    let chain = KeyChain::new(vec![EncryptionKey::generate()]);
    let mut sealed = chain.encrypt(b"v").unwrap();
    let last = sealed.len() - 1;
    sealed[last] ^= 0x01;
    assert!(chain.decrypt(&sealed).is_err());
}

#[test]
fn parse_joined_key_list() {
    let k1 = EncryptionKey::generate();
    let k2 = EncryptionKey::generate();
    let joined = format!("{};{}", k1.to_base64(), k2.to_base64());

    let chain = KeyChain::parse(&joined).unwrap();
    let sealed = KeyChain::new(vec![k2]).encrypt(b"v").unwrap();
    assert_eq!(chain.decrypt(&sealed).unwrap(), b"v");
}

#[test]
fn parse_rejects_malformed_keys() {
    assert!(matches!(
        KeyChain::parse("abc"),
        Err(SecretsError::InvalidKey)
    ));
    let valid = EncryptionKey::generate().to_base64();
    assert!(KeyChain::parse(&format!("{valid};;{valid}")).is_err());
}

#[test]
fn error_messages_name_the_env_var() {
    assert!(SecretsError::NoKeys.to_string().contains(ENCRYPT_KEYS_ENV));
    assert!(SecretsError::InvalidKey
        .to_string()
        .contains(ENCRYPT_KEYS_ENV));
}

#[test]
fn empty_chain_cannot_seal() {
    let chain = KeyChain::default();
    assert!(matches!(chain.encrypt(b"v"), Err(SecretsError::NoKeys)));
}
