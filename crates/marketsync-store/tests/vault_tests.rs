use base64::{engine::general_purpose::STANDARD, Engine as _};
use marketsync_store::{encryption, CredentialVault, VaultError};
use serde_json::json;

const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

#[test]
fn test_blob_layout_is_nonce_then_ciphertext_and_tag() {
    let vault = CredentialVault::from_hex(KEY_HEX).expect("valid key");
    let blob = vault.encrypt(b"secret").expect("encrypt");

    let raw = STANDARD.decode(&blob).expect("blob is base64");
    // 12-byte nonce + plaintext + 16-byte tag
    assert_eq!(raw.len(), 12 + 6 + 16);
}

#[test]
fn test_free_functions_interoperate_with_vault() {
    let key = hex::decode(KEY_HEX).expect("hex");
    let vault = CredentialVault::new(&key).expect("valid key");

    let blob = encryption::encrypt(br#"{"access_token":"x"}"#, &key).expect("encrypt");
    let value = vault.decrypt_json(&blob).expect("decrypt");
    assert_eq!(value, json!({"access_token": "x"}));
}

#[test]
fn test_non_object_payload_is_rejected() {
    let vault = CredentialVault::from_hex(KEY_HEX).expect("valid key");
    let blob = vault.encrypt(b"[1,2,3]").expect("encrypt");

    let err = vault.decrypt_json(&blob).unwrap_err();
    assert!(matches!(err, VaultError::MalformedPayload(_)));
}
