//! Webhook signature verification tests

mod common;

use common::*;

#[test]
fn test_valid_signature() {
    let gateway = test_gateway();
    let payload = br#"{"event":"payment.captured"}"#;
    let signature = sign_payload(payload, TEST_WEBHOOK_SECRET);

    assert!(
        gateway.verify_webhook_signature(payload, &signature),
        "Valid signature should be accepted"
    );
}

#[test]
fn test_wrong_secret_rejected() {
    let gateway = test_gateway();
    let payload = br#"{"event":"payment.captured"}"#;
    let signature = sign_payload(payload, "wrong_secret");

    assert!(
        !gateway.verify_webhook_signature(payload, &signature),
        "Signature from wrong secret should be rejected"
    );
}

#[test]
fn test_modified_payload_rejected() {
    let gateway = test_gateway();
    let original = br#"{"event":"payment.captured"}"#;
    let modified = br#"{"event":"payment.captured","hacked":true}"#;
    let signature = sign_payload(original, TEST_WEBHOOK_SECRET);

    assert!(
        !gateway.verify_webhook_signature(modified, &signature),
        "Modified payload should be rejected"
    );
}

#[test]
fn test_malformed_signature_is_not_verified() {
    let gateway = test_gateway();
    let payload = br#"{"event":"payment.captured"}"#;

    // Malformed input is "not verified", never a panic or error
    assert!(!gateway.verify_webhook_signature(payload, ""));
    assert!(!gateway.verify_webhook_signature(payload, "not-hex"));
    assert!(!gateway.verify_webhook_signature(payload, "deadbeef"));
    // Right length, wrong content
    assert!(!gateway.verify_webhook_signature(
        payload,
        &"0".repeat(64)
    ));
    // Non-UTF8-safe payloads verify against their exact bytes
    assert!(!gateway.verify_webhook_signature(&[0xff, 0xfe], "deadbeef"));
}

#[test]
fn test_signature_covers_exact_bytes() {
    let gateway = test_gateway();
    // Same JSON value, different byte representation: signature must be
    // computed over the raw bytes, so whitespace changes break it.
    let compact = br#"{"event":"payment.captured","id":"evt_1"}"#;
    let spaced = br#"{"event": "payment.captured", "id": "evt_1"}"#;
    let signature = sign_payload(compact, TEST_WEBHOOK_SECRET);

    assert!(gateway.verify_webhook_signature(compact, &signature));
    assert!(!gateway.verify_webhook_signature(spaced, &signature));
}
