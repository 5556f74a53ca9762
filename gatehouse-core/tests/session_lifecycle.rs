//! Integration tests for the session credential lifecycle.
//!
//! These tests verify the end-to-end behavior of token storage:
//! - Storing and reading a token pair
//! - Rotating the access token alone
//! - Clearing credentials
//! - Shared backends with custom key names
//! - Keyring persistence (skipped when no keyring is reachable)

use std::sync::Arc;

use gatehouse_core::{
    Envelope, ErrorAction, ErrorClassifier, ErrorKind, MemoryStore, Secret, SecretStore,
    StorageKeys, TokenPair, TokenStore,
};

/// Helper to create a token store over a fresh memory backend.
fn test_tokens() -> (TokenStore, Arc<MemoryStore>) {
    let backend = Arc::new(MemoryStore::new());
    (TokenStore::new(backend.clone()), backend)
}

#[tokio::test]
async fn test_login_refresh_logout_cycle() {
    let (tokens, backend) = test_tokens();

    tokens
        .set_tokens(&Secret::new("T1"), &Secret::new("R1"))
        .await
        .unwrap();
    assert_eq!(tokens.access().await.unwrap().unwrap().expose(), "T1");
    assert!(backend.exists("refresh_token").await.unwrap());

    // Rotation without a new refresh token keeps the old one.
    tokens.set_access(&Secret::new("T2")).await.unwrap();
    let credentials = tokens.credentials().await.unwrap();
    assert_eq!(credentials.access_token.unwrap().expose(), "T2");
    assert_eq!(credentials.refresh_token.unwrap().expose(), "R1");

    tokens.clear().await.unwrap();
    assert!(tokens.credentials().await.unwrap().is_empty());
    assert!(!backend.exists("access_token").await.unwrap());
}

#[tokio::test]
async fn test_clear_is_idempotent() {
    let (tokens, _backend) = test_tokens();
    tokens.clear().await.unwrap();
    tokens.clear().await.unwrap();
    assert!(tokens.access().await.unwrap().is_none());
}

#[tokio::test]
async fn test_custom_keys_share_backend() {
    let backend: Arc<dyn SecretStore> = Arc::new(MemoryStore::new());
    let admin = TokenStore::with_keys(
        backend.clone(),
        StorageKeys {
            access: "admin.access".to_string(),
            refresh: "admin.refresh".to_string(),
        },
    );
    let user = TokenStore::new(backend.clone());

    admin
        .set_tokens(&Secret::new("A"), &Secret::new("AR"))
        .await
        .unwrap();
    user.set_tokens(&Secret::new("U"), &Secret::new("UR"))
        .await
        .unwrap();

    admin.clear().await.unwrap();
    assert!(admin.access().await.unwrap().is_none());
    assert_eq!(user.access().await.unwrap().unwrap().expose(), "U");
}

#[tokio::test]
async fn test_refresh_response_roundtrip_into_store() {
    let body = br#"{
        "success": true,
        "data": { "access_token": "T2", "refresh_token": "R2" },
        "request_id": "srv-9"
    }"#;

    let envelope = Envelope::parse(body).expect("valid envelope");
    assert!(envelope.success);
    let pair: TokenPair = serde_json::from_value(envelope.data.unwrap()).unwrap();

    let (tokens, _backend) = test_tokens();
    tokens
        .set_tokens(&pair.access_token, pair.refresh_token.as_ref().unwrap())
        .await
        .unwrap();
    assert_eq!(tokens.refresh().await.unwrap().unwrap().expose(), "R2");
}

#[test]
fn test_failure_envelope_classification() {
    let body = br#"{
        "success": false,
        "error": { "code": "TOKEN_INVALID", "message": "signature mismatch" }
    }"#;
    let envelope = Envelope::parse(body).unwrap();
    let classifier = ErrorClassifier::default();

    let on_401 = classifier.classify(401, envelope.error_code(), envelope.error_message());
    assert_eq!(on_401.kind, ErrorKind::InvalidToken);
    assert_eq!(on_401.action, ErrorAction::RefreshAndRetry);

    let on_200 = classifier.classify(200, envelope.error_code(), envelope.error_message());
    assert_eq!(on_200.kind, ErrorKind::InvalidToken);
    assert_eq!(on_200.action, ErrorAction::RedirectToLogin);
}

#[cfg(feature = "keyring-store")]
#[tokio::test]
async fn test_keyring_backed_tokens_persist() {
    use gatehouse_core::KeyringStore;

    // Skip this test if keyring is not available
    let keyring = match KeyringStore::try_new("gatehouse-test-session") {
        Ok(s) => Arc::new(s),
        Err(_) => {
            eprintln!("Skipping test: keyring unavailable");
            return;
        }
    };

    let tokens = TokenStore::new(keyring.clone());
    if tokens
        .set_tokens(&Secret::new("KT"), &Secret::new("KR"))
        .await
        .is_err()
    {
        eprintln!("Skipping test: keyring set failed");
        return;
    }

    // A second store over the same service sees the same credentials.
    let reopened = TokenStore::new(keyring);
    match reopened.access().await {
        Ok(Some(token)) => assert_eq!(token.expose(), "KT"),
        _ => {
            eprintln!("Skipping test: keyring did not persist");
            let _ = tokens.clear().await;
            return;
        }
    }

    tokens.clear().await.unwrap();
    assert!(reopened.access().await.unwrap().is_none());
}
