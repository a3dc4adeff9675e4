//! E2E tests for OAuth2 bearer token authentication

mod common;

use chrono::{Duration, Utc};
use common::{TestAuth, ed25519_key};
use fedauth::activitypub::{Actor, PublicKey};
use fedauth::auth::{AccessGrant, UserData};
use fedauth::error::AuthError;

const ACTOR_ID: &str = "https://local.test/users/jdoe";

fn bearer_request(authorization: &str) -> http::Request<()> {
    http::Request::builder()
        .method("GET")
        .uri("/inbox")
        .header("host", "local.test")
        .header("authorization", authorization)
        .body(())
        .unwrap()
}

async fn auth_with_jdoe() -> TestAuth {
    let auth = TestAuth::new().await;
    let key = ed25519_key(7);
    let actor = Actor::new(ACTOR_ID, "Person")
        .with_name("John Doe")
        .with_public_key(PublicKey::new(
            format!("{}#main", ACTOR_ID),
            ACTOR_ID,
            key.public_key_pem().unwrap(),
        ));
    auth.storage.save_actor(&actor).await.unwrap();
    auth
}

#[tokio::test]
async fn test_known_token_authenticates_actor() {
    let auth = auth_with_jdoe().await;
    let grant = AccessGrant::new("client-1", "read").with_user_data(UserData::from(ACTOR_ID));
    auth.storage.save_access("s3cret", &grant).await.unwrap();

    let actor = auth
        .authenticate(&bearer_request("Bearer s3cret"))
        .await
        .expect("token is known");
    assert_eq!(actor.id.as_str(), ACTOR_ID);
    assert_eq!(actor.display_name(), Some("John Doe"));

    // Scheme matching ignores case
    let actor = auth
        .authenticate(&bearer_request("bearer s3cret"))
        .await
        .expect("lowercase scheme");
    assert_eq!(actor.id.as_str(), ACTOR_ID);
}

#[tokio::test]
async fn test_json_user_data_authenticates_actor() {
    let auth = auth_with_jdoe().await;
    let grant = AccessGrant::new("client-1", "read")
        .with_user_data(UserData::Json(serde_json::json!(ACTOR_ID)));
    auth.storage.save_access("json-token", &grant).await.unwrap();

    let actor = auth
        .authenticate(&bearer_request("Bearer json-token"))
        .await
        .unwrap();
    assert_eq!(actor.id.as_str(), ACTOR_ID);
}

#[tokio::test]
async fn test_unknown_token_is_unauthorized() {
    let auth = auth_with_jdoe().await;

    let err = auth
        .authenticate(&bearer_request("Bearer nope"))
        .await
        .expect_err("token was never issued");

    assert!(matches!(err, AuthError::Unauthorized { .. }));
    assert_eq!(
        err.challenge(),
        Some("Bearer realm=\"local.test\",error=\"invalid_token\"")
    );
}

#[tokio::test]
async fn test_expired_and_revoked_tokens_are_unauthorized() {
    let auth = auth_with_jdoe().await;

    let mut expired = AccessGrant::new("client-1", "read")
        .with_user_data(UserData::from(ACTOR_ID))
        .with_expiry(Duration::seconds(60));
    expired.created_at = Utc::now() - Duration::hours(1);
    auth.storage.save_access("old", &expired).await.unwrap();

    let revoked = AccessGrant::new("client-1", "read").with_user_data(UserData::from(ACTOR_ID));
    auth.storage.save_access("revoked", &revoked).await.unwrap();
    assert!(auth.storage.remove_access("revoked").await.unwrap());

    for token in ["Bearer old", "Bearer revoked"] {
        let err = auth.authenticate(&bearer_request(token)).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized { .. }), "{}", token);
    }
}

#[tokio::test]
async fn test_token_for_unknown_actor_is_unauthorized() {
    let auth = TestAuth::new().await;
    let grant = AccessGrant::new("client-1", "read")
        .with_user_data(UserData::from("https://local.test/users/gone"));
    auth.storage.save_access("orphan", &grant).await.unwrap();

    let err = auth
        .authenticate(&bearer_request("Bearer orphan"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized { .. }));
}

#[tokio::test]
async fn test_bearer_disabled_is_anonymous() {
    let auth = TestAuth::with_config(|config| config.federation.bearer_enabled = false).await;
    assert!(!auth.authenticator.supports_bearer());

    let actor = auth
        .authenticate(&bearer_request("Bearer anything"))
        .await
        .unwrap();
    assert!(actor.is_anonymous());
}

#[tokio::test]
async fn test_other_schemes_are_anonymous() {
    let auth = auth_with_jdoe().await;

    let actor = auth
        .authenticate(&bearer_request("Basic dXNlcjpwYXNz"))
        .await
        .unwrap();
    assert!(actor.is_anonymous());
}
