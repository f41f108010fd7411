//! Google Cloud Storage blob store
//!
//! Uploads through the JSON API with a service-account access token. The
//! token is obtained by exchanging a signed RS256 assertion at the OAuth
//! endpoint and is reused until shortly before it expires.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{BlobStore, StorageError, StorageResult};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_API_BASE: &str = "https://storage.googleapis.com";
const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this long before Google says they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service-account JSON key that token signing needs
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"[redacted]")
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> StorageResult<Self> {
        let key: Self = serde_json::from_str(json)
            .map_err(|e| StorageError::Credentials(format!("invalid service account JSON: {}", e)))?;
        if key.client_email.is_empty() || key.private_key.is_empty() {
            return Err(StorageError::Credentials(
                "service account key missing client_email or private_key".to_string(),
            ));
        }
        Ok(key)
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

pub struct GcsBlobStore {
    client: reqwest::Client,
    bucket: String,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    token_uri: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl GcsBlobStore {
    pub fn new(bucket: &str, key: ServiceAccountKey, timeout: Duration) -> StorageResult<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| StorageError::Credentials(format!("invalid private key: {}", e)))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let token_uri = key
            .token_uri
            .clone()
            .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            key,
            signing_key,
            token_uri,
            api_base: DEFAULT_API_BASE.to_string(),
            token: Mutex::new(None),
        })
    }

    /// Point uploads at a different API host
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Public URL of an object in this bucket
    pub fn public_url(&self, path: &str) -> String {
        format!("{}/{}/{}", DEFAULT_API_BASE, self.bucket, path)
    }

    fn signed_assertion(&self) -> StorageResult<String> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: STORAGE_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| StorageError::Credentials(format!("failed to sign assertion: {}", e)))
    }

    async fn access_token(&self) -> StorageResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }

        let assertion = self.signed_assertion()?;
        let response = self
            .client
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Auth(format!("token exchange failed ({}): {}", status, message)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Auth(format!("invalid token response: {}", e)))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        tracing::debug!(expires_in = token.expires_in, "Obtained storage access token");

        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn put_public(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<String> {
        let token = self.access_token().await?;
        let url = format!("{}/upload/storage/v1/b/{}/o", self.api_base, self.bucket);
        let size = bytes.len();

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .query(&[
                ("uploadType", "media"),
                ("name", path),
                ("predefinedAcl", "publicRead"),
            ])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Upload {
                status: status.as_u16(),
                message,
            });
        }

        tracing::info!(bucket = %self.bucket, path = %path, size, "Uploaded object");
        Ok(self.public_url(path))
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn backend_name(&self) -> &'static str {
        "google_cloud_storage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const TEST_KEY: &str = include_str!("testdata/service_account_key.pem");

    fn key(token_uri: String) -> ServiceAccountKey {
        ServiceAccountKey {
            client_email: "uploader@lucky-chat.iam.gserviceaccount.com".to_string(),
            private_key: TEST_KEY.to_string(),
            token_uri: Some(token_uri),
            project_id: Some("lucky-chat".to_string()),
        }
    }

    #[test]
    fn test_service_account_json_parsing() {
        let json = serde_json::json!({
            "type": "service_account",
            "client_email": "a@b.iam.gserviceaccount.com",
            "private_key": TEST_KEY,
        })
        .to_string();
        let key = ServiceAccountKey::from_json(&json).unwrap();
        assert_eq!(key.client_email, "a@b.iam.gserviceaccount.com");
        assert!(key.token_uri.is_none());

        assert!(ServiceAccountKey::from_json("{}").is_err());
        assert!(!format!("{:?}", key).contains("PRIVATE KEY"));
    }

    #[test]
    fn test_bad_private_key_rejected() {
        let mut bad = key("http://localhost/token".to_string());
        bad.private_key = "not a pem".to_string();
        assert!(matches!(
            GcsBlobStore::new("bucket", bad, Duration::from_secs(5)),
            Err(StorageError::Credentials(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_reuses_cached_token() {
        let mut server = mockito::Server::new_async().await;
        let token_mock = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "urn:ietf:params:oauth:grant-type:jwt-bearer".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"ya29.test","expires_in":3600,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;
        let upload_mock = server
            .mock("POST", "/upload/storage/v1/b/lucky-bucket/o")
            .match_header("authorization", "Bearer ya29.test")
            .match_header("content-type", "image/webp")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("uploadType".into(), "media".into()),
                Matcher::UrlEncoded("predefinedAcl".into(), "publicRead".into()),
            ]))
            .with_status(200)
            .with_body("{}")
            .expect(2)
            .create_async()
            .await;

        let store = GcsBlobStore::new(
            "lucky-bucket",
            key(format!("{}/token", server.url())),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_api_base(&server.url());

        let url = store
            .put_public("dealers/a.webp", vec![1, 2, 3], "image/webp")
            .await
            .unwrap();
        assert_eq!(
            url,
            "https://storage.googleapis.com/lucky-bucket/dealers/a.webp"
        );
        store
            .put_public("dealers/b.webp", vec![4, 5, 6], "image/webp")
            .await
            .unwrap();

        token_mock.assert_async().await;
        upload_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_failure_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"ya29.test","expires_in":3600}"#)
            .create_async()
            .await;
        let _upload = server
            .mock("POST", "/upload/storage/v1/b/lucky-bucket/o")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let store = GcsBlobStore::new(
            "lucky-bucket",
            key(format!("{}/token", server.url())),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_api_base(&server.url());

        let err = store
            .put_public("uploads/x.png", vec![0], "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Upload { status: 403, .. }));
    }
}
