use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("missing token or expires parameter")]
    MissingCredentials,
    #[error("invalid expires parameter")]
    MalformedExpires,
    #[error("invalid or expired token")]
    InvalidOrExpired,
}

/// The `?token=…&expires=…` pair carried by every signed URL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
    pub expires: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    Status,
    Files,
    Stream,
}

impl Scope {
    fn as_str(self) -> &'static str {
        match self {
            Scope::Status => "status",
            Scope::Files => "files",
            Scope::Stream => "stream",
        }
    }
}

/// Mints and verifies HMAC-SHA256 tokens for the status, files, and stream
/// endpoints. The secret is loaded once at startup; rotating it invalidates
/// every outstanding link.
#[derive(Debug, Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
    ttl: Duration,
    base: String,
}

impl UrlSigner {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration, base: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ttl,
            base: base.into(),
        }
    }

    pub fn status_url(&self, job_id: &str) -> String {
        let expires = self.expiry();
        let token = self.sign(&payload(Scope::Status, job_id, None, expires));
        format!(
            "{}/api/status/{job_id}?token={token}&expires={expires}",
            self.base
        )
    }

    pub fn file_url(&self, job_id: &str, filename: &str) -> String {
        let expires = self.expiry();
        let token = self.sign(&payload(Scope::Files, job_id, Some(filename), expires));
        format!(
            "{}/files/{job_id}/{filename}?token={token}&expires={expires}",
            self.base
        )
    }

    pub fn stream_url(&self, job_id: &str) -> String {
        let expires = self.expiry();
        let token = self.sign(&payload(Scope::Stream, job_id, None, expires));
        format!(
            "{}/stream/{job_id}?token={token}&expires={expires}",
            self.base
        )
    }

    pub fn authorize_status(&self, job_id: &str, query: &TokenQuery) -> Result<(), SignerError> {
        self.authorize(Scope::Status, job_id, None, query, Utc::now().timestamp())
    }

    pub fn authorize_file(
        &self,
        job_id: &str,
        filename: &str,
        query: &TokenQuery,
    ) -> Result<(), SignerError> {
        self.authorize(
            Scope::Files,
            job_id,
            Some(filename),
            query,
            Utc::now().timestamp(),
        )
    }

    pub fn authorize_stream(&self, job_id: &str, query: &TokenQuery) -> Result<(), SignerError> {
        self.authorize(Scope::Stream, job_id, None, query, Utc::now().timestamp())
    }

    fn authorize(
        &self,
        scope: Scope,
        job_id: &str,
        filename: Option<&str>,
        query: &TokenQuery,
        now: i64,
    ) -> Result<(), SignerError> {
        let token = query
            .token
            .as_deref()
            .filter(|value| !value.is_empty())
            .ok_or(SignerError::MissingCredentials)?;
        let expires_raw = query
            .expires
            .as_deref()
            .filter(|value| !value.is_empty())
            .ok_or(SignerError::MissingCredentials)?;
        let expires: i64 = expires_raw
            .parse()
            .map_err(|_| SignerError::MalformedExpires)?;
        if now > expires {
            return Err(SignerError::InvalidOrExpired);
        }
        let expected = payload(scope, job_id, filename, expires);
        let decoded = hex::decode(token).map_err(|_| SignerError::InvalidOrExpired)?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| SignerError::InvalidOrExpired)?;
        mac.update(expected.as_bytes());
        mac.verify_slice(&decoded)
            .map_err(|_| SignerError::InvalidOrExpired)
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("hmac accepts keys of any length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn expiry(&self) -> i64 {
        Utc::now().timestamp() + self.ttl.as_secs() as i64
    }
}

fn payload(scope: Scope, job_id: &str, filename: Option<&str>, expires: i64) -> String {
    match filename {
        Some(name) => format!("{}:{job_id}:{name}:{expires}", scope.as_str()),
        None => format!("{}:{job_id}:{expires}", scope.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new(
            b"test-secret".to_vec(),
            Duration::from_secs(3600),
            "http://localhost:5001",
        )
    }

    fn query_from(url: &str) -> TokenQuery {
        let mut query = TokenQuery::default();
        let (_, qs) = url.split_once('?').expect("signed url has a query");
        for pair in qs.split('&') {
            match pair.split_once('=') {
                Some(("token", value)) => query.token = Some(value.to_string()),
                Some(("expires", value)) => query.expires = Some(value.to_string()),
                _ => {}
            }
        }
        query
    }

    #[test]
    fn minted_urls_verify() {
        let signer = signer();
        let id = "A1b2C3d4E5f6G7h8I9j0K";

        let status = signer.status_url(id);
        assert!(status.starts_with("http://localhost:5001/api/status/"));
        assert!(signer.authorize_status(id, &query_from(&status)).is_ok());

        let file = signer.file_url(id, "output.mp4");
        assert!(signer
            .authorize_file(id, "output.mp4", &query_from(&file))
            .is_ok());

        let stream = signer.stream_url(id);
        assert!(signer.authorize_stream(id, &query_from(&stream)).is_ok());
    }

    #[test]
    fn scopes_are_not_interchangeable() {
        let signer = signer();
        let id = "A1b2C3d4E5f6G7h8I9j0K";
        let status = query_from(&signer.status_url(id));
        assert_eq!(
            signer.authorize_stream(id, &status),
            Err(SignerError::InvalidOrExpired)
        );
    }

    #[test]
    fn token_is_bound_to_the_job_and_filename() {
        let signer = signer();
        let query = query_from(&signer.file_url("A1b2C3d4E5f6G7h8I9j0K", "output.mp4"));
        assert_eq!(
            signer.authorize_file("zZ9yY8xX7wW6vV5uU4tT3", "output.mp4", &query),
            Err(SignerError::InvalidOrExpired)
        );
        assert_eq!(
            signer.authorize_file("A1b2C3d4E5f6G7h8I9j0K", "other.mp4", &query),
            Err(SignerError::InvalidOrExpired)
        );
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let ours = signer();
        let theirs = UrlSigner::new(
            b"other-secret".to_vec(),
            Duration::from_secs(3600),
            "http://localhost:5001",
        );
        let id = "A1b2C3d4E5f6G7h8I9j0K";
        let query = query_from(&theirs.status_url(id));
        assert_eq!(
            ours.authorize_status(id, &query),
            Err(SignerError::InvalidOrExpired)
        );
    }

    #[test]
    fn expiry_boundary() {
        let signer = signer();
        let id = "A1b2C3d4E5f6G7h8I9j0K";
        let expires = Utc::now().timestamp() + 3600;
        let token = signer.sign(&payload(Scope::Status, id, None, expires));
        let query = TokenQuery {
            token: Some(token),
            expires: Some(expires.to_string()),
        };
        assert!(signer
            .authorize(Scope::Status, id, None, &query, expires - 1)
            .is_ok());
        assert!(signer
            .authorize(Scope::Status, id, None, &query, expires)
            .is_ok());
        assert_eq!(
            signer.authorize(Scope::Status, id, None, &query, expires + 1),
            Err(SignerError::InvalidOrExpired)
        );
    }

    #[test]
    fn parameter_errors_are_distinguished() {
        let signer = signer();
        let id = "A1b2C3d4E5f6G7h8I9j0K";
        assert_eq!(
            signer.authorize_status(id, &TokenQuery::default()),
            Err(SignerError::MissingCredentials)
        );
        let query = TokenQuery {
            token: Some("deadbeef".to_string()),
            expires: Some("not-a-number".to_string()),
        };
        assert_eq!(
            signer.authorize_status(id, &query),
            Err(SignerError::MalformedExpires)
        );
    }
}
