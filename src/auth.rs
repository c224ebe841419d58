//! HTTP basic authentication

use crate::errors::{Result, RunnerError};
use actix_web::HttpRequest;
use actix_web::http::header;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Realm announced in `WWW-Authenticate`
pub const REALM: &str = "httprunner";

/// A single `user:password` pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    /// Parse the `user:password` form. The password may contain colons.
    pub fn parse(userpass: &str) -> Result<Self> {
        let (user, password) = userpass.split_once(':').ok_or_else(|| {
            RunnerError::InvalidConfig("userpass must be of the form user:password".to_string())
        })?;
        if user.is_empty() {
            return Err(RunnerError::InvalidConfig(
                "userpass has an empty user name".to_string(),
            ));
        }
        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Check an `Authorization` header value
    pub fn matches_header(&self, value: &str) -> bool {
        let Some(encoded) = value.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let expected = format!("{}:{}", self.user, self.password);
        constant_time_eq(&decoded, expected.as_bytes())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Allow-all when no credentials are configured
pub fn is_request_authorized(credentials: Option<&Credentials>, req: &HttpRequest) -> bool {
    let Some(credentials) = credentials else {
        return true;
    };
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| credentials.matches_header(value))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn basic(userpass: &str) -> String {
        format!("Basic {}", STANDARD.encode(userpass))
    }

    #[test]
    fn test_parse_credentials() {
        let creds = Credentials::parse("admin:s3:cret").unwrap();
        assert_eq!(creds.user(), "admin");
        assert!(creds.matches_header(&basic("admin:s3:cret")));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Credentials::parse("nocolon").is_err());
        assert!(Credentials::parse(":password").is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let creds = Credentials::parse("bob:hunter2").unwrap();
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_header_mismatch() {
        let creds = Credentials::parse("bob:hunter2").unwrap();
        assert!(!creds.matches_header(&basic("bob:wrong")));
        assert!(!creds.matches_header(&basic("alice:hunter2")));
        assert!(!creds.matches_header("Bearer abc"));
        assert!(!creds.matches_header("Basic !!!not-base64!!!"));
    }

    #[test]
    fn test_no_credentials_allows_all() {
        let req = TestRequest::default().to_http_request();
        assert!(is_request_authorized(None, &req));
    }

    #[test]
    fn test_request_authorization() {
        let creds = Credentials::parse("bob:hunter2").unwrap();

        let anonymous = TestRequest::default().to_http_request();
        assert!(!is_request_authorized(Some(&creds), &anonymous));

        let authorized = TestRequest::default()
            .insert_header((header::AUTHORIZATION, basic("bob:hunter2")))
            .to_http_request();
        assert!(is_request_authorized(Some(&creds), &authorized));
    }
}
