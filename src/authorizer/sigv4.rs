//! AWS Signature Version 4
//!
//! Signs requests with static or session credentials for a single
//! region/service scope. Only the headers this crate sends are signed:
//! `host`, `x-amz-date` and, with session credentials, `x-amz-security-token`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use sha2::{Digest, Sha256};

use super::Authorizer;
use crate::error::{DiscoveryError, Result};
use crate::identity::AwsIdentity;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Region and service a SigV4 signature is scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsSigningScope {
    pub region: String,
    pub service: String,
}

impl AwsSigningScope {
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
        }
    }
}

pub struct SigV4Authorizer {
    credentials: AwsIdentity,
    scope: AwsSigningScope,
}

impl SigV4Authorizer {
    pub fn new(credentials: AwsIdentity, scope: AwsSigningScope) -> Self {
        Self { credentials, scope }
    }

    pub(crate) fn sign_at(&self, request: &mut reqwest::Request, now: DateTime<Utc>) -> Result<()> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let url = request.url();
        let host = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };
        let path = if url.path().is_empty() { "/" } else { url.path() };

        let mut query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (urlencoding::encode(&k).into_owned(), urlencoding::encode(&v).into_owned()))
            .collect();
        query.sort();
        let canonical_query = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let body = request
            .body()
            .and_then(|b| b.as_bytes())
            .unwrap_or_default();
        let payload_hash = hex::encode(Sha256::digest(body));

        let mut canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let mut signed_headers = String::from("host;x-amz-date");
        if let Some(token) = &self.credentials.session_token {
            canonical_headers.push_str(&format!("x-amz-security-token:{}\n", token));
            signed_headers.push_str(";x-amz-security-token");
        }

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method().as_str(),
            path,
            canonical_query,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date, self.scope.region, self.scope.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = hex::encode(self.signature(&date, &string_to_sign)?);
        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.credentials.access_key_id, credential_scope, signed_headers, signature
        );

        let headers = request.headers_mut();
        headers.insert("x-amz-date", header_value(&amz_date)?);
        if let Some(token) = &self.credentials.session_token {
            let mut value = header_value(token)?;
            value.set_sensitive(true);
            headers.insert("x-amz-security-token", value);
        }
        let mut value = header_value(&authorization)?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        Ok(())
    }

    fn signature(&self, date: &str, string_to_sign: &str) -> Result<Vec<u8>> {
        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac_sha256(secret.as_bytes(), date.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.scope.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.scope.service.as_bytes())?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
        hmac_sha256(&k_signing, string_to_sign.as_bytes())
    }
}

impl Authorizer for SigV4Authorizer {
    fn scheme(&self) -> &'static str {
        "aws-sigv4"
    }

    fn sign(&self, request: &mut reqwest::Request) -> Result<()> {
        self.sign_at(request, Utc::now())
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| DiscoveryError::collaborator("sigv4 authorizer", "deriving signing key", anyhow::anyhow!(e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| DiscoveryError::collaborator("sigv4 authorizer", "building request headers", e))
}
