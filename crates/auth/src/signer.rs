//! Canonical request signing (AWS SigV4 layout, HMAC-SHA256).
//!
//! Used by server-to-server clients that hold an app's access key (the app
//! id) and secret. The same canonicalisation runs on both sides: the client
//! calls [`Signer::sign`], the server calls [`Signer::verify`] on what it
//! received. Request bodies must be buffered by the caller so they can be
//! hashed here and still be read by the application afterwards.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderValue, Method};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};

use crate::token::SigningError;
use crate::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
pub const DATE_HEADER: &str = "x-amz-date";
pub const PARAM_ALGORITHM: &str = "X-Amz-Algorithm";
pub const PARAM_CREDENTIAL: &str = "X-Amz-Credential";
pub const PARAM_DATE: &str = "X-Amz-Date";
pub const PARAM_SIGNED_HEADERS: &str = "X-Amz-SignedHeaders";
pub const PARAM_SIGNATURE: &str = "X-Amz-Signature";

const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const TERMINATOR: &str = "aws4_request";

/// RFC 3986 unreserved characters stay as-is; everything else is encoded.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// The parts of an HTTP request that take part in the signature.
///
/// `query` holds decoded name/value pairs in arrival order.
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub query: &'a [(String, String)],
    pub body: &'a [u8],
}

/// `date/region/service/aws4_request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope {
    pub date: String,
    pub region: String,
    pub service: String,
}

impl CredentialScope {
    fn render(&self) -> String {
        format!("{}/{}/{}/{TERMINATOR}", self.date, self.region, self.service)
    }
}

/// Signature material supplied by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSignature {
    pub access_key: String,
    pub scope: CredentialScope,
    pub signed_headers: Vec<String>,
    pub signature: String,
    /// Came from `X-Amz-*` query parameters rather than the header.
    pub presigned: bool,
}

/// Headers a client adds to a request after signing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub authorization: String,
    pub amz_date: String,
    pub host: String,
}

impl SignedRequest {
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), SigningError> {
        let value = |s: &str| HeaderValue::from_str(s).map_err(|e| SigningError::Crypto(e.to_string()));
        headers.insert(http::header::AUTHORIZATION, value(&self.authorization)?);
        headers.insert(DATE_HEADER, value(&self.amz_date)?);
        headers.insert(http::header::HOST, value(&self.host)?);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Signer {
    region: String,
    service: String,
}

impl Signer {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            region: config.signing_region.clone(),
            service: config.signing_service.clone(),
        }
    }

    /// Sign a request for `endpoint` (scheme optional, e.g.
    /// `https://api.example.com`).
    ///
    /// Every header in `parts.headers` is signed along with `host` and
    /// `x-amz-date`, which are derived here.
    pub fn sign(
        &self,
        endpoint: &str,
        parts: &RequestParts<'_>,
        access_key: &str,
        secret_key: &str,
        now: DateTime<Utc>,
    ) -> Result<SignedRequest, SigningError> {
        let amz_date = format_amz_date(now);
        let host = host_of(endpoint).to_string();
        let scope = self.scope(now);

        let mut headers = collect_headers(parts.headers);
        headers.remove("authorization");
        headers.insert("host".to_string(), host.clone());
        headers.insert(DATE_HEADER.to_string(), amz_date.clone());
        let signed_headers: Vec<String> = headers.keys().cloned().collect();

        let canonical = canonical_request(parts, &headers, &signed_headers, parts.query, &payload_hash(parts.body));
        let signature = compute_signature(secret_key, &scope, &amz_date, &canonical)
            .ok_or_else(|| SigningError::Crypto("HMAC key rejected".to_string()))?;

        Ok(SignedRequest {
            authorization: format!(
                "{ALGORITHM} Credential={access_key}/{}, SignedHeaders={}, Signature={}",
                scope.render(),
                signed_headers.join(";"),
                hex::encode(signature)
            ),
            amz_date,
            host,
        })
    }

    /// Produce the query string parameters of a pre-signed URL.
    ///
    /// Only `host` is signed and the payload is not hashed. The returned
    /// list is `parts.query` plus the `X-Amz-*` parameters.
    pub fn presign(
        &self,
        endpoint: &str,
        parts: &RequestParts<'_>,
        access_key: &str,
        secret_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>, SigningError> {
        let amz_date = format_amz_date(now);
        let scope = self.scope(now);
        let headers = BTreeMap::from([("host".to_string(), host_of(endpoint).to_string())]);
        let signed_headers = vec!["host".to_string()];

        let mut query = parts.query.to_vec();
        query.push((PARAM_ALGORITHM.to_string(), ALGORITHM.to_string()));
        query.push((PARAM_CREDENTIAL.to_string(), format!("{access_key}/{}", scope.render())));
        query.push((PARAM_DATE.to_string(), amz_date.clone()));
        query.push((PARAM_SIGNED_HEADERS.to_string(), "host".to_string()));

        let canonical = canonical_request(parts, &headers, &signed_headers, &query, UNSIGNED_PAYLOAD);
        let signature = compute_signature(secret_key, &scope, &amz_date, &canonical)
            .ok_or_else(|| SigningError::Crypto("HMAC key rejected".to_string()))?;

        query.push((PARAM_SIGNATURE.to_string(), hex::encode(signature)));
        Ok(query)
    }

    /// Re-derive the signature of an incoming request and compare it with
    /// the client's in constant time.
    ///
    /// Fails closed: anything missing or unparsable yields `false`.
    pub fn verify(&self, parts: &RequestParts<'_>, secret_key: &str) -> bool {
        let Some(client) = parse_client_signature(parts) else {
            tracing::debug!("no parsable request signature");
            return false;
        };
        let Some(amz_date) = raw_request_date(parts, client.presigned) else {
            tracing::debug!("signed request has no date");
            return false;
        };
        if !amz_date.starts_with(&client.scope.date) {
            tracing::debug!("credential scope date does not match request date");
            return false;
        }

        let all_headers = collect_headers(parts.headers);
        let mut headers = BTreeMap::new();
        for name in &client.signed_headers {
            let Some(value) = all_headers.get(name) else {
                tracing::debug!(header = %name, "signed header missing from request");
                return false;
            };
            headers.insert(name.clone(), value.clone());
        }

        let (query, payload) = if client.presigned {
            let query: Vec<(String, String)> = parts
                .query
                .iter()
                .filter(|(k, _)| k != PARAM_SIGNATURE)
                .cloned()
                .collect();
            (query, UNSIGNED_PAYLOAD.to_string())
        } else {
            (parts.query.to_vec(), payload_hash(parts.body))
        };

        let canonical = canonical_request(parts, &headers, &client.signed_headers, &query, &payload);
        let Ok(expected) = hex::decode(&client.signature) else {
            return false;
        };
        let Some(mac) = signing_mac(secret_key, &client.scope, &amz_date, &canonical) else {
            return false;
        };
        mac.verify_slice(&expected).is_ok()
    }

    fn scope(&self, now: DateTime<Utc>) -> CredentialScope {
        CredentialScope {
            date: now.format("%Y%m%d").to_string(),
            region: self.region.clone(),
            service: self.service.clone(),
        }
    }
}

/// Extract the client's signature from the `Authorization` header, falling
/// back to pre-signed `X-Amz-*` query parameters.
pub fn parse_client_signature(parts: &RequestParts<'_>) -> Option<ClientSignature> {
    if let Some(header) = parts
        .headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(rest) = header.trim().strip_prefix(ALGORITHM) {
            return parse_authorization_fields(rest);
        }
    }

    let credential = query_param(parts.query, PARAM_CREDENTIAL)?;
    let signed_headers = query_param(parts.query, PARAM_SIGNED_HEADERS)?;
    let signature = query_param(parts.query, PARAM_SIGNATURE)?;
    let (access_key, scope) = parse_credential(credential)?;
    Some(ClientSignature {
        access_key,
        scope,
        signed_headers: split_signed_headers(signed_headers)?,
        signature: signature.to_string(),
        presigned: true,
    })
}

/// `true` if the request carries signature material in either form.
pub fn is_signed(parts: &RequestParts<'_>) -> bool {
    let header_signed = parts
        .headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|h| h.trim_start().starts_with(ALGORITHM));
    header_signed || query_param(parts.query, PARAM_SIGNATURE).is_some()
}

/// The request timestamp the signature covers: the `X-Amz-Date` param for
/// pre-signed requests, otherwise the `x-amz-date` header.
pub fn request_date(parts: &RequestParts<'_>) -> Option<DateTime<Utc>> {
    let presigned = parse_client_signature(parts).is_some_and(|c| c.presigned);
    let raw = raw_request_date(parts, presigned)?;
    parse_amz_date(&raw)
}

pub fn format_amz_date(at: DateTime<Utc>) -> String {
    at.format(AMZ_DATE_FORMAT).to_string()
}

pub fn parse_amz_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), AMZ_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn raw_request_date(parts: &RequestParts<'_>, presigned: bool) -> Option<String> {
    let from_header = || {
        parts
            .headers
            .get(DATE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
    };
    let from_query = || query_param(parts.query, PARAM_DATE).map(str::to_string);
    if presigned {
        from_query().or_else(from_header)
    } else {
        from_header().or_else(from_query)
    }
}

fn parse_authorization_fields(fields: &str) -> Option<ClientSignature> {
    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;
    for field in fields.split(',') {
        let (key, value) = field.trim().split_once('=')?;
        match key.trim() {
            "Credential" => credential = Some(value.trim()),
            "SignedHeaders" => signed_headers = Some(value.trim()),
            "Signature" => signature = Some(value.trim()),
            _ => {}
        }
    }
    let (access_key, scope) = parse_credential(credential?)?;
    Some(ClientSignature {
        access_key,
        scope,
        signed_headers: split_signed_headers(signed_headers?)?,
        signature: signature?.to_string(),
        presigned: false,
    })
}

fn parse_credential(credential: &str) -> Option<(String, CredentialScope)> {
    let parts: Vec<&str> = credential.split('/').collect();
    let [access_key, date, region, service, terminator] = parts.as_slice() else {
        return None;
    };
    if access_key.is_empty() || *terminator != TERMINATOR {
        return None;
    }
    Some((
        access_key.to_string(),
        CredentialScope {
            date: date.to_string(),
            region: region.to_string(),
            service: service.to_string(),
        },
    ))
}

fn split_signed_headers(raw: &str) -> Option<Vec<String>> {
    let names: Vec<String> = raw
        .split(';')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect();
    if names.is_empty() { None } else { Some(names) }
}

fn query_param<'a>(query: &'a [(String, String)], name: &str) -> Option<&'a str> {
    query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

fn host_of(endpoint: &str) -> &str {
    let without_scheme = endpoint.split_once("://").map_or(endpoint, |(_, rest)| rest);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}

/// Lower-cased names; repeated headers joined with `,`; values trimmed with
/// inner whitespace runs collapsed.
fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        out.entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}

fn payload_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

fn encode(s: &str) -> String {
    utf8_percent_encode(s, UNRESERVED).to_string()
}

fn canonical_uri(path: &str) -> String {
    let path = path.split('?').next().unwrap_or("");
    if path.is_empty() {
        return "/".to_string();
    }
    let encoded: Vec<String> = path.split('/').map(encode).collect();
    let joined = encoded.join("/");
    if joined.starts_with('/') { joined } else { format!("/{joined}") }
}

fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query.iter().map(|(k, v)| (encode(k), encode(v))).collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_request(
    parts: &RequestParts<'_>,
    headers: &BTreeMap<String, String>,
    signed_headers: &[String],
    query: &[(String, String)],
    payload_hash: &str,
) -> String {
    let canonical_headers: String = signed_headers
        .iter()
        .map(|name| format!("{name}:{}\n", headers.get(name).map(String::as_str).unwrap_or("")))
        .collect();

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        parts.method.as_str(),
        canonical_uri(parts.path),
        canonical_query(query),
        canonical_headers,
        signed_headers.join(";"),
        payload_hash
    )
}

fn hmac(key: &[u8], data: &str) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(data.as_bytes());
    Some(mac.finalize().into_bytes().to_vec())
}

/// MAC over the string-to-sign, keyed by the derived signing key.
fn signing_mac(secret_key: &str, scope: &CredentialScope, amz_date: &str, canonical: &str) -> Option<HmacSha256> {
    let k_date = hmac(format!("AWS4{secret_key}").as_bytes(), &scope.date)?;
    let k_region = hmac(&k_date, &scope.region)?;
    let k_service = hmac(&k_region, &scope.service)?;
    let k_signing = hmac(&k_service, TERMINATOR)?;

    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{}\n{}",
        scope.render(),
        hex::encode(Sha256::digest(canonical.as_bytes()))
    );
    let mut mac = HmacSha256::new_from_slice(&k_signing).ok()?;
    mac.update(string_to_sign.as_bytes());
    Some(mac)
}

fn compute_signature(secret_key: &str, scope: &CredentialScope, amz_date: &str, canonical: &str) -> Option<Vec<u8>> {
    signing_mac(secret_key, scope, amz_date, canonical).map(|mac| mac.finalize().into_bytes().to_vec())
}
