//! SQS query API client over HTTP.
//!
//! Requests are form-encoded POSTs signed with AWS Signature Version 4 and
//! responses are the XML documents of the SQS query protocol. Talking HTTP
//! directly keeps the client small and lets tests point it at a mock server.
//!
//! Application properties travel as a single `Headers` string message
//! attribute holding the JSON pair `[headers, properties]`, the layout used
//! by other producers and consumers of the same queues. Transport headers are
//! always sent empty.

use super::{SqsTransport, MAX_WAIT_TIME};
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{Properties, SqsMessage};
use crate::secret::SecretString;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;

/// API version sent when none (or `latest`) is configured
pub const DEFAULT_API_VERSION: &str = "2012-11-05";

/// Message attribute carrying the JSON encoded application properties
pub const HEADERS_ATTRIBUTE: &str = "Headers";

/// HTTP timeout; must exceed the longest long-poll wait
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Error Types
// ============================================================================

/// Failures talking to the SQS HTTP endpoint
#[derive(Debug, thiserror::Error)]
pub enum SqsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("SQS service error: {code}: {message}")]
    Service { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<SqsError> for QueueError {
    fn from(error: SqsError) -> Self {
        match error {
            SqsError::Authentication(message) => QueueError::AuthenticationFailed { message },
            SqsError::Network(message) => QueueError::ConnectionFailed { message },
            SqsError::Service { code, message } => QueueError::ProviderError {
                provider: "AwsSqs".to_string(),
                code,
                message,
            },
            SqsError::QueueNotFound(queue_name) => QueueError::QueueNotFound { queue_name },
            SqsError::InvalidReceipt(receipt) => QueueError::MessageNotFound { receipt },
            SqsError::Configuration(message) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message })
            }
            SqsError::Serialization(message) => {
                QueueError::SerializationError(SerializationError::MalformedResponse { message })
            }
        }
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer for request authentication
///
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
#[derive(Clone)]
struct AwsV4Signer {
    access_key: String,
    secret_key: SecretString,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(access_key: String, secret_key: SecretString, region: String) -> Self {
        Self {
            access_key,
            secret_key,
            region,
            service: "sqs".to_string(),
        }
    }

    /// Sign a request, returning the headers to attach to it.
    ///
    /// `host` must match the `Host` header the HTTP client sends, including a
    /// non-default port.
    fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        canonical_query: &str,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Vec<(&'static str, String)> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        let canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let signed_headers = "host;x-amz-date";
        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{:x}",
            algorithm,
            amz_date,
            credential_scope,
            Sha256::digest(canonical_request.as_bytes())
        );

        let signature = hex::encode(self.hmac_sha256(
            &self.signing_key(&date_stamp),
            string_to_sign.as_bytes(),
        ));

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        vec![("authorization", authorization), ("x-amz-date", amz_date)]
    }

    /// Derive the signing key: HMAC chain over date, region, service and the
    /// `aws4_request` terminator, seeded with `"AWS4" + secret`.
    fn signing_key(&self, date_stamp: &str) -> Vec<u8> {
        let k_secret = format!("AWS4{}", self.secret_key.expose_secret());
        let k_date = self.hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = self.hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = self.hmac_sha256(&k_region, self.service.as_bytes());
        self.hmac_sha256(&k_service, b"aws4_request")
    }

    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

// ============================================================================
// HTTP Transport
// ============================================================================

/// Connection settings for [`HttpSqsTransport`]
#[derive(Debug, Clone, Default)]
pub struct HttpSqsSettings {
    pub region: String,
    /// Endpoint override, e.g. a LocalStack URL
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<SecretString>,
    /// SQS API version; `latest` or unset selects [`DEFAULT_API_VERSION`]
    pub api_version: Option<String>,
}

/// SQS client speaking the query protocol over HTTP
pub struct HttpSqsTransport {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    endpoint: Url,
    host: String,
    api_version: String,
}

impl HttpSqsTransport {
    /// Create a client from connection settings.
    ///
    /// Without an endpoint override the regional AWS endpoint is used. Without
    /// both access key and secret key requests fail with an authentication error.
    pub fn new(settings: HttpSqsSettings) -> Result<Self, SqsError> {
        if settings.region.is_empty() {
            return Err(SqsError::Configuration(
                "Region cannot be empty".to_string(),
            ));
        }

        let endpoint = match settings.endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) if endpoint.contains("://") => endpoint.to_string(),
            Some(endpoint) => format!("https://{}", endpoint),
            None => format!("https://sqs.{}.amazonaws.com", settings.region),
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| SqsError::Configuration(format!("Invalid endpoint '{}': {}", endpoint, e)))?;

        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(SqsError::Configuration(format!(
                    "Endpoint '{}' has no host",
                    endpoint
                )))
            }
        };

        let signer = match (settings.access_key, settings.secret_key) {
            (Some(access_key), Some(secret_key)) if !access_key.is_empty() => Some(
                AwsV4Signer::new(access_key, secret_key, settings.region.clone()),
            ),
            _ => None,
        };

        let api_version = match settings.api_version.as_deref() {
            None | Some("") | Some("latest") => DEFAULT_API_VERSION.to_string(),
            Some(version) => version.to_string(),
        };

        let http_client = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SqsError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            signer,
            endpoint,
            host,
            api_version,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// POST a signed query API action and return the response body
    async fn make_request(
        &self,
        action: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<String, SqsError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| SqsError::Authentication("No credentials configured".to_string()))?;

        params.push(("Action".to_string(), action.to_string()));
        params.push(("Version".to_string(), self.api_version.clone()));
        let body = encode_form(params);

        let timestamp = Utc::now();
        let auth_headers = signer.sign_request(
            "POST",
            &self.host,
            self.endpoint.path(),
            "",
            &body,
            &timestamp,
        );

        let mut request = self
            .http_client
            .post(self.endpoint.clone())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded; charset=utf-8",
            )
            .body(body);
        for (key, value) in auth_headers {
            request = request.header(key, value);
        }

        debug!(action, endpoint = %self.endpoint, "Sending SQS request");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SqsError::Network(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                SqsError::Network(format!("Connection failed: {}", e))
            } else {
                SqsError::Network(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| SqsError::Network(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(parse_error_response(&response_body, status.as_u16()));
        }

        Ok(response_body)
    }
}

impl fmt::Debug for HttpSqsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSqsTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_version", &self.api_version)
            .field("signed", &self.signer.is_some())
            .finish()
    }
}

#[async_trait]
impl SqsTransport for HttpSqsTransport {
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        let params = vec![("QueueName".to_string(), queue_name.to_string())];
        let response = self.make_request("GetQueueUrl", params).await?;
        Ok(parse_queue_url_response(&response)?)
    }

    async fn send_message(
        &self,
        queue_url: &str,
        message: &SqsMessage,
    ) -> Result<String, QueueError> {
        let mut params = vec![
            ("QueueUrl".to_string(), queue_url.to_string()),
            ("MessageBody".to_string(), message.body.clone()),
        ];

        if !message.properties.is_empty() {
            let headers = encode_headers(&message.properties)?;
            params.push((
                "MessageAttribute.1.Name".to_string(),
                HEADERS_ATTRIBUTE.to_string(),
            ));
            params.push((
                "MessageAttribute.1.Value.DataType".to_string(),
                "String".to_string(),
            ));
            params.push(("MessageAttribute.1.Value.StringValue".to_string(), headers));
        }
        if let Some(group_id) = &message.message_group_id {
            params.push(("MessageGroupId".to_string(), group_id.clone()));
        }
        if let Some(dedup_id) = &message.message_deduplication_id {
            params.push(("MessageDeduplicationId".to_string(), dedup_id.clone()));
        }

        let response = self.make_request("SendMessage", params).await?;
        Ok(parse_send_message_response(&response)?)
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        wait: Duration,
    ) -> Result<Option<SqsMessage>, QueueError> {
        let wait_time_seconds = wait.min(MAX_WAIT_TIME).as_secs();
        let params = vec![
            ("QueueUrl".to_string(), queue_url.to_string()),
            ("MaxNumberOfMessages".to_string(), "1".to_string()),
            ("WaitTimeSeconds".to_string(), wait_time_seconds.to_string()),
            ("AttributeName.1".to_string(), "All".to_string()),
            ("MessageAttributeName.1".to_string(), "All".to_string()),
        ];

        let response = self.make_request("ReceiveMessage", params).await?;
        let mut messages = parse_receive_message_response(&response)?;
        if messages.len() > 1 {
            warn!(count = messages.len(), "SQS returned more messages than requested");
        }
        Ok(if messages.is_empty() {
            None
        } else {
            Some(messages.swap_remove(0))
        })
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), QueueError> {
        let params = vec![
            ("QueueUrl".to_string(), queue_url.to_string()),
            ("ReceiptHandle".to_string(), receipt_handle.to_string()),
        ];
        self.make_request("DeleteMessage", params).await?;
        Ok(())
    }

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_secs: u32,
    ) -> Result<(), QueueError> {
        let params = vec![
            ("QueueUrl".to_string(), queue_url.to_string()),
            ("ReceiptHandle".to_string(), receipt_handle.to_string()),
            (
                "VisibilityTimeout".to_string(),
                visibility_timeout_secs.to_string(),
            ),
        ];
        self.make_request("ChangeMessageVisibility", params).await?;
        Ok(())
    }
}

// ============================================================================
// Wire Encoding
// ============================================================================

/// Percent-encode parameters as an `application/x-www-form-urlencoded` body,
/// sorted by name.
fn encode_form(mut params: Vec<(String, String)>) -> String {
    params.sort();
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Structural events produced while walking an XML document.
///
/// Each event carries the element path from the root to the current element.
enum XmlEvent<'a> {
    Start(&'a [String]),
    Text(&'a [String], String),
    End(&'a [String]),
}

fn walk_xml(xml: &str, mut visit: impl FnMut(XmlEvent<'_>)) -> Result<(), SqsError> {
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                visit(XmlEvent::Start(&path));
            }
            Ok(Event::Empty(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                visit(XmlEvent::Start(&path));
                visit(XmlEvent::End(&path));
                path.pop();
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| SqsError::Serialization(format!("Failed to parse XML: {}", e)))?
                    .into_owned();
                visit(XmlEvent::Text(&path, text));
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                visit(XmlEvent::Text(&path, text));
            }
            Ok(Event::End(_)) => {
                visit(XmlEvent::End(&path));
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SqsError::Serialization(format!(
                    "XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn path_ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

/// Text of the first element whose path ends with `suffix`
fn find_text(xml: &str, suffix: &[&str]) -> Result<Option<String>, SqsError> {
    let mut found: Option<String> = None;
    walk_xml(xml, |event| {
        if let XmlEvent::Text(path, text) = event {
            if found.is_none() && path_ends_with(path, suffix) {
                found = Some(text);
            }
        }
    })?;
    Ok(found)
}

/// Parse a GetQueueUrl response
fn parse_queue_url_response(xml: &str) -> Result<String, SqsError> {
    find_text(xml, &["QueueUrl"])?
        .map(|url| url.trim().to_string())
        .ok_or_else(|| SqsError::Serialization("QueueUrl not found in response".to_string()))
}

/// Parse a SendMessage response
fn parse_send_message_response(xml: &str) -> Result<String, SqsError> {
    find_text(xml, &["SendMessageResult", "MessageId"])?
        .map(|id| id.trim().to_string())
        .ok_or_else(|| SqsError::Serialization("MessageId not found in response".to_string()))
}

/// Parse a ReceiveMessage response
fn parse_receive_message_response(xml: &str) -> Result<Vec<SqsMessage>, SqsError> {
    let mut messages = Vec::new();
    let mut current: Option<SqsMessage> = None;
    let mut attribute: (Option<String>, Option<String>) = (None, None);
    let mut message_attribute: (Option<String>, Option<String>) = (None, None);

    walk_xml(xml, |event| match event {
        XmlEvent::Start(path) if path_ends_with(path, &["ReceiveMessageResult", "Message"]) => {
            current = Some(SqsMessage::default());
        }
        XmlEvent::Text(path, text) => {
            let Some(message) = current.as_mut() else {
                return;
            };
            if path_ends_with(path, &["Message", "MessageId"]) {
                message.message_id = Some(text);
            } else if path_ends_with(path, &["Message", "ReceiptHandle"]) {
                message.receipt_handle = Some(text);
            } else if path_ends_with(path, &["Message", "Body"]) {
                message.body.push_str(&text);
            } else if path_ends_with(path, &["Message", "Attribute", "Name"]) {
                attribute.0 = Some(text);
            } else if path_ends_with(path, &["Message", "Attribute", "Value"]) {
                attribute.1 = Some(text);
            } else if path_ends_with(path, &["Message", "MessageAttribute", "Name"]) {
                message_attribute.0 = Some(text);
            } else if path_ends_with(path, &["MessageAttribute", "Value", "StringValue"]) {
                message_attribute.1 = Some(text);
            }
        }
        XmlEvent::End(path) => {
            let Some(message) = current.as_mut() else {
                return;
            };
            if path_ends_with(path, &["Message", "Attribute"]) {
                if let (Some(name), Some(value)) = (attribute.0.take(), attribute.1.take()) {
                    if name == "MessageGroupId" {
                        message.message_group_id = Some(value.clone());
                    }
                    message.attributes.insert(name, value);
                }
            } else if path_ends_with(path, &["Message", "MessageAttribute"]) {
                if let (Some(name), Some(value)) =
                    (message_attribute.0.take(), message_attribute.1.take())
                {
                    apply_message_attribute(message, name, value);
                }
                message_attribute = (None, None);
            } else if path_ends_with(path, &["ReceiveMessageResult", "Message"]) {
                if let Some(message) = current.take() {
                    messages.push(message);
                }
            }
        }
        _ => {}
    })?;

    Ok(messages)
}

/// `Headers` attribute value for `properties`: `[{}, properties]`
fn encode_headers(properties: &Properties) -> Result<String, SerializationError> {
    serde_json::to_string(&(serde_json::Map::new(), properties))
        .map_err(SerializationError::JsonError)
}

/// Fold a string message attribute into the message properties.
///
/// The `Headers` attribute is expanded from JSON. The `[headers, properties]`
/// pair yields its second element, where an empty list stands for no
/// properties; a bare properties object is accepted too. Other attributes
/// become properties unless already set.
fn apply_message_attribute(message: &mut SqsMessage, name: String, value: String) {
    if name != HEADERS_ATTRIBUTE {
        message.properties.entry(name).or_insert(value);
        return;
    }

    let parsed: Result<serde_json::Value, _> = serde_json::from_str(&value);
    let object = match parsed {
        Ok(serde_json::Value::Object(object)) => Some(object),
        Ok(serde_json::Value::Array(mut items)) if items.len() == 2 => match items.pop() {
            Some(serde_json::Value::Object(object)) => Some(object),
            Some(serde_json::Value::Array(empty)) if empty.is_empty() => {
                Some(serde_json::Map::new())
            }
            _ => None,
        },
        _ => None,
    };

    let Some(object) = object else {
        warn!("Ignoring malformed Headers message attribute");
        return;
    };

    for (key, value) in object {
        let value = match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        message.properties.insert(key, value);
    }
}

/// Map an SQS error response onto [`SqsError`]
fn parse_error_response(xml: &str, status_code: u16) -> SqsError {
    let code = find_text(xml, &["Error", "Code"])
        .ok()
        .flatten()
        .unwrap_or_else(|| "Unknown".to_string());
    let message = find_text(xml, &["Error", "Message"])
        .ok()
        .flatten()
        .unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            SqsError::QueueNotFound(message)
        }
        "InvalidClientTokenId" | "UnrecognizedClientException" | "SignatureDoesNotMatch" => {
            SqsError::Authentication(format!("{}: {}", code, message))
        }
        "InvalidReceiptHandle" | "ReceiptHandleIsInvalid" => SqsError::InvalidReceipt(message),
        _ if status_code == 401 || status_code == 403 => {
            SqsError::Authentication(format!("{}: {}", code, message))
        }
        _ => SqsError::Service { code, message },
    }
}
