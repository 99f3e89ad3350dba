use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::client::{ClientError, InvokeClient};
use crate::sigv4::{sign_request, CanonicalRequest, SigningKeys};

const LAMBDA_API_VERSION: &str = "2015-03-31";
const LOGS_TARGET_PREFIX: &str = "Logs_20140328";
const LOGS_CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const MAX_LOG_PAGES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LambdaClientConfig {
    pub region: String,
    pub credentials: AwsCredentials,
    /// Overrides `https://lambda.<region>.amazonaws.com`.
    pub lambda_endpoint: Option<String>,
    /// Overrides `https://logs.<region>.amazonaws.com`.
    pub logs_endpoint: Option<String>,
    pub request_timeout_ms: u64,
}

/// Lambda invoke API plus CloudWatch Logs reads, signed with SigV4.
#[derive(Debug, Clone)]
pub struct LambdaClient {
    client: reqwest::Client,
    config: LambdaClientConfig,
    lambda_base: Url,
    logs_base: Url,
}

struct SignedCall<'a> {
    service: &'a str,
    base: &'a Url,
    method: Method,
    path: &'a str,
    query: &'a [(&'a str, &'a str)],
    headers: &'a [(&'a str, &'a str)],
    body: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsResponse {
    #[serde(default)]
    log_streams: Vec<LogStream>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogStream {
    log_stream_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetLogEventsResponse {
    #[serde(default)]
    events: Vec<LogEvent>,
    #[serde(default)]
    next_forward_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogEvent {
    #[serde(default)]
    message: String,
}

impl LambdaClient {
    pub fn new(config: LambdaClientConfig) -> Result<Self, ClientError> {
        if config.credentials.access_key_id.trim().is_empty()
            || config.credentials.secret_access_key.trim().is_empty()
        {
            return Err(ClientError::Config("missing AWS credentials".to_string()));
        }
        let lambda_base = parse_endpoint(
            config.lambda_endpoint.as_deref(),
            &format!("https://lambda.{}.amazonaws.com", config.region),
        )?;
        let logs_base = parse_endpoint(
            config.logs_endpoint.as_deref(),
            &format!("https://logs.{}.amazonaws.com", config.region),
        )?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            config,
            lambda_base,
            logs_base,
        })
    }

    fn log_group_name(function_name: &str) -> String {
        format!("/aws/lambda/{function_name}")
    }

    async fn send_signed(&self, call: SignedCall<'_>) -> Result<reqwest::Response, ClientError> {
        let host = host_header(call.base)?;
        let keys = SigningKeys {
            access_key_id: &self.config.credentials.access_key_id,
            secret_access_key: &self.config.credentials.secret_access_key,
            session_token: self.config.credentials.session_token.as_deref(),
            region: &self.config.region,
            service: call.service,
        };
        let signed = sign_request(
            &keys,
            &CanonicalRequest {
                method: call.method.as_str(),
                host: &host,
                path: call.path,
                query: call.query,
                headers: call.headers,
                body: &call.body,
            },
            chrono::Utc::now(),
        )?;

        let mut url = call.base.clone();
        url.set_path(call.path);
        if !call.query.is_empty() {
            url.query_pairs_mut().extend_pairs(call.query.iter());
        }
        let mut builder = self.client.request(call.method, url).body(call.body);
        for (name, value) in signed {
            builder = builder.header(name, value);
        }
        Ok(builder.send().await?)
    }

    async fn logs_call(&self, action: &str, body: Value) -> Result<Value, ClientError> {
        let target = format!("{LOGS_TARGET_PREFIX}.{action}");
        let response = self
            .send_signed(SignedCall {
                service: "logs",
                base: &self.logs_base,
                method: Method::POST,
                path: "/",
                query: &[],
                headers: &[
                    (CONTENT_TYPE.as_str(), LOGS_CONTENT_TYPE),
                    ("x-amz-target", target.as_str()),
                ],
                body: serde_json::to_vec(&body)?,
            })
            .await?;
        let status = response.status();
        let raw = response.text().await?;
        if status.is_success() {
            return Ok(serde_json::from_str(&raw)?);
        }
        if raw.contains("ResourceNotFoundException") {
            return Err(ClientError::NotFound(format!("{action}: {raw}")));
        }
        Err(ClientError::HttpStatus {
            status: status.as_u16(),
            body: raw,
        })
    }
}

#[async_trait]
impl InvokeClient for LambdaClient {
    async fn ping(&self) -> Result<(), ClientError> {
        let path = format!("/{LAMBDA_API_VERSION}/functions/");
        let response = self
            .send_signed(SignedCall {
                service: "lambda",
                base: &self.lambda_base,
                method: Method::GET,
                path: &path,
                query: &[("MaxItems", "1")],
                headers: &[],
                body: Vec::new(),
            })
            .await?;
        ensure_success(response).await?;
        self.logs_call("DescribeLogGroups", json!({ "limit": 1 }))
            .await
            .map(|_| ())
    }

    async fn invoke_async(&self, function_name: &str, payload: &str) -> Result<(), ClientError> {
        let path = format!("/{LAMBDA_API_VERSION}/functions/{function_name}/invocations");
        let response = self
            .send_signed(SignedCall {
                service: "lambda",
                base: &self.lambda_base,
                method: Method::POST,
                path: &path,
                query: &[],
                headers: &[("x-amz-invocation-type", "Event")],
                body: payload.as_bytes().to_vec(),
            })
            .await?;
        ensure_success(response).await?;
        debug!(function = %function_name, "lambda event invocation accepted");
        Ok(())
    }

    async fn fetch_recent_log(&self, function_name: &str) -> Result<String, ClientError> {
        let group = Self::log_group_name(function_name);
        let streams: DescribeLogStreamsResponse = serde_json::from_value(
            self.logs_call(
                "DescribeLogStreams",
                json!({
                    "logGroupName": group,
                    "orderBy": "LastEventTime",
                    "descending": true,
                    "limit": 1
                }),
            )
            .await?,
        )?;
        let Some(stream) = streams.log_streams.into_iter().next() else {
            return Err(ClientError::NotFound(format!("no log streams in {group}")));
        };

        let mut output = String::new();
        let mut token: Option<String> = None;
        for _ in 0..MAX_LOG_PAGES {
            let mut request = json!({
                "logGroupName": group,
                "logStreamName": stream.log_stream_name,
                "startFromHead": true
            });
            if let Some(token) = token.as_deref() {
                request["nextToken"] = json!(token);
            }
            let page: GetLogEventsResponse =
                serde_json::from_value(self.logs_call("GetLogEvents", request).await?)?;
            let exhausted = page.events.is_empty() || page.next_forward_token == token;
            for event in page.events {
                output.push_str(&event.message);
                if !event.message.ends_with('\n') {
                    output.push('\n');
                }
            }
            if exhausted {
                break;
            }
            token = page.next_forward_token;
        }
        Ok(output)
    }
}

fn parse_endpoint(configured: Option<&str>, default: &str) -> Result<Url, ClientError> {
    let raw = configured.unwrap_or(default).trim_end_matches('/');
    Url::parse(raw).map_err(|error| ClientError::Config(format!("invalid endpoint {raw}: {error}")))
}

fn host_header(base: &Url) -> Result<String, ClientError> {
    let host = base
        .host_str()
        .ok_or_else(|| ClientError::Config(format!("endpoint {base} has no host")))?;
    Ok(match base.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

async fn ensure_success(response: reqwest::Response) -> Result<(), ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    if status.as_u16() == 404 {
        return Err(ClientError::NotFound(body));
    }
    Err(ClientError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}
