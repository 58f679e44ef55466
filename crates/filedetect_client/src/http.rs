//! Signed RPC-over-HTTPS implementation of [`DetectionService`].
//!
//! Every API call is a form-encoded POST to the endpoint root carrying the
//! common parameters (`Action`, `Version`, `AccessKeyId`, nonce, timestamp)
//! plus a `Signature` over all of them. List parameters are flattened as
//! `Name.N` / `Name.N.Field` with 1-based indices. Uploads go straight to the
//! object store as a multipart form using the policy issued by
//! `CreateFileDetectUploadUrl`.

use crate::config::ClientConfig;
use crate::error::{ClientError, RemoteError};
use crate::service::{
    DetectionService, LookupReply, UploadContext, UploadTarget, ACTION_CREATE_DETECT,
    ACTION_CREATE_UPLOAD_URL, ACTION_GET_RESULT,
};
use crate::signing;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use filedetect_protocol::defaults::DEFAULT_CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// `Type` parameter of every detection call: file content detection.
const DETECT_TYPE: &str = "0";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetResultResponse {
    #[serde(default)]
    result_list: Vec<ResultItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultItem {
    /// Absent or null reads as 0 (clean).
    #[serde(default)]
    result: Option<i32>,
    #[serde(default)]
    score: Option<i32>,
    #[serde(default)]
    virus_type: Option<String>,
    #[serde(default)]
    ext: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UploadUrlResponse {
    #[serde(default)]
    upload_url_list: Vec<UploadUrlItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UploadUrlItem {
    #[serde(default)]
    file_exist: bool,
    #[serde(default)]
    public_url: String,
    context: Option<UploadUrlContext>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UploadUrlContext {
    access_id: String,
    policy: String,
    signature: String,
    oss_key: String,
}

#[derive(Debug, Deserialize)]
struct EmptyResponse {}

impl From<ResultItem> for LookupReply {
    fn from(item: ResultItem) -> Self {
        LookupReply {
            result: item.result.unwrap_or(0),
            score: item.score.unwrap_or(0).clamp(0, 100) as u8,
            virus_type: item.virus_type.filter(|s| !s.is_empty()),
            ext_info: item.ext.filter(|s| !s.is_empty()),
        }
    }
}

impl From<UploadUrlItem> for UploadTarget {
    fn from(item: UploadUrlItem) -> Self {
        let context = item
            .context
            .map(|ctx| UploadContext {
                access_id: ctx.access_id,
                policy: ctx.policy,
                signature: ctx.signature,
                object_key: ctx.oss_key,
            })
            .unwrap_or_default();
        UploadTarget {
            file_exists: item.file_exist,
            public_url: item.public_url,
            context,
        }
    }
}

/// Turn a raw response into either the parsed body or a classified error.
fn parse_response<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, RemoteError> {
    if !(200..300).contains(&status) {
        return Err(match serde_json::from_str::<ServiceErrorBody>(body) {
            Ok(err) => RemoteError::from_service_code(&err.code, &err.message),
            Err(_) => RemoteError::api(format!("Http{}", status), body.trim()),
        });
    }
    serde_json::from_str(body)
        .map_err(|e| RemoteError::api("InvalidResponse", format!("unparseable body: {}", e)))
}

/// Content type sent with an upload, by file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("txt") => "text/plain",
        Some("xml") => "application/xml",
        Some("json") => "application/json",
        Some("js") => "application/javascript",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gif") => "image/gif",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct HttpDetectionClient {
    config: ClientConfig,
    base_url: String,
    /// Bounded by connect + read timeouts.
    api: reqwest::Client,
    /// Bounded by connect + upload timeouts.
    uploader: reqwest::Client,
}

impl HttpDetectionClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let user_agent = format!("filedetect/{}", env!("CARGO_PKG_VERSION"));
        let api = reqwest::Client::builder()
            .user_agent(user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .timeout(config.connect_timeout() + config.read_timeout())
            .build()?;
        let uploader = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(config.connect_timeout())
            .timeout(config.connect_timeout() + config.upload_timeout())
            .build()?;

        Ok(Self {
            base_url: config.base_url(),
            config,
            api,
            uploader,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn signed_params(
        &self,
        action: &str,
        extra: Vec<(String, String)>,
    ) -> Result<BTreeMap<String, String>, RemoteError> {
        let mut params: BTreeMap<String, String> = extra.into_iter().collect();
        params.insert("Action".into(), action.into());
        params.insert("Format".into(), "JSON".into());
        params.insert("Version".into(), self.config.api_version.clone());
        params.insert("AccessKeyId".into(), self.config.access_key_id.clone());
        params.insert("SignatureMethod".into(), signing::SIGNATURE_METHOD.into());
        params.insert("SignatureVersion".into(), signing::SIGNATURE_VERSION.into());
        params.insert("SignatureNonce".into(), uuid::Uuid::new_v4().to_string());
        params.insert(
            "Timestamp".into(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        let signature = signing::sign(&self.config.access_key_secret, &params)
            .map_err(|e| RemoteError::api("SignatureError", e.to_string()))?;
        params.insert("Signature".into(), signature);
        Ok(params)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        extra: Vec<(String, String)>,
    ) -> Result<T, RemoteError> {
        let params = self.signed_params(action, extra)?;
        debug!("Calling {} at {}", action, self.base_url);

        let response = self.api.post(&self.base_url).form(&params).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        let parsed = parse_response(status, &body);
        if let Err(ref err) = parsed {
            debug!("{} failed: {}", action, err);
        }
        parsed
    }
}

#[async_trait]
impl DetectionService for HttpDetectionClient {
    async fn lookup(&self, fingerprint: &str) -> Result<LookupReply, RemoteError> {
        let response: GetResultResponse = self
            .call(
                ACTION_GET_RESULT,
                vec![
                    ("HashKeyList.1".into(), fingerprint.into()),
                    ("Type".into(), DETECT_TYPE.into()),
                ],
            )
            .await?;

        response
            .result_list
            .into_iter()
            .next()
            .map(LookupReply::from)
            .ok_or_else(|| RemoteError::api("EmptyResponse", "ResultList is empty"))
    }

    async fn request_upload_target(
        &self,
        fingerprint: &str,
        size: u64,
    ) -> Result<UploadTarget, RemoteError> {
        let response: UploadUrlResponse = self
            .call(
                ACTION_CREATE_UPLOAD_URL,
                vec![
                    ("HashKeyContextList.1.HashKey".into(), fingerprint.into()),
                    ("HashKeyContextList.1.FileSize".into(), size.to_string()),
                    ("Type".into(), DETECT_TYPE.into()),
                ],
            )
            .await?;

        let item = response
            .upload_url_list
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::api("EmptyResponse", "UploadUrlList is empty"))?;
        if item.context.is_none() {
            return Err(RemoteError::api("EmptyResponse", "upload context is missing"));
        }
        Ok(item.into())
    }

    async fn upload(&self, path: &Path, target: &UploadTarget) -> Result<(), RemoteError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            RemoteError::api("ReadFileError", format!("{}: {}", path.display(), e))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(content_type_for(path))?;
        let ctx = &target.context;
        let form = Form::new()
            .text("key", ctx.object_key.clone())
            .text("OSSAccessKeyId", ctx.access_id.clone())
            .text("policy", ctx.policy.clone())
            .text("Signature", ctx.signature.clone())
            .part("file", part);

        debug!("Uploading {} to {}", path.display(), target.public_url);
        let response = self
            .uploader
            .post(&target.public_url)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::api(
                format!("Http{}", status.as_u16()),
                body.trim().to_string(),
            ));
        }
        Ok(())
    }

    async fn trigger_detection(
        &self,
        fingerprint: &str,
        object_key: &str,
    ) -> Result<(), RemoteError> {
        let _: EmptyResponse = self
            .call(
                ACTION_CREATE_DETECT,
                vec![
                    ("HashKey".into(), fingerprint.into()),
                    ("OssKey".into(), object_key.into()),
                    ("Type".into(), DETECT_TYPE.into()),
                ],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_result_list() {
        let body = r#"{"RequestId":"r1","ResultList":[{"HashKey":"abc","Result":1,"Score":85,"VirusType":"Trojan","Ext":""}]}"#;
        let parsed: GetResultResponse = parse_response(200, body).unwrap();
        let reply = LookupReply::from(parsed.result_list.into_iter().next().unwrap());
        assert_eq!(reply, LookupReply::malicious(85, "Trojan"));
    }

    #[test]
    fn test_parse_score_is_clamped() {
        let body = r#"{"ResultList":[{"Result":0,"Score":250}]}"#;
        let parsed: GetResultResponse = parse_response(200, body).unwrap();
        let reply = LookupReply::from(parsed.result_list.into_iter().next().unwrap());
        assert_eq!(reply.score, 100);
    }

    #[test]
    fn test_parse_null_result_and_score_as_clean() {
        let body = r#"{"ResultList":[{"HashKey":"abc","Result":null,"Score":null,"VirusType":null}]}"#;
        let parsed: GetResultResponse = parse_response(200, body).unwrap();
        let reply = LookupReply::from(parsed.result_list.into_iter().next().unwrap());
        assert_eq!(reply, LookupReply::clean());
        assert_eq!(reply.status(), crate::service::LookupStatus::Clean);
    }

    #[test]
    fn test_parse_error_bodies() {
        let not_found = r#"{"Code":"GetResultFail","Message":"no result"}"#;
        let err = parse_response::<GetResultResponse>(400, not_found).unwrap_err();
        assert_eq!(err, RemoteError::NotFound);

        let throttled = r#"{"Code":"Throttling.User","Message":"slow down"}"#;
        let err = parse_response::<GetResultResponse>(400, throttled).unwrap_err();
        assert_eq!(err, RemoteError::RateLimited);

        let err = parse_response::<GetResultResponse>(502, "Bad Gateway").unwrap_err();
        assert_eq!(err, RemoteError::api("Http502", "Bad Gateway"));
    }

    #[test]
    fn test_parse_upload_target() {
        let body = r#"{"UploadUrlList":[{"HashKey":"abc","FileExist":false,
            "PublicUrl":"https://bucket.example/","Context":{"AccessId":"ak",
            "Policy":"p","Signature":"s","OssKey":"tds/abc"}}]}"#;
        let parsed: UploadUrlResponse = parse_response(200, body).unwrap();
        let target = UploadTarget::from(parsed.upload_url_list.into_iter().next().unwrap());
        assert!(!target.file_exists);
        assert_eq!(target.public_url, "https://bucket.example/");
        assert_eq!(target.context.object_key, "tds/abc");
        assert_eq!(target.context.access_id, "ak");
    }

    #[test]
    fn test_content_type_table() {
        assert_eq!(content_type_for(Path::new("index.HTML")), "text/html");
        assert_eq!(content_type_for(Path::new("shell.php")), "application/octet-stream");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_client_requires_credentials() {
        assert!(matches!(
            HttpDetectionClient::new(ClientConfig::default()),
            Err(ClientError::MissingCredentials)
        ));
    }

    #[test]
    fn test_signed_params_carry_common_fields() {
        let client =
            HttpDetectionClient::new(ClientConfig::with_credentials("ak-id", "secret")).unwrap();
        let params = client
            .signed_params(
                ACTION_GET_RESULT,
                vec![("HashKeyList.1".to_string(), "abc".to_string())],
            )
            .unwrap();
        assert_eq!(params["Action"], "GetFileDetectResult");
        assert_eq!(params["AccessKeyId"], "ak-id");
        assert_eq!(params["SignatureMethod"], "HMAC-SHA256");
        assert_eq!(params["HashKeyList.1"], "abc");
        assert!(params["Timestamp"].ends_with('Z'));

        let mut unsigned = params.clone();
        let signature = unsigned.remove("Signature").unwrap();
        assert_eq!(signature, signing::sign("secret", &unsigned).unwrap());
    }
}
