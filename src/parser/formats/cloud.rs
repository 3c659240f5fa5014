//! Cloud audit exports: AWS CloudTrail, Azure Activity Log, GCP Cloud
//! Audit Log. All three accept a bare JSON array, a wrapper object
//! (`Records` / `value` / `entries`), or line-delimited JSON.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::info;

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::parser::cache::HeaderCache;
use crate::parser::lines::LineIter;
use crate::parser::timestamp;
use crate::parser::traits::{base_name_lower, extension_lower, source_label, EventParser, ParseError};
use crate::parser::CANCEL_CHECK_INTERVAL;

pub const CLOUDTRAIL: &str = "CloudTrail";
pub const AZURE_ACTIVITY: &str = "AzureActivity";
pub const GCP_AUDIT: &str = "GCPAudit";

fn json_extension(path: &Path) -> bool {
    matches!(extension_lower(path).as_str(), "json" | "jsonl")
}

fn string_field<'a>(object: &'a Map<String, Value>, key: &str) -> &'a str {
    object.get(key).and_then(Value::as_str).unwrap_or("")
}

/// The container shapes a cloud export may arrive in.
enum Container {
    Array(Vec<Map<String, Value>>),
    Lines,
}

/// Probe the first JSON token and decode the matching container shape.
/// `wrapper_key` names the array inside a wrapper object.
fn decode_container(
    path: &Path,
    kind: &'static str,
    wrapper_key: &str,
) -> Result<Container, ParseError> {
    let file = File::open(path).map_err(|e| ParseError::open(path, e))?;
    let mut reader = BufReader::new(file);

    let first = loop {
        let buf = reader.fill_buf().map_err(|e| ParseError::io(path, e))?;
        if buf.is_empty() {
            return Ok(Container::Array(Vec::new()));
        }
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(pos) => break buf[pos],
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    };

    match first {
        b'[' => {
            let records: Vec<Map<String, Value>> = serde_json::from_reader(reader)
                .map_err(|e| ParseError::malformed(kind, path, e.to_string()))?;
            Ok(Container::Array(records))
        }
        b'{' => {
            // One object (wrapper or single event) and line-delimited
            // JSON both start with `{`; streaming the top-level values
            // handles either without rereading the file.
            let mut objects: Vec<Map<String, Value>> = Vec::new();
            for value in serde_json::Deserializer::from_reader(reader).into_iter::<Value>() {
                match value {
                    Ok(Value::Object(object)) => objects.push(object),
                    Ok(_) => {}
                    Err(e) => {
                        if objects.is_empty() {
                            return Err(ParseError::malformed(kind, path, e.to_string()));
                        }
                        // A torn trailing record ends the stream.
                        break;
                    }
                }
            }

            if objects.len() == 1 {
                let mut object = objects.remove(0);
                return match object.remove(wrapper_key) {
                    Some(Value::Array(items)) => {
                        let records = items
                            .into_iter()
                            .filter_map(|item| match item {
                                Value::Object(record) => Some(record),
                                _ => None,
                            })
                            .collect();
                        Ok(Container::Array(records))
                    }
                    // No wrapper array: the object is a single event.
                    _ => Ok(Container::Array(vec![object])),
                };
            }
            Ok(Container::Array(objects))
        }
        _ => Ok(Container::Lines),
    }
}

/// Shared driver: decode the container and feed each record through the
/// per-provider conversion.
fn parse_cloud_file(
    path: &Path,
    cancel: &CancelToken,
    kind: &'static str,
    wrapper_key: &str,
    convert: impl Fn(&Map<String, Value>, &str, &str, i64) -> Event,
) -> Result<Vec<Event>, ParseError> {
    let source = source_label(path);
    let path_str = path.to_string_lossy().into_owned();
    let mut events = Vec::new();

    match decode_container(path, kind, wrapper_key)? {
        Container::Array(records) => {
            for (index, record) in records.iter().enumerate() {
                if index % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                    return Err(ParseError::Cancelled(path.to_path_buf()));
                }
                events.push(convert(record, &source, &path_str, index as i64 + 1));
            }
        }
        Container::Lines => {
            let mut line_num: i64 = 0;
            for line in LineIter::open(path).map_err(|e| ParseError::open(path, e))? {
                let line = line.map_err(|e| ParseError::io(path, e))?;
                line_num += 1;
                if line_num as usize % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                    return Err(ParseError::Cancelled(path.to_path_buf()));
                }
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                // A malformed JSONL row is dropped, not fatal.
                if let Ok(Value::Object(record)) = serde_json::from_str::<Value>(line) {
                    events.push(convert(&record, &source, &path_str, line_num));
                }
            }
        }
    }

    info!(file = %path.display(), events = events.len(), kind, "parsed cloud audit log");
    Ok(events)
}

// ── AWS CloudTrail ──────────────────────────────────────────────

pub struct CloudTrailParser;

fn cloudtrail_event(
    record: &Map<String, Value>,
    source: &str,
    path: &str,
    event_id: i64,
) -> Event {
    let ts = string_field(record, "eventTime");
    let ts = timestamp::parse_flexible(ts).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let event_source = string_field(record, "eventSource");
    let event_name = string_field(record, "eventName");
    let event_type = if event_source.is_empty() && event_name.is_empty() {
        CLOUDTRAIL.to_string()
    } else {
        format!("{CLOUDTRAIL}:{event_source}:{event_name}")
    };

    let user = record
        .get("userIdentity")
        .and_then(Value::as_object)
        .map(|identity| {
            let name = string_field(identity, "userName");
            if !name.is_empty() {
                return name.to_string();
            }
            let arn = string_field(identity, "arn");
            if !arn.is_empty() {
                return arn.to_string();
            }
            string_field(identity, "principalId").to_string()
        })
        .unwrap_or_default();

    let host = string_field(record, "sourceIPAddress");

    let mut parts = Vec::new();
    if !event_name.is_empty() {
        parts.push(format!("Action: {event_name}"));
    }
    if !event_source.is_empty() {
        parts.push(format!("Service: {event_source}"));
    }
    let region = string_field(record, "awsRegion");
    if !region.is_empty() {
        parts.push(format!("Region: {region}"));
    }
    if !host.is_empty() {
        parts.push(format!("SourceIP: {host}"));
    }
    let error_code = string_field(record, "errorCode");
    if !error_code.is_empty() {
        parts.push(format!("Error: {error_code}"));
    }
    let error_message = string_field(record, "errorMessage");
    if !error_message.is_empty() {
        parts.push(format!("ErrorMsg: {error_message}"));
    }

    Event::new(ts, source, event_type, event_id, user, host, parts.join(" | "), path)
}

impl EventParser for CloudTrailParser {
    fn can_parse(&self, path: &Path, cache: &HeaderCache) -> bool {
        if base_name_lower(path).contains("cloudtrail") {
            return true;
        }
        json_extension(path)
            && cache.header_contains(
                path,
                &["\"eventSource\"", "\"eventName\"", "\"awsRegion\""],
            )
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        parse_cloud_file(path, cancel, "CloudTrail", "Records", cloudtrail_event)
    }

    fn name(&self) -> &'static str {
        "cloudtrail"
    }
}

// ── Azure Activity Log ──────────────────────────────────────────

pub struct AzureActivityParser;

fn azure_event(record: &Map<String, Value>, source: &str, path: &str, event_id: i64) -> Event {
    let ts = ["time", "eventTimestamp", "submissionTimestamp"]
        .iter()
        .map(|key| string_field(record, key))
        .filter(|v| !v.is_empty())
        .find_map(timestamp::parse_flexible)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let operation = string_field(record, "operationName");
    let event_type = if operation.is_empty() {
        AZURE_ACTIVITY.to_string()
    } else {
        format!("Azure:{operation}")
    };

    let mut user = record
        .get("identity")
        .and_then(Value::as_object)
        .and_then(|identity| identity.get("claims"))
        .and_then(Value::as_object)
        .map(|claims| {
            let name = string_field(claims, "name");
            if !name.is_empty() {
                return name.to_string();
            }
            string_field(
                claims,
                "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/upn",
            )
            .to_string()
        })
        .unwrap_or_default();
    if user.is_empty() {
        user = string_field(record, "caller").to_string();
    }

    let host = string_field(record, "callerIpAddress");

    let mut parts = Vec::new();
    if !operation.is_empty() {
        parts.push(format!("Operation: {operation}"));
    }
    let category = string_field(record, "category");
    if !category.is_empty() {
        parts.push(format!("Category: {category}"));
    }
    let mut resource = string_field(record, "resourceId").to_string();
    if !resource.is_empty() {
        if resource.len() > 100 {
            resource = format!("...{}", &resource[resource.len() - 97..]);
        }
        parts.push(format!("Resource: {resource}"));
    }
    let result = string_field(record, "resultType");
    if !result.is_empty() {
        parts.push(format!("Result: {result}"));
    }
    if !host.is_empty() {
        parts.push(format!("CallerIP: {host}"));
    }

    Event::new(ts, source, event_type, event_id, user, host, parts.join(" | "), path)
}

impl EventParser for AzureActivityParser {
    fn can_parse(&self, path: &Path, cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        if base.contains("azure") || base.contains("activitylog") {
            return true;
        }
        json_extension(path)
            && cache.header_contains(path, &["\"resourceId\"", "\"operationName\""])
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        parse_cloud_file(path, cancel, "Azure Activity Log", "value", azure_event)
    }

    fn name(&self) -> &'static str {
        "azure-activity"
    }
}

// ── GCP Cloud Audit Log ─────────────────────────────────────────

pub struct GcpAuditParser;

fn gcp_event(record: &Map<String, Value>, source: &str, path: &str, event_id: i64) -> Event {
    let ts = ["timestamp", "receiveTimestamp"]
        .iter()
        .map(|key| string_field(record, key))
        .filter(|v| !v.is_empty())
        .find_map(timestamp::parse_flexible)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let payload = record.get("protoPayload").and_then(Value::as_object);
    let method = payload.map(|p| string_field(p, "methodName")).unwrap_or("");
    let service = payload.map(|p| string_field(p, "serviceName")).unwrap_or("");

    let user = payload
        .and_then(|p| p.get("authenticationInfo"))
        .and_then(Value::as_object)
        .map(|auth| string_field(auth, "principalEmail").to_string())
        .unwrap_or_default();

    let caller_ip = payload
        .and_then(|p| p.get("requestMetadata"))
        .and_then(Value::as_object)
        .map(|meta| string_field(meta, "callerIp").to_string())
        .unwrap_or_default();

    let event_type = if service.is_empty() && method.is_empty() {
        GCP_AUDIT.to_string()
    } else {
        format!("GCP:{service}:{method}")
    };

    let resource = record.get("resource").and_then(Value::as_object);
    let resource_type = resource.map(|r| string_field(r, "type")).unwrap_or("");
    let resource_name = resource
        .and_then(|r| r.get("labels"))
        .and_then(Value::as_object)
        .map(|labels| {
            ["instance_id", "bucket_name", "project_id", "cluster_name"]
                .iter()
                .map(|key| string_field(labels, key))
                .find(|v| !v.is_empty())
                .unwrap_or("")
                .to_string()
        })
        .unwrap_or_default();

    let mut parts = Vec::new();
    if !method.is_empty() {
        parts.push(format!("Method: {method}"));
    }
    if !service.is_empty() {
        parts.push(format!("Service: {service}"));
    }
    if !resource_type.is_empty() {
        parts.push(format!("ResourceType: {resource_type}"));
    }
    if !resource_name.is_empty() {
        parts.push(format!("Resource: {resource_name}"));
    }
    if !caller_ip.is_empty() {
        parts.push(format!("CallerIP: {caller_ip}"));
    }
    let severity = string_field(record, "severity");
    if !severity.is_empty() {
        parts.push(format!("Severity: {severity}"));
    }

    Event::new(
        ts,
        source,
        event_type,
        event_id,
        user,
        caller_ip,
        parts.join(" | "),
        path,
    )
}

impl EventParser for GcpAuditParser {
    fn can_parse(&self, path: &Path, cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        if base.contains("gcp")
            || base.contains("cloudaudit")
            || base.contains("google")
            || base.contains("stackdriver")
        {
            return true;
        }
        json_extension(path)
            && (cache.header_contains(path, &["\"protoPayload\""])
                || cache.header_contains(path, &["\"methodName\"", "\"serviceName\""]))
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        parse_cloud_file(path, cancel, "GCP Audit Log", "entries", gcp_event)
    }

    fn name(&self) -> &'static str {
        "gcp-audit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    const CLOUDTRAIL_RECORD: &str = r#"{"eventTime":"2023-04-21T15:30:45Z","eventSource":"s3.amazonaws.com","eventName":"PutObject","awsRegion":"us-east-1","sourceIPAddress":"198.51.100.7","userIdentity":{"userName":"deploy-bot"}}"#;

    #[test]
    fn test_cloudtrail_wrapper_records() {
        let dir = TempDir::new().unwrap();
        let body = format!(r#"{{"Records":[{CLOUDTRAIL_RECORD}]}}"#);
        let path = fixture(&dir, "cloudtrail-export.json", &body);
        let events = CloudTrailParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_type, "CloudTrail:s3.amazonaws.com:PutObject");
        assert_eq!(event.user, "deploy-bot");
        assert_eq!(event.host, "198.51.100.7");
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2023, 4, 21, 15, 30, 45).unwrap()
        );
        assert!(event.message.contains("Action: PutObject"));
        assert!(event.message.contains("Region: us-east-1"));
    }

    #[test]
    fn test_cloudtrail_bare_array() {
        let dir = TempDir::new().unwrap();
        let body = format!("[{CLOUDTRAIL_RECORD}]");
        let path = fixture(&dir, "trail.json", &body);
        let events = CloudTrailParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, 1);
    }

    #[test]
    fn test_cloudtrail_content_detection() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "unknown.json", CLOUDTRAIL_RECORD);
        let cache = HeaderCache::new();
        assert!(CloudTrailParser.can_parse(&path, &cache));

        let other = fixture(&dir, "plain.json", r#"{"hello":"world"}"#);
        assert!(!CloudTrailParser.can_parse(&other, &cache));
    }

    #[test]
    fn test_azure_value_wrapper() {
        let dir = TempDir::new().unwrap();
        let body = r#"{"value":[{"time":"2023-04-21T15:30:45Z","operationName":"Microsoft.Compute/virtualMachines/start","category":"Administrative","caller":"ops@example.com","callerIpAddress":"203.0.113.5","resourceId":"/subscriptions/1/vm2","resultType":"Success"}]}"#;
        let path = fixture(&dir, "azure-activity.json", body);
        let events = AzureActivityParser.parse(&path, &CancelToken::new()).unwrap();
        let event = &events[0];
        assert_eq!(event.event_type, "Azure:Microsoft.Compute/virtualMachines/start");
        assert_eq!(event.user, "ops@example.com");
        assert_eq!(event.host, "203.0.113.5");
        assert!(event.message.contains("Result: Success"));
    }

    #[test]
    fn test_gcp_jsonl() {
        let dir = TempDir::new().unwrap();
        let row = r#"{"timestamp":"2023-04-21T15:30:45Z","protoPayload":{"methodName":"storage.objects.get","serviceName":"storage.googleapis.com","authenticationInfo":{"principalEmail":"svc@proj.iam"},"requestMetadata":{"callerIp":"198.51.100.9"}},"severity":"INFO"}"#;
        let body = format!("{row}\n{row}\n");
        let path = fixture(&dir, "gcp-audit.jsonl", &body);
        let events = GcpAuditParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 2);
        let event = &events[0];
        assert_eq!(event.event_type, "GCP:storage.googleapis.com:storage.objects.get");
        assert_eq!(event.user, "svc@proj.iam");
        assert_eq!(event.host, "198.51.100.9");
        assert!(event.message.contains("Severity: INFO"));
    }

    #[test]
    fn test_empty_file_is_empty_batch() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "cloudtrail-empty.json", "");
        let events = CloudTrailParser.parse(&path, &CancelToken::new()).unwrap();
        assert!(events.is_empty());
    }
}
