//! Sysmon XML: configuration files and exported Sysmon event logs.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Utc};
use quick_xml::events::Event as XmlToken;
use quick_xml::Reader;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::parser::cache::HeaderCache;
use crate::parser::traits::{extension_lower, source_label, EventParser, ParseError};
use crate::parser::CANCEL_CHECK_INTERVAL;

use super::xml_event::{stream_win_events, WinEventRecord};

pub const CONFIG_SETTINGS: &str = "SysmonConfig:Settings";

/// Sysmon event id → `Sysmon:<SubKind>`.
pub fn sysmon_event_type(event_id: i64) -> String {
    let name = match event_id {
        1 => "ProcessCreate",
        2 => "FileCreateTime",
        3 => "NetworkConnect",
        4 => "ServiceStateChange",
        5 => "ProcessTerminate",
        6 => "DriverLoad",
        7 => "ImageLoad",
        8 => "CreateRemoteThread",
        9 => "RawAccessRead",
        10 => "ProcessAccess",
        11 => "FileCreate",
        12 => "RegistryCreate",
        13 => "RegistrySetValue",
        14 => "RegistryRename",
        15 => "FileCreateStreamHash",
        16 => "ConfigChange",
        17 => "PipeCreated",
        18 => "PipeConnected",
        19 => "WmiFilter",
        20 => "WmiConsumer",
        21 => "WmiBinding",
        22 => "DnsQuery",
        23 => "FileDelete",
        24 => "ClipboardChange",
        25 => "ProcessTampering",
        26 => "FileDeleteDetected",
        27 => "FileBlockExecutable",
        28 => "FileBlockShredding",
        255 => "Error",
        other => return format!("Sysmon:Event{other}"),
    };
    format!("Sysmon:{name}")
}

/// EventData fields worth surfacing in the one-line message.
const KEY_FIELDS: &[&str] = &[
    "Image", "CommandLine", "ParentImage", "ParentCommandLine",
    "TargetFilename", "DestinationIp", "DestinationPort", "DestinationHostname",
    "SourceIp", "SourcePort", "Hashes", "TargetObject", "QueryName",
    "QueryResults", "Signed", "Signature", "User", "ProcessGuid", "ProcessId",
    "SourceProcessGuid", "TargetProcessGuid",
];

pub struct SysmonXmlParser;

impl SysmonXmlParser {
    fn convert_event(&self, record: &WinEventRecord, source: &str, path: &str) -> Event {
        let mut parts = Vec::new();
        for (name, value) in &record.event_data {
            if !KEY_FIELDS.contains(&name.as_str()) || value.is_empty() {
                continue;
            }
            let mut value = value.trim().to_string();
            if value.len() > 150 {
                value.truncate(147);
                value.push_str("...");
            }
            parts.push(format!("{name}={value}"));
        }
        let message = if parts.is_empty() {
            format!("Sysmon Event ID: {}", record.event_id)
        } else {
            parts.join(" | ")
        };

        Event::new(
            record.timestamp(),
            source,
            sysmon_event_type(record.event_id),
            record.event_id,
            record.data("User"),
            record.computer.clone(),
            message,
            path,
        )
    }

    fn parse_events(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let mut events = Vec::new();
        let errors = stream_win_events(path, cancel, |record| {
            if record.provider.contains("Sysmon") {
                events.push(self.convert_event(&record, &source, &path_str));
            }
        })?;

        info!(file = %path.display(), events = events.len(), errors, "parsed Sysmon event XML");
        Ok(events)
    }

    fn parse_config(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        // The registration instant is not recorded inside the config;
        // the file's modification time is the best available anchor.
        let ts = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let file = File::open(path).map_err(|e| ParseError::open(path, e))?;
        let mut reader = Reader::from_reader(BufReader::new(file));

        let mut events = Vec::new();
        let mut buf = Vec::new();
        let mut tokens = 0usize;

        let mut schema_version = String::new();
        let mut hashing = String::new();
        let mut in_hash_algorithms = false;
        let mut in_event_filtering = false;
        let mut group_name = String::new();

        // (element name, onmatch, collected conditions)
        let mut rule: Option<(String, String, Vec<String>)> = None;
        let mut condition: Option<(String, String)> = None;
        let mut rule_id: i64 = 0;

        loop {
            tokens += 1;
            if tokens % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }

            match reader.read_event_into(&mut buf) {
                Ok(XmlToken::Start(element)) | Ok(XmlToken::Empty(element)) => {
                    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                    let attr = |key: &[u8]| {
                        element
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == key)
                            .and_then(|a| a.unescape_value().ok())
                            .map(|v| v.into_owned())
                    };

                    match name.as_str() {
                        "Sysmon" => {
                            schema_version = attr(b"schemaversion").unwrap_or_default();
                        }
                        "HashAlgorithms" => in_hash_algorithms = true,
                        "EventFiltering" => in_event_filtering = true,
                        "RuleGroup" => {
                            group_name = attr(b"name").unwrap_or_default();
                        }
                        _ if in_event_filtering && rule.is_none() => {
                            let onmatch = attr(b"onmatch").unwrap_or_default();
                            rule = Some((name, onmatch, Vec::new()));
                        }
                        _ if rule.is_some() => {
                            condition = Some((name, attr(b"condition").unwrap_or_default()));
                        }
                        _ => {}
                    }
                }
                Ok(XmlToken::Text(text)) => {
                    let value = text
                        .unescape()
                        .map(|v| v.trim().to_string())
                        .unwrap_or_default();
                    if value.is_empty() {
                        buf.clear();
                        continue;
                    }
                    if in_hash_algorithms && hashing.is_empty() {
                        hashing = value;
                    } else if let (Some((_, _, conditions)), Some((cond_name, cond_op))) =
                        (rule.as_mut(), condition.as_ref())
                    {
                        let mut entry = cond_name.clone();
                        if !cond_op.is_empty() {
                            entry.push_str(&format!("[{cond_op}]"));
                        }
                        entry.push_str(&format!("={value}"));
                        conditions.push(entry);
                    }
                }
                Ok(XmlToken::End(element)) => {
                    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                    match name.as_str() {
                        "HashAlgorithms" => in_hash_algorithms = false,
                        "EventFiltering" => in_event_filtering = false,
                        "RuleGroup" => group_name.clear(),
                        _ => {
                            if let Some((cond_name, _)) = condition.as_ref() {
                                if *cond_name == name {
                                    condition = None;
                                    buf.clear();
                                    continue;
                                }
                            }
                            if let Some((rule_name, onmatch, conditions)) = rule.take() {
                                if rule_name == name {
                                    rule_id += 1;
                                    events.push(config_rule_event(
                                        ts,
                                        &source,
                                        &path_str,
                                        &rule_name,
                                        &group_name,
                                        &onmatch,
                                        &conditions,
                                        rule_id,
                                    ));
                                } else {
                                    rule = Some((rule_name, onmatch, conditions));
                                }
                            }
                        }
                    }
                }
                Ok(XmlToken::Eof) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "stopping Sysmon config stream");
                    break;
                }
            }
            buf.clear();
        }

        let settings = Event::new(
            ts,
            source.clone(),
            CONFIG_SETTINGS,
            0,
            "",
            "",
            format!(
                "Sysmon Configuration | SchemaVersion: {schema_version} | HashAlgorithms: {hashing}"
            ),
            path_str.clone(),
        );
        events.insert(0, settings);

        info!(file = %path.display(), rules = rule_id, "parsed Sysmon config XML");
        Ok(events)
    }
}

#[allow(clippy::too_many_arguments)]
fn config_rule_event(
    ts: DateTime<Utc>,
    source: &str,
    path: &str,
    rule_name: &str,
    group_name: &str,
    onmatch: &str,
    conditions: &[String],
    rule_id: i64,
) -> Event {
    let mut parts = Vec::new();
    if !group_name.is_empty() {
        parts.push(format!("RuleGroup: {group_name}"));
    }
    parts.push(format!("OnMatch: {onmatch}"));
    parts.extend(conditions.iter().cloned());

    Event::new(
        ts,
        source,
        format!("SysmonConfig:{rule_name}"),
        rule_id,
        "",
        "",
        parts.join(" | "),
        path,
    )
}

impl EventParser for SysmonXmlParser {
    fn can_parse(&self, path: &Path, cache: &HeaderCache) -> bool {
        if extension_lower(path) != "xml" {
            return false;
        }
        let config = cache.header_contains(path, &["<Sysmon"])
            && (cache.header_contains(path, &["schemaversion"])
                || cache.header_contains(path, &["<EventFiltering"]));
        config || cache.header_contains(path, &["Microsoft-Windows-Sysmon"])
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let cache = HeaderCache::new();
        let is_config = cache.header_contains(path, &["<Sysmon"])
            && cache.header_contains(path, &["<EventFiltering"]);
        if is_config {
            self.parse_config(path, cancel)
        } else if cache.header_contains(path, &["Microsoft-Windows-Sysmon"])
            || cache.header_contains(path, &["<Event"])
        {
            self.parse_events(path, cancel)
        } else {
            Err(ParseError::malformed(
                "Sysmon XML",
                path,
                "unable to determine Sysmon XML type",
            ))
        }
    }

    fn name(&self) -> &'static str {
        "sysmon-xml"
    }
}
