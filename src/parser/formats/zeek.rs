//! Zeek (formerly Bro) tab-separated network logs.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::parser::cache::HeaderCache;
use crate::parser::lines::LineIter;
use crate::parser::timestamp;
use crate::parser::traits::{base_name_lower, source_label, EventParser, ParseError};
use crate::parser::CANCEL_CHECK_INTERVAL;

const KNOWN_LOGS: &[&str] = &[
    "conn.log", "dns.log", "http.log", "ssl.log", "files.log",
    "x509.log", "dhcp.log", "ssh.log", "smtp.log", "ftp.log",
    "notice.log", "weird.log", "dpd.log", "known_hosts.log",
    "known_services.log", "software.log", "pe.log", "ntp.log",
    "rdp.log", "smb_mapping.log", "smb_files.log", "dce_rpc.log",
    "ntlm.log", "kerberos.log", "sip.log", "snmp.log", "tunnel.log",
];

/// `#path` value → event type.
fn event_type_for(log_path: &str) -> String {
    let name = match log_path {
        "conn" => "ZeekConnection",
        "dns" => "ZeekDNS",
        "http" => "ZeekHTTP",
        "ssl" => "ZeekSSL",
        "files" => "ZeekFiles",
        "x509" => "ZeekX509",
        "dhcp" => "ZeekDHCP",
        "ssh" => "ZeekSSH",
        "smtp" => "ZeekSMTP",
        "ftp" => "ZeekFTP",
        "notice" => "ZeekNotice",
        "weird" => "ZeekWeird",
        "dpd" => "ZeekDPD",
        "known_hosts" => "ZeekKnownHosts",
        "known_services" => "ZeekKnownServices",
        "software" => "ZeekSoftware",
        "pe" => "ZeekPE",
        "ntp" => "ZeekNTP",
        "rdp" => "ZeekRDP",
        "smb_mapping" => "ZeekSMBMapping",
        "smb_files" => "ZeekSMBFiles",
        "dce_rpc" => "ZeekDCERPC",
        "ntlm" => "ZeekNTLM",
        "kerberos" => "ZeekKerberos",
        "sip" => "ZeekSIP",
        "snmp" => "ZeekSNMP",
        "tunnel" => "ZeekTunnel",
        _ => "ZeekLog",
    };
    name.to_string()
}

/// Header directive state accumulated while streaming a Zeek log.
struct ZeekHeader {
    separator: String,
    fields: Vec<String>,
    log_path: String,
    empty_field: String,
    unset_field: String,
}

impl Default for ZeekHeader {
    fn default() -> Self {
        Self {
            separator: "\t".to_string(),
            fields: Vec::new(),
            log_path: String::new(),
            empty_field: "(empty)".to_string(),
            unset_field: "-".to_string(),
        }
    }
}

impl ZeekHeader {
    fn consume(&mut self, line: &str) {
        if let Some(value) = line.strip_prefix("#separator ") {
            self.separator = unescape_separator(value);
        } else if let Some(rest) = line.strip_prefix("#fields") {
            self.fields = rest
                .split(self.separator.as_str())
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
        } else if let Some(rest) = line.strip_prefix("#path") {
            if let Some(value) = rest.split(self.separator.as_str()).nth(1) {
                self.log_path = value.to_string();
            }
        } else if let Some(rest) = line.strip_prefix("#empty_field") {
            if let Some(value) = rest.split(self.separator.as_str()).nth(1) {
                self.empty_field = value.to_string();
            }
        } else if let Some(rest) = line.strip_prefix("#unset_field") {
            if let Some(value) = rest.split(self.separator.as_str()).nth(1) {
                self.unset_field = value.to_string();
            }
        }
        // #set_separator, #open, #close, #types are not needed.
    }
}

/// Zeek writes the separator hex-escaped, e.g. `\x09`.
fn unescape_separator(raw: &str) -> String {
    if let Some(hex) = raw.strip_prefix("\\x") {
        if hex.len() >= 2 {
            if let Ok(value) = u8::from_str_radix(&hex[..2], 16) {
                return (value as char).to_string();
            }
        }
    }
    raw.to_string()
}

pub struct ZeekParser;

impl EventParser for ZeekParser {
    fn can_parse(&self, path: &Path, cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        let dir = path
            .parent()
            .map(|p| p.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if (dir.contains("zeek") || dir.contains("bro")) && base.ends_with(".log") {
            return true;
        }
        if KNOWN_LOGS.contains(&base.as_str()) {
            return true;
        }
        if base.ends_with(".log") {
            // Directive header within the first lines settles it.
            let header = cache.header(path);
            let mut has_separator = false;
            let mut has_fields = false;
            for line in header.iter().take(15) {
                if line.starts_with("#separator") {
                    has_separator = true;
                }
                if line.starts_with("#fields") {
                    has_fields = true;
                }
                if has_separator && has_fields {
                    return true;
                }
            }
        }
        false
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let mut header = ZeekHeader::default();
        let mut events = Vec::new();
        let mut line_num: usize = 0;
        let mut record_num: i64 = 0;

        for line in LineIter::open(path).map_err(|e| ParseError::open(path, e))? {
            let line = line.map_err(|e| ParseError::io(path, e))?;
            line_num += 1;
            if line_num % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }
            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with('#') {
                header.consume(&line);
                continue;
            }
            if header.fields.is_empty() {
                // Data before a #fields directive cannot be interpreted.
                continue;
            }

            record_num += 1;

            let values: Vec<&str> = line.split(header.separator.as_str()).collect();
            let mut record: HashMap<&str, &str> = HashMap::with_capacity(header.fields.len());
            for (i, field) in header.fields.iter().enumerate() {
                let value = values.get(i).copied().unwrap_or("");
                let value = if value == header.empty_field || value == header.unset_field {
                    ""
                } else {
                    value
                };
                record.insert(field.as_str(), value);
            }

            let ts = record
                .get("ts")
                .filter(|v| !v.is_empty())
                .and_then(|v| timestamp::parse_zeek(v))
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

            let orig_host = record.get("id.orig_h").copied().unwrap_or("");
            let host = if orig_host.is_empty() {
                record.get("host").copied().unwrap_or("")
            } else {
                orig_host
            };

            let message = build_message(&header.log_path, &record);

            events.push(Event::new(
                ts,
                source.clone(),
                event_type_for(&header.log_path),
                record_num,
                "",
                host,
                message,
                path_str.clone(),
            ));
        }

        info!(
            file = %path.display(),
            log_type = %header.log_path,
            events = events.len(),
            "parsed Zeek log"
        );
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "zeek"
    }
}

fn field<'a>(record: &'a HashMap<&str, &str>, key: &str) -> &'a str {
    record.get(key).copied().unwrap_or("")
}

fn conn_string(record: &HashMap<&str, &str>) -> String {
    let orig_h = field(record, "id.orig_h");
    let resp_h = field(record, "id.resp_h");
    if !orig_h.is_empty() && !resp_h.is_empty() {
        format!(
            "{orig_h}:{} -> {resp_h}:{}",
            field(record, "id.orig_p"),
            field(record, "id.resp_p")
        )
    } else if !orig_h.is_empty() {
        orig_h.to_string()
    } else {
        String::new()
    }
}

/// Per-log-type message assembly; unknown types get a generic key=value
/// summary.
fn build_message(log_path: &str, record: &HashMap<&str, &str>) -> String {
    let conn = conn_string(record);
    let mut msg = conn.clone();

    macro_rules! push_if {
        ($value:expr, $fmt:literal) => {
            if !$value.is_empty() {
                msg.push_str(&format!($fmt, $value));
            }
        };
    }

    match log_path {
        "conn" => {
            let proto = field(record, "proto");
            if !proto.is_empty() {
                msg.push_str(&format!(" [{}]", proto.to_uppercase()));
            }
            push_if!(field(record, "service"), " service={}");
            push_if!(field(record, "conn_state"), " state={}");
            let duration = field(record, "duration");
            if !duration.is_empty() {
                msg.push_str(&format!(" duration={duration}s"));
            }
        }
        "dns" => {
            push_if!(field(record, "query"), " query={}");
            push_if!(field(record, "qtype_name"), " type={}");
            let answers = field(record, "answers");
            if !answers.is_empty() {
                msg.push_str(&format!(" answers=[{answers}]"));
            }
            let rcode = field(record, "rcode_name");
            if !rcode.is_empty() && rcode != "NOERROR" {
                msg.push_str(&format!(" rcode={rcode}"));
            }
        }
        "http" => {
            push_if!(field(record, "method"), " {}");
            let host = field(record, "host");
            let uri = field(record, "uri");
            if !host.is_empty() {
                msg.push_str(&format!(" http://{host}{uri}"));
            } else if !uri.is_empty() {
                msg.push_str(&format!(" {uri}"));
            }
            let status = field(record, "status_code");
            if !status.is_empty() {
                msg.push_str(&format!(" [{status}]"));
            }
            push_if!(field(record, "user_agent"), " UA={}");
        }
        "ssl" => {
            push_if!(field(record, "server_name"), " SNI={}");
            push_if!(field(record, "version"), " ver={}");
            push_if!(field(record, "subject"), " subject={}");
            push_if!(field(record, "issuer"), " issuer={}");
        }
        "files" => {
            push_if!(field(record, "filename"), " file={}");
            push_if!(field(record, "mime_type"), " type={}");
            push_if!(field(record, "total_bytes"), " size={}");
            let sha256 = field(record, "sha256");
            let sha1 = field(record, "sha1");
            let md5 = field(record, "md5");
            if !sha256.is_empty() {
                msg.push_str(&format!(" sha256={sha256}"));
            } else if !sha1.is_empty() {
                msg.push_str(&format!(" sha1={sha1}"));
            } else if !md5.is_empty() {
                msg.push_str(&format!(" md5={md5}"));
            }
        }
        "notice" => {
            let note = field(record, "note");
            if !note.is_empty() {
                msg.push_str(&format!(" [{note}]"));
            }
            push_if!(field(record, "msg"), " {}");
            let sub = field(record, "sub");
            if !sub.is_empty() {
                msg.push_str(&format!(" ({sub})"));
            }
        }
        "ssh" => {
            msg.push_str(" [SSH]");
            push_if!(field(record, "version"), " ver={}");
            match field(record, "auth_success") {
                "T" => msg.push_str(" auth=SUCCESS"),
                "F" => msg.push_str(" auth=FAILED"),
                _ => {}
            }
            push_if!(field(record, "client"), " client={}");
            push_if!(field(record, "server"), " server={}");
        }
        "dhcp" => {
            push_if!(field(record, "mac"), " MAC={}");
            push_if!(field(record, "assigned_ip"), " assigned={}");
            push_if!(field(record, "host_name"), " hostname={}");
            let lease = field(record, "lease_time");
            if !lease.is_empty() {
                msg.push_str(&format!(" lease={lease}s"));
            }
        }
        "x509" => {
            msg.clear();
            let subject = field(record, "certificate.subject");
            if !subject.is_empty() {
                msg.push_str(&format!("subject={subject}"));
            }
            push_if!(field(record, "certificate.issuer"), " issuer={}");
            push_if!(field(record, "certificate.serial"), " serial={}");
            return msg.trim().to_string();
        }
        "kerberos" => {
            msg.push_str(" [Kerberos]");
            push_if!(field(record, "client"), " client={}");
            push_if!(field(record, "service"), " service={}");
            match field(record, "success") {
                "T" => msg.push_str(" SUCCESS"),
                "F" => {
                    msg.push_str(" FAILED");
                    let err = field(record, "error_msg");
                    if !err.is_empty() {
                        msg.push_str(&format!(" ({err})"));
                    }
                }
                _ => {}
            }
        }
        "ntlm" => {
            msg.push_str(" [NTLM]");
            let user = field(record, "username");
            let domain = field(record, "domainname");
            if !domain.is_empty() && !user.is_empty() {
                msg.push_str(&format!(" user={domain}\\{user}"));
            } else if !user.is_empty() {
                msg.push_str(&format!(" user={user}"));
            }
            push_if!(field(record, "hostname"), " host={}");
            match field(record, "success") {
                "T" => msg.push_str(" SUCCESS"),
                "F" => msg.push_str(" FAILED"),
                _ => {}
            }
        }
        "smtp" => {
            msg.push_str(" [SMTP]");
            push_if!(field(record, "mailfrom"), " from={}");
            push_if!(field(record, "rcptto"), " to={}");
            push_if!(field(record, "subject"), " subject={}");
            push_if!(field(record, "last_reply"), " reply={}");
        }
        "ftp" => {
            msg.push_str(" [FTP]");
            push_if!(field(record, "user"), " user={}");
            let command = field(record, "command");
            if !command.is_empty() {
                msg.push_str(&format!(" {command}"));
                let arg = field(record, "arg");
                if !arg.is_empty() {
                    msg.push_str(&format!(" {arg}"));
                }
            }
            let reply_code = field(record, "reply_code");
            if !reply_code.is_empty() {
                msg.push_str(&format!(" [{reply_code}"));
                let reply_msg = field(record, "reply_msg");
                if !reply_msg.is_empty() {
                    msg.push_str(&format!(" {reply_msg}"));
                }
                msg.push(']');
            }
        }
        "weird" => {
            let name = field(record, "name");
            if !name.is_empty() {
                msg.push_str(&format!(" [WEIRD:{name}]"));
            }
            push_if!(field(record, "addl"), " {}");
        }
        "rdp" => {
            msg.push_str(" [RDP]");
            push_if!(field(record, "cookie"), " cookie={}");
            push_if!(field(record, "security_protocol"), " security={}");
            push_if!(field(record, "result"), " result={}");
        }
        _ => {
            if conn.is_empty() {
                // Generic summary: the first five informative fields.
                let mut parts: Vec<String> = record
                    .iter()
                    .filter(|(k, v)| !v.is_empty() && **k != "ts" && **k != "uid")
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                parts.sort();
                parts.truncate(5);
                return parts.join(" ");
            }
        }
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    const CONN_LOG: &str = "\
#separator \\x09
#set_separator\t,
#empty_field\t(empty)
#unset_field\t-
#path\tconn
#fields\tts\tproto\tid.orig_h\tid.orig_p\tid.resp_h\tid.resp_p\tservice\tconn_state
1682087445.123456\ttcp\t10.0.0.1\t1234\t10.0.0.2\t443\tssl\tSF
";

    fn fixture(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_can_parse_by_name_and_header() {
        let cache = HeaderCache::new();
        assert!(ZeekParser.can_parse(Path::new("conn.log"), &cache));
        assert!(ZeekParser.can_parse(Path::new("/data/zeek/custom.log"), &cache));

        let dir = TempDir::new().unwrap();
        let with_header = fixture(&dir, "mystery.log", CONN_LOG);
        assert!(ZeekParser.can_parse(&with_header, &cache));

        let plain = fixture(&dir, "plain.log", "just text\n");
        assert!(!ZeekParser.can_parse(&plain, &cache));
    }

    #[test]
    fn test_conn_record() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "conn.log", CONN_LOG);
        let events = ZeekParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.event_type, "ZeekConnection");
        assert_eq!(event.host, "10.0.0.1");
        assert_eq!(event.event_id, 1);
        let expected = Utc.with_ymd_and_hms(2023, 4, 21, 15, 50, 45).unwrap()
            + chrono::Duration::microseconds(123_456);
        assert_eq!(event.timestamp, expected);
        assert!(event
            .message
            .contains("10.0.0.1:1234 -> 10.0.0.2:443 [TCP] service=ssl state=SF"));
    }

    #[test]
    fn test_unset_fields_become_empty() {
        let body = "\
#separator \\x09
#path\tconn
#fields\tts\tproto\tid.orig_h\tid.orig_p\tid.resp_h\tid.resp_p\tservice\tconn_state
1682087445.000000\ttcp\t10.0.0.1\t1234\t10.0.0.2\t443\t-\t(empty)
";
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "conn.log", body);
        let events = ZeekParser.parse(&path, &CancelToken::new()).unwrap();
        assert!(!events[0].message.contains("service="));
        assert!(!events[0].message.contains("state="));
    }

    #[test]
    fn test_dns_message() {
        let body = "\
#separator \\x09
#path\tdns
#fields\tts\tid.orig_h\tid.orig_p\tid.resp_h\tid.resp_p\tquery\tqtype_name\trcode_name
1682087445.000000\t10.0.0.1\t5353\t8.8.8.8\t53\texample.com\tA\tNXDOMAIN
";
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "dns.log", body);
        let events = ZeekParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events[0].event_type, "ZeekDNS");
        assert!(events[0].message.contains("query=example.com"));
        assert!(events[0].message.contains("type=A"));
        assert!(events[0].message.contains("rcode=NXDOMAIN"));
    }

    #[test]
    fn test_unescape_separator() {
        assert_eq!(unescape_separator("\\x09"), "\t");
        assert_eq!(unescape_separator("\\x2c"), ",");
        assert_eq!(unescape_separator("|"), "|");
    }
}
