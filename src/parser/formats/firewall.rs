//! Firewall records: Windows firewall (pfirewall.log), Linux
//! iptables/UFW kernel lines, and Cisco ASA syslog exports.

use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::info;

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::parser::cache::HeaderCache;
use crate::parser::lines::LineIter;
use crate::parser::timestamp;
use crate::parser::traits::{base_name_lower, source_label, EventParser, ParseError};
use crate::parser::{truncate_for_regex, CANCEL_CHECK_INTERVAL};

pub const WINDOWS_FIREWALL: &str = "WindowsFirewall";
pub const WINDOWS_FIREWALL_RAW: &str = "WindowsFirewallRaw";
pub const IPTABLES: &str = "Iptables";
pub const IPTABLES_RAW: &str = "IptablesRaw";
pub const CISCO_ASA: &str = "CiscoASA";
pub const CISCO_ASA_RAW: &str = "CiscoASARaw";

// ── Windows firewall ────────────────────────────────────────────

/// `date time action protocol src dst sport dport rest...`
fn win_firewall_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(\d{4}-\d{2}-\d{2})\s+(\d{2}:\d{2}:\d{2})\s+(\w+)\s+(\w+)\s+(\S+)\s+(\S+)\s+(\d+|-)\s+(\d+|-)\s+(.*)$",
        )
        .expect("static regex")
    })
}

pub struct WindowsFirewallParser;

impl EventParser for WindowsFirewallParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        base == "pfirewall.log" || (base.contains("firewall") && base.ends_with(".log"))
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let mut events = Vec::new();
        let mut line_num: i64 = 0;

        for line in LineIter::open(path).map_err(|e| ParseError::open(path, e))? {
            let line = line.map_err(|e| ParseError::io(path, e))?;
            line_num += 1;
            if line_num as usize % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }
            let trimmed = line.trim();
            // The pfirewall header block is comment lines.
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let event = match win_firewall_pattern().captures(truncate_for_regex(&line)) {
                Some(caps) => {
                    let ts = timestamp::parse_flexible(&format!("{} {}", &caps[1], &caps[2]))
                        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                    let action = caps[3].to_uppercase();
                    let protocol = caps[4].to_uppercase();
                    let remainder = caps[9].to_uppercase();
                    let direction = if remainder.contains("RECEIVE") {
                        Some("RECEIVE")
                    } else if remainder.contains("SEND") {
                        Some("SEND")
                    } else {
                        None
                    };

                    let mut msg = format!(
                        "{action} {protocol} {}:{} -> {}:{}",
                        &caps[5], &caps[7], &caps[6], &caps[8]
                    );
                    if let Some(dir) = direction {
                        msg.push_str(&format!(" ({dir})"));
                    }

                    Event::new(ts, source.clone(), WINDOWS_FIREWALL, line_num, "", "", msg, path_str.clone())
                }
                None => Event::raw(source.clone(), WINDOWS_FIREWALL_RAW, line_num, line, path_str.clone()),
            };

            events.push(event);
        }

        info!(file = %path.display(), events = events.len(), "parsed Windows firewall log");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "windows-firewall"
    }
}

// ── iptables / UFW ──────────────────────────────────────────────

/// `Mon D HH:MM:SS host kernel: [UFW BLOCK] IN=... SRC=... DST=...`
fn iptables_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^([A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(\S+)\s+kernel:\s+\[([^\]]+)\]\s+(.*)$",
        )
        .expect("static regex")
    })
}

fn field_pattern(key: &'static str, cell: &'static OnceLock<Regex>) -> &'static Regex {
    cell.get_or_init(|| Regex::new(&format!(r"{key}=(\S*)")).expect("static regex"))
}

fn extract_field(key: &'static str, cell: &'static OnceLock<Regex>, details: &str) -> String {
    field_pattern(key, cell)
        .captures(details)
        .map(|c| c[1].to_string())
        .unwrap_or_default()
}

static SRC_RE: OnceLock<Regex> = OnceLock::new();
static DST_RE: OnceLock<Regex> = OnceLock::new();
static SPT_RE: OnceLock<Regex> = OnceLock::new();
static DPT_RE: OnceLock<Regex> = OnceLock::new();
static PROTO_RE: OnceLock<Regex> = OnceLock::new();
static IN_RE: OnceLock<Regex> = OnceLock::new();
static OUT_RE: OnceLock<Regex> = OnceLock::new();

pub struct IptablesParser;

impl EventParser for IptablesParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        base == "ufw.log"
            || base.contains("iptables")
            || base.contains("firewall")
            || base.contains("netfilter")
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();
        let now = Utc::now();
        let mut last_seen: Option<DateTime<Utc>> = None;

        let mut events = Vec::new();
        let mut line_num: i64 = 0;

        for line in LineIter::open(path).map_err(|e| ParseError::open(path, e))? {
            let line = line.map_err(|e| ParseError::io(path, e))?;
            line_num += 1;
            if line_num as usize % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }
            if line.trim().is_empty() {
                continue;
            }

            let event = match iptables_pattern().captures(truncate_for_regex(&line)) {
                Some(caps) => {
                    let ts = timestamp::resolve_without_year(&caps[1], now, last_seen)
                        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                    if ts != DateTime::<Utc>::UNIX_EPOCH {
                        last_seen = Some(ts);
                    }
                    let hostname = caps[2].to_string();
                    let action = caps[3].to_string();
                    let details = &caps[4];

                    let src = extract_field("SRC", &SRC_RE, details);
                    let dst = extract_field("DST", &DST_RE, details);
                    let spt = extract_field("SPT", &SPT_RE, details);
                    let dpt = extract_field("DPT", &DPT_RE, details);
                    let proto = extract_field("PROTO", &PROTO_RE, details);
                    let in_iface = extract_field("IN", &IN_RE, details);
                    let out_iface = extract_field("OUT", &OUT_RE, details);

                    let direction = match (!in_iface.is_empty(), !out_iface.is_empty()) {
                        (true, false) => "IN",
                        (false, true) => "OUT",
                        (true, true) => "FORWARD",
                        (false, false) => "",
                    };

                    let mut parts = vec![format!("[{action}]")];
                    if !proto.is_empty() {
                        parts.push(proto);
                    }
                    if !src.is_empty() {
                        parts.push(if spt.is_empty() { src } else { format!("{src}:{spt}") });
                    }
                    parts.push("->".into());
                    if !dst.is_empty() {
                        parts.push(if dpt.is_empty() { dst } else { format!("{dst}:{dpt}") });
                    }
                    if !direction.is_empty() {
                        parts.push(format!("({direction})"));
                    }

                    Event::new(
                        ts,
                        source.clone(),
                        IPTABLES,
                        line_num,
                        "",
                        hostname,
                        parts.join(" "),
                        path_str.clone(),
                    )
                }
                None => Event::raw(source.clone(), IPTABLES_RAW, line_num, line, path_str.clone()),
            };

            events.push(event);
        }

        info!(file = %path.display(), events = events.len(), "parsed iptables log");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "iptables"
    }
}

// ── Cisco ASA ───────────────────────────────────────────────────

/// `Apr 21 2023 15:30:45: %ASA-6-302013: message`
fn asa_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^([A-Z][a-z]{2}\s+\d{1,2}\s+\d{4}\s+\d{2}:\d{2}:\d{2}):\s+%ASA-(\d)-(\d+):\s+(.*)$",
        )
        .expect("static regex")
    })
}

/// `for|from iface:IP/port ... to iface:IP/port` (Built/Teardown).
fn asa_conn_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:for|from)\s+(\S+):(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})/(\d+).*?(?:to)\s+(\S+):(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})/(\d+)",
        )
        .expect("static regex")
    })
}

/// Denied messages: `src IP[/port] ... dst IP[/port]`.
fn asa_denied_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:src|from)\s+(?:\S+:)?(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?:/(\d+))?.*?(?:dst|to)\s+(?:\S+:)?(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?:/(\d+))?",
        )
        .expect("static regex")
    })
}

fn asa_action(msg_id: &str, message: &str) -> &'static str {
    let upper = message.to_uppercase();
    match msg_id {
        "302013" | "302014" | "302015" | "302016" => {
            if upper.contains("BUILT") {
                return "ALLOW";
            }
            if upper.contains("TEARDOWN") {
                return "CLOSE";
            }
        }
        "106001" | "106006" | "106007" | "106014" | "106015" | "106023" => return "DENY",
        "106100" => {
            if upper.contains("PERMITTED") {
                return "ALLOW";
            }
            if upper.contains("DENIED") {
                return "DENY";
            }
        }
        "313001" | "313004" | "313005" | "710003" | "710005" => return "DENY",
        _ => {}
    }
    if upper.contains("DENIED") || upper.contains("DENY") {
        "DENY"
    } else if upper.contains("PERMITTED") || upper.contains("PERMIT") || upper.contains("BUILT") {
        "ALLOW"
    } else if upper.contains("TEARDOWN") {
        "CLOSE"
    } else if upper.contains("DROP") {
        "DROP"
    } else {
        "INFO"
    }
}

struct AsaConnection {
    src_ip: String,
    src_port: String,
    dst_ip: String,
    dst_port: String,
    protocol: &'static str,
}

fn asa_connection(message: &str) -> AsaConnection {
    let upper = message.to_uppercase();
    let protocol = if upper.contains("TCP") {
        "TCP"
    } else if upper.contains("UDP") {
        "UDP"
    } else if upper.contains("ICMP") {
        "ICMP"
    } else {
        ""
    };

    if let Some(caps) = asa_conn_pattern().captures(message) {
        return AsaConnection {
            src_ip: caps[2].to_string(),
            src_port: caps[3].to_string(),
            dst_ip: caps[5].to_string(),
            dst_port: caps[6].to_string(),
            protocol,
        };
    }

    if let Some(caps) = asa_denied_pattern().captures(message) {
        return AsaConnection {
            src_ip: caps[1].to_string(),
            src_port: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
            dst_ip: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default(),
            dst_port: caps.get(4).map(|m| m.as_str().to_string()).unwrap_or_default(),
            protocol,
        };
    }

    AsaConnection {
        src_ip: String::new(),
        src_port: String::new(),
        dst_ip: String::new(),
        dst_port: String::new(),
        protocol,
    }
}

pub struct CiscoAsaParser;

impl EventParser for CiscoAsaParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        base.contains("asa") || base.contains("cisco") || base.contains("pix")
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let mut events = Vec::new();
        let mut line_num: i64 = 0;

        for line in LineIter::open(path).map_err(|e| ParseError::open(path, e))? {
            let line = line.map_err(|e| ParseError::io(path, e))?;
            line_num += 1;
            if line_num as usize % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }
            if line.trim().is_empty() {
                continue;
            }

            let event = match asa_pattern().captures(truncate_for_regex(&line)) {
                Some(caps) => {
                    // `Apr 21 2023 15:30:45` is reordered into a parseable shape.
                    let ts = parse_asa_timestamp(&caps[1]).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                    let severity = &caps[2];
                    let msg_id = &caps[3];
                    let body = &caps[4];

                    let action = asa_action(msg_id, body);
                    let conn = asa_connection(body);

                    let mut parts = vec![format!("[ASA-{severity}-{msg_id}]"), action.to_string()];
                    if !conn.protocol.is_empty() {
                        parts.push(conn.protocol.to_string());
                    }
                    if !conn.src_ip.is_empty() {
                        parts.push(if conn.src_port.is_empty() {
                            conn.src_ip.clone()
                        } else {
                            format!("{}:{}", conn.src_ip, conn.src_port)
                        });
                    }
                    if !conn.dst_ip.is_empty() {
                        parts.push("->".into());
                        parts.push(if conn.dst_port.is_empty() {
                            conn.dst_ip.clone()
                        } else {
                            format!("{}:{}", conn.dst_ip, conn.dst_port)
                        });
                    }
                    parts.push("-".into());
                    parts.push(body.to_string());

                    let event_id: i64 = msg_id.parse().unwrap_or(0);
                    Event::new(
                        ts,
                        source.clone(),
                        CISCO_ASA,
                        event_id,
                        "",
                        "",
                        parts.join(" "),
                        path_str.clone(),
                    )
                }
                None => Event::raw(source.clone(), CISCO_ASA_RAW, line_num, line, path_str.clone()),
            };

            events.push(event);
        }

        info!(file = %path.display(), events = events.len(), "parsed Cisco ASA log");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "cisco-asa"
    }
}

fn parse_asa_timestamp(token: &str) -> Option<DateTime<Utc>> {
    let compact = token.split_whitespace().collect::<Vec<_>>();
    // [Mon, D, YYYY, HH:MM:SS]
    if compact.len() != 4 {
        return None;
    }
    let reordered = format!("{} {} {} {}", compact[2], compact[0], compact[1], compact[3]);
    let naive =
        chrono::NaiveDateTime::parse_from_str(&reordered, "%Y %b %d %H:%M:%S").ok()?;
    Some(chrono::TimeZone::from_utc_datetime(&Utc, &naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_windows_firewall_line() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "pfirewall.log",
            "#Version: 1.5\n2023-04-21 15:30:45 DROP TCP 192.168.1.100 10.0.0.50 54321 443 0 - 0 0 0 - - - RECEIVE\n",
        );
        let events = WindowsFirewallParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_type, "WindowsFirewall");
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2023, 4, 21, 15, 30, 45).unwrap());
        assert_eq!(event.message, "DROP TCP 192.168.1.100:54321 -> 10.0.0.50:443 (RECEIVE)");
    }

    #[test]
    fn test_iptables_ufw_block() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "ufw.log",
            "Apr 21 15:30:45 gw kernel: [UFW BLOCK] IN=eth0 OUT= MAC=aa SRC=192.168.1.100 DST=10.0.0.50 PROTO=TCP SPT=54321 DPT=443\n",
        );
        let events = IptablesParser.parse(&path, &CancelToken::new()).unwrap();
        let event = &events[0];
        assert_eq!(event.event_type, "Iptables");
        assert_eq!(event.host, "gw");
        assert_eq!(
            event.message,
            "[UFW BLOCK] TCP 192.168.1.100:54321 -> 10.0.0.50:443 (IN)"
        );
    }

    #[test]
    fn test_cisco_asa_built_connection() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "asa.log",
            "Apr 21 2023 15:30:45: %ASA-6-302013: Built inbound TCP connection 12345 for outside:192.168.1.100/54321 (192.168.1.100/54321) to inside:10.0.0.50/443 (10.0.0.50/443)\n",
        );
        let events = CiscoAsaParser.parse(&path, &CancelToken::new()).unwrap();
        let event = &events[0];
        assert_eq!(event.event_type, "CiscoASA");
        assert_eq!(event.event_id, 302013);
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2023, 4, 21, 15, 30, 45).unwrap());
        assert!(event.message.starts_with("[ASA-6-302013] ALLOW TCP 192.168.1.100:54321 -> 10.0.0.50:443"));
    }

    #[test]
    fn test_asa_action_table() {
        assert_eq!(asa_action("106023", "whatever"), "DENY");
        assert_eq!(asa_action("302013", "Built outbound"), "ALLOW");
        assert_eq!(asa_action("302013", "Teardown TCP"), "CLOSE");
        assert_eq!(asa_action("999999", "packet dropped"), "DROP");
        assert_eq!(asa_action("999999", "routine"), "INFO");
    }

    #[test]
    fn test_raw_fallbacks_have_sentinel() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "cisco.log", "garbage\n");
        let events = CiscoAsaParser.parse(&path, &CancelToken::new()).unwrap();
        assert_eq!(events[0].event_type, "CiscoASARaw");
        assert!(events[0].has_sentinel_timestamp());
    }
}
