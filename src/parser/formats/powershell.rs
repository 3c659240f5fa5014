//! PowerShell transcripts and Script Block (event 4104) log exports.

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

pub const TRANSCRIPT_START: &str = "PowerShellTranscriptStart";
pub const TRANSCRIPT_END: &str = "PowerShellTranscriptEnd";
pub const TRANSCRIPT_COMMAND: &str = "PowerShellCommand";
pub const SCRIPT_BLOCK: &str = "PowerShellScriptBlock";

/// Script Block Logging writes event id 4104.
pub const SCRIPT_BLOCK_EVENT_ID: i64 = 4104;

fn banner_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\*{20,}$").expect("static regex"))
}

fn header_start_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^Windows PowerShell transcript start").expect("static regex"))
}

fn header_end_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^Windows PowerShell transcript end").expect("static regex"))
}

fn start_time_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^Start time:\s*(\d{14})").expect("static regex"))
}

fn end_time_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^End time:\s*(\d{14})").expect("static regex"))
}

fn username_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^Username:\s*(.+)$").expect("static regex"))
}

fn runas_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^RunAs User:\s*(.+)$").expect("static regex"))
}

fn machine_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^Machine:\s*([^\s(]+)").expect("static regex"))
}

fn host_app_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^Host Application:\s*(.+)$").expect("static regex"))
}

fn prompt_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^PS\s+([A-Za-z]:\\[^>]*|/)>\s*(.*)$").expect("static regex"))
}

// ── Transcript parser ───────────────────────────────────────────

#[derive(Default)]
struct TranscriptHeader {
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    username: String,
    runas_user: String,
    machine: String,
    host_application: String,
}

impl TranscriptHeader {
    fn user_label(&self) -> String {
        if !self.runas_user.is_empty() && self.runas_user != self.username {
            format!("{} (RunAs: {})", self.username, self.runas_user)
        } else {
            self.username.clone()
        }
    }
}

pub struct PowerShellTranscriptParser;

impl EventParser for PowerShellTranscriptParser {
    fn can_parse(&self, path: &Path, cache: &HeaderCache) -> bool {
        if base_name_lower(path).contains("transcript") {
            return true;
        }
        let header = cache.header(path);
        header.iter().take(10).any(|line| {
            banner_pattern().is_match(line) || header_start_pattern().is_match(line)
        })
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let mut header = TranscriptHeader::default();
        let mut in_header = false;
        let mut header_parsed = false;

        let mut events: Vec<Event> = Vec::new();
        let mut line_num: usize = 0;
        let mut command_num: i64 = 0;
        let mut current_command = String::new();
        let mut command_output = String::new();

        let mut flush_command = |command: &mut String,
                                 output: &mut String,
                                 command_num: &mut i64,
                                 header: &TranscriptHeader,
                                 events: &mut Vec<Event>| {
            if command.is_empty() {
                return;
            }
            *command_num += 1;
            let mut message = format!("Command: {command}");
            let output = output.trim();
            if !output.is_empty() {
                let mut clipped = output.to_string();
                if clipped.len() > 500 {
                    clipped.truncate(500);
                    clipped.push_str("...[truncated]");
                }
                message.push_str(&format!(" | Output: {clipped}"));
            }
            events.push(Event::new(
                header.start_time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                source.clone(),
                TRANSCRIPT_COMMAND,
                *command_num,
                header.user_label(),
                header.machine.clone(),
                message,
                path_str.clone(),
            ));
            command.clear();
        };

        for line in LineIter::open(path).map_err(|e| ParseError::open(path, e))? {
            let line = line.map_err(|e| ParseError::io(path, e))?;
            line_num += 1;
            if line_num % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }

            let probe = truncate_for_regex(&line);

            if banner_pattern().is_match(probe) {
                if !header_parsed {
                    in_header = true;
                }
                continue;
            }

            if in_header && !header_parsed {
                if header_start_pattern().is_match(probe) {
                    continue;
                }
                if header_end_pattern().is_match(probe) {
                    in_header = false;
                    continue;
                }
                if let Some(caps) = start_time_pattern().captures(probe) {
                    header.start_time = timestamp::parse_packed(&caps[1]);
                    continue;
                }
                if let Some(caps) = end_time_pattern().captures(probe) {
                    header.end_time = timestamp::parse_packed(&caps[1]);
                    continue;
                }
                if let Some(caps) = username_pattern().captures(probe) {
                    header.username = caps[1].trim().to_string();
                    continue;
                }
                if let Some(caps) = runas_pattern().captures(probe) {
                    header.runas_user = caps[1].trim().to_string();
                    continue;
                }
                if let Some(caps) = machine_pattern().captures(probe) {
                    header.machine = caps[1].trim().to_string();
                    continue;
                }
                if let Some(caps) = host_app_pattern().captures(probe) {
                    header.host_application = caps[1].trim().to_string();
                    continue;
                }
                if probe.is_empty() || probe.starts_with("PS ") {
                    in_header = false;
                    header_parsed = true;
                }
                if in_header {
                    continue;
                }
            }

            if header_end_pattern().is_match(probe) {
                continue;
            }
            if let Some(caps) = end_time_pattern().captures(probe) {
                header.end_time = timestamp::parse_packed(&caps[1]);
                continue;
            }

            if let Some(caps) = prompt_pattern().captures(probe) {
                flush_command(
                    &mut current_command,
                    &mut command_output,
                    &mut command_num,
                    &header,
                    &mut events,
                );
                command_output.clear();
                current_command = caps[2].trim().to_string();
                continue;
            }

            if !current_command.is_empty() && !line.is_empty() {
                if !command_output.is_empty() {
                    command_output.push('\n');
                }
                command_output.push_str(&line);
            }
        }

        flush_command(
            &mut current_command,
            &mut command_output,
            &mut command_num,
            &header,
            &mut events,
        );

        if let Some(start) = header.start_time {
            let session = Event::new(
                start,
                source.clone(),
                TRANSCRIPT_START,
                0,
                header.username.clone(),
                header.machine.clone(),
                format!(
                    "PowerShell session started. Host: {}, RunAs: {}",
                    header.host_application, header.runas_user
                ),
                path_str.clone(),
            );
            events.insert(0, session);
        }

        if let Some(end) = header.end_time {
            let duration = header
                .start_time
                .map(|start| (end - start).num_seconds())
                .unwrap_or(0);
            events.push(Event::new(
                end,
                source.clone(),
                TRANSCRIPT_END,
                0,
                header.username.clone(),
                header.machine.clone(),
                format!("PowerShell session ended. Duration: {duration}s"),
                path_str.clone(),
            ));
        }

        info!(
            file = %path.display(),
            events = events.len(),
            commands = command_num,
            "parsed PowerShell transcript"
        );
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "powershell-transcript"
    }
}

// ── Script Block parser ─────────────────────────────────────────

fn block_text_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<ScriptBlockText>(.+?)</ScriptBlockText>").expect("static regex"))
}

fn message_number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)MessageNumber[=:]\s*(\d+)").expect("static regex"))
}

fn message_total_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)MessageTotal[=:]\s*(\d+)").expect("static regex"))
}

fn block_timestamp_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?)")
            .expect("static regex")
    })
}

fn block_timestamp2_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2})").expect("static regex"))
}

fn block_path_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)Path[=:]\s*["']?([^"'\s]+)["']?"#).expect("static regex"))
}

fn decode_xml_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#10;", "\n")
        .replace("&#13;", "\r")
        .replace("&#9;", "\t")
        .replace("&amp;", "&")
}

#[derive(Default)]
struct BlockState {
    timestamp: Option<DateTime<Utc>>,
    message_number: i64,
    message_total: i64,
    script_path: String,
}

pub struct PowerShellScriptBlockParser;

impl PowerShellScriptBlockParser {
    fn emit_block(
        &self,
        state: &mut BlockState,
        block_num: &mut i64,
        content: &str,
        source: &str,
        path_str: &str,
        events: &mut Vec<Event>,
    ) {
        *block_num += 1;
        let mut message = String::new();
        if state.message_total > 1 {
            message.push_str(&format!(
                "[Part {}/{}] ",
                state.message_number, state.message_total
            ));
        }
        if !state.script_path.is_empty() {
            message.push_str(&format!("Path: {} | ", state.script_path));
        }
        let mut content = content.trim().to_string();
        if content.len() > 1000 {
            content.truncate(1000);
            content.push_str("...[truncated]");
        }
        message.push_str(&format!("Script: {content}"));

        events.push(Event::new(
            state.timestamp.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            source.to_string(),
            SCRIPT_BLOCK,
            SCRIPT_BLOCK_EVENT_ID,
            "",
            "",
            message,
            path_str.to_string(),
        ));

        state.message_number = 0;
        state.message_total = 0;
        state.script_path.clear();
    }
}

impl EventParser for PowerShellScriptBlockParser {
    fn can_parse(&self, path: &Path, cache: &HeaderCache) -> bool {
        let base = base_name_lower(path);
        if base.contains("scriptblock")
            || base.contains("script-block")
            || base.contains("powershell-operational")
            || base.contains("4104")
        {
            return true;
        }
        cache.header_contains(path, &["ScriptBlockText"])
            || cache.header_contains(path, &["MessageNumber"])
            || cache.header_contains(path, &["ScriptBlockId"])
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let mut events = Vec::new();
        let mut state = BlockState::default();
        let mut block_num: i64 = 0;
        let mut line_num: usize = 0;

        let mut in_block = false;
        let mut block_buf = String::new();

        for line in LineIter::open(path).map_err(|e| ParseError::open(path, e))? {
            let line = line.map_err(|e| ParseError::io(path, e))?;
            line_num += 1;
            if line_num % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }
            if line.trim().is_empty() {
                continue;
            }

            let probe = truncate_for_regex(&line);

            if let Some(caps) = block_timestamp_pattern().captures(probe) {
                if let Some(ts) = timestamp::parse_flexible(&caps[1]) {
                    state.timestamp = Some(ts);
                }
            } else if let Some(caps) = block_timestamp2_pattern().captures(probe) {
                if let Some(ts) = timestamp::parse_flexible(&caps[1]) {
                    state.timestamp = Some(ts);
                }
            }

            if let Some(caps) = message_number_pattern().captures(probe) {
                state.message_number = caps[1].parse().unwrap_or(0);
            }
            if let Some(caps) = message_total_pattern().captures(probe) {
                state.message_total = caps[1].parse().unwrap_or(0);
            }
            if let Some(caps) = block_path_pattern().captures(probe) {
                state.script_path = caps[1].to_string();
            }

            // Single-line <ScriptBlockText>...</ScriptBlockText>.
            if let Some(caps) = block_text_pattern().captures(probe) {
                let content = decode_xml_entities(&caps[1]);
                self.emit_block(&mut state, &mut block_num, &content, &source, &path_str, &mut events);
                continue;
            }

            // Multi-line block start.
            if line.contains("<ScriptBlockText>") && !line.contains("</ScriptBlockText>") {
                in_block = true;
                if let Some(idx) = line.find("<ScriptBlockText>") {
                    block_buf.push_str(&line[idx + "<ScriptBlockText>".len()..]);
                }
                continue;
            }

            // Multi-line block end.
            if in_block && line.contains("</ScriptBlockText>") {
                if let Some(idx) = line.find("</ScriptBlockText>") {
                    if idx > 0 {
                        if !block_buf.is_empty() {
                            block_buf.push('\n');
                        }
                        block_buf.push_str(&line[..idx]);
                    }
                }
                let content = decode_xml_entities(&block_buf);
                self.emit_block(&mut state, &mut block_num, &content, &source, &path_str, &mut events);
                in_block = false;
                block_buf.clear();
                continue;
            }

            if in_block {
                if !block_buf.is_empty() {
                    block_buf.push('\n');
                }
                block_buf.push_str(&line);
                continue;
            }

            // Plain-text dumps: `ScriptBlockText: <content>`.
            if let Some(content) = line.trim().strip_prefix("ScriptBlockText:") {
                let content = content.trim().to_string();
                self.emit_block(&mut state, &mut block_num, &content, &source, &path_str, &mut events);
            }
        }

        info!(
            file = %path.display(),
            events = events.len(),
            blocks = block_num,
            "parsed PowerShell script block log"
        );
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "powershell-scriptblock"
    }
}
