pub mod browser_history;
pub mod cloud;
pub mod csv_artifact;
pub mod evtx_log;
pub mod firewall;
pub mod iis;
pub mod json_generic;
pub mod line_log;
pub mod macos;
pub mod powershell;
pub mod stubs;
pub mod syslog;
pub mod web;
pub mod windows_text;
pub mod xml_event;
pub mod xml_generic;
pub mod xml_sysmon;
pub mod xml_task;
pub mod zeek;

pub use browser_history::BrowserHistoryParser;
pub use cloud::{AzureActivityParser, CloudTrailParser, GcpAuditParser};
pub use csv_artifact::CsvArtifactParser;
pub use evtx_log::EvtxParser;
pub use firewall::{CiscoAsaParser, IptablesParser, WindowsFirewallParser};
pub use iis::IisParser;
pub use json_generic::GenericJsonParser;
pub use line_log::LineLogParser;
pub use macos::{MacAslParser, MacInstallLogParser, MacUnifiedLogParser};
pub use powershell::{PowerShellScriptBlockParser, PowerShellTranscriptParser};
pub use stubs::{PrefetchParser, ShellbagParser};
pub use syslog::SyslogParser;
pub use web::WebAccessParser;
pub use windows_text::WindowsTextParser;
pub use xml_event::WindowsXmlEventParser;
pub use xml_generic::GenericXmlParser;
pub use xml_sysmon::SysmonXmlParser;
pub use xml_task::ScheduledTaskParser;
pub use zeek::ZeekParser;
