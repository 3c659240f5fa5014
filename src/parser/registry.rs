//! Priority-ordered parser dispatch.
//!
//! Dispatch walks a fixed candidate order; the first classifier that
//! claims the file wins. There is no content voting, and the generic
//! line-log parser terminates the chain by claiming anything left over.

use std::path::Path;

use tracing::debug;

use super::cache::HeaderCache;
use super::formats::*;
use super::traits::{base_name_lower, EventParser};

pub struct ParserRegistry {
    /// Tiers 1–5: strict binds, XML family, JSON family, browser
    /// history, shellbags.
    before_rotation: Vec<Box<dyn EventParser>>,
    /// Tiers 6–15: content-sniffing text formats and last-resort CSV.
    after_rotation: Vec<Box<dyn EventParser>>,
    fallback: LineLogParser,
}

impl ParserRegistry {
    pub fn new() -> Self {
        // The order is part of the format contract:
        //  1. strict extension binds (.evtx, .pf);
        //  2. the XML family, most specific first;
        //  3. the JSON family, cloud providers before generic;
        //  4. browser-history databases;
        //  5. filename heuristics: shellbags, then rotated `.log.N`
        //     names straight to the line-log parser (in `select`);
        //  6. PowerShell transcript / script-block;
        //  7. macOS: install, ASL, unified;
        //  8. IIS before generic web access;
        //  9. Zeek;
        // 10. web access;
        // 11. Linux syslog;
        // 12. Windows text logs;
        // 13. Windows firewall before iptables (both match "firewall");
        // 14. iptables/UFW, Cisco ASA;
        // 15. last-resort CSV;
        // 16. line-log terminal fallback.
        let before_rotation: Vec<Box<dyn EventParser>> = vec![
            Box::new(EvtxParser),
            Box::new(PrefetchParser),
            Box::new(WindowsXmlEventParser),
            Box::new(ScheduledTaskParser),
            Box::new(SysmonXmlParser),
            Box::new(GenericXmlParser),
            Box::new(CloudTrailParser),
            Box::new(AzureActivityParser),
            Box::new(GcpAuditParser),
            Box::new(GenericJsonParser),
            Box::new(BrowserHistoryParser),
            Box::new(ShellbagParser),
        ];

        let after_rotation: Vec<Box<dyn EventParser>> = vec![
            Box::new(PowerShellTranscriptParser),
            Box::new(PowerShellScriptBlockParser),
            Box::new(MacInstallLogParser),
            Box::new(MacAslParser),
            Box::new(MacUnifiedLogParser),
            Box::new(IisParser),
            Box::new(ZeekParser),
            Box::new(WebAccessParser),
            Box::new(SyslogParser),
            Box::new(WindowsTextParser),
            Box::new(WindowsFirewallParser),
            Box::new(IptablesParser),
            Box::new(CiscoAsaParser),
            Box::new(CsvArtifactParser),
        ];

        Self {
            before_rotation,
            after_rotation,
            fallback: LineLogParser,
        }
    }

    /// Pick the parser for `path`. Always succeeds: the line-log parser
    /// claims any file nothing else wanted.
    pub fn select<'a>(&'a self, path: &Path, cache: &HeaderCache) -> &'a dyn EventParser {
        for parser in &self.before_rotation {
            if parser.can_parse(path, cache) {
                debug!(file = %path.display(), parser = parser.name(), "dispatched");
                return parser.as_ref();
            }
        }

        // Rotated logs (app.log.1, access.log.2) skip the content
        // sniffers entirely; line-by-line timestamp extraction is the
        // safe interpretation for a rotation of anything.
        if base_name_lower(path).contains(".log.") {
            debug!(file = %path.display(), parser = "line-log", "dispatched rotated log");
            return &self.fallback;
        }

        for parser in &self.after_rotation {
            if parser.can_parse(path, cache) {
                debug!(file = %path.display(), parser = parser.name(), "dispatched");
                return parser.as_ref();
            }
        }

        debug!(file = %path.display(), parser = "line-log", "dispatched fallback");
        &self.fallback
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn select_name(path: &Path) -> &'static str {
        let registry = ParserRegistry::new();
        let cache = HeaderCache::new();
        registry.select(path, &cache).name()
    }

    #[test]
    fn test_extension_binds() {
        assert_eq!(select_name(Path::new("Security.evtx")), "evtx");
        assert_eq!(select_name(Path::new("CALC.EXE-1234.pf")), "prefetch");
    }

    #[test]
    fn test_xml_family_order() {
        let dir = TempDir::new().unwrap();
        let registry = ParserRegistry::new();
        let cache = HeaderCache::new();

        let win = write_file(
            &dir,
            "events.xml",
            r#"<Events xmlns="http://schemas.microsoft.com/win/2004/08/events/event"><Event><System></System></Event></Events>"#,
        );
        assert_eq!(registry.select(&win, &cache).name(), "windows-xml-event");

        let task = write_file(
            &dir,
            "task.xml",
            r#"<Task xmlns="http://schemas.microsoft.com/windows/2004/02/mit/task"><Actions/></Task>"#,
        );
        assert_eq!(registry.select(&task, &cache).name(), "scheduled-task");

        let sysmon = write_file(
            &dir,
            "config.xml",
            r#"<Sysmon schemaversion="4.82"><EventFiltering/></Sysmon>"#,
        );
        assert_eq!(registry.select(&sysmon, &cache).name(), "sysmon-xml");

        let generic = write_file(&dir, "other.xml", "<root><a/></root>");
        assert_eq!(registry.select(&generic, &cache).name(), "generic-xml");
    }

    #[test]
    fn test_json_family_order() {
        let dir = TempDir::new().unwrap();
        let registry = ParserRegistry::new();
        let cache = HeaderCache::new();

        let trail = write_file(
            &dir,
            "a.json",
            r#"{"Records":[{"eventSource":"s3","eventName":"Put","awsRegion":"us-east-1"}]}"#,
        );
        assert_eq!(registry.select(&trail, &cache).name(), "cloudtrail");

        let azure = write_file(
            &dir,
            "b.json",
            r#"[{"resourceId":"/sub/1","operationName":"Start"}]"#,
        );
        assert_eq!(registry.select(&azure, &cache).name(), "azure-activity");

        let gcp = write_file(&dir, "c.json", r#"{"protoPayload":{"methodName":"get"}}"#);
        assert_eq!(registry.select(&gcp, &cache).name(), "gcp-audit");

        let generic = write_file(&dir, "d.json", r#"{"message":"hi"}"#);
        assert_eq!(registry.select(&generic, &cache).name(), "json");
    }

    #[test]
    fn test_browser_history_by_path_triple() {
        assert_eq!(
            select_name(Path::new("/evidence/Chrome/Default/History")),
            "browser-history"
        );
        assert_eq!(
            select_name(Path::new("/evidence/Mozilla/profile/places.sqlite")),
            "browser-history"
        );
    }

    #[test]
    fn test_filename_heuristics() {
        assert_eq!(select_name(Path::new("shellbags_export.csv")), "shellbag");
        // Anything with `.log.` in the name is a rotation and goes to
        // the line-log parser before the content sniffers run.
        assert_eq!(select_name(Path::new("app.log.3")), "line-log");
        assert_eq!(select_name(Path::new("access.log.2")), "line-log");
        assert_eq!(select_name(Path::new("auth.log.1")), "line-log");
        // syslog rotations carry no `.log.` and keep their parser.
        assert_eq!(select_name(Path::new("syslog.1")), "syslog");
    }

    #[test]
    fn test_text_log_dispatch() {
        assert_eq!(select_name(Path::new("u_ex230421.log")), "iis");
        assert_eq!(select_name(Path::new("conn.log")), "zeek");
        assert_eq!(select_name(Path::new("access.log")), "web-access");
        assert_eq!(select_name(Path::new("auth.log")), "syslog");
        assert_eq!(select_name(Path::new("install.log")), "macos-install");
        assert_eq!(select_name(Path::new("cbs.log")), "windows-text");
        assert_eq!(select_name(Path::new("pfirewall.log")), "windows-firewall");
        assert_eq!(select_name(Path::new("ufw.log")), "iptables");
        assert_eq!(select_name(Path::new("asa-syslog.txt")), "cisco-asa");
        assert_eq!(select_name(Path::new("artifacts.csv")), "csv-artifact");
    }

    #[test]
    fn test_terminal_fallback_takes_anything() {
        assert_eq!(select_name(Path::new("random.bin")), "line-log");
        assert_eq!(select_name(Path::new("noextension")), "line-log");
    }

    #[test]
    fn test_dispatch_then_parse_known_lines() {
        // Dispatch plus parse for one representative line per family.
        let cases: [(&str, &str, &str, &str, &str); 5] = [
            (
                "syslog",
                "2023-01-01T12:00:00Z myhost myapp[123]: Test message",
                "Syslog",
                "myhost",
                "[myapp[123]] Test message",
            ),
            (
                "auth.log",
                "Jan 01 12:00:00 oldhost sshd[456]: Failed password",
                "Syslog",
                "oldhost",
                "[sshd[456]] Failed password",
            ),
            (
                "access.log",
                "127.0.0.1 - jdoe [21/Apr/2023:15:30:45 +0000] \"GET /index.html HTTP/1.1\" 200 1234 \"http://referer.com\" \"Mozilla/5.0\"",
                "WebAccess",
                "127.0.0.1",
                "GET /index.html (Status: 200)",
            ),
            (
                "cbs.log",
                "2023-04-21 15:30:45, Info                  Cbs    Starting TrustedInstaller...",
                "WindowsLog",
                "",
                "[Info] Cbs    Starting TrustedInstaller...",
            ),
            (
                "WindowsUpdate.log",
                "2023/04/21 15:30:45 1234 5678 Misc Validating signature...",
                "WindowsLog",
                "",
                "[1234] 5678 Misc Validating signature...",
            ),
        ];

        let registry = ParserRegistry::new();
        for (filename, line, want_type, want_host, want_msg) in cases {
            let dir = TempDir::new().unwrap();
            let cache = HeaderCache::new();
            let path = write_file(&dir, filename, &format!("{line}\n"));

            let parser = registry.select(&path, &cache);
            let events = parser
                .parse(&path, &crate::cancel::CancelToken::new())
                .unwrap();
            assert_eq!(events.len(), 1, "{filename}");

            let event = &events[0];
            assert_eq!(event.event_type, want_type, "{filename}");
            assert_eq!(event.host, want_host, "{filename}");
            assert!(
                event.message.contains(want_msg),
                "{filename}: got {}",
                event.message
            );
            assert!(!event.has_sentinel_timestamp(), "{filename}");
        }
    }

    #[test]
    fn test_powershell_dispatch() {
        assert_eq!(
            select_name(Path::new("PowerShell_transcript.WS01.txt")),
            "powershell-transcript"
        );
        assert_eq!(
            select_name(Path::new("scriptblock-export.txt")),
            "powershell-scriptblock"
        );
    }
}
