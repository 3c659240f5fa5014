//! Browser history SQLite databases: Chromium family (Chrome, Edge,
//! Chromium), Firefox, and Safari.

use std::path::Path;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::parser::cache::HeaderCache;
use crate::parser::timestamp;
use crate::parser::traits::{base_name_lower, source_label, EventParser, ParseError};

pub const EVENT_TYPE: &str = "BrowserHistory";

/// Characters that must not leak into a SQLite URI unencoded; `?` and
/// `#` would otherwise allow a path to smuggle query parameters in.
const URI_ENCODE_SET: &AsciiSet = &CONTROLS.add(b'?').add(b'#').add(b'%').add(b' ');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BrowserKind {
    Chromium,
    Firefox,
    Safari,
}

impl BrowserKind {
    fn label(self) -> &'static str {
        match self {
            BrowserKind::Chromium => "Chrome/Edge",
            BrowserKind::Firefox => "Firefox",
            BrowserKind::Safari => "Safari",
        }
    }
}

fn detect_kind(path: &Path) -> Option<BrowserKind> {
    let base = base_name_lower(path);
    let full = path.to_string_lossy().to_lowercase();

    if base == "history"
        && (full.contains("chrome") || full.contains("edge") || full.contains("chromium"))
    {
        return Some(BrowserKind::Chromium);
    }
    if base == "places.sqlite" && (full.contains("firefox") || full.contains("mozilla")) {
        return Some(BrowserKind::Firefox);
    }
    if base == "history.db" && full.contains("safari") {
        return Some(BrowserKind::Safari);
    }
    None
}

/// Build a read-only URI-mode connection string with the path properly
/// percent-encoded. Windows drive letters become `/C:/...`.
fn sqlite_uri(path: &Path) -> String {
    let mut normalized = path.to_string_lossy().replace('\\', "/");
    if normalized.len() > 1 && normalized.as_bytes()[1] == b':' {
        normalized.insert(0, '/');
    }
    format!(
        "file:{}?mode=ro",
        utf8_percent_encode(&normalized, URI_ENCODE_SET)
    )
}

fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        sqlite_uri(path),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
    )?;
    // A bare open can succeed on a locked database; probing forces the
    // lock to surface here instead of mid-query.
    conn.query_row("SELECT 1", [], |_| Ok(()))?;
    Ok(conn)
}

fn visit_message(title: &str, url: &str, visit_count: i64) -> String {
    if title.is_empty() {
        format!("Visited: {url} (visit count: {visit_count})")
    } else {
        format!("Visited: {title} - {url} (visit count: {visit_count})")
    }
}

/// Safari stores no page titles; fall back to the bare domain.
fn domain_of(url: &str) -> String {
    let trimmed = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.");
    trimmed.split('/').next().unwrap_or(trimmed).to_string()
}

pub struct BrowserHistoryParser;

impl BrowserHistoryParser {
    fn query_rows(
        &self,
        conn: &Connection,
        kind: BrowserKind,
        source: &str,
        path_str: &str,
        cancel: &CancelToken,
        path: &Path,
    ) -> Result<Vec<Event>, ParseError> {
        let sql = match kind {
            BrowserKind::Chromium => {
                "SELECT urls.url, urls.title, visits.visit_time, urls.visit_count \
                 FROM urls JOIN visits ON urls.id = visits.url \
                 ORDER BY visits.visit_time"
            }
            BrowserKind::Firefox => {
                "SELECT moz_places.url, moz_places.title, moz_historyvisits.visit_date, moz_places.visit_count \
                 FROM moz_places JOIN moz_historyvisits ON moz_places.id = moz_historyvisits.place_id \
                 ORDER BY moz_historyvisits.visit_date"
            }
            BrowserKind::Safari => {
                "SELECT history_items.url, history_visits.visit_time, history_items.visit_count \
                 FROM history_items JOIN history_visits ON history_items.id = history_visits.history_item \
                 ORDER BY history_visits.visit_time"
            }
        };

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| ParseError::malformed("browser history", path, e.to_string()))?;

        let mut rows = stmt
            .query([])
            .map_err(|e| ParseError::malformed("browser history", path, e.to_string()))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| ParseError::malformed("browser history", path, e.to_string()))?
        {
            if cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }

            let (ts, title, url, visit_count) = match kind {
                BrowserKind::Chromium => {
                    let url: String = row.get(0).unwrap_or_default();
                    let title: Option<String> = row.get(1).unwrap_or(None);
                    let visit_time: i64 = row.get(2).unwrap_or(0);
                    let visit_count: i64 = row.get(3).unwrap_or(0);
                    (
                        timestamp::webkit_to_utc(visit_time),
                        title.unwrap_or_default(),
                        url,
                        visit_count,
                    )
                }
                BrowserKind::Firefox => {
                    let url: String = row.get(0).unwrap_or_default();
                    let title: Option<String> = row.get(1).unwrap_or(None);
                    let visit_date: i64 = row.get(2).unwrap_or(0);
                    let visit_count: i64 = row.get(3).unwrap_or(0);
                    (
                        timestamp::prtime_to_utc(visit_date),
                        title.unwrap_or_default(),
                        url,
                        visit_count,
                    )
                }
                BrowserKind::Safari => {
                    let url: String = row.get(0).unwrap_or_default();
                    let visit_time: f64 = row.get(1).unwrap_or(0.0);
                    let visit_count: i64 = row.get(2).unwrap_or(0);
                    (
                        timestamp::mac_absolute_to_utc(visit_time),
                        domain_of(&url),
                        url,
                        visit_count,
                    )
                }
            };

            events.push(Event::new(
                ts.unwrap_or(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH),
                source,
                EVENT_TYPE,
                0,
                "",
                "",
                visit_message(&title, &url, visit_count),
                path_str,
            ));
        }

        Ok(events)
    }
}

impl EventParser for BrowserHistoryParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        detect_kind(path).is_some()
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let kind = detect_kind(path).ok_or_else(|| {
            ParseError::malformed("browser history", path, "unable to detect browser type")
        })?;
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        // A live browser holds the database locked; a copy sidesteps the
        // lock and the temp file is removed on drop.
        let mut _temp_copy: Option<tempfile::NamedTempFile> = None;
        let conn = match open_read_only(path) {
            Ok(conn) => conn,
            Err(open_err) => {
                warn!(
                    file = %path.display(),
                    error = %open_err,
                    "database locked or unreadable; copying to temp"
                );
                let temp = tempfile::NamedTempFile::new()
                    .map_err(|e| ParseError::io(path, e))?;
                std::fs::copy(path, temp.path()).map_err(|e| ParseError::io(path, e))?;
                let conn = open_read_only(temp.path())
                    .map_err(|e| ParseError::malformed("browser history", path, e.to_string()))?;
                _temp_copy = Some(temp);
                conn
            }
        };

        let events = self.query_rows(&conn, kind, &source, &path_str, cancel, path)?;

        info!(
            file = %path.display(),
            browser = kind.label(),
            events = events.len(),
            "parsed browser history"
        );
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "browser-history"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detect_by_name_and_path() {
        assert_eq!(
            detect_kind(Path::new("/Users/a/Library/Application Support/Google/Chrome/Default/History")),
            Some(BrowserKind::Chromium)
        );
        assert_eq!(
            detect_kind(Path::new("/home/a/.mozilla/firefox/x.default/places.sqlite")),
            Some(BrowserKind::Firefox)
        );
        assert_eq!(
            detect_kind(Path::new("/Users/a/Library/Safari/History.db")),
            Some(BrowserKind::Safari)
        );
        // Right name, wrong parent path.
        assert_eq!(detect_kind(Path::new("/tmp/History")), None);
        assert_eq!(detect_kind(Path::new("/tmp/places.sqlite")), None);
    }

    #[test]
    fn test_sqlite_uri_encoding() {
        assert_eq!(
            sqlite_uri(Path::new("/data/evidence/History")),
            "file:/data/evidence/History?mode=ro"
        );
        // Windows drive letters gain a leading slash; spaces and query
        // metacharacters are escaped.
        assert_eq!(
            sqlite_uri(Path::new("C:\\Users\\a b\\History?x=1")),
            "file:/C:/Users/a%20b/History%3Fx=1"
        );
    }

    #[test]
    fn test_chromium_history_rows() {
        let dir = TempDir::new().unwrap();
        let db_dir = dir.path().join("chrome");
        std::fs::create_dir_all(&db_dir).unwrap();
        let db_path = db_dir.join("History");

        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE urls (id INTEGER PRIMARY KEY, url TEXT, title TEXT, visit_count INTEGER);
             CREATE TABLE visits (id INTEGER PRIMARY KEY, url INTEGER, visit_time INTEGER);
             INSERT INTO urls VALUES (1, 'https://example.com/page', 'Example', 3);
             INSERT INTO visits VALUES (1, 1, 13253932800000000);",
        )
        .unwrap();
        drop(conn);

        let events = BrowserHistoryParser.parse(&db_path, &CancelToken::new()).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_type, "BrowserHistory");
        assert!(event.message.contains("Example"));
        assert!(event.message.contains("https://example.com/page"));
        assert!(event.message.contains("visit count: 3"));
        // 13 253 932 800 seconds after 1601 = 2021-01-01T00:00:00Z.
        assert_eq!(event.timestamp.timestamp(), 1_609_459_200);
    }

    #[test]
    fn test_safari_title_falls_back_to_domain() {
        assert_eq!(domain_of("https://www.example.com/deep/path"), "example.com");
        assert_eq!(domain_of("http://intranet"), "intranet");
    }
}
