//! Fallback for XML files no specific parser claimed: one event per
//! shallow element, so the artifact still lands on the timeline.

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

pub const EVENT_TYPE: &str = "XMLElement";

/// Very large documents are cut off after this many elements.
const MAX_ELEMENTS: usize = 10_000;

pub struct GenericXmlParser;

impl EventParser for GenericXmlParser {
    fn can_parse(&self, path: &Path, _cache: &HeaderCache) -> bool {
        extension_lower(path) == "xml"
    }

    fn parse(&self, path: &Path, cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        // No timestamps inside arbitrary XML; the file's modification
        // time anchors the elements.
        let ts = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let file = File::open(path).map_err(|e| ParseError::open(path, e))?;
        let mut reader = Reader::from_reader(BufReader::new(file));

        let mut events = Vec::new();
        let mut buf = Vec::new();
        let mut element_path: Vec<String> = Vec::new();
        let mut element_count: i64 = 0;
        let mut tokens = 0usize;

        loop {
            tokens += 1;
            if tokens % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ParseError::Cancelled(path.to_path_buf()));
            }

            match reader.read_event_into(&mut buf) {
                Ok(XmlToken::Start(element)) => {
                    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                    element_path.push(name);
                    if let Some(event) = element_event(
                        &element,
                        &element_path,
                        ts,
                        &source,
                        &path_str,
                        &mut element_count,
                    ) {
                        events.push(event);
                        if element_count as usize >= MAX_ELEMENTS {
                            break;
                        }
                    }
                }
                Ok(XmlToken::Empty(element)) => {
                    // Self-closing elements never get an End token, so
                    // the path is extended only for the duration of the
                    // event construction.
                    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                    element_path.push(name);
                    if let Some(event) = element_event(
                        &element,
                        &element_path,
                        ts,
                        &source,
                        &path_str,
                        &mut element_count,
                    ) {
                        events.push(event);
                    }
                    element_path.pop();
                    if element_count as usize >= MAX_ELEMENTS {
                        break;
                    }
                }
                Ok(XmlToken::End(_)) => {
                    element_path.pop();
                }
                Ok(XmlToken::Eof) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "stopping generic XML stream");
                    break;
                }
            }
            buf.clear();
        }

        info!(file = %path.display(), events = events.len(), "parsed generic XML");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "generic-xml"
    }
}

fn element_event(
    element: &quick_xml::events::BytesStart<'_>,
    element_path: &[String],
    ts: DateTime<Utc>,
    source: &str,
    path_str: &str,
    element_count: &mut i64,
) -> Option<Event> {
    let depth = element_path.len();
    if !(2..=3).contains(&depth) {
        return None;
    }
    *element_count += 1;

    let attrs: Vec<String> = element
        .attributes()
        .flatten()
        .filter_map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().ok()?;
            Some(format!("{key}={value}"))
        })
        .collect();

    let mut message = format!("Element: {}", element_path.join("/"));
    if !attrs.is_empty() {
        message.push_str(" | Attributes: ");
        message.push_str(&attrs.join(", "));
    }

    Some(Event::new(
        ts,
        source,
        EVENT_TYPE,
        *element_count,
        "",
        "",
        message,
        path_str,
    ))
}
