//! CSV sink with the fixed 11-column timeline layout.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use chrono::SecondsFormat;

use crate::event::Event;

use super::{Sink, SinkError, FLUSH_INTERVAL, WRITE_BUFFER_SIZE};

/// Normative column order; downstream tools index by position.
pub const HEADER: [&str; 11] = [
    "timestamp",
    "source",
    "event_type",
    "event_id",
    "user",
    "host",
    "message",
    "path",
    "tags",
    "score",
    "summary",
];

pub struct CsvSink {
    writer: csv::Writer<BufWriter<File>>,
    record_count: usize,
}

impl CsvSink {
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file));
        writer.write_record(HEADER)?;
        writer.flush()?;
        Ok(Self {
            writer,
            record_count: 0,
        })
    }
}

impl Sink for CsvSink {
    fn write(&mut self, events: &[Event]) -> Result<(), SinkError> {
        for event in events {
            let timestamp = event.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true);
            let event_id = event.event_id.to_string();
            let tags = event.tags.join(",");
            let score = format!("{:.2}", event.score);
            self.writer.write_record([
                timestamp.as_str(),
                event.source.as_str(),
                event.event_type.as_str(),
                event_id.as_str(),
                event.user.as_str(),
                event.host.as_str(),
                event.message.as_str(),
                event.path.as_str(),
                tags.as_str(),
                score.as_str(),
                event.summary.as_str(),
            ])?;

            self.record_count += 1;
            if self.record_count % FLUSH_INTERVAL == 0 {
                self.writer.flush()?;
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}
