//! JSON Lines sink: one object per event, newline-terminated.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::event::Event;

use super::{Sink, SinkError, FLUSH_INTERVAL, WRITE_BUFFER_SIZE};

pub struct JsonlSink {
    writer: BufWriter<File>,
    record_count: usize,
}

impl JsonlSink {
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let file = File::create(path)?;
        Ok(Self {
            // 64 KiB buffer; flushing mostly happens via overflow, the
            // explicit flush below bounds data loss on a crash.
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            record_count: 0,
        })
    }
}

impl Sink for JsonlSink {
    fn write(&mut self, events: &[Event]) -> Result<(), SinkError> {
        for event in events {
            // serde_json leaves `<`, `>`, `&` alone, which keeps raw
            // message bytes intact for downstream tools.
            serde_json::to_writer(&mut self.writer, event)?;
            self.writer.write_all(b"\n")?;

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
