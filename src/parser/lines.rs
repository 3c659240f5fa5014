//! Bounded line reading shared by the text-format parsers.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use super::MAX_LINE_SIZE;

/// Iterator over the lines of a log file.
///
/// Unlike `BufRead::lines` this tolerates invalid UTF-8 (lossy
/// conversion; forensic sources are frequently mixed-encoding) and
/// truncates lines beyond [`MAX_LINE_SIZE`] instead of failing the file.
pub struct LineIter<R: BufRead> {
    reader: R,
    buf: Vec<u8>,
    done: bool,
}

impl LineIter<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> LineIter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for LineIter<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                while self.buf.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
                    self.buf.pop();
                }
                if self.buf.len() > MAX_LINE_SIZE {
                    self.buf.truncate(MAX_LINE_SIZE);
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
