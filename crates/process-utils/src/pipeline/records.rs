//! Record reader for child process diagnostics.
//!
//! Tools such as ffmpeg rewrite their progress line with a carriage return,
//! so splitting on `\n` alone would hold those updates back until the
//! process exits. Records here end at either `\n` or `\r`, and invalid UTF-8
//! is replaced rather than treated as an error.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

pub(crate) struct RecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    scratch: [u8; 4096],
}

impl<R> RecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            scratch: [0u8; 4096],
        }
    }

    /// Returns the next non-empty record, or `None` at end of stream.
    pub(crate) async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(idx) = self
                .pending
                .iter()
                .position(|&b| matches!(b, b'\n' | b'\r'))
            {
                let record_bytes: Vec<u8> = self.pending.drain(..idx).collect();
                let delimiters = self
                    .pending
                    .iter()
                    .take_while(|&&b| matches!(b, b'\n' | b'\r'))
                    .count();
                self.pending.drain(..delimiters);

                let record = String::from_utf8_lossy(&record_bytes).trim().to_string();
                if record.is_empty() {
                    continue;
                }
                return Ok(Some(record));
            }

            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                let record = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                return Ok((!record.is_empty()).then_some(record));
            }

            self.pending.extend_from_slice(&self.scratch[..n]);
        }
    }
}
