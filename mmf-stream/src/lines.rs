use std::sync::Arc;

use crate::DataStream;

/// Split any [`DataStream`] into lines.
pub struct LineReader {
    stream: Arc<dyn DataStream>,
    buffer: Vec<u8>,
    position: usize,
}

impl LineReader {
    const BUFFER_SIZE: usize = 4 * 1024;

    pub fn new(stream: Arc<dyn DataStream>) -> Self {
        LineReader {
            stream,
            buffer: Vec::with_capacity(Self::BUFFER_SIZE),
            position: 0,
        }
    }

    pub fn stream(&self) -> &Arc<dyn DataStream> {
        &self.stream
    }

    /// Replace the contents of `to` with the next line, without its terminator.
    ///
    /// Both `\n` and `\r\n` end a line, invalid UTF-8 is replaced. Returns `false` if there was
    /// no more data.
    pub fn get_line(&mut self, to: &mut String) -> bool {
        to.clear();

        let mut line = Vec::new();
        let mut consumed = false;

        loop {
            if self.position >= self.buffer.len() && !self.fill() {
                break;
            }

            let rest = &self.buffer[self.position..];
            consumed = true;

            if let Some(end) = rest.iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&rest[..end]);
                self.position += end + 1;
                break;
            }

            line.extend_from_slice(rest);
            self.position = self.buffer.len();
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }

        to.push_str(&String::from_utf8_lossy(&line));
        consumed
    }

    /// No buffered data left and the stream is at its end.
    pub fn eof(&self) -> bool {
        self.position >= self.buffer.len() && self.stream.eof()
    }

    fn fill(&mut self) -> bool {
        self.buffer.resize(Self::BUFFER_SIZE, 0);
        let read = self.stream.read(&mut self.buffer);
        self.buffer.truncate(read);
        self.position = 0;
        read > 0
    }
}

impl Iterator for LineReader {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let mut line = String::new();
        self.get_line(&mut line).then_some(line)
    }
}
