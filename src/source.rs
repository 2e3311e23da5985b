use crate::error::{PreprocessError, Result};
use std::fmt;
use std::io::{BufRead, BufReader, Cursor, Read};

/// Line reader over a stack of pending byte sources.
///
/// The last element of `pending` is read first. Injected content is pushed on
/// top, so it is consumed before whatever remains of the sources below it.
pub struct LineSource<'r> {
    pending: Vec<Box<dyn BufRead + 'r>>,
    line: usize,
}

impl<'r> LineSource<'r> {
    pub fn new<R: Read + 'r>(input: R) -> Self {
        Self {
            pending: vec![Box::new(BufReader::new(input))],
            line: 0,
        }
    }

    /// Number of lines handed out so far (1-based number of the current line)
    #[must_use]
    pub fn line_number(&self) -> usize {
        self.line
    }

    /// Splices `bytes` in front of all unread input
    pub fn inject(&mut self, bytes: Vec<u8>) {
        if !bytes.is_empty() {
            self.pending.push(Box::new(Cursor::new(bytes)));
        }
    }

    /// Reads the next line including its `\n`.
    ///
    /// A line that runs off the end of one source continues into the next one.
    /// The final chunk of input is returned even without a terminator. Returns
    /// `None` once every source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `PreprocessError::Read` if an underlying reader fails.
    pub fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        while let Some(reader) = self.pending.last_mut() {
            reader
                .read_until(b'\n', &mut line)
                .map_err(|source| PreprocessError::Read {
                    line: self.line + 1,
                    source,
                })?;
            if line.last() == Some(&b'\n') {
                break;
            }
            self.pending.pop();
        }

        if line.is_empty() {
            return Ok(None);
        }
        self.line += 1;
        Ok(Some(line))
    }
}

impl fmt::Debug for LineSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineSource")
            .field("pending", &self.pending.len())
            .field("line", &self.line)
            .finish()
    }
}
