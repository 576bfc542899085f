//! Captured output of one executed command.

use memchr::memmem;

use crate::error::CommandError;

/// Line terminator emitted by the remote terminal.
const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Output lines and exit status captured for one command.
///
/// The last line is always the prompt the shell re-displayed. When the
/// return code is checked, the line before it holds the echoed exit status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Captured chunk split on `\r\n`, prompt line included.
    pub output: Vec<String>,

    /// Number of entries in `output`.
    pub lines: usize,

    /// Exit status of the remote command (only set when the return code is checked).
    pub return_code: i32,
}

impl CommandResult {
    /// Split a completed chunk into lines.
    pub fn from_chunk(chunk: &str) -> Self {
        let output = split_lines(chunk);
        Self {
            lines: output.len(),
            output,
            return_code: 0,
        }
    }

    /// Parse the exit status from the second-to-last line and record it.
    pub(crate) fn parse_return_code(&mut self) -> Result<i32, CommandError> {
        let line = self
            .line_from_end(2)
            .ok_or(CommandError::ReturnCodeMissing { lines: self.lines })?;
        let code = line
            .parse::<i32>()
            .map_err(|source| CommandError::InvalidReturnCode {
                line: line.to_string(),
                source,
            })?;
        self.return_code = code;
        Ok(code)
    }

    /// The `n`th line counted from the end, starting at 1 for the prompt line.
    pub fn line_from_end(&self, n: usize) -> Option<&str> {
        let idx = self.lines.checked_sub(n)?;
        self.output.get(idx).map(String::as_str)
    }

    /// The last line, normally the prompt.
    pub fn last_line(&self) -> Option<&str> {
        self.line_from_end(1)
    }

    /// Lines produced by the command itself.
    ///
    /// The prompt line is dropped. With `return_code_checked`, the exit status
    /// line is dropped too and the output stops at a line that is exactly
    /// `0`, which guards against the status being echoed twice.
    pub fn visible_lines(&self, return_code_checked: bool) -> Vec<&str> {
        let trailing = if return_code_checked { 2 } else { 1 };
        let end = self.lines.saturating_sub(trailing);
        let lines = self.output[..end].iter().map(String::as_str);
        if return_code_checked {
            lines.take_while(|line| *line != "0").collect()
        } else {
            lines.collect()
        }
    }

    /// Check if the remote command exited with status 0.
    pub fn is_success(&self) -> bool {
        self.return_code == 0
    }
}

fn split_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;
    for pos in memmem::find_iter(text.as_bytes(), LINE_TERMINATOR) {
        lines.push(text[start..pos].to_string());
        start = pos + LINE_TERMINATOR.len();
    }
    lines.push(text[start..].to_string());
    lines
}
