//! Prompt matchers used to decide when a chunk of shell output is complete.
//!
//! Terminal output carries no framing, so the end of a command's output is
//! inferred from its tail: the shell re-displays its prompt once it is ready
//! for more input. Each matcher looks only at the end of the accumulated
//! buffer.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Capability to recognize a terminated chunk of output.
pub trait PromptMatcher: fmt::Debug + Send + Sync {
    /// Returns true if `buf` ends with this prompt.
    fn is_terminated(&self, buf: &[u8]) -> bool;
}

/// A single prompt byte at a fixed offset from the end of the output.
///
/// The terminal prompt `pi@raspberrypi:~ $ ` is described by
/// `Prompt::new(b'$', 2)`: the `$` followed by one trailing space.
///
/// When the remote user can change (for example after `su`), every prompt
/// the session may see must be registered before the run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PromptDef")]
pub struct Prompt {
    terminator: u8,
    offset: usize,
}

#[derive(Deserialize)]
struct PromptDef {
    terminator: u8,
    offset: usize,
}

impl TryFrom<PromptDef> for Prompt {
    type Error = Error;

    fn try_from(def: PromptDef) -> Result<Self> {
        Prompt::new(def.terminator, def.offset)
    }
}

impl Prompt {
    /// Prompt of an ordinary user, like `pi@raspberrypi:~ $ `.
    pub const USER: Prompt = Prompt {
        terminator: b'$',
        offset: 2,
    };

    /// Prompt of the root user, like `root@raspberrypi:~# `.
    pub const ROOT: Prompt = Prompt {
        terminator: b'#',
        offset: 2,
    };

    /// Create a prompt descriptor. `offset` counts from the end and must be at least 1.
    pub fn new(terminator: u8, offset: usize) -> Result<Self> {
        if offset == 0 {
            return Err(Error::invalid_config(format!(
                "prompt offset for {:?} must be at least 1",
                terminator as char
            )));
        }
        Ok(Self { terminator, offset })
    }

    /// The byte expected at the prompt position.
    pub fn terminator(&self) -> u8 {
        self.terminator
    }

    /// Distance of the prompt byte from the end of the output.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Check a single output line (without line terminator) against this prompt.
    pub fn matches_line(&self, line: &str) -> bool {
        self.is_terminated(line.as_bytes())
    }
}

impl PromptMatcher for Prompt {
    fn is_terminated(&self, buf: &[u8]) -> bool {
        buf.len()
            .checked_sub(self.offset)
            .is_some_and(|pos| buf[pos] == self.terminator)
    }
}

/// Output ending with a literal byte string, like `mysql> `.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixPrompt {
    suffix: Vec<u8>,
}

impl SuffixPrompt {
    /// Create a suffix matcher. An empty suffix is rejected since it would match everything.
    pub fn new(suffix: impl Into<Vec<u8>>) -> Result<Self> {
        let suffix = suffix.into();
        if suffix.is_empty() {
            return Err(Error::invalid_config("prompt suffix must not be empty"));
        }
        Ok(Self { suffix })
    }
}

impl PromptMatcher for SuffixPrompt {
    fn is_terminated(&self, buf: &[u8]) -> bool {
        buf.ends_with(&self.suffix)
    }
}

/// Output whose last byte is a colon.
///
/// Catches interactive questions such as `Password:` that never show the
/// shell prompt. Always evaluated first by [`PromptSet`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColonPrompt;

impl PromptMatcher for ColonPrompt {
    fn is_terminated(&self, buf: &[u8]) -> bool {
        buf.last() == Some(&b':')
    }
}

/// Name reported by [`PromptSet::matched`] for the colon rule.
pub const COLON_RULE: &str = "colon";

/// Shortest buffer [`PromptSet`] considers for termination.
pub const MIN_TERMINATED_LEN: usize = 2;

/// Ordered set of named prompt matchers.
///
/// The colon rule is always checked first, then the registered matchers in
/// registration order. Re-registering a name replaces the matcher in place.
#[derive(Debug, Clone, Default)]
pub struct PromptSet {
    matchers: IndexMap<String, Arc<dyn PromptMatcher>>,
}

impl PromptSet {
    /// Create an empty set (only the colon rule applies).
    pub fn new() -> Self {
        Self::default()
    }

    /// The usual pair of shell prompts: `user` (`$`) and `root` (`#`).
    pub fn shell() -> Self {
        Self::new()
            .with_prompt("user", Prompt::USER)
            .with_prompt("root", Prompt::ROOT)
    }

    /// Register a matcher under `name`.
    pub fn with_prompt(mut self, name: impl Into<String>, matcher: impl PromptMatcher + 'static) -> Self {
        self.insert(name, matcher);
        self
    }

    /// Register a matcher under `name`.
    pub fn insert(&mut self, name: impl Into<String>, matcher: impl PromptMatcher + 'static) {
        self.matchers.insert(name.into(), Arc::new(matcher));
    }

    /// Returns true if the buffer ends with any known prompt.
    pub fn is_terminated(&self, buf: &[u8]) -> bool {
        self.matched(buf).is_some()
    }

    /// Name of the first rule that recognizes `buf` as terminated.
    ///
    /// Nothing matches until at least [`MIN_TERMINATED_LEN`] bytes are buffered.
    pub fn matched(&self, buf: &[u8]) -> Option<&str> {
        if buf.len() < MIN_TERMINATED_LEN {
            return None;
        }
        if ColonPrompt.is_terminated(buf) {
            return Some(COLON_RULE);
        }
        self.matchers
            .iter()
            .find(|(_, m)| m.is_terminated(buf))
            .map(|(name, _)| name.as_str())
    }

    /// Number of registered matchers, not counting the colon rule.
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// Check if no matcher is registered.
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// Registered prompt names in evaluation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.matchers.keys().map(String::as_str)
    }
}
