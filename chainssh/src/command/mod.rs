//! Commands, their execution policy and single-level chaining.
//!
//! A [`Command`] is built once, before a run, and mutated only by the
//! session that executes it. After its callback decides whether to proceed,
//! at most one continuation fires and produces a [`FollowUp`]: a command that
//! cannot carry a continuation of its own.

mod builder;
mod result;

pub use builder::{CommandBuilder, CommandOption};
pub use result::CommandResult;

use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CommandError, Error, Result};

/// Timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shell suffix printing the exit status of the command before it.
pub const RETURN_CODE_SUFFIX: &str = ";echo $?";

/// Replacement for the input of `Silent` commands in errors.
pub(crate) const MASKED_INPUT: &str = "********";

/// Callback run after a command's output is captured.
///
/// Returns whether to proceed. `true` fires the `next_command` continuation,
/// `false` the `default_next_command` one. An error aborts the run.
pub type Callback = Box<dyn FnMut(&Command) -> std::result::Result<bool, CommandError> + Send>;

/// Builds the follow-up from the executed primary command.
pub type NextCommand = Box<dyn Fn(&Command) -> FollowUp + Send + Sync>;

/// How much a command reports while it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLevel {
    /// Nothing is logged. Use for secrets such as passwords.
    Silent,
    /// Start and end of the command are logged.
    #[default]
    Info,
    /// Like `Info`, and the captured output is written to the output handler.
    Output,
}

/// The default callback: proceed, unless the return code is checked and non-zero.
pub fn default_callback(cmd: &Command) -> std::result::Result<bool, CommandError> {
    if cmd.checks_return_code() && cmd.result().return_code != 0 {
        return Err(CommandError::NonZeroReturnCode {
            code: cmd.result().return_code,
        });
    }
    Ok(true)
}

/// What happens after a command's callback returns.
#[derive(Default)]
pub(crate) enum Continuation {
    /// Nothing follows.
    #[default]
    Terminal,
    /// One of two follow-ups may fire, selected by the callback's verdict.
    Branch {
        on_proceed: Option<NextCommand>,
        on_decline: Option<NextCommand>,
    },
}

impl Continuation {
    fn set(&mut self, proceed: bool, next: NextCommand) {
        if let Continuation::Terminal = self {
            *self = Continuation::Branch {
                on_proceed: None,
                on_decline: None,
            };
        }
        if let Continuation::Branch {
            on_proceed,
            on_decline,
        } = self
        {
            if proceed {
                *on_proceed = Some(next);
            } else {
                *on_decline = Some(next);
            }
        }
    }

    fn select(&self, proceed: bool) -> Option<&NextCommand> {
        match self {
            Continuation::Terminal => None,
            Continuation::Branch { on_proceed, .. } if proceed => on_proceed.as_ref(),
            Continuation::Branch { on_decline, .. } => on_decline.as_ref(),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Continuation::Terminal)
    }
}

/// A command line to run in the remote shell.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use chainssh::{Command, FollowUp, OutputLevel};
///
/// let ls = Command::builder("ls -l report.txt")
///     .output_level(OutputLevel::Output)
///     .timeout(Duration::from_secs(10))
///     .callback(|c| Ok(c.result().return_code == 0))
///     .next_command(|_| FollowUp::new("rm -f report.txt"))
///     .build();
///
/// assert_eq!(ls.input(), "ls -l report.txt;echo $?");
/// ```
pub struct Command {
    input: String,
    timeout: Duration,
    check_return_code: bool,
    output_level: OutputLevel,
    callback: Option<Callback>,
    continuation: Continuation,
    result: CommandResult,
    follow_up: Option<Box<FollowUp>>,
}

impl Command {
    /// Create a command with the default policy.
    pub fn new(input: impl Into<String>) -> Self {
        Self::with_options(input, std::iter::empty())
    }

    /// Start building a command.
    pub fn builder(input: impl Into<String>) -> CommandBuilder {
        CommandBuilder::new(input)
    }

    /// Create a command, applying `options` in order.
    ///
    /// When the return code is checked (the default), [`RETURN_CODE_SUFFIX`]
    /// is appended to a non-empty input once all options are applied.
    pub fn with_options(
        input: impl Into<String>,
        options: impl IntoIterator<Item = CommandOption>,
    ) -> Self {
        let mut cmd = Self {
            input: input.into(),
            timeout: DEFAULT_TIMEOUT,
            check_return_code: true,
            output_level: OutputLevel::Info,
            callback: None,
            continuation: Continuation::Terminal,
            result: CommandResult::default(),
            follow_up: None,
        };
        for option in options {
            option.apply(&mut cmd);
        }
        // An empty line stays empty so the session can reject it.
        if cmd.check_return_code && !cmd.input.is_empty() {
            cmd.input.push_str(RETURN_CODE_SUFFIX);
        }
        cmd
    }

    /// The line sent to the shell, return-code suffix included.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Time allowed for the prompt to come back.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the exit status is echoed and parsed.
    pub fn checks_return_code(&self) -> bool {
        self.check_return_code
    }

    /// Reporting level of this command.
    pub fn output_level(&self) -> OutputLevel {
        self.output_level
    }

    /// Output captured by the last execution.
    pub fn result(&self) -> &CommandResult {
        &self.result
    }

    /// The follow-up that ran after this command, if a continuation fired.
    pub fn follow_up(&self) -> Option<&FollowUp> {
        self.follow_up.as_deref()
    }

    /// Check if a continuation is attached.
    pub fn has_continuation(&self) -> bool {
        !self.continuation.is_terminal()
    }

    /// Lines to show for an `Output` command, `None` for other levels.
    pub fn visible_output(&self) -> Option<Vec<&str>> {
        (self.output_level == OutputLevel::Output)
            .then(|| self.result.visible_lines(self.check_return_code))
    }

    /// Input as it may appear in logs and errors.
    pub(crate) fn display_input(&self) -> &str {
        match self.output_level {
            OutputLevel::Silent => MASKED_INPUT,
            _ => &self.input,
        }
    }

    /// Populate the result from a completed chunk.
    pub(crate) fn record(&mut self, chunk: &str) -> std::result::Result<(), CommandError> {
        self.result = CommandResult::from_chunk(chunk);
        if self.check_return_code {
            if chunk.is_empty() {
                return Err(CommandError::EmptyOutput);
            }
            self.result.parse_return_code()?;
        }
        Ok(())
    }

    /// Run the configured callback, or [`default_callback`].
    pub(crate) fn invoke_callback(&mut self) -> std::result::Result<bool, CommandError> {
        let mut callback = self.callback.take();
        let verdict = match callback.as_mut() {
            Some(f) => f(self),
            None => default_callback(self),
        };
        self.callback = callback;
        verdict
    }

    /// Build the follow-up selected by the callback's verdict.
    pub(crate) fn continuation(&self, proceed: bool) -> Option<FollowUp> {
        self.continuation.select(proceed).map(|next| next(self))
    }

    pub(crate) fn set_follow_up(&mut self, follow_up: FollowUp) {
        self.follow_up = Some(Box::new(follow_up));
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub(crate) fn set_output_level(&mut self, level: OutputLevel) {
        self.output_level = level;
    }

    pub(crate) fn disable_return_code_check(&mut self) {
        self.check_return_code = false;
    }

    pub(crate) fn set_callback(&mut self, callback: Callback) {
        self.callback = Some(callback);
    }

    pub(crate) fn set_next(&mut self, proceed: bool, next: NextCommand) {
        self.continuation.set(proceed, next);
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("input", &self.display_input())
            .field("timeout", &self.timeout)
            .field("check_return_code", &self.check_return_code)
            .field("output_level", &self.output_level)
            .field("custom_callback", &self.callback.is_some())
            .field("has_continuation", &self.has_continuation())
            .field("result", &self.result)
            .finish()
    }
}

/// A command run as a continuation. It never has a continuation itself.
#[derive(Debug)]
pub struct FollowUp(Command);

impl FollowUp {
    /// Create a follow-up with the default policy.
    pub fn new(input: impl Into<String>) -> Self {
        Self(Command::new(input))
    }

    /// Create a follow-up, applying `options` in order.
    ///
    /// Fails if the options attach a continuation.
    pub fn with_options(
        input: impl Into<String>,
        options: impl IntoIterator<Item = CommandOption>,
    ) -> Result<Self> {
        Self::try_from(Command::with_options(input, options))
    }

    /// The underlying command.
    pub fn command(&self) -> &Command {
        &self.0
    }

    pub(crate) fn command_mut(&mut self) -> &mut Command {
        &mut self.0
    }

    /// Wrap a command built without `NextCommand` or `DefaultNextCommand`.
    pub(crate) fn from_terminal(cmd: Command) -> Self {
        debug_assert!(!cmd.has_continuation());
        Self(cmd)
    }
}

impl TryFrom<Command> for FollowUp {
    type Error = Error;

    fn try_from(cmd: Command) -> Result<Self> {
        if cmd.has_continuation() {
            return Err(Error::invalid_config(format!(
                "follow-up [{}] cannot have a next command",
                cmd.display_input()
            )));
        }
        Ok(Self(cmd))
    }
}

impl Deref for FollowUp {
    type Target = Command;

    fn deref(&self) -> &Command {
        &self.0
    }
}
