//! Named configuration knobs for commands.

use std::time::Duration;

use super::{Callback, Command, FollowUp, NextCommand, OutputLevel};
use crate::error::{CommandError, Result};

/// One configuration mutation, applied in order at construction time.
pub enum CommandOption {
    /// Do not append the return-code suffix nor parse the exit status.
    NoCheckReturnCode,
    /// Reporting level.
    OutputLevel(OutputLevel),
    /// Time allowed for the prompt to come back.
    Timeout(Duration),
    /// Replace the default callback.
    Callback(Callback),
    /// Follow-up fired when the callback returns `true`.
    NextCommand(NextCommand),
    /// Follow-up fired when the callback returns `false`.
    DefaultNextCommand(NextCommand),
}

impl CommandOption {
    /// Wrap a callback closure.
    pub fn callback<F>(f: F) -> Self
    where
        F: FnMut(&Command) -> std::result::Result<bool, CommandError> + Send + 'static,
    {
        CommandOption::Callback(Box::new(f))
    }

    /// Wrap a follow-up builder fired on proceed.
    pub fn next_command<F>(f: F) -> Self
    where
        F: Fn(&Command) -> FollowUp + Send + Sync + 'static,
    {
        CommandOption::NextCommand(Box::new(f))
    }

    /// Wrap a follow-up builder fired on decline.
    pub fn default_next_command<F>(f: F) -> Self
    where
        F: Fn(&Command) -> FollowUp + Send + Sync + 'static,
    {
        CommandOption::DefaultNextCommand(Box::new(f))
    }

    pub(super) fn apply(self, cmd: &mut Command) {
        match self {
            CommandOption::NoCheckReturnCode => cmd.disable_return_code_check(),
            CommandOption::OutputLevel(level) => cmd.set_output_level(level),
            CommandOption::Timeout(timeout) => cmd.set_timeout(timeout),
            CommandOption::Callback(callback) => cmd.set_callback(callback),
            CommandOption::NextCommand(next) => cmd.set_next(true, next),
            CommandOption::DefaultNextCommand(next) => cmd.set_next(false, next),
        }
    }
}

/// Builder for [`Command`] and [`FollowUp`].
///
/// Each method records a [`CommandOption`]; they are applied in call order.
///
/// # Example
///
/// ```rust
/// use chainssh::{Command, OutputLevel};
///
/// let cd = Command::builder("cd /tmp;pwd")
///     .no_check_return_code()
///     .output_level(OutputLevel::Output)
///     .build();
///
/// assert_eq!(cd.input(), "cd /tmp;pwd");
/// ```
pub struct CommandBuilder {
    input: String,
    options: Vec<CommandOption>,
}

impl CommandBuilder {
    /// Create a new builder for the given command line.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            options: Vec::new(),
        }
    }

    /// Disable return-code checking.
    pub fn no_check_return_code(self) -> Self {
        self.option(CommandOption::NoCheckReturnCode)
    }

    /// Set the reporting level.
    pub fn output_level(self, level: OutputLevel) -> Self {
        self.option(CommandOption::OutputLevel(level))
    }

    /// Set the command timeout.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.option(CommandOption::Timeout(timeout))
    }

    /// Set the callback run after the output is captured.
    pub fn callback<F>(self, f: F) -> Self
    where
        F: FnMut(&Command) -> std::result::Result<bool, CommandError> + Send + 'static,
    {
        self.option(CommandOption::callback(f))
    }

    /// Set the follow-up fired when the callback proceeds.
    pub fn next_command<F>(self, f: F) -> Self
    where
        F: Fn(&Command) -> FollowUp + Send + Sync + 'static,
    {
        self.option(CommandOption::next_command(f))
    }

    /// Set the follow-up fired when the callback declines.
    pub fn default_next_command<F>(self, f: F) -> Self
    where
        F: Fn(&Command) -> FollowUp + Send + Sync + 'static,
    {
        self.option(CommandOption::default_next_command(f))
    }

    /// Record an arbitrary option.
    pub fn option(mut self, option: CommandOption) -> Self {
        self.options.push(option);
        self
    }

    /// Build the command.
    pub fn build(self) -> Command {
        Command::with_options(self.input, self.options)
    }

    /// Build a follow-up. Fails if a continuation was configured.
    pub fn build_follow_up(self) -> Result<FollowUp> {
        FollowUp::with_options(self.input, self.options)
    }
}
