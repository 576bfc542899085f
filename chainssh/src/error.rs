//! Error types for chainssh.

use std::fmt;
use std::io;
use std::num::ParseIntError;
use std::time::Duration;

use thiserror::Error;

/// Main error type for chainssh operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH connection, authentication or shell setup failed
    #[error("[{host}]: Transport error: {source}")]
    Transport {
        host: String,
        #[source]
        source: TransportError,
    },

    /// Listener errors raised outside of a command (login banner wait)
    #[error("[{host}]: Channel error: {source}")]
    Channel {
        host: String,
        #[source]
        source: ChannelError,
    },

    /// The caller cancelled the run before a command started
    #[error("[{host}]: Canceled before cmd [{command}]")]
    Cancelled { host: String, command: String },

    /// A command (or its follow-up) failed and aborted the run
    #[error("[{host}]: Error in {stage} [{command}]: {source}")]
    Command {
        host: String,
        command: String,
        stage: Stage,
        #[source]
        source: CommandError,
    },

    /// Invalid prompt, command or client configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl Error {
    /// The remote exit status, if this is the distinguished non-zero return code error.
    pub fn return_code(&self) -> Option<i32> {
        match self {
            Error::Command {
                source: CommandError::NonZeroReturnCode { code },
                ..
            } => Some(*code),
            _ => None,
        }
    }

    /// Whether a command timed out waiting for its prompt.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Command {
                source: CommandError::Timeout(_),
                ..
            }
        )
    }

    /// Whether the run was cancelled by the caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// The host label the failure belongs to, if any.
    pub fn host(&self) -> Option<&str> {
        match self {
            Error::Transport { host, .. }
            | Error::Channel { host, .. }
            | Error::Cancelled { host, .. }
            | Error::Command { host, .. } => Some(host),
            Error::InvalidConfig { .. } => None,
        }
    }

    pub(crate) fn transport(host: impl Into<String>, source: TransportError) -> Self {
        Error::Transport {
            host: host.into(),
            source,
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Which half of a chained step a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// A command from the caller's list.
    Primary,
    /// The follow-up fired by a primary command's continuation.
    FollowUp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Primary => f.write_str("cmd"),
            Stage::FollowUp => f.write_str("next cmd"),
        }
    }
}

/// Transport layer errors (SSH connection, authentication, shell setup).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host is not present in known_hosts (strict verification)
    #[error("Host key for {host}:{port} is unknown")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key does not match the known_hosts entry
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// known_hosts could not be read or written
    #[error("Known hosts error: {0}")]
    KnownHosts(String),

    /// Failed to allocate the pseudo-terminal
    #[error("PTY request failed on {host}: {source}")]
    PtyRequestFailed {
        host: String,
        #[source]
        source: russh::Error,
    },

    /// Failed to start the remote shell
    #[error("Failed to start '{shell}' on {host}: {source}")]
    ShellStartFailed {
        host: String,
        shell: String,
        #[source]
        source: russh::Error,
    },

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Stream listener errors (framing, stream termination).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The remote stream ended; no further chunks will be delivered
    #[error("Channel closed")]
    Closed,

    /// Reading or writing the remote stream failed
    #[error("Channel I/O error: {0}")]
    Io(#[from] io::Error),

    /// Output grew past the chunk buffer before a prompt was seen
    #[error("Output exceeded {capacity} bytes without a prompt")]
    BufferOverflow { capacity: usize },

    /// The login banner never ended in a prompt
    #[error("No prompt after login within {0:?}")]
    LoginTimeout(Duration),
}

/// Errors attached to a single command execution.
#[derive(Error, Debug)]
pub enum CommandError {
    /// No prompt was seen within the command's timeout
    #[error("Canceled by timeout after {0:?}")]
    Timeout(Duration),

    /// The listener stopped while the command was in flight
    #[error("Wait failed: {0}")]
    Listener(#[from] ChannelError),

    /// The command text was empty
    #[error("Input is empty")]
    EmptyInput,

    /// The captured chunk had no bytes at all
    #[error("Output is 0 byte")]
    EmptyOutput,

    /// Too few lines to hold a return code
    #[error("Couldn't check return code in {lines} line(s) of output")]
    ReturnCodeMissing { lines: usize },

    /// The return-code line is not an integer
    #[error("Invalid return code '{line}': {source}")]
    InvalidReturnCode {
        line: String,
        #[source]
        source: ParseIntError,
    },

    /// The remote command exited with a non-zero status
    #[error("Return code is not 0 (got {code})")]
    NonZeroReturnCode { code: i32 },

    /// A callback found output it did not expect
    #[error("Wrong output: expected {expected:?}, got {actual:?}")]
    UnexpectedOutput { expected: String, actual: String },

    /// A callback failed with its own error
    #[error("Callback failed: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl CommandError {
    /// Wrap an arbitrary error raised inside a callback.
    pub fn callback(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        CommandError::Callback(err.into())
    }

    pub(crate) fn unexpected(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        CommandError::UnexpectedOutput {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Result type alias using chainssh's Error.
pub type Result<T> = std::result::Result<T, Error>;
