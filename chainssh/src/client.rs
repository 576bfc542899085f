//! SSH client running command lists on a remote interactive shell.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, warn};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use crate::channel::{PromptMatcher, PromptSet};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::session::{OutputHandler, Session, SessionConfig, stdout_handler};
use crate::transport::{AuthMethod, HostKeyVerification, SshConfig, SshTransport};

/// Builder for constructing a [`Client`].
///
/// # Example
///
/// ```rust,no_run
/// use chainssh::{ClientBuilder, Command, PromptSet};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), chainssh::Error> {
/// let client = ClientBuilder::new("raspberrypi.local")
///     .username("pi")
///     .password("raspberry")
///     .prompts(PromptSet::shell())
///     .build()?;
///
/// let mut commands = vec![Command::new("uname -a")];
/// client.run(&CancellationToken::new(), &mut commands).await?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    host: String,
    port: u16,
    username: Option<String>,
    auth: AuthMethod,
    timeout: Duration,
    terminal_width: u32,
    terminal_height: u32,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    prompts: PromptSet,
    session: SessionConfig,
    output: Option<OutputHandler>,
}

impl ClientBuilder {
    /// Create a new client builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: None,
            auth: AuthMethod::None,
            timeout: Duration::from_secs(30),
            terminal_width: 80,
            terminal_height: 40,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            prompts: PromptSet::new(),
            session: SessionConfig::default(),
            output: None,
        }
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username for authentication.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.auth = AuthMethod::password(password);
        self
    }

    /// Set private key authentication.
    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.auth = AuthMethod::PrivateKey {
            path: key_path.into(),
            passphrase: None,
        };
        self
    }

    /// Set private key authentication with passphrase.
    pub fn private_key_with_passphrase(
        mut self,
        key_path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.auth = AuthMethod::PrivateKey {
            path: key_path.into(),
            passphrase: Some(SecretString::from(passphrase.into())),
        };
        self
    }

    /// Register a named prompt matcher.
    pub fn prompt(mut self, name: impl Into<String>, matcher: impl PromptMatcher + 'static) -> Self {
        self.prompts.insert(name, matcher);
        self
    }

    /// Replace all prompt matchers.
    pub fn prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = prompts;
        self
    }

    /// Set the remote shell command (default: `/bin/sh`).
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.session.shell = shell.into();
        self
    }

    /// Set how long to wait for the prompt after login.
    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.session.login_timeout = timeout;
        self
    }

    /// Set the largest chunk of output accepted before a prompt.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.session.buffer_capacity = capacity;
        self
    }

    /// Replace all session settings.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    /// Set the connection timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set terminal dimensions.
    pub fn terminal_size(mut self, width: u32, height: u32) -> Self {
        self.terminal_width = width;
        self.terminal_height = height;
        self
    }

    /// Set the host key verification mode.
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Use a known_hosts file other than `~/.ssh/known_hosts`.
    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Set the sink for the output of `Output` commands (default: stdout).
    pub fn output_handler(mut self, output: OutputHandler) -> Self {
        self.output = Some(output);
        self
    }

    /// Build the client.
    ///
    /// This does not connect; every [`Client::run`] opens its own connection.
    pub fn build(self) -> Result<Client> {
        let username = self
            .username
            .ok_or_else(|| Error::invalid_config("Username is required"))?;

        if self.prompts.is_empty() {
            return Err(Error::invalid_config("At least one prompt is required"));
        }

        let ssh = SshConfig {
            host: self.host,
            port: self.port,
            username,
            auth: self.auth,
            timeout: self.timeout,
            terminal_width: self.terminal_width,
            terminal_height: self.terminal_height,
            host_key_verification: self.host_key_verification,
            known_hosts_path: self.known_hosts_path,
        };

        let session = Session::new(ssh.host.clone(), self.prompts)
            .with_config(self.session)
            .with_output_handler(self.output.unwrap_or_else(stdout_handler));

        Ok(Client { ssh, session })
    }
}

/// Runs command lists on one remote host.
pub struct Client {
    ssh: SshConfig,
    session: Session,
}

impl Client {
    /// Get the SSH configuration.
    pub fn ssh_config(&self) -> &SshConfig {
        &self.ssh
    }

    /// Get the session driver.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Connect, run `commands` in order on a fresh shell, and disconnect.
    ///
    /// The connection is closed whatever the outcome. A failure to close is
    /// logged and does not replace the run's result.
    pub async fn run(&self, cancel: &CancellationToken, commands: &mut [Command]) -> Result<()> {
        let transport = SshTransport::connect(&self.ssh)
            .await
            .map_err(|e| Error::transport(self.ssh.socket_addr(), e))?;

        let stream = match transport.open_shell(&self.session.config().shell).await {
            Ok(stream) => stream,
            Err(e) => {
                Self::close(transport, self.session.host()).await;
                return Err(Error::transport(self.ssh.socket_addr(), e));
            }
        };

        let result = self.session.run(stream, cancel, commands).await;
        Self::close(transport, self.session.host()).await;
        result
    }

    async fn close(transport: SshTransport, host: &str) {
        match transport.close().await {
            Ok(()) => debug!("[{}]: disconnected", host),
            Err(e) => warn!("[{}]: failed to close connection: {}", host, e),
        }
    }
}
