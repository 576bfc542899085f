//! Session driver: runs an ordered list of commands over one shell stream.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::channel::{DEFAULT_CAPACITY, Listener, PromptSet};
use crate::command::{Command, OutputLevel};
use crate::error::{ChannelError, CommandError, Error, Result, Stage};

/// Sink for the visible output of `Output` commands, one line per call.
pub type OutputHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Output handler printing each line to stdout.
pub fn stdout_handler() -> OutputHandler {
    Arc::new(|line| println!("{}", line))
}

/// Session-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time allowed for the login banner to end in a prompt.
    pub login_timeout: Duration,

    /// Largest chunk of output accepted before a prompt is seen.
    pub buffer_capacity: usize,

    /// Command started on the remote side.
    pub shell: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_timeout: Duration::from_secs(30),
            buffer_capacity: DEFAULT_CAPACITY,
            shell: "/bin/sh".to_string(),
        }
    }
}

/// Drives commands over one interactive shell stream.
///
/// Commands run strictly in order, one at a time. Every failure aborts the
/// remaining list; nothing is retried.
pub struct Session {
    host: String,
    prompts: Arc<PromptSet>,
    config: SessionConfig,
    output: OutputHandler,
}

impl Session {
    /// Create a session for `host`, used to label logs and errors.
    pub fn new(host: impl Into<String>, prompts: impl Into<Arc<PromptSet>>) -> Self {
        Self {
            host: host.into(),
            prompts: prompts.into(),
            config: SessionConfig::default(),
            output: stdout_handler(),
        }
    }

    /// Replace the session settings.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the sink receiving visible command output.
    pub fn with_output_handler(mut self, output: OutputHandler) -> Self {
        self.output = output;
        self
    }

    /// The host label.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run `commands` over `stream`.
    ///
    /// The login banner is awaited and discarded first. `cancel` is checked
    /// before each command; a wait already in progress is bounded only by the
    /// command's timeout. The stream is dropped when the run ends.
    pub async fn run<S>(
        &self,
        stream: S,
        cancel: &CancellationToken,
        commands: &mut [Command],
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut listener = Listener::spawn(stream, self.prompts.clone(), self.config.buffer_capacity);

        let login_timeout = self.config.login_timeout;
        let banner = tokio::time::timeout(login_timeout, listener.next_chunk())
            .await
            .map_err(|_| ChannelError::LoginTimeout(login_timeout))
            .and_then(|chunk| chunk)
            .map_err(|source| Error::Channel {
                host: self.host.clone(),
                source,
            })?;
        debug!("[{}]: login output of {} bytes ignored", self.host, banner.len());

        for cmd in commands.iter_mut() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled {
                    host: self.host.clone(),
                    command: cmd.display_input().to_string(),
                });
            }
            self.run_chained(&mut listener, cmd).await?;
        }

        listener.shutdown();
        Ok(())
    }

    /// Run one primary command and at most one follow-up.
    async fn run_chained(&self, listener: &mut Listener, cmd: &mut Command) -> Result<()> {
        let level = cmd.output_level();
        self.log(level, format_args!("cmd [{}] starting...", cmd.display_input()));

        let proceed = self
            .execute(listener, cmd)
            .await
            .map_err(|source| self.fail(cmd, Stage::Primary, source))?;

        if let Some(mut follow_up) = cmd.continuation(proceed) {
            let next = follow_up.command_mut();
            let next_level = next.output_level();
            self.log(
                next_level,
                format_args!("  next cmd [{}] starting...", next.display_input()),
            );

            // The follow-up's verdict has nothing left to select.
            self.execute(listener, next)
                .await
                .map_err(|source| self.fail(next, Stage::FollowUp, source))?;

            self.log(next_level, format_args!("  next cmd [{}] ok", next.display_input()));
            cmd.set_follow_up(follow_up);
        }

        self.log(level, format_args!("cmd [{}] ok", cmd.display_input()));
        Ok(())
    }

    /// Submit, wait, record, show output and run the callback.
    async fn execute(
        &self,
        listener: &mut Listener,
        cmd: &mut Command,
    ) -> std::result::Result<bool, CommandError> {
        if cmd.input().is_empty() {
            return Err(CommandError::EmptyInput);
        }

        listener.submit(cmd.input()).await?;
        let chunk = tokio::time::timeout(cmd.timeout(), listener.next_chunk())
            .await
            .map_err(|_| CommandError::Timeout(cmd.timeout()))??;

        cmd.record(&chunk)?;
        if cmd.checks_return_code() && cmd.result().return_code != 0 {
            self.log_warn(
                cmd.output_level(),
                format_args!(
                    "cmd [{}] exited with non-zero {}",
                    cmd.display_input(),
                    cmd.result().return_code
                ),
            );
        }

        if let Some(lines) = cmd.visible_output() {
            for line in lines {
                (self.output)(line);
            }
        }

        cmd.invoke_callback()
    }

    fn fail(&self, cmd: &Command, stage: Stage, source: CommandError) -> Error {
        self.log_warn(
            cmd.output_level(),
            format_args!("{} [{}] failed: {}", stage, cmd.display_input(), source),
        );
        Error::Command {
            host: self.host.clone(),
            command: cmd.display_input().to_string(),
            stage,
            source,
        }
    }

    fn log(&self, level: OutputLevel, msg: std::fmt::Arguments<'_>) {
        if level != OutputLevel::Silent {
            info!("[{}]: {}", self.host, msg);
        }
    }

    fn log_warn(&self, level: OutputLevel, msg: std::fmt::Arguments<'_>) {
        if level != OutputLevel::Silent {
            warn!("[{}]: {}", self.host, msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Instant;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    use super::*;
    use crate::channel::Prompt;
    use crate::command::FollowUp;

    const PROMPT: &str = "pi@raspberrypi:~ $ ";

    /// Scripted remote shell: answers each line with `reply(line)` followed by the prompt.
    fn fake_shell<F>(reply: F) -> DuplexStream
    where
        F: Fn(&str) -> Option<(Duration, String)> + Send + 'static,
    {
        let (local, remote) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(remote);
            let mut lines = BufReader::new(read_half).lines();
            if write_half.write_all(format!("Linux raspberrypi\r\n{PROMPT}").as_bytes()).await.is_err() {
                return;
            }
            while let Ok(Some(line)) = lines.next_line().await {
                let Some((delay, output)) = reply(&line) else {
                    break;
                };
                tokio::time::sleep(delay).await;
                let chunk = format!("{output}{PROMPT}");
                if write_half.write_all(chunk.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
        local
    }

    fn pi_shell() -> DuplexStream {
        fake_shell(|line| {
            let reply = match line {
                "whoami;echo $?" => "pi\r\n0\r\n".to_string(),
                "cd /tmp;pwd" => "/tmp\r\n".to_string(),
                "false;echo $?" => "1\r\n".to_string(),
                "sleep 2;echo $?" => return Some((Duration::from_secs(2), "0\r\n".into())),
                "ls -l a.txt;echo $?" => "ls: cannot access 'a.txt'\r\n2\r\n".to_string(),
                "date;echo $?" => "Mon Oct 19\r\nnot-a-number\r\n".to_string(),
                other => format!("{}\r\n0\r\n", other.trim_end_matches(";echo $?")),
            };
            Some((Duration::ZERO, reply))
        })
    }

    fn captured() -> (OutputHandler, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let handler: OutputHandler = Arc::new(move |line| sink.lock().unwrap().push(line.to_string()));
        (handler, lines)
    }

    fn session(output: OutputHandler) -> Session {
        Session::new("raspberrypi", PromptSet::new().with_prompt("user", Prompt::USER))
            .with_output_handler(output)
    }

    #[tokio::test]
    async fn test_whoami_then_cd() {
        let (handler, lines) = captured();
        let mut commands = vec![
            Command::builder("whoami").output_level(OutputLevel::Output).build(),
            Command::builder("cd /tmp;pwd")
                .output_level(OutputLevel::Output)
                .no_check_return_code()
                .build(),
        ];

        session(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap();

        assert_eq!(*lines.lock().unwrap(), vec!["pi", "/tmp"]);
        assert_eq!(commands[0].result().return_code, 0);
        assert_eq!(commands[1].result().output, vec!["/tmp", PROMPT]);
    }

    #[tokio::test]
    async fn test_non_zero_return_code_fails_run() {
        let (handler, _) = captured();
        let mut commands = vec![Command::new("false"), Command::new("whoami")];

        let err = session(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap_err();

        assert_eq!(err.return_code(), Some(1));
        assert!(err.to_string().contains("false;echo $?"));
        assert_eq!(commands[0].result().return_code, 1);
        // The run stopped before the second command.
        assert_eq!(commands[1].result().lines, 0);
    }

    #[tokio::test]
    async fn test_callback_may_tolerate_non_zero() {
        let (handler, _) = captured();
        let mut commands = vec![
            Command::builder("false").callback(|c| Ok(c.result().return_code == 1)).build(),
            Command::new("whoami"),
        ];

        session(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap();
        assert_eq!(commands[1].result().output[0], "pi");
    }

    #[tokio::test]
    async fn test_invalid_return_code_is_parse_error() {
        let (handler, _) = captured();
        let mut commands = vec![Command::new("date")];

        let err = session(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap_err();

        assert_eq!(err.return_code(), None);
        assert!(matches!(
            err,
            Error::Command {
                source: CommandError::InvalidReturnCode { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_timeout_names_command() {
        let (handler, _) = captured();
        let mut commands = vec![
            Command::builder("sleep 2")
                .timeout(Duration::from_millis(100))
                .build(),
        ];

        let start = Instant::now();
        let err = session(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(err.is_timeout());
        match err {
            Error::Command { command, stage, .. } => {
                assert_eq!(command, "sleep 2;echo $?");
                assert_eq!(stage, Stage::Primary);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_before_start_submits_nothing() {
        let (handler, _) = captured();
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let seen = submitted.clone();
        let shell = fake_shell(move |line| {
            seen.lock().unwrap().push(line.to_string());
            Some((Duration::ZERO, "0\r\n".to_string()))
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut commands = vec![Command::new("touch a.txt"), Command::new("touch b.txt")];

        let err = session(handler)
            .run(shell, &cancel, &mut commands)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_commands() {
        let (handler, _) = captured();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut commands = vec![
            Command::builder("whoami")
                .callback(move |_| {
                    trigger.cancel();
                    Ok(true)
                })
                .build(),
            Command::new("cd /tmp"),
        ];

        let err = session(handler)
            .run(pi_shell(), &cancel, &mut commands)
            .await
            .unwrap_err();

        match err {
            Error::Cancelled { command, .. } => assert_eq!(command, "cd /tmp;echo $?"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_follow_up_on_proceed() {
        let (handler, _) = captured();
        let mut commands = vec![
            Command::builder("ls -l b.txt")
                .next_command(|_| FollowUp::new("rm -f b.txt"))
                .default_next_command(|_| FollowUp::new("touch b.txt"))
                .build(),
        ];

        session(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap();

        let follow_up = commands[0].follow_up().unwrap();
        assert_eq!(follow_up.input(), "rm -f b.txt;echo $?");
        assert_eq!(follow_up.result().output[0], "rm -f b.txt");
    }

    #[tokio::test]
    async fn test_follow_up_on_decline() {
        let (handler, _) = captured();
        let mut commands = vec![
            Command::builder("ls -l a.txt")
                .callback(|c| Ok(c.result().return_code == 0))
                .next_command(|_| FollowUp::new("rm -f a.txt"))
                .default_next_command(|c| {
                    FollowUp::new(format!("echo missing {}", c.result().return_code))
                })
                .build(),
        ];

        session(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap();

        let follow_up = commands[0].follow_up().unwrap();
        assert_eq!(follow_up.input(), "echo missing 2;echo $?");
    }

    #[tokio::test]
    async fn test_follow_up_failure_is_reported_as_next_cmd() {
        let (handler, _) = captured();
        let mut commands = vec![
            Command::builder("whoami")
                .next_command(|_| FollowUp::new("false"))
                .build(),
        ];

        let err = session(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap_err();

        match err {
            Error::Command { stage, source, .. } => {
                assert_eq!(stage, Stage::FollowUp);
                assert!(matches!(source, CommandError::NonZeroReturnCode { code: 1 }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_callback_error_aborts_run() {
        let (handler, _) = captured();
        let mut commands = vec![
            Command::builder("whoami")
                .callback(|c| match c.result().line_from_end(3) {
                    Some("root") => Ok(true),
                    other => Err(CommandError::unexpected("root", other.unwrap_or_default())),
                })
                .build(),
        ];

        let err = session(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected \"root\", got \"pi\""));
    }

    #[tokio::test]
    async fn test_silent_command_is_masked_in_errors() {
        let (handler, _) = captured();
        let mut commands = vec![
            Command::builder("hunter2")
                .output_level(OutputLevel::Silent)
                .callback(|_| Err(CommandError::callback("wrong password")))
                .build(),
        ];

        let err = session(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(!msg.contains("hunter2"));
        assert!(msg.contains("********"));
    }

    #[tokio::test]
    async fn test_empty_input_is_rejected() {
        let (handler, _) = captured();
        let mut commands = vec![
            Command::new(""),
            Command::builder("").no_check_return_code().build(),
        ];
        assert_eq!(commands[0].input(), "");

        let err = session(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Command {
                source: CommandError::EmptyInput,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_remote_exit_is_listener_failure() {
        let (handler, _) = captured();
        let shell = fake_shell(|line| (line != "exit").then(|| (Duration::ZERO, "0\r\n".into())));
        let mut commands = vec![
            Command::builder("exit").no_check_return_code().build(),
        ];

        let err = session(handler)
            .run(shell, &CancellationToken::new(), &mut commands)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Command {
                source: CommandError::Listener(ChannelError::Closed),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_login_timeout() {
        let (handler, _) = captured();
        let (local, _remote) = tokio::io::duplex(64);
        let config = SessionConfig {
            login_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        };

        let err = session(handler)
            .with_config(config)
            .run(local, &CancellationToken::new(), &mut [])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Channel {
                source: ChannelError::LoginTimeout(_),
                ..
            }
        ));
        assert_eq!(err.host(), Some("raspberrypi"));
        assert!(err.to_string().starts_with("[raspberrypi]: "));
    }

    struct CaptureLogger;

    static RECORDS: Mutex<Vec<String>> = Mutex::new(Vec::new());
    static LOGGER: CaptureLogger = CaptureLogger;

    impl log::Log for CaptureLogger {
        fn enabled(&self, _: &log::Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &log::Record<'_>) {
            RECORDS
                .lock()
                .unwrap()
                .push(format!("{} {}", record.level(), record.args()));
        }

        fn flush(&self) {}
    }

    /// Records logged for `host`. Each test uses its own host label.
    fn logged(host: &str) -> Vec<String> {
        static INSTALL: std::sync::Once = std::sync::Once::new();
        INSTALL.call_once(|| {
            if log::set_logger(&LOGGER).is_ok() {
                log::set_max_level(log::LevelFilter::Trace);
            }
        });
        let label = format!("[{host}]");
        RECORDS
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.contains(&label))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn test_failure_is_logged() {
        logged("timeout-log");
        let (handler, _) = captured();
        let mut commands = vec![
            Command::builder("sleep 2")
                .timeout(Duration::from_millis(100))
                .build(),
        ];

        Session::new("timeout-log", PromptSet::new().with_prompt("user", Prompt::USER))
            .with_output_handler(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap_err();

        let lines = logged("timeout-log");
        assert!(lines.iter().any(|l| l.starts_with("INFO") && l.contains("starting...")));
        assert!(lines.iter().any(|l| {
            l.starts_with("WARN") && l.contains("cmd [sleep 2;echo $?] failed: Canceled by timeout")
        }));
    }

    #[tokio::test]
    async fn test_follow_up_failure_is_logged() {
        logged("next-log");
        let (handler, _) = captured();
        let mut commands = vec![
            Command::builder("whoami")
                .next_command(|_| FollowUp::new("false"))
                .build(),
        ];

        Session::new("next-log", PromptSet::new().with_prompt("user", Prompt::USER))
            .with_output_handler(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap_err();

        let lines = logged("next-log");
        assert!(lines.iter().any(|l| l.contains("next cmd [false;echo $?] failed")));
    }

    #[tokio::test]
    async fn test_silent_failure_is_not_logged() {
        logged("silent-log");
        let (handler, _) = captured();
        let mut commands = vec![
            Command::builder("hunter2")
                .output_level(OutputLevel::Silent)
                .callback(|_| Err(CommandError::callback("wrong password")))
                .build(),
        ];

        Session::new("silent-log", PromptSet::new().with_prompt("user", Prompt::USER))
            .with_output_handler(handler)
            .run(pi_shell(), &CancellationToken::new(), &mut commands)
            .await
            .unwrap_err();

        let lines = logged("silent-log");
        assert!(!lines.iter().any(|l| l.contains("failed")));
        assert!(!lines.iter().any(|l| l.contains("hunter2")));
    }

    #[test]
    fn test_session_config_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"shell": "/bin/bash"}"#).unwrap();
        assert_eq!(config.shell, "/bin/bash");
        assert_eq!(config.buffer_capacity, 65 * 1024);
        assert_eq!(config.login_timeout, Duration::from_secs(30));
    }
}
