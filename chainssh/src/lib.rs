//! # chainssh
//!
//! Async automation of an interactive remote shell over SSH.
//!
//! chainssh opens one SSH session, starts a shell on a pseudo-terminal and
//! runs an ordered list of commands through it, the way a person would type
//! them. The end of each command's output is detected from the prompt the
//! shell re-displays, since terminal output has no framing.
//!
//! ## Features
//!
//! - Async SSH connections via russh
//! - Prompt detection by byte position from the end, or by suffix
//! - Exit status capture through an appended `;echo $?`
//! - Per-command timeout, reporting level and callback
//! - One-level chaining: a callback's verdict may fire a single follow-up
//!   command, such as answering a password question
//! - Cooperative cancellation between commands
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chainssh::{CancellationToken, ClientBuilder, Command, OutputLevel, PromptSet, commands};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), chainssh::Error> {
//!     let client = ClientBuilder::new("raspberrypi.local")
//!         .username("pi")
//!         .password("raspberry")
//!         .prompts(PromptSet::shell())
//!         .build()?;
//!
//!     let mut commands = vec![
//!         commands::check_user("pi"),
//!         Command::builder("id").output_level(OutputLevel::Output).build(),
//!         commands::change_directory("/tmp"),
//!         Command::new("ls -l"),
//!     ];
//!
//!     client.run(&CancellationToken::new(), &mut commands).await?;
//!     println!("return code of id: {}", commands[1].result().return_code);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod client;
pub mod command;
pub mod commands;
pub mod error;
pub mod session;
pub mod transport;

// Re-export main types for convenience
pub use channel::{Prompt, PromptMatcher, PromptSet};
pub use client::{Client, ClientBuilder};
pub use command::{Command, CommandBuilder, CommandOption, CommandResult, FollowUp, OutputLevel};
pub use error::Error;
pub use session::{OutputHandler, Session, SessionConfig};
pub use tokio_util::sync::CancellationToken;
pub use transport::{AuthMethod, HostKeyVerification, SshConfig};
