//! Run a short command list on a remote shell.
//!
//! Checks the login user, prints `id`, moves to `/tmp` and lists it.
//! Press Ctrl-C to stop before the next command starts.
//!
//! # Prerequisites
//!
//! - SSH server reachable from this machine
//! - Valid credentials (username/password or SSH key)
//!
//! # Usage
//!
//! With password authentication:
//! ```bash
//! cargo run --example run_commands -- --host raspberrypi.local --user pi --password raspberry
//! ```
//!
//! With SSH key authentication:
//! ```bash
//! cargo run --example run_commands -- --host raspberrypi.local --user pi --key ~/.ssh/id_ed25519
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chainssh::{CancellationToken, ClientBuilder, Command, OutputLevel, PromptSet, commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut builder = ClientBuilder::new(&args.host)
        .port(args.port)
        .username(&args.user)
        .prompts(PromptSet::shell())
        .timeout(Duration::from_secs(args.timeout));

    if let Some(password) = &args.password {
        builder = builder.password(password);
    } else if let Some(key_path) = &args.key {
        builder = builder.private_key(key_path);
    } else {
        eprintln!("Error: Must provide either --password or --key");
        std::process::exit(1);
    }

    let client = builder.build()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut commands = vec![
        commands::check_user(&args.user),
        Command::builder("id").output_level(OutputLevel::Output).build(),
        commands::change_directory("/tmp"),
        Command::new("ls -l"),
    ];

    client.run(&cancel, &mut commands).await?;

    let ls = &commands[3];
    println!("ls -l returned {} in {} line(s)", ls.result().return_code, ls.result().lines);
    println!("OK");

    Ok(())
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    key: Option<PathBuf>,
    timeout: u64,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut parsed = Self {
            host: "localhost".to_string(),
            port: 22,
            user: env::var("USER").unwrap_or_else(|_| "pi".to_string()),
            password: None,
            key: None,
            timeout: 30,
        };

        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--host" | "-h" => {
                    if let Some(v) = iter.next() {
                        parsed.host = v.clone();
                    }
                }
                "--port" | "-p" => {
                    if let Some(v) = iter.next() {
                        parsed.port = v.parse().unwrap_or(22);
                    }
                }
                "--user" | "-u" => {
                    if let Some(v) = iter.next() {
                        parsed.user = v.clone();
                    }
                }
                "--password" | "-P" => parsed.password = iter.next().cloned(),
                "--key" | "-k" => parsed.key = iter.next().map(PathBuf::from),
                "--timeout" | "-t" => {
                    if let Some(v) = iter.next() {
                        parsed.timeout = v.parse().unwrap_or(30);
                    }
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                other => eprintln!("Unknown argument: {}", other),
            }
        }

        parsed
    }

    fn print_help() {
        println!(
            r#"chainssh run_commands example

USAGE:
    cargo run --example run_commands -- [OPTIONS]

OPTIONS:
    -h, --host <HOST>        Target host [default: localhost]
    -p, --port <PORT>        SSH port [default: 22]
    -u, --user <USER>        Username [default: $USER]
    -P, --password <PASS>    Password for authentication
    -k, --key <PATH>         Path to SSH private key
    -t, --timeout <SECS>     Connection timeout [default: 30]
    --help                   Print this help message
"#
        );
    }
}
