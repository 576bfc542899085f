//! Ready-made commands for common shell chores.

use crate::channel::{ColonPrompt, Prompt, PromptMatcher};
use crate::command::{Command, CommandOption, FollowUp, OutputLevel};
use crate::error::CommandError;

/// Check that the login user is `expected` by running `whoami`.
pub fn check_user(expected: impl Into<String>) -> Command {
    let expected = expected.into();
    Command::builder("whoami")
        .output_level(OutputLevel::Output)
        .callback(move |c| {
            // user, return code, prompt
            let user = c.result().line_from_end(3).unwrap_or_default();
            if user != expected {
                return Err(CommandError::unexpected(expected.as_str(), user));
            }
            Ok(true)
        })
        .build()
}

/// Change the working directory to `dir` and verify it with `pwd`.
pub fn change_directory(dir: impl Into<String>) -> Command {
    let dir = dir.into();
    Command::builder(format!("cd {};pwd", dir))
        .no_check_return_code()
        .output_level(OutputLevel::Output)
        .callback(move |c| {
            let cwd = c.result().line_from_end(2).unwrap_or_default();
            if cwd != dir {
                return Err(CommandError::unexpected(dir.as_str(), cwd));
            }
            Ok(true)
        })
        .build()
}

/// Switch to `user` with `su -`, answering the password question.
///
/// `new_prompt` is the prompt shown once the switch succeeded; it must also
/// be registered on the session, or the password answer never completes.
/// The password is sent by a silent follow-up and never logged.
pub fn switch_user(user: &str, password: impl Into<String>, new_prompt: Prompt) -> Command {
    let password = password.into();
    Command::builder(format!("su - {}", user))
        .no_check_return_code()
        .callback(|c| {
            let last = c.result().last_line().unwrap_or_default();
            if !ColonPrompt.is_terminated(last.as_bytes()) {
                return Err(CommandError::unexpected("password prompt", last));
            }
            Ok(true)
        })
        .next_command(move |_| {
            let answer = Command::with_options(
                password.as_str(),
                [
                    CommandOption::NoCheckReturnCode,
                    CommandOption::OutputLevel(OutputLevel::Silent),
                    CommandOption::callback(move |c| {
                        let last = c.result().last_line().unwrap_or_default();
                        if !new_prompt.matches_line(last) {
                            return Err(CommandError::unexpected(
                                format!("prompt ending in {:?}", new_prompt.terminator() as char),
                                last,
                            ));
                        }
                        Ok(true)
                    }),
                ],
            );
            FollowUp::from_terminal(answer)
        })
        .build()
}

/// Leave the current shell.
pub fn exit() -> Command {
    Command::builder("exit").no_check_return_code().build()
}
