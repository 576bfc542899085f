//! Channel layer: prompt detection and stream framing.
//!
//! The [`Listener`] owns both halves of the remote shell stream and turns
//! raw bytes into prompt-terminated chunks, one per submitted command.

mod buffer;
mod listener;
mod prompt;

pub use buffer::{ChunkBuffer, DEFAULT_CAPACITY};
pub use listener::Listener;
pub use prompt::{
    COLON_RULE, ColonPrompt, MIN_TERMINATED_LEN, Prompt, PromptMatcher, PromptSet, SuffixPrompt,
};
