//! Stream listener turning a raw shell stream into request/response chunks.
//!
//! Two tasks run for the lifetime of a session:
//!
//! - the writer takes one input line from the submission queue, arms a
//!   rendezvous with the reader, writes the line and then waits until the
//!   reader has framed the output;
//! - the reader accumulates bytes until the [`PromptSet`] recognizes a prompt,
//!   delivers the chunk and releases the writer.
//!
//! Both queues hold a single item, so at most one command is in flight and
//! chunks come back in submission order.

use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::buffer::ChunkBuffer;
use super::prompt::PromptSet;
use crate::error::ChannelError;

/// Size of a single read from the stream.
const READ_SIZE: usize = 4096;

/// A framed chunk, or the failure that ended the stream.
type Frame = Result<String, ChannelError>;

/// Writer-side half of the per-command rendezvous.
type Rendezvous = oneshot::Sender<()>;

/// Request/response view of a remote shell stream.
///
/// Dropping the listener stops both tasks.
pub struct Listener {
    submissions: mpsc::Sender<String>,
    frames: mpsc::Receiver<Frame>,
    shutdown: CancellationToken,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Listener {
    /// Start listening on a duplex stream.
    pub fn spawn<S>(stream: S, prompts: Arc<PromptSet>, buffer_capacity: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::spawn_split(read_half, write_half, prompts, buffer_capacity)
    }

    /// Start listening on separate read and write halves.
    pub fn spawn_split<R, W>(
        reader: R,
        writer: W,
        prompts: Arc<PromptSet>,
        buffer_capacity: usize,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (submit_tx, submit_rx) = mpsc::channel(1);
        let (frame_tx, frame_rx) = mpsc::channel(1);
        let (arm_tx, arm_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();

        let writer = tokio::spawn(write_loop(
            writer,
            submit_rx,
            arm_tx,
            frame_tx.clone(),
            shutdown.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            reader,
            prompts,
            ChunkBuffer::new(buffer_capacity),
            frame_tx,
            arm_rx,
            shutdown.clone(),
        ));

        Self {
            submissions: submit_tx,
            frames: frame_rx,
            shutdown,
            writer,
            reader,
        }
    }

    /// Queue one input line for transmission. A newline is appended on write.
    ///
    /// Fails with [`ChannelError::Closed`] once the listener has stopped.
    pub async fn submit(&self, input: &str) -> Result<(), ChannelError> {
        self.submissions
            .send(input.to_owned())
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Wait for the next completed chunk.
    ///
    /// An I/O or overflow failure is returned once; afterwards, and on
    /// end-of-stream, this returns [`ChannelError::Closed`].
    pub async fn next_chunk(&mut self) -> Result<String, ChannelError> {
        self.frames.recv().await.unwrap_or(Err(ChannelError::Closed))
    }

    /// Check whether the listener tasks have stopped.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop both tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown.cancel();
        // The reader may be parked on a read that never completes.
        self.reader.abort();
        self.writer.abort();
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut submissions: mpsc::Receiver<String>,
    arm: mpsc::Sender<Rendezvous>,
    frames: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let input = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = submissions.recv() => match next {
                Some(input) => input,
                None => break,
            },
        };

        // Armed before writing so that any output answering this line finds it.
        let (framed_tx, framed_rx) = oneshot::channel();
        if arm.send(framed_tx).await.is_err() {
            break;
        }

        let mut line = input.into_bytes();
        line.push(b'\n');
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            warn!("listener: write failed: {}", e);
            let _ = frames.send(Err(ChannelError::Io(e))).await;
            break;
        }
        trace!("listener: wrote {} bytes", line.len());

        if framed_rx.await.is_err() {
            // Reader gone without framing the output.
            break;
        }
    }
    shutdown.cancel();
    debug!("listener: writer stopped");
}

async fn read_loop<R>(
    mut reader: R,
    prompts: Arc<PromptSet>,
    mut buffer: ChunkBuffer,
    frames: mpsc::Sender<Frame>,
    mut armed: mpsc::Receiver<Rendezvous>,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut scratch = [0u8; READ_SIZE];
    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = reader.read(&mut scratch) => read,
        };

        let n = match read {
            Ok(0) => {
                debug!("listener: end of stream");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("listener: read failed: {}", e);
                let _ = frames.send(Err(ChannelError::Io(e))).await;
                break;
            }
        };

        if let Err(e) = buffer.extend(&scratch[..n]) {
            warn!("listener: {}", e);
            let _ = frames.send(Err(e)).await;
            break;
        }

        let Some(rule) = prompts.matched(buffer.as_slice()) else {
            trace!("listener: {} bytes buffered, no prompt yet", buffer.len());
            continue;
        };

        debug!("listener: chunk of {} bytes framed by '{}' prompt", buffer.len(), rule);
        let chunk = buffer.take_text();
        if frames.send(Ok(chunk)).await.is_err() {
            break;
        }
        if let Ok(framed) = armed.try_recv() {
            let _ = framed.send(());
        }
    }
    shutdown.cancel();
    debug!("listener: reader stopped");
}
