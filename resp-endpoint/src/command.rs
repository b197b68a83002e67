//! Commands and their completion handles

use crate::core::{
    codec::RedisCodec,
    error::{RedisError, RedisResult},
    value::RespValue,
};
use crate::output::CommandOutput;
use crate::protocol::CommandArgs;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::warn;

/// A command as seen by an endpoint queue.
///
/// `complete` and `fail` are terminal: whichever runs first decides the
/// outcome, and every later call returns `false` without touching it.
pub trait RedisCommand: Send {
    /// Command name, used for logging
    fn keyword(&self) -> &str;

    /// The full request frame
    fn encoded(&self) -> &Bytes;

    /// Complete with a reply. Error replies complete the command with
    /// [`RedisError::Server`].
    fn complete(&mut self, value: RespValue) -> bool;

    /// Complete with a failure
    fn fail(&mut self, cause: RedisError) -> bool;

    /// Whether a terminal state was reached
    fn is_done(&self) -> bool;
}

/// A command whose reply is interpreted by the output `O`
pub struct Command<O: CommandOutput> {
    keyword: String,
    encoded: Bytes,
    output: Option<O>,
    completer: Option<oneshot::Sender<RedisResult<O::Output>>>,
}

impl<O: CommandOutput> Command<O> {
    /// Build a command from its keyword and argument list
    pub fn new<C: RedisCodec>(
        keyword: impl Into<String>,
        args: &CommandArgs<C>,
        output: O,
    ) -> (Self, Completion<O::Output>) {
        let keyword = keyword.into();
        let encoded = args.encode_command(&keyword);
        Self::from_frame(keyword, encoded, output)
    }

    /// Build a command around an already encoded frame
    pub fn from_frame(
        keyword: impl Into<String>,
        encoded: Bytes,
        output: O,
    ) -> (Self, Completion<O::Output>) {
        let (tx, rx) = oneshot::channel();
        let command = Self {
            keyword: keyword.into(),
            encoded,
            output: Some(output),
            completer: Some(tx),
        };
        (command, Completion { rx })
    }

    fn finish(&mut self, result: impl FnOnce(O) -> RedisResult<O::Output>) -> bool {
        let (Some(output), Some(completer)) = (self.output.take(), self.completer.take()) else {
            warn!(command = %self.keyword, "Command already completed, ignoring result");
            return false;
        };
        // The caller may have stopped waiting; the slot is still consumed.
        let _ = completer.send(result(output));
        true
    }
}

impl<O: CommandOutput> RedisCommand for Command<O> {
    fn keyword(&self) -> &str {
        &self.keyword
    }

    fn encoded(&self) -> &Bytes {
        &self.encoded
    }

    fn complete(&mut self, value: RespValue) -> bool {
        self.finish(|output| match value {
            RespValue::Error(msg) => Err(RedisError::Server(msg)),
            other => output.complete(other),
        })
    }

    fn fail(&mut self, cause: RedisError) -> bool {
        self.finish(|_| Err(cause))
    }

    fn is_done(&self) -> bool {
        self.completer.is_none()
    }
}

/// Caller side of a command.
///
/// Await it for the result, or poll it with [`Completion::try_result`].
/// Dropping it does not cancel the command; the command still occupies its
/// place in the queue and consumes its reply.
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<RedisResult<T>>,
}

impl<T> Completion<T> {
    /// Wait at most `duration` for the result
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Timeout`] if no result arrived in time, or the
    /// command's own failure.
    pub async fn timeout(self, duration: Duration) -> RedisResult<T> {
        match tokio::time::timeout(duration, self).await {
            Ok(result) => result,
            Err(_) => Err(RedisError::Timeout),
        }
    }

    /// Take the result if the command already finished
    pub fn try_result(&mut self) -> Option<RedisResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(RedisError::Closed)),
        }
    }

    /// Block the current thread until the command finishes.
    ///
    /// Must not be called from inside an async runtime.
    ///
    /// # Errors
    ///
    /// Returns the command's failure.
    pub fn blocking_wait(self) -> RedisResult<T> {
        self.rx.blocking_recv().unwrap_or(Err(RedisError::Closed))
    }
}

impl<T> Future for Completion<T> {
    type Output = RedisResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(RedisError::Closed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::StringCodec;
    use crate::output::{IntegerOutput, StatusOutput};
    use std::sync::Arc;

    fn incr() -> (Command<IntegerOutput>, Completion<i64>) {
        let args = CommandArgs::new(Arc::new(StringCodec)).add_key(&"counter".to_string());
        Command::new("INCR", &args, IntegerOutput)
    }

    #[tokio::test]
    async fn test_complete_once() {
        let (mut command, completion) = incr();
        assert_eq!(&command.encoded()[..], b"*2\r\n$4\r\nINCR\r\n$7\r\ncounter\r\n");
        assert!(!command.is_done());

        assert!(command.complete(RespValue::Integer(5)));
        assert!(command.is_done());
        assert!(!command.complete(RespValue::Integer(6)));
        assert!(!command.fail(RedisError::Closed));

        assert_eq!(completion.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_fail_then_complete_keeps_failure() {
        let (mut command, completion) = incr();
        assert!(command.fail(RedisError::Connection("reset".into())));
        assert!(!command.complete(RespValue::Integer(1)));
        assert!(matches!(
            completion.await,
            Err(RedisError::Connection(msg)) if msg == "reset"
        ));
    }

    #[tokio::test]
    async fn test_error_reply_fails_only_this_command() {
        let (mut command, completion) = incr();
        command.complete(RespValue::Error(
            "WRONGTYPE Operation against a key".to_string(),
        ));
        let err = completion.await.unwrap_err();
        assert_eq!(err.server_error_code(), Some("WRONGTYPE"));
    }

    #[tokio::test]
    async fn test_shape_mismatch() {
        let (mut command, completion) = incr();
        command.complete(RespValue::Array(Vec::new()));
        assert!(matches!(completion.await, Err(RedisError::Type(_))));
    }

    #[test]
    fn test_try_result() {
        let (mut command, mut completion) = Command::from_frame(
            "PING",
            Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"),
            StatusOutput,
        );
        assert!(completion.try_result().is_none());
        command.complete(RespValue::SimpleString("PONG".into()));
        assert_eq!(completion.try_result().unwrap().unwrap(), "PONG");
    }

    #[test]
    fn test_dropped_command_reports_closed() {
        let (command, completion) = incr();
        drop(command);
        assert!(matches!(completion.blocking_wait(), Err(RedisError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_command_usable() {
        let (mut command, completion) = incr();
        let result = completion.timeout(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(RedisError::Timeout)));
        assert!(command.complete(RespValue::Integer(1)));
    }
}
