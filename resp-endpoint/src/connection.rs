//! Connection management
//!
//! This module opens TCP connections, performs the `AUTH`/`SELECT` handshake
//! and then drives a connection for an endpoint: one task writes queued frames
//! in order, the read loop decodes replies and hands each one to the endpoint.
//! When the connection drops, in-flight commands fail and the connection is
//! re-established with exponential backoff, resolving the primary again first
//! when a master name is configured.

use crate::command::Command;
use crate::core::{
    codec::RedisCodec,
    config::{ConnectionConfig, EndpointConfig},
    error::{RedisError, RedisResult},
    types::HostAndPort,
    value::RespValue,
};
use crate::endpoint::{ConnectionEvents, Endpoint, Transport};
use crate::output::{CommandOutput, IntegerOutput, StatusOutput};
use crate::protocol::{CommandArgs, RespDecoder};
use crate::pubsub::{PubSubEndpoint, PubSubStream, SharedListener};
use crate::sentinel::{SentinelResolver, TopologyResolver};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const MAX_WRITE_BATCH: usize = 64 * 1024;

/// Open a TCP connection with a timeout and optional keepalive
pub(crate) async fn open(
    addr: &HostAndPort,
    connect_timeout: Duration,
    keepalive: Option<Duration>,
) -> RedisResult<TcpStream> {
    debug!(%addr, "Connecting");
    let stream = timeout(
        connect_timeout,
        TcpStream::connect((addr.host.as_str(), addr.port)),
    )
    .await
    .map_err(|_| RedisError::Timeout)?
    .map_err(|e| RedisError::Connection(format!("Failed to connect to {addr}: {e}")))?;

    stream.set_nodelay(true)?;
    if let Some(keepalive) = keepalive {
        let socket = socket2::SockRef::from(&stream);
        socket
            .set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(keepalive))
            .map_err(|e| RedisError::Connection(format!("Failed to set TCP keepalive: {e}")))?;
    }
    Ok(stream)
}

/// Read buffer plus decoder for one connection
pub(crate) struct ReplyReader {
    decoder: RespDecoder,
    buffer: BytesMut,
}

impl ReplyReader {
    pub(crate) fn new(config: &EndpointConfig) -> Self {
        Self {
            decoder: RespDecoder::with_config(config),
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Read until one complete reply is decoded
    pub(crate) async fn read_reply<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> RedisResult<RespValue> {
        loop {
            if let Some(value) = self.decoder.decode(&mut self.buffer)? {
                return Ok(value);
            }
            let n = reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(RedisError::Connection(
                    "Connection closed by server".to_string(),
                ));
            }
        }
    }
}

/// Write one frame and wait for its reply. Only valid before the connection
/// is handed to the driver.
pub(crate) async fn execute<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    reader: &mut ReplyReader,
    frame: &[u8],
) -> RedisResult<RespValue> {
    stream.write_all(frame).await?;
    stream.flush().await?;
    match reader.read_reply(stream).await? {
        RespValue::Error(msg) => Err(RedisError::Server(msg)),
        other => Ok(other),
    }
}

async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    reader: &mut ReplyReader,
    password: Option<&str>,
    database: u8,
) -> RedisResult<()> {
    let codec = Arc::new(crate::core::codec::StringCodec);

    if let Some(password) = password {
        debug!("Authenticating");
        let frame = CommandArgs::new(Arc::clone(&codec))
            .add(password)
            .encode_command("AUTH");
        match execute(stream, reader, &frame).await {
            Ok(RespValue::SimpleString(ref s)) if s == "OK" => {}
            Ok(other) => {
                return Err(RedisError::Auth(format!(
                    "Unexpected authentication response: {}",
                    other.type_name()
                )))
            }
            Err(RedisError::Server(msg)) => return Err(RedisError::Auth(msg)),
            Err(e) => return Err(e),
        }
    }

    if database != 0 {
        let frame = CommandArgs::new(codec)
            .add(i64::from(database))
            .encode_command("SELECT");
        match execute(stream, reader, &frame).await? {
            RespValue::SimpleString(ref s) if s == "OK" => {}
            other => {
                return Err(RedisError::UnexpectedResponse(format!(
                    "SELECT returned {}",
                    other.type_name()
                )))
            }
        }
    }
    Ok(())
}

/// Where a connector connects to
#[derive(Clone)]
pub enum ConnectTarget {
    /// A fixed address
    Fixed(HostAndPort),
    /// The current primary of a logical master, resolved before every attempt
    Primary {
        /// Logical master name
        master_name: String,
        /// Resolver asked for the address
        resolver: Arc<dyn TopologyResolver>,
    },
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(addr) => f.debug_tuple("Fixed").field(addr).finish(),
            Self::Primary { master_name, .. } => f
                .debug_struct("Primary")
                .field("master_name", master_name)
                .finish_non_exhaustive(),
        }
    }
}

/// Opens ready-to-use connections for a configuration
#[derive(Debug, Clone)]
pub struct Connector {
    target: ConnectTarget,
    config: ConnectionConfig,
}

impl Connector {
    /// Build a connector from a configuration. A sentinel configuration
    /// selects [`SentinelResolver`]; otherwise the first address of the
    /// connection string is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration names no usable address or
    /// its connection string is rejected by
    /// [`ConnectionConfig::with_url_settings`].
    pub fn from_config(config: ConnectionConfig) -> RedisResult<Self> {
        config.endpoint.validate()?;
        let config = config.with_url_settings()?;
        let target = match &config.sentinel {
            Some(sentinel) => ConnectTarget::Primary {
                master_name: sentinel.master_name.clone(),
                resolver: Arc::new(SentinelResolver::new(sentinel.clone())?),
            },
            None => ConnectTarget::Fixed(
                config
                    .parse_endpoints()
                    .into_iter()
                    .next()
                    .ok_or_else(|| RedisError::Config("No endpoints specified".to_string()))?,
            ),
        };
        Ok(Self { target, config })
    }

    /// Build a connector that asks `resolver` for the primary of `master_name`
    #[must_use]
    pub fn with_resolver(
        config: ConnectionConfig,
        master_name: impl Into<String>,
        resolver: Arc<dyn TopologyResolver>,
    ) -> Self {
        Self {
            target: ConnectTarget::Primary {
                master_name: master_name.into(),
                resolver,
            },
            config,
        }
    }

    /// Configuration used for every connection
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connection target
    #[must_use]
    pub const fn target(&self) -> &ConnectTarget {
        &self.target
    }

    /// Address the next connection attempt goes to
    ///
    /// # Errors
    ///
    /// Returns the resolver's error.
    pub async fn resolve(&self) -> RedisResult<HostAndPort> {
        match &self.target {
            ConnectTarget::Fixed(addr) => Ok(addr.clone()),
            ConnectTarget::Primary {
                master_name,
                resolver,
            } => resolver.resolve_primary(master_name).await,
        }
    }

    async fn connect(&self) -> RedisResult<(TcpStream, ReplyReader)> {
        let addr = self.resolve().await?;
        let mut stream = open(&addr, self.config.connect_timeout, self.config.tcp_keepalive).await?;
        let mut reader = ReplyReader::new(&self.config.endpoint);
        timeout(
            self.config.operation_timeout,
            handshake(
                &mut stream,
                &mut reader,
                self.config.password.as_deref(),
                self.config.database,
            ),
        )
        .await
        .map_err(|_| RedisError::Timeout)??;
        info!(%addr, "Connected");
        Ok((stream, reader))
    }
}

/// Transport backed by the writer task's channel
struct ChannelTransport {
    tx: mpsc::UnboundedSender<Bytes>,
    shutdown: Arc<Notify>,
}

impl Transport for ChannelTransport {
    fn write(&self, frame: Bytes) -> RedisResult<()> {
        self.tx
            .send(frame)
            .map_err(|_| RedisError::Connection("Connection writer has stopped".to_string()))
    }

    fn close(&self) {
        self.shutdown.notify_one();
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) -> RedisResult<()> {
    let mut batch = BytesMut::with_capacity(8192);
    while let Some(frame) = rx.recv().await {
        batch.extend_from_slice(&frame);
        while batch.len() < MAX_WRITE_BATCH {
            match rx.try_recv() {
                Ok(frame) => batch.extend_from_slice(&frame),
                Err(_) => break,
            }
        }
        writer.write_all(&batch).await?;
        writer.flush().await?;
        batch.clear();
    }
    let _ = writer.shutdown().await;
    Ok(())
}

/// Run one established connection until it fails or the handler closes it.
/// Returns the cause.
async fn drive<S>(
    stream: S,
    mut reader: ReplyReader,
    handler: &dyn ConnectionEvents,
    connected: Option<oneshot::Sender<()>>,
) -> RedisError
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, write_half) = tokio::io::split(stream);
    let (tx, rx) = mpsc::unbounded_channel();
    let shutdown = Arc::new(Notify::new());
    let mut writer = tokio::spawn(write_loop(write_half, rx));

    handler.notify_connected(Arc::new(ChannelTransport {
        tx,
        shutdown: Arc::clone(&shutdown),
    }));
    if let Some(connected) = connected {
        let _ = connected.send(());
    }

    let cause = loop {
        tokio::select! {
            () = shutdown.notified() => break RedisError::Closed,
            result = &mut writer => {
                break match result {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) => RedisError::Closed,
                    Err(e) => RedisError::Connection(format!("Writer task failed: {e}")),
                };
            }
            result = reader.read_reply(&mut read_half) => match result {
                Ok(value) => {
                    if let Err(e) = handler.notify_reply(value) {
                        break e;
                    }
                }
                Err(e) => break e,
            },
        }
    };
    writer.abort();
    cause
}

/// Keep `handler` connected until it is closed or reconnecting gives up
async fn run(
    connector: Arc<Connector>,
    handler: Arc<dyn ConnectionEvents>,
    first: (TcpStream, ReplyReader),
    connected: oneshot::Sender<()>,
) {
    let reconnect = connector.config().reconnect.clone();
    let mut next = Some(first);
    let mut connected = Some(connected);
    let mut attempt = 0usize;

    loop {
        if handler.is_closed() {
            break;
        }

        let established = match next.take() {
            Some(connection) => Ok(connection),
            None => connector.connect().await,
        };

        match established {
            Ok((stream, reader)) => {
                if attempt > 0 {
                    info!(attempt, "Reconnected");
                }
                attempt = 0;
                let cause = drive(stream, reader, &*handler, connected.take()).await;
                handler.notify_disconnected(cause.clone());
                if handler.is_closed() {
                    break;
                }
                warn!(error = %cause, "Connection lost");
            }
            Err(e) => warn!(attempt, error = %e, "Reconnect attempt failed"),
        }

        if !reconnect.enabled {
            info!("Reconnect disabled, closing endpoint");
            handler.close();
            break;
        }
        attempt += 1;
        if reconnect.max_attempts.is_some_and(|max| attempt > max) {
            error!(attempts = attempt - 1, "Giving up reconnecting");
            handler.close();
            break;
        }
        tokio::time::sleep(reconnect.delay_for_attempt(attempt - 1)).await;
    }
    debug!("Connection driver stopped");
}

async fn start(
    connector: Arc<Connector>,
    handler: Arc<dyn ConnectionEvents>,
) -> RedisResult<JoinHandle<()>> {
    let first = connector.connect().await?;
    let (tx, rx) = oneshot::channel();
    let task = tokio::spawn(run(connector, handler, first, tx));
    // The endpoint is attached once the driver signals.
    let _ = rx.await;
    Ok(task)
}

/// A pipelined connection.
///
/// Any number of tasks may dispatch commands concurrently through a shared
/// reference; replies are correlated in submission order.
///
/// # Examples
///
/// ```no_run
/// use resp_endpoint::{Connection, ConnectionConfig, StringCodec};
/// use resp_endpoint::output::ValueOutput;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let codec = Arc::new(StringCodec);
/// let config = ConnectionConfig::new("redis://localhost:6379");
/// let connection = Connection::connect(config, codec.clone()).await?;
///
/// let args = connection.args().add_key(&"greeting".to_string());
/// let value = connection.dispatch("GET", &args, ValueOutput::new(codec)).await?;
/// println!("{value:?}");
/// # Ok(())
/// # }
/// ```
pub struct Connection<C: RedisCodec> {
    endpoint: Arc<Endpoint>,
    codec: Arc<C>,
    operation_timeout: Duration,
    _task: JoinHandle<()>,
}

impl<C: RedisCodec> Connection<C> {
    /// Connect using `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the first
    /// connection attempt fails.
    pub async fn connect(config: ConnectionConfig, codec: Arc<C>) -> RedisResult<Self> {
        Self::with_connector(Arc::new(Connector::from_config(config)?), codec).await
    }

    /// Connect through an explicit connector
    ///
    /// # Errors
    ///
    /// Returns an error if the first connection attempt fails.
    pub async fn with_connector(connector: Arc<Connector>, codec: Arc<C>) -> RedisResult<Self> {
        let endpoint = Arc::new(Endpoint::new(connector.config().endpoint.clone()));
        let operation_timeout = connector.config().operation_timeout;
        let task = start(connector, Arc::clone(&endpoint) as Arc<dyn ConnectionEvents>).await?;
        Ok(Self {
            endpoint,
            codec,
            operation_timeout,
            _task: task,
        })
    }

    /// Empty argument list using this connection's codec
    #[must_use]
    pub fn args(&self) -> CommandArgs<C> {
        CommandArgs::new(Arc::clone(&self.codec))
    }

    /// The command endpoint
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send a command and wait for its reply
    ///
    /// # Errors
    ///
    /// Returns the command's failure, or [`RedisError::Timeout`] when no reply
    /// arrived within the operation timeout.
    pub async fn dispatch<O: CommandOutput>(
        &self,
        keyword: &str,
        args: &CommandArgs<C>,
        output: O,
    ) -> RedisResult<O::Output> {
        let (command, completion) = Command::new(keyword, args, output);
        self.endpoint.enqueue(command).await?;
        completion.timeout(self.operation_timeout).await
    }

    /// `PING`
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn ping(&self) -> RedisResult<String> {
        self.dispatch("PING", &self.args(), StatusOutput).await
    }

    /// `PUBLISH`, returning the number of receiving clients
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn publish(&self, channel: &C::Key, message: &C::Value) -> RedisResult<i64> {
        let args = self.args().add_key(channel).add_value(message);
        self.dispatch("PUBLISH", &args, IntegerOutput).await
    }

    /// Close the connection. Pending commands fail with
    /// [`RedisError::Closed`].
    pub fn close(&self) {
        self.endpoint.close();
    }

    /// Whether the connection was closed, by the application or because
    /// reconnecting gave up
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.endpoint.is_closed()
    }
}

impl<C: RedisCodec> Drop for Connection<C> {
    fn drop(&mut self) {
        self.endpoint.close();
    }
}

/// A connection in subscribed mode
pub struct PubSubConnection<C: RedisCodec> {
    endpoint: Arc<PubSubEndpoint<C>>,
    operation_timeout: Duration,
    _task: JoinHandle<()>,
}

impl<C: RedisCodec> PubSubConnection<C> {
    /// Connect using `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the first
    /// connection attempt fails.
    pub async fn connect(config: ConnectionConfig, codec: Arc<C>) -> RedisResult<Self> {
        Self::with_connector(Arc::new(Connector::from_config(config)?), codec).await
    }

    /// Connect through an explicit connector
    ///
    /// # Errors
    ///
    /// Returns an error if the first connection attempt fails.
    pub async fn with_connector(connector: Arc<Connector>, codec: Arc<C>) -> RedisResult<Self> {
        let endpoint = Arc::new(PubSubEndpoint::new(connector.config().endpoint.clone(), codec));
        let operation_timeout = connector.config().operation_timeout;
        let task = start(connector, Arc::clone(&endpoint) as Arc<dyn ConnectionEvents>).await?;
        Ok(Self {
            endpoint,
            operation_timeout,
            _task: task,
        })
    }

    /// The pub/sub endpoint
    #[must_use]
    pub fn endpoint(&self) -> &Arc<PubSubEndpoint<C>> {
        &self.endpoint
    }

    /// Request channel subscriptions
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be written.
    pub fn subscribe(&self, channels: &[C::Key]) -> RedisResult<()> {
        self.endpoint.subscribe(channels)
    }

    /// Request pattern subscriptions
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be written.
    pub fn psubscribe(&self, patterns: &[C::Key]) -> RedisResult<()> {
        self.endpoint.psubscribe(patterns)
    }

    /// Drop channel subscriptions, all of them when `channels` is empty
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be written.
    pub fn unsubscribe(&self, channels: &[C::Key]) -> RedisResult<()> {
        self.endpoint.unsubscribe(channels)
    }

    /// Drop pattern subscriptions, all of them when `patterns` is empty
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be written.
    pub fn punsubscribe(&self, patterns: &[C::Key]) -> RedisResult<()> {
        self.endpoint.punsubscribe(patterns)
    }

    /// Register a listener
    pub fn add_listener(&self, listener: SharedListener<C::Key, C::Value>) {
        self.endpoint.add_listener(listener);
    }

    /// Deregister a listener
    pub fn remove_listener(&self, listener: &SharedListener<C::Key, C::Value>) -> bool {
        self.endpoint.remove_listener(listener)
    }

    /// Stream of events delivered after this call
    #[must_use]
    pub fn messages(&self) -> PubSubStream<C> {
        self.endpoint.messages()
    }

    /// Channels with an acknowledged subscription
    #[must_use]
    pub fn channels(&self) -> Vec<C::Key> {
        self.endpoint.channels()
    }

    /// Patterns with an acknowledged subscription
    #[must_use]
    pub fn patterns(&self) -> Vec<C::Key> {
        self.endpoint.patterns()
    }

    /// `PING` while subscribed. The server answers with a `pong` array.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn ping(&self) -> RedisResult<RespValue> {
        let args = CommandArgs::new(Arc::clone(self.endpoint.codec()));
        let (command, completion) = Command::new("PING", &args, crate::output::RawOutput);
        self.endpoint.endpoint().enqueue(command).await?;
        completion.timeout(self.operation_timeout).await
    }

    /// Close the connection and end every message stream
    pub fn close(&self) {
        ConnectionEvents::close(&*self.endpoint);
    }
}

impl<C: RedisCodec> Drop for PubSubConnection<C> {
    fn drop(&mut self) {
        ConnectionEvents::close(&*self.endpoint);
    }
}
