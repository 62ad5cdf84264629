//! Native protocol connection
//!
//! A `Connection` owns one transport and speaks the packet exchange of a
//! bulk insert: handshake, Query, Data blocks, and the server replies up to
//! EndOfStream. It keeps an explicit `closed` flag; once set the connection
//! is never handed out again by the pool.
//!
//! Incoming packets are parsed from a read buffer. A parse that runs out of
//! bytes reads more from the transport and retries, so packets split across
//! TCP segments decode the same as whole ones.

use std::fmt;
use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use chbulk_protocol::packet::{
    ClientPacket, Hello, ProfileInfo, Progress, Query, ServerHello, ServerPacket, TableColumns,
    encode_addendum,
};
use chbulk_protocol::{
    Block, CompressionMethod, Compressor, ProtocolError, ServerException, WireBuffer, WireReader,
};
use tokio::time::Instant;

use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::transport::{ShutdownHandle, Transport};

/// Default upper bound on uncompressed bytes per compressed frame (10 MiB)
pub const DEFAULT_MAX_COMPRESSION_BUFFER: usize = 10 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

/// Handshake and per-query settings for new connections
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub database: String,
    pub username: String,
    pub password: String,
    pub client_name: String,
    pub compression: CompressionMethod,
    /// Maximum uncompressed bytes per compressed chunk
    pub max_compression_buffer: usize,
    /// Settings sent with every query
    pub settings: Vec<(String, String)>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            database: "default".to_string(),
            username: "default".to_string(),
            password: String::new(),
            client_name: "chbulk".to_string(),
            compression: CompressionMethod::Lz4,
            max_compression_buffer: DEFAULT_MAX_COMPRESSION_BUFFER,
            settings: Vec::new(),
        }
    }
}

/// Per-query options
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub query_id: String,
    /// Extra settings for this query only
    pub settings: Vec<(String, String)>,
}

type Callback<T> = Box<dyn FnMut(&T) + Send>;

/// Callbacks for server packets received while waiting for a reply
#[derive(Default)]
pub struct OnProcess {
    pub progress: Option<Callback<Progress>>,
    pub profile_info: Option<Callback<ProfileInfo>>,
    pub profile_events: Option<Callback<Block>>,
    pub logs: Option<Callback<Block>>,
    pub data: Option<Callback<Block>>,
    pub table_columns: Option<Callback<TableColumns>>,
}

impl OnProcess {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_progress(mut self, f: impl FnMut(&Progress) + Send + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_profile_info(mut self, f: impl FnMut(&ProfileInfo) + Send + 'static) -> Self {
        self.profile_info = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_profile_events(mut self, f: impl FnMut(&Block) + Send + 'static) -> Self {
        self.profile_events = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_logs(mut self, f: impl FnMut(&Block) + Send + 'static) -> Self {
        self.logs = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_data(mut self, f: impl FnMut(&Block) + Send + 'static) -> Self {
        self.data = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_table_columns(mut self, f: impl FnMut(&TableColumns) + Send + 'static) -> Self {
        self.table_columns = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for OnProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnProcess")
            .field("progress", &self.progress.is_some())
            .field("profile_info", &self.profile_info.is_some())
            .field("profile_events", &self.profile_events.is_some())
            .field("logs", &self.logs.is_some())
            .field("data", &self.data.is_some())
            .field("table_columns", &self.table_columns.is_some())
            .finish()
    }
}

/// A decoded server packet
#[derive(Debug)]
enum Packet {
    Hello(ServerHello),
    Data(Block),
    Totals(Block),
    Extremes(Block),
    Log(Block),
    ProfileEvents(Block),
    Exception(ServerException),
    Progress(Progress),
    ProfileInfo(ProfileInfo),
    TableColumns(TableColumns),
    Pong,
    EndOfStream,
    /// A packet this client cannot decode; the stream is desynchronized
    Unsupported(ServerPacket),
}

/// A handshaken connection to the server
pub struct Connection<T: Transport> {
    id: u64,
    transport: T,
    server: ServerHello,
    revision: u64,
    compression: CompressionMethod,
    max_compression_buffer: usize,
    settings: Vec<(String, String)>,
    client_name: String,
    closed: bool,
    created_at: Instant,
    read_buf: BytesMut,
    write_buf: WireBuffer,
    compressor: Compressor,
}

impl<T: Transport> Connection<T> {
    /// Perform the handshake on `transport`
    pub async fn open(id: u64, transport: T, options: &ConnectionOptions) -> Result<Self> {
        let mut conn = Self {
            id,
            transport,
            server: ServerHello::default(),
            revision: 0,
            compression: options.compression,
            max_compression_buffer: options.max_compression_buffer.max(1),
            settings: options.settings.clone(),
            client_name: options.client_name.clone(),
            closed: false,
            created_at: Instant::now(),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: WireBuffer::new(),
            compressor: Compressor::new(),
        };
        conn.handshake(options).await?;
        Ok(conn)
    }

    async fn handshake(&mut self, options: &ConnectionOptions) -> Result<()> {
        let hello = Hello {
            client_name: options.client_name.clone(),
            database: options.database.clone(),
            username: options.username.clone(),
            password: options.password.clone(),
        };
        self.write_buf.clear();
        hello.encode(&mut self.write_buf);
        self.flush().await?;

        match self.read_packet().await? {
            Packet::Hello(server) => {
                self.revision = server.negotiated_revision();
                self.server = server;
            }
            Packet::Exception(e) => return Err(ClientError::Server(e)),
            other => return Err(self.unexpected("Hello", &other)),
        }

        self.write_buf.clear();
        encode_addendum(&mut self.write_buf, self.revision);
        if !self.write_buf.is_empty() {
            self.flush().await?;
        }

        tracing::debug!(
            conn_id = self.id,
            peer = %self.transport.peer(),
            server = %self.server,
            revision = self.revision,
            "connection established"
        );
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Negotiated protocol revision
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[inline]
    pub fn server(&self) -> &ServerHello {
        &self.server
    }

    #[inline]
    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }

    #[inline]
    pub fn max_compression_buffer(&self) -> usize {
        self.max_compression_buffer
    }

    /// Time since the connection was opened
    #[inline]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Mark the connection as unusable
    #[inline]
    pub fn set_closed(&mut self) {
        self.closed = true;
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Handle that shuts the transport down from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.transport.shutdown_handle()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Send a Query packet followed by the empty external-tables block
    pub async fn send_query(&mut self, query: &str, options: &QueryOptions) -> Result<()> {
        let mut settings = self.settings.clone();
        settings.extend(options.settings.iter().cloned());
        let packet = Query {
            id: options.query_id.clone(),
            body: query.to_string(),
            client_name: self.client_name.clone(),
            os_user: String::new(),
            hostname: String::new(),
            settings,
            compression: self.compression.is_enabled(),
        };

        self.write_buf.clear();
        packet.encode(&mut self.write_buf, self.revision);
        self.encode_data(&Block::default(), "")?;
        self.flush().await?;

        tracing::trace!(conn_id = self.id, query = %query, "query sent");
        Ok(())
    }

    /// Send one Data packet in a single write
    pub async fn send_data(&mut self, block: &Block, name: &str) -> Result<()> {
        self.write_buf.clear();
        self.encode_data(block, name)?;
        self.flush().await
    }

    /// Write pre-encoded bytes as-is
    pub async fn write_chunk(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport.write_all(bytes).await?;
        Ok(())
    }

    /// Append a Data packet to the write buffer
    fn encode_data(&mut self, block: &Block, name: &str) -> Result<()> {
        self.write_buf.put_uvarint(ClientPacket::Data.code());
        self.write_buf.put_string(name);

        if !self.compression.is_enabled() {
            block.encode(&mut self.write_buf, self.revision)?;
            return Ok(());
        }

        // The block header is never empty, so even an empty block gets a frame
        let mut raw = WireBuffer::new();
        block.encode(&mut raw, self.revision)?;
        for part in raw.as_slice().chunks(self.max_compression_buffer) {
            let frame = self.compressor.compress(self.compression, part)?;
            self.write_buf.put_raw(frame);
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.transport.write_all(self.write_buf.as_slice()).await?;
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read replies until EndOfStream
    ///
    /// Progress, profile, log and data packets go to `on`; an Exception
    /// packet ends the exchange with `ClientError::Server`.
    pub async fn process(&mut self, ctx: &Context, on: &mut OnProcess) -> Result<()> {
        loop {
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            match self.read_packet().await? {
                Packet::EndOfStream => return Ok(()),
                Packet::Exception(e) => return Err(ClientError::Server(e)),
                packet => self.dispatch(packet, on, "EndOfStream")?,
            }
        }
    }

    /// Read replies until the server's first Data block (the insert header)
    pub async fn first_block(&mut self, ctx: &Context, on: &mut OnProcess) -> Result<Block> {
        loop {
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            match self.read_packet().await? {
                Packet::Data(block) => return Ok(block),
                Packet::Exception(e) => return Err(ClientError::Server(e)),
                Packet::EndOfStream => {
                    return Err(ClientError::unexpected("Data", ServerPacket::EndOfStream));
                }
                packet => self.dispatch(packet, on, "Data")?,
            }
        }
    }

    fn dispatch(&mut self, packet: Packet, on: &mut OnProcess, expected: &'static str) -> Result<()> {
        fn call<T>(cb: &mut Option<Callback<T>>, value: &T) {
            if let Some(cb) = cb.as_mut() {
                cb(value);
            }
        }

        match packet {
            Packet::Progress(p) => call(&mut on.progress, &p),
            Packet::ProfileInfo(p) => call(&mut on.profile_info, &p),
            Packet::ProfileEvents(b) => call(&mut on.profile_events, &b),
            Packet::Log(b) => call(&mut on.logs, &b),
            Packet::Data(b) | Packet::Totals(b) | Packet::Extremes(b) => call(&mut on.data, &b),
            Packet::TableColumns(t) => call(&mut on.table_columns, &t),
            Packet::Pong => {}
            other => return Err(self.unexpected(expected, &other)),
        }
        Ok(())
    }

    fn unexpected(&mut self, expected: &'static str, packet: &Packet) -> ClientError {
        let got = match packet {
            Packet::Hello(_) => ServerPacket::Hello,
            Packet::Data(_) => ServerPacket::Data,
            Packet::Totals(_) => ServerPacket::Totals,
            Packet::Extremes(_) => ServerPacket::Extremes,
            Packet::Log(_) => ServerPacket::Log,
            Packet::ProfileEvents(_) => ServerPacket::ProfileEvents,
            Packet::Exception(_) => ServerPacket::Exception,
            Packet::Progress(_) => ServerPacket::Progress,
            Packet::ProfileInfo(_) => ServerPacket::ProfileInfo,
            Packet::TableColumns(_) => ServerPacket::TableColumns,
            Packet::Pong => ServerPacket::Pong,
            Packet::EndOfStream => ServerPacket::EndOfStream,
            Packet::Unsupported(kind) => *kind,
        };
        // The reply stream no longer matches what we expect
        self.set_closed();
        tracing::warn!(conn_id = self.id, expected, got = %got, "unexpected packet");
        ClientError::unexpected(expected, got)
    }

    async fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if !self.read_buf.is_empty() {
                match parse_packet(&self.read_buf, self.revision, self.compression) {
                    Ok((packet, consumed)) => {
                        self.read_buf.advance(consumed);
                        return Ok(packet);
                    }
                    Err(e) if e.is_eof() => {}
                    Err(e) => {
                        self.set_closed();
                        return Err(e.into());
                    }
                }
            }

            self.read_buf.reserve(READ_CHUNK);
            let n = self.transport.read(&mut self.read_buf).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )
                .into());
            }
        }
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("revision", &self.revision)
            .field("compression", &self.compression)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Parse one packet from the front of `data`
///
/// Returns the packet and the number of bytes it occupied.
fn parse_packet(
    data: &[u8],
    revision: u64,
    compression: CompressionMethod,
) -> std::result::Result<(Packet, usize), ProtocolError> {
    let mut r = WireReader::new(data);
    let kind = ServerPacket::try_from(r.get_uvarint()?)?;

    let packet = if kind.carries_block() {
        let _table = r.get_string()?;
        let block = if compression.is_enabled() && kind.block_compressible() {
            Block::decode_compressed(&mut r, revision)?
        } else {
            Block::decode(&mut r, revision)?
        };
        match kind {
            ServerPacket::Totals => Packet::Totals(block),
            ServerPacket::Extremes => Packet::Extremes(block),
            ServerPacket::Log => Packet::Log(block),
            ServerPacket::ProfileEvents => Packet::ProfileEvents(block),
            _ => Packet::Data(block),
        }
    } else {
        match kind {
            ServerPacket::Hello => Packet::Hello(ServerHello::decode(&mut r)?),
            ServerPacket::Exception => Packet::Exception(ServerException::decode(&mut r)?),
            ServerPacket::Progress => Packet::Progress(Progress::decode(&mut r, revision)?),
            ServerPacket::ProfileInfo => Packet::ProfileInfo(ProfileInfo::decode(&mut r)?),
            ServerPacket::TableColumns => Packet::TableColumns(TableColumns::decode(&mut r)?),
            ServerPacket::Pong => Packet::Pong,
            ServerPacket::EndOfStream => Packet::EndOfStream,
            other => Packet::Unsupported(other),
        }
    };

    Ok((packet, r.position()))
}
