//! Native protocol packets
//!
//! Packet codes, revision gates and the handful of packets a bulk insert
//! exchanges with the server: client Hello and Query on the way out; server
//! Hello, Exception, Progress, ProfileInfo and TableColumns on the way in.
//! Data packets are framed by the caller (tag, table name, then a block).

use std::fmt;

use crate::error::ProtocolError;
use crate::wire::{WireBuffer, WireReader};
use crate::Result;

// =============================================================================
// Revisions
// =============================================================================

/// Protocol revision this client speaks
pub const CLIENT_REVISION: u64 = 54460;

pub const CLIENT_VERSION_MAJOR: u64 = 0;
pub const CLIENT_VERSION_MINOR: u64 = 1;
pub const CLIENT_VERSION_PATCH: u64 = 0;

pub const REVISION_WITH_TOTAL_ROWS_IN_PROGRESS: u64 = 51554;
pub const REVISION_WITH_BLOCK_INFO: u64 = 51903;
pub const REVISION_WITH_CLIENT_INFO: u64 = 54032;
pub const REVISION_WITH_SERVER_TIMEZONE: u64 = 54058;
pub const REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO: u64 = 54060;
pub const REVISION_WITH_SERVER_DISPLAY_NAME: u64 = 54372;
pub const REVISION_WITH_VERSION_PATCH: u64 = 54401;
pub const REVISION_WITH_CLIENT_WRITE_INFO: u64 = 54420;
pub const REVISION_WITH_SETTINGS_AS_STRINGS: u64 = 54429;
pub const REVISION_WITH_INTERSERVER_SECRET: u64 = 54441;
pub const REVISION_WITH_OPENTELEMETRY: u64 = 54442;
pub const REVISION_WITH_DISTRIBUTED_DEPTH: u64 = 54448;
pub const REVISION_WITH_INITIAL_QUERY_START_TIME: u64 = 54449;
pub const REVISION_WITH_PARALLEL_REPLICAS: u64 = 54453;
pub const REVISION_WITH_CUSTOM_SERIALIZATION: u64 = 54454;
pub const REVISION_WITH_ADDENDUM: u64 = 54458;
pub const REVISION_WITH_PARAMETERS: u64 = 54459;
pub const REVISION_WITH_SERVER_QUERY_TIME_IN_PROGRESS: u64 = 54460;

/// Query processing stage: run to completion
const STAGE_COMPLETE: u64 = 2;

/// Client info query kind: initial query
const QUERY_KIND_INITIAL: u8 = 1;

/// Client info interface: TCP
const INTERFACE_TCP: u8 = 1;

/// Setting flag marking a setting as important
const SETTING_FLAG_IMPORTANT: u64 = 0x01;

// =============================================================================
// Packet codes
// =============================================================================

/// Packets sent by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientPacket {
    Hello = 0,
    Query = 1,
    Data = 2,
    Cancel = 3,
    Ping = 4,
}

impl ClientPacket {
    #[inline]
    pub const fn code(self) -> u64 {
        self as u64
    }
}

/// Packets sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerPacket {
    Hello = 0,
    Data = 1,
    Exception = 2,
    Progress = 3,
    Pong = 4,
    EndOfStream = 5,
    ProfileInfo = 6,
    Totals = 7,
    Extremes = 8,
    TablesStatus = 9,
    Log = 10,
    TableColumns = 11,
    PartUuids = 12,
    ReadTaskRequest = 13,
    ProfileEvents = 14,
}

impl ServerPacket {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "Hello",
            Self::Data => "Data",
            Self::Exception => "Exception",
            Self::Progress => "Progress",
            Self::Pong => "Pong",
            Self::EndOfStream => "EndOfStream",
            Self::ProfileInfo => "ProfileInfo",
            Self::Totals => "Totals",
            Self::Extremes => "Extremes",
            Self::TablesStatus => "TablesStatus",
            Self::Log => "Log",
            Self::TableColumns => "TableColumns",
            Self::PartUuids => "PartUUIDs",
            Self::ReadTaskRequest => "ReadTaskRequest",
            Self::ProfileEvents => "ProfileEvents",
        }
    }

    /// Whether the packet body is a (table name, block) pair
    #[inline]
    pub const fn carries_block(self) -> bool {
        matches!(
            self,
            Self::Data | Self::Totals | Self::Extremes | Self::Log | Self::ProfileEvents
        )
    }

    /// Log and ProfileEvents blocks are never compressed
    #[inline]
    pub const fn block_compressible(self) -> bool {
        matches!(self, Self::Data | Self::Totals | Self::Extremes)
    }
}

impl TryFrom<u64> for ServerPacket {
    type Error = ProtocolError;

    fn try_from(code: u64) -> Result<Self> {
        Ok(match code {
            0 => Self::Hello,
            1 => Self::Data,
            2 => Self::Exception,
            3 => Self::Progress,
            4 => Self::Pong,
            5 => Self::EndOfStream,
            6 => Self::ProfileInfo,
            7 => Self::Totals,
            8 => Self::Extremes,
            9 => Self::TablesStatus,
            10 => Self::Log,
            11 => Self::TableColumns,
            12 => Self::PartUuids,
            13 => Self::ReadTaskRequest,
            14 => Self::ProfileEvents,
            other => return Err(ProtocolError::UnknownPacket(other)),
        })
    }
}

impl fmt::Display for ServerPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Client packets
// =============================================================================

/// Client Hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub client_name: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl Hello {
    pub fn encode(&self, buf: &mut WireBuffer) {
        buf.put_uvarint(ClientPacket::Hello.code());
        buf.put_string(&self.client_name);
        buf.put_uvarint(CLIENT_VERSION_MAJOR);
        buf.put_uvarint(CLIENT_VERSION_MINOR);
        buf.put_uvarint(CLIENT_REVISION);
        buf.put_string(&self.database);
        buf.put_string(&self.username);
        buf.put_string(&self.password);
    }

    /// Decode the body (after the packet code)
    pub fn decode(r: &mut WireReader<'_>) -> Result<(Self, u64)> {
        let client_name = r.get_string()?;
        r.get_uvarint()?;
        r.get_uvarint()?;
        let revision = r.get_uvarint()?;
        let hello = Self {
            client_name,
            database: r.get_string()?,
            username: r.get_string()?,
            password: r.get_string()?,
        };
        Ok((hello, revision))
    }
}

/// Addendum sent right after the server Hello (quota key)
pub fn encode_addendum(buf: &mut WireBuffer, revision: u64) {
    if revision >= REVISION_WITH_ADDENDUM {
        buf.put_string("");
    }
}

/// Client Query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub id: String,
    pub body: String,
    pub client_name: String,
    pub os_user: String,
    pub hostname: String,
    /// Settings sent as (name, value) strings, all marked important
    pub settings: Vec<(String, String)>,
    pub compression: bool,
}

impl Query {
    pub fn encode(&self, buf: &mut WireBuffer, revision: u64) {
        buf.put_uvarint(ClientPacket::Query.code());
        buf.put_string(&self.id);

        if revision >= REVISION_WITH_CLIENT_INFO {
            self.encode_client_info(buf, revision);
        }

        for (name, value) in &self.settings {
            buf.put_string(name);
            if revision >= REVISION_WITH_SETTINGS_AS_STRINGS {
                buf.put_uvarint(SETTING_FLAG_IMPORTANT);
            }
            buf.put_string(value);
        }
        buf.put_string("");

        if revision >= REVISION_WITH_INTERSERVER_SECRET {
            buf.put_string("");
        }

        buf.put_uvarint(STAGE_COMPLETE);
        buf.put_uvarint(u64::from(self.compression));
        buf.put_string(&self.body);

        if revision >= REVISION_WITH_PARAMETERS {
            buf.put_string("");
        }
    }

    /// Decode the body (after the packet code)
    pub fn decode(r: &mut WireReader<'_>, revision: u64) -> Result<Self> {
        let mut query = Self {
            id: r.get_string()?,
            ..Self::default()
        };

        if revision >= REVISION_WITH_CLIENT_INFO {
            r.get_u8()?;
            r.get_string()?;
            r.get_string()?;
            r.get_string()?;
            if revision >= REVISION_WITH_INITIAL_QUERY_START_TIME {
                r.get_i64()?;
            }
            r.get_u8()?;
            query.os_user = r.get_string()?;
            query.hostname = r.get_string()?;
            query.client_name = r.get_string()?;
            r.get_uvarint()?;
            r.get_uvarint()?;
            r.get_uvarint()?;
            if revision >= REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO {
                r.get_string()?;
            }
            if revision >= REVISION_WITH_DISTRIBUTED_DEPTH {
                r.get_uvarint()?;
            }
            if revision >= REVISION_WITH_VERSION_PATCH {
                r.get_uvarint()?;
            }
            if revision >= REVISION_WITH_OPENTELEMETRY && r.get_u8()? != 0 {
                r.get_u128()?; // trace id
                r.get_u64()?; // span id
                r.get_string()?; // trace state
                r.get_u8()?; // trace flags
            }
            if revision >= REVISION_WITH_PARALLEL_REPLICAS {
                r.get_uvarint()?;
                r.get_uvarint()?;
                r.get_uvarint()?;
            }
        }

        loop {
            let name = r.get_string()?;
            if name.is_empty() {
                break;
            }
            if revision >= REVISION_WITH_SETTINGS_AS_STRINGS {
                r.get_uvarint()?;
            }
            query.settings.push((name, r.get_string()?));
        }

        if revision >= REVISION_WITH_INTERSERVER_SECRET {
            r.get_string()?;
        }

        r.get_uvarint()?; // stage
        query.compression = r.get_uvarint()? != 0;
        query.body = r.get_string()?;

        if revision >= REVISION_WITH_PARAMETERS {
            while !r.get_string()?.is_empty() {
                r.get_uvarint()?;
                r.get_string()?;
            }
        }

        Ok(query)
    }

    fn encode_client_info(&self, buf: &mut WireBuffer, revision: u64) {
        buf.put_u8(QUERY_KIND_INITIAL);
        buf.put_string(""); // initial user
        buf.put_string(""); // initial query id
        buf.put_string("0.0.0.0:0");
        if revision >= REVISION_WITH_INITIAL_QUERY_START_TIME {
            buf.put_i64(0);
        }
        buf.put_u8(INTERFACE_TCP);
        buf.put_string(&self.os_user);
        buf.put_string(&self.hostname);
        buf.put_string(&self.client_name);
        buf.put_uvarint(CLIENT_VERSION_MAJOR);
        buf.put_uvarint(CLIENT_VERSION_MINOR);
        buf.put_uvarint(CLIENT_REVISION);
        if revision >= REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO {
            buf.put_string("");
        }
        if revision >= REVISION_WITH_DISTRIBUTED_DEPTH {
            buf.put_uvarint(0);
        }
        if revision >= REVISION_WITH_VERSION_PATCH {
            buf.put_uvarint(CLIENT_VERSION_PATCH);
        }
        if revision >= REVISION_WITH_OPENTELEMETRY {
            buf.put_u8(0);
        }
        if revision >= REVISION_WITH_PARALLEL_REPLICAS {
            buf.put_uvarint(0); // collaborate with initiator
            buf.put_uvarint(0); // participating replicas
            buf.put_uvarint(0); // current replica
        }
    }
}

// =============================================================================
// Server packets
// =============================================================================

/// Server Hello
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerHello {
    pub name: String,
    pub version_major: u64,
    pub version_minor: u64,
    pub version_patch: u64,
    pub revision: u64,
    pub timezone: String,
    pub display_name: String,
}

impl ServerHello {
    /// Decode the body (after the packet code)
    pub fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let mut hello = Self {
            name: r.get_string()?,
            version_major: r.get_uvarint()?,
            version_minor: r.get_uvarint()?,
            revision: r.get_uvarint()?,
            ..Self::default()
        };
        if hello.revision >= REVISION_WITH_SERVER_TIMEZONE {
            hello.timezone = r.get_string()?;
        }
        if hello.revision >= REVISION_WITH_SERVER_DISPLAY_NAME {
            hello.display_name = r.get_string()?;
        }
        if hello.revision >= REVISION_WITH_VERSION_PATCH {
            hello.version_patch = r.get_uvarint()?;
        } else {
            hello.version_patch = hello.revision;
        }
        Ok(hello)
    }

    /// Revision both sides understand
    #[inline]
    pub fn negotiated_revision(&self) -> u64 {
        self.revision.min(CLIENT_REVISION)
    }

    /// Encode the body (test servers)
    pub fn encode(&self, buf: &mut WireBuffer) {
        buf.put_uvarint(ServerPacket::Hello as u64);
        buf.put_string(&self.name);
        buf.put_uvarint(self.version_major);
        buf.put_uvarint(self.version_minor);
        buf.put_uvarint(self.revision);
        if self.revision >= REVISION_WITH_SERVER_TIMEZONE {
            buf.put_string(&self.timezone);
        }
        if self.revision >= REVISION_WITH_SERVER_DISPLAY_NAME {
            buf.put_string(&self.display_name);
        }
        if self.revision >= REVISION_WITH_VERSION_PATCH {
            buf.put_uvarint(self.version_patch);
        }
    }
}

impl fmt::Display for ServerHello {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{}.{} (revision {})",
            self.name, self.version_major, self.version_minor, self.version_patch, self.revision
        )
    }
}

/// Exception raised by the server, with its nested causes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerException {
    pub code: i32,
    pub name: String,
    pub message: String,
    pub stack_trace: String,
    pub nested: Option<Box<ServerException>>,
}

impl ServerException {
    pub fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let mut exception = Self {
            code: r.get_i32()?,
            name: r.get_string()?,
            message: r.get_string()?,
            stack_trace: r.get_string()?,
            nested: None,
        };
        if r.get_bool()? {
            exception.nested = Some(Box::new(Self::decode(r)?));
        }
        Ok(exception)
    }

    pub fn encode(&self, buf: &mut WireBuffer) {
        buf.put_uvarint(ServerPacket::Exception as u64);
        self.encode_body(buf);
    }

    fn encode_body(&self, buf: &mut WireBuffer) {
        buf.put_i32(self.code);
        buf.put_string(&self.name);
        buf.put_string(&self.message);
        buf.put_string(&self.stack_trace);
        buf.put_bool(self.nested.is_some());
        if let Some(nested) = &self.nested {
            nested.encode_body(buf);
        }
    }

    /// Iterate over this exception and its nested causes
    pub fn chain(&self) -> impl Iterator<Item = &ServerException> {
        std::iter::successors(Some(self), |e| e.nested.as_deref())
    }
}

impl fmt::Display for ServerException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code: {}, message: {}", self.code, self.message)
    }
}

impl std::error::Error for ServerException {}

/// Query progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub rows: u64,
    pub bytes: u64,
    pub total_rows: u64,
    pub wrote_rows: u64,
    pub wrote_bytes: u64,
    pub elapsed_ns: u64,
}

impl Progress {
    pub fn decode(r: &mut WireReader<'_>, revision: u64) -> Result<Self> {
        let mut progress = Self {
            rows: r.get_uvarint()?,
            bytes: r.get_uvarint()?,
            ..Self::default()
        };
        if revision >= REVISION_WITH_TOTAL_ROWS_IN_PROGRESS {
            progress.total_rows = r.get_uvarint()?;
        }
        if revision >= REVISION_WITH_CLIENT_WRITE_INFO {
            progress.wrote_rows = r.get_uvarint()?;
            progress.wrote_bytes = r.get_uvarint()?;
        }
        if revision >= REVISION_WITH_SERVER_QUERY_TIME_IN_PROGRESS {
            progress.elapsed_ns = r.get_uvarint()?;
        }
        Ok(progress)
    }

    pub fn encode(&self, buf: &mut WireBuffer, revision: u64) {
        buf.put_uvarint(ServerPacket::Progress as u64);
        buf.put_uvarint(self.rows);
        buf.put_uvarint(self.bytes);
        if revision >= REVISION_WITH_TOTAL_ROWS_IN_PROGRESS {
            buf.put_uvarint(self.total_rows);
        }
        if revision >= REVISION_WITH_CLIENT_WRITE_INFO {
            buf.put_uvarint(self.wrote_rows);
            buf.put_uvarint(self.wrote_bytes);
        }
        if revision >= REVISION_WITH_SERVER_QUERY_TIME_IN_PROGRESS {
            buf.put_uvarint(self.elapsed_ns);
        }
    }
}

/// Profile summary sent at the end of a query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileInfo {
    pub rows: u64,
    pub blocks: u64,
    pub bytes: u64,
    pub applied_limit: bool,
    pub rows_before_limit: u64,
    pub calculated_rows_before_limit: bool,
}

impl ProfileInfo {
    pub fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            rows: r.get_uvarint()?,
            blocks: r.get_uvarint()?,
            bytes: r.get_uvarint()?,
            applied_limit: r.get_bool()?,
            rows_before_limit: r.get_uvarint()?,
            calculated_rows_before_limit: r.get_bool()?,
        })
    }

    pub fn encode(&self, buf: &mut WireBuffer) {
        buf.put_uvarint(ServerPacket::ProfileInfo as u64);
        buf.put_uvarint(self.rows);
        buf.put_uvarint(self.blocks);
        buf.put_uvarint(self.bytes);
        buf.put_bool(self.applied_limit);
        buf.put_uvarint(self.rows_before_limit);
        buf.put_bool(self.calculated_rows_before_limit);
    }
}

/// Column description for an external table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableColumns {
    pub table: String,
    pub description: String,
}

impl TableColumns {
    pub fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            table: r.get_string()?,
            description: r.get_string()?,
        })
    }
}
