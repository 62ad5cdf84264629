//! Tests for the client facade

use std::time::Duration;

use chbulk_config::Config;
use chbulk_protocol::packet::{ClientPacket, Query};
use chbulk_protocol::{Block, ColumnType, CompressionMethod, Row, Value, WireReader};

use crate::buffer::ChunkedBuffer;
use crate::client::{Client, ClientOptions};
use crate::connection::{ConnectionOptions, QueryOptions};
use crate::context::Context;
use crate::error::ClientError;
use crate::pool::{ConnectionPool, PoolOptions};
use crate::test::{MockDialer, MockTransport, ServerReplies};

fn header() -> Block {
    Block::with_schema([("id", ColumnType::UInt64), ("event", ColumnType::String)]).unwrap()
}

fn mock_client(replies: ServerReplies) -> (Client<MockTransport>, MockDialer) {
    let dialer = MockDialer::new(replies);
    let pool = ConnectionPool::new(
        dialer.clone(),
        ConnectionOptions {
            compression: CompressionMethod::Lz4,
            ..ConnectionOptions::default()
        },
        PoolOptions::default(),
    );
    (Client::with_pool(pool), dialer)
}

struct PageView {
    id: u64,
    event: &'static str,
}

impl Row for PageView {
    fn fields(&self) -> Vec<(&'static str, Value)> {
        vec![("id", self.id.into()), ("event", self.event.into())]
    }
}

// =============================================================================
// Options
// =============================================================================

#[test]
fn test_default_options() {
    let options = ClientOptions::default();

    assert_eq!(options.addr, "127.0.0.1:9000");
    assert_eq!(options.dial_timeout, Duration::from_secs(30));
    assert_eq!(options.keepalive, Some(Duration::from_secs(30)));
    assert_eq!(options.connection.database, "default");
    assert_eq!(options.connection.compression, CompressionMethod::Lz4);
    assert_eq!(options.pool.max_open, 10);
}

#[test]
fn test_options_builder() {
    let options = ClientOptions::new("db:9440")
        .with_database("analytics")
        .with_credentials("writer", "secret")
        .with_compression(CompressionMethod::Zstd)
        .with_max_compression_buffer(1 << 20)
        .with_setting("async_insert", "1")
        .with_dial_timeout(Duration::from_secs(5))
        .with_keepalive(None)
        .with_pool(PoolOptions {
            max_open: 2,
            max_idle: 1,
            max_lifetime: Duration::from_secs(60),
        });

    assert_eq!(options.addr, "db:9440");
    assert_eq!(options.connection.database, "analytics");
    assert_eq!(options.connection.username, "writer");
    assert_eq!(options.connection.password, "secret");
    assert_eq!(options.connection.compression, CompressionMethod::Zstd);
    assert_eq!(options.connection.max_compression_buffer, 1 << 20);
    assert_eq!(
        options.connection.settings,
        vec![("async_insert".to_string(), "1".to_string())]
    );
    assert_eq!(options.dial_timeout, Duration::from_secs(5));
    assert_eq!(options.keepalive, None);
    assert_eq!(options.pool.max_open, 2);
}

#[test]
fn test_options_from_config() {
    let config: Config = r#"
        [client]
        addr = "clickhouse:9000"
        database = "events"
        username = "ingest"
        compression = "zstd"
        max_compression_buffer = 65536
        dial_timeout = "2s"
        keepalive = "0s"

        [pool]
        max_open_conns = 4
        max_idle_conns = 2
        conn_max_lifetime = "10m"
    "#
    .parse()
    .unwrap();

    let options = ClientOptions::from(&config);

    assert_eq!(options.addr, "clickhouse:9000");
    assert_eq!(options.dial_timeout, Duration::from_secs(2));
    assert_eq!(options.keepalive, None);
    assert_eq!(options.connection.database, "events");
    assert_eq!(options.connection.username, "ingest");
    assert_eq!(options.connection.compression, CompressionMethod::Zstd);
    assert_eq!(options.connection.max_compression_buffer, 65536);
    assert_eq!(options.pool.max_open, 4);
    assert_eq!(options.pool.max_idle, 2);
    assert_eq!(options.pool.max_lifetime, Duration::from_secs(600));
}

#[test]
fn test_options_from_default_config() {
    let options = ClientOptions::from(&Config::default());
    let defaults = ClientOptions::default();

    assert_eq!(options.addr, defaults.addr);
    assert_eq!(options.keepalive, defaults.keepalive);
    assert_eq!(options.connection.client_name, "chbulk");
}

// =============================================================================
// Batches
// =============================================================================

#[tokio::test]
async fn test_prepare_batch_and_send() {
    let replies = ServerReplies::new(CompressionMethod::Lz4)
        .hello()
        .insert(&header())
        .unwrap();
    let (client, dialer) = mock_client(replies);
    let ctx = Context::background();

    let (mut batch, mut sender) = client.prepare_batch(&ctx, "INSERT INTO events").await.unwrap();
    assert_eq!(batch.column_names(), vec!["id", "event"]);
    assert_eq!(batch.query(), "INSERT INTO events VALUES");

    batch
        .append_struct(&PageView {
            id: 1,
            event: "page_view",
        })
        .unwrap();
    batch.append(vec![2u64.into(), "click".into()]).unwrap();

    let mut buf = ChunkedBuffer::new();
    batch.build(&mut buf).unwrap();
    sender.send(&ctx, &buf).await.unwrap();

    // Query, then the data chunk and the terminator
    let writes = dialer.handles()[0].writes();
    let mut r = WireReader::new(&writes[2]);
    assert_eq!(r.get_uvarint().unwrap(), ClientPacket::Query.code());
    let query = Query::decode(&mut r, batch.revision()).unwrap();
    assert_eq!(query.body, "INSERT INTO events VALUES");
    assert_eq!(&writes[3], buf.chunk(0).unwrap());
    assert_eq!(writes.len(), 5);

    let stats = client.stats();
    assert_eq!(stats.opened, 1);
    assert_eq!(stats.idle, 1);
}

#[tokio::test]
async fn test_prepare_batch_with_options() {
    let replies = ServerReplies::new(CompressionMethod::Lz4)
        .hello()
        .insert(&header())
        .unwrap();
    let (client, dialer) = mock_client(replies);
    let options = QueryOptions {
        query_id: "batch-42".to_string(),
        settings: vec![("insert_deduplicate".to_string(), "0".to_string())],
    };

    let (batch, mut sender) = client
        .prepare_batch_with(&Context::background(), "INSERT INTO events", &options)
        .await
        .unwrap();
    sender.abort().unwrap();

    let writes = dialer.handles()[0].writes();
    let mut r = WireReader::new(&writes[2]);
    r.get_uvarint().unwrap();
    let query = Query::decode(&mut r, batch.revision()).unwrap();
    assert_eq!(query.id, "batch-42");
    assert_eq!(
        query.settings,
        vec![("insert_deduplicate".to_string(), "0".to_string())]
    );

    // Aborted connections are not pooled
    assert_eq!(client.stats().idle, 0);
    assert_eq!(client.stats().discarded, 1);
}

#[tokio::test]
async fn test_prepare_batch_server_exception() {
    let replies = ServerReplies::new(CompressionMethod::Lz4)
        .hello()
        .exception(60, "Table default.events does not exist");
    let (client, _dialer) = mock_client(replies);

    let err = client
        .prepare_batch(&Context::background(), "INSERT INTO events")
        .await
        .unwrap_err();

    assert!(matches!(&err, ClientError::Server(e) if e.code == 60));
    assert_eq!(client.stats().discarded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_prepare_batch_deadline() {
    // Server never sends the header block
    let replies = ServerReplies::new(CompressionMethod::Lz4).hello();
    let (client, dialer) = mock_client(replies);
    let ctx = Context::with_timeout(Duration::from_millis(100));

    let err = client
        .prepare_batch(&ctx, "INSERT INTO events")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::DeadlineExceeded));
    assert_eq!(dialer.dials(), 1);
    assert_eq!(client.stats().discarded, 1);
}

#[tokio::test]
async fn test_reusable_sender_from_client() {
    let replies = ServerReplies::new(CompressionMethod::Lz4)
        .hello()
        .insert(&header())
        .unwrap();
    let (client, _dialer) = mock_client(replies);
    let ctx = Context::background();
    let mut sender = client.reusable_sender();

    let mut batch = sender.prepare(&ctx, "INSERT INTO events").await.unwrap();
    batch.append(vec![1u64.into(), "view".into()]).unwrap();
    let mut buf = ChunkedBuffer::new();
    batch.build(&mut buf).unwrap();
    sender.send(&ctx, &buf).await.unwrap();

    assert_eq!(client.stats().idle, 1);
}

#[tokio::test]
async fn test_close() {
    let replies = ServerReplies::new(CompressionMethod::Lz4).hello();
    let (client, dialer) = mock_client(replies);

    client.close();

    let err = client
        .prepare_batch(&Context::background(), "INSERT INTO events")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::PoolClosed));
    assert!(client.pool().is_closed());
    assert_eq!(dialer.dials(), 0);
}
