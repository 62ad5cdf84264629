//! Tests for BatchBuilder
//!
//! These tests verify that rows land in the right columns and that a built
//! buffer decodes back to the same block the server would reassemble.

use chbulk_protocol::packet::CLIENT_REVISION;
use chbulk_protocol::{Block, ColumnType, CompressionMethod, Row, Value, WireReader};

use crate::{BatchBuilder, ChunkedBuffer, ClientError, DEFAULT_MAX_COMPRESSION_BUFFER};

fn header() -> Block {
    Block::with_schema([
        ("id", ColumnType::UInt64),
        ("name", ColumnType::String),
        ("score", ColumnType::Nullable(Box::new(ColumnType::Float64))),
    ])
    .unwrap()
}

struct Event {
    id: u64,
    name: &'static str,
    score: Option<f64>,
}

impl Row for Event {
    fn fields(&self) -> Vec<(&'static str, Value)> {
        // Deliberately out of column order
        vec![
            ("score", self.score.into()),
            ("name", self.name.into()),
            ("id", self.id.into()),
        ]
    }
}

fn decode(buf: &ChunkedBuffer) -> Block {
    let mut r = WireReader::new(buf.as_bytes());
    r.get_uvarint().unwrap();
    r.get_string().unwrap();
    Block::decode_compressed(&mut r, CLIENT_REVISION).unwrap()
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_new_drops_header_rows() {
    let mut block = header();
    block
        .append(vec![1u64.into(), "stale".into(), None::<f64>.into()])
        .unwrap();

    let batch = BatchBuilder::new(block);

    assert_eq!(batch.rows(), 0);
    assert_eq!(batch.column_names(), vec!["id", "name", "score"]);
}

#[test]
fn test_defaults() {
    let batch = BatchBuilder::new(header());

    assert_eq!(batch.query(), "");
    assert_eq!(batch.revision(), CLIENT_REVISION);
    assert_eq!(batch.compression(), CompressionMethod::None);
    assert_eq!(batch.max_chunk_bytes(), DEFAULT_MAX_COMPRESSION_BUFFER);
}

#[test]
fn test_zero_chunk_size_is_clamped() {
    let batch = BatchBuilder::new(header()).with_max_chunk_bytes(0);
    assert_eq!(batch.max_chunk_bytes(), 1);
}

// =============================================================================
// Positional rows
// =============================================================================

#[test]
fn test_append_rows() {
    let mut batch = BatchBuilder::new(header());

    batch
        .append(vec![1u64.into(), "a".into(), Some(0.5).into()])
        .unwrap();
    batch
        .append(vec![2u64.into(), "b".into(), None::<f64>.into()])
        .unwrap();

    assert_eq!(batch.rows(), 2);
    assert_eq!(
        batch.block().row(1).unwrap(),
        vec![Value::UInt64(2), Value::from("b"), Value::Null]
    );
}

#[test]
fn test_append_widens_integers() {
    let mut batch = BatchBuilder::new(header());

    batch
        .append(vec![7u8.into(), "a".into(), None::<f64>.into()])
        .unwrap();

    assert_eq!(batch.block().row(0).unwrap()[0], Value::UInt64(7));
}

#[test]
fn test_append_wrong_arity_leaves_block_unchanged() {
    let mut batch = BatchBuilder::new(header());
    batch
        .append(vec![1u64.into(), "a".into(), None::<f64>.into()])
        .unwrap();

    let err = batch.append(vec![2u64.into(), "b".into()]).unwrap_err();

    assert!(matches!(err, ClientError::InvalidBatch(_)));
    assert_eq!(batch.rows(), 1);
    assert!(batch.block().validate().is_ok());
}

#[test]
fn test_append_wrong_type_leaves_block_unchanged() {
    let mut batch = BatchBuilder::new(header());

    // First value is fine, the last one is not
    let err = batch
        .append(vec![1u64.into(), "a".into(), "not a float".into()])
        .unwrap_err();

    assert!(matches!(err, ClientError::InvalidBatch(_)));
    assert_eq!(batch.rows(), 0);
    assert!(batch.block().columns().iter().all(|c| c.is_empty()));
}

#[test]
fn test_append_out_of_range_integer() {
    let mut batch = BatchBuilder::new(header());

    let err = batch
        .append(vec![(-1i64).into(), "a".into(), None::<f64>.into()])
        .unwrap_err();

    assert!(matches!(err, ClientError::InvalidBatch(_)));
}

// =============================================================================
// Struct rows
// =============================================================================

#[test]
fn test_append_struct_maps_by_name() {
    let mut batch = BatchBuilder::new(header());

    batch
        .append_struct(&Event {
            id: 42,
            name: "click",
            score: Some(1.5),
        })
        .unwrap();

    assert_eq!(
        batch.block().row(0).unwrap(),
        vec![Value::UInt64(42), Value::from("click"), Value::Float64(1.5)]
    );
}

#[test]
fn test_append_struct_missing_field() {
    struct Partial;

    impl Row for Partial {
        fn fields(&self) -> Vec<(&'static str, Value)> {
            vec![("id", 1u64.into())]
        }
    }

    let mut batch = BatchBuilder::new(header());
    let err = batch.append_struct(&Partial).unwrap_err();

    assert!(matches!(err, ClientError::InvalidBatch(_)));
    assert!(err.to_string().contains("name"));
    assert_eq!(batch.rows(), 0);
}

// =============================================================================
// Columnar access
// =============================================================================

#[test]
fn test_column_append() {
    let mut batch = BatchBuilder::new(header());

    batch.column(0).extend([1u64, 2, 3]).unwrap();
    batch.column(1).extend(["a", "b", "c"]).unwrap();
    batch
        .column(2)
        .extend([Some(1.0), None, Some(3.0)])
        .unwrap();

    assert_eq!(batch.rows(), 3);
    assert!(batch.block().validate().is_ok());

    let column = batch.column(1);
    assert!(column.is_valid());
    assert_eq!(column.name().unwrap(), "name");
    assert_eq!(column.column_type().unwrap(), &ColumnType::String);
    assert_eq!(column.len().unwrap(), 3);
}

#[test]
fn test_column_extend_is_all_or_nothing() {
    let mut batch = BatchBuilder::new(header());

    let err = batch
        .column(0)
        .extend(vec![Value::from(1u64), Value::from("two")])
        .unwrap_err();

    assert!(matches!(err, ClientError::InvalidBatch(_)));
    assert!(batch.column(0).is_empty().unwrap());
}

#[test]
fn test_column_index_out_of_range() {
    let mut batch = BatchBuilder::new(header());

    let mut column = batch.column(3);

    assert!(!column.is_valid());
    assert!(matches!(
        column.append(1u64),
        Err(ClientError::InvalidColumnIndex {
            index: 3,
            columns: 3
        })
    ));
    assert!(matches!(
        column.name(),
        Err(ClientError::InvalidColumnIndex { .. })
    ));
    assert!(matches!(
        column.len(),
        Err(ClientError::InvalidColumnIndex { .. })
    ));
}

// =============================================================================
// Building
// =============================================================================

#[test]
fn test_build_empty_batch() {
    let batch = BatchBuilder::new(header());
    let mut buf = ChunkedBuffer::new();

    let err = batch.build(&mut buf).unwrap_err();

    assert!(matches!(err, ClientError::EmptyBatch));
    assert!(buf.is_empty());
}

#[test]
fn test_build_ragged_columns() {
    let mut batch = BatchBuilder::new(header());
    batch.column(0).append(1u64).unwrap();
    let mut buf = ChunkedBuffer::new();

    let err = batch.build(&mut buf).unwrap_err();

    assert!(matches!(err, ClientError::InvalidBatch(_)));
    assert!(buf.is_empty());
}

#[test]
fn test_build_and_decode() {
    let mut batch = BatchBuilder::new(header())
        .with_query("INSERT INTO events VALUES")
        .with_compression(CompressionMethod::Lz4)
        .with_max_chunk_bytes(32);
    for i in 0..10u64 {
        batch
            .append_struct(&Event {
                id: i,
                name: "view",
                score: (i % 2 == 0).then_some(i as f64),
            })
            .unwrap();
    }

    let mut buf = ChunkedBuffer::new();
    batch.build(&mut buf).unwrap();

    assert!(buf.num_chunks() > 1);
    assert_eq!(buf.query(), "INSERT INTO events VALUES");
    assert_eq!(&decode(&buf), batch.block());

    // Building leaves the rows in place
    assert_eq!(batch.rows(), 10);
}
