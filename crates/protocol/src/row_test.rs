//! Tests for struct-to-row mapping

use crate::error::ProtocolError;
use crate::row::Row;
use crate::value::Value;

struct Visit {
    user: String,
    count: u32,
    referrer: Option<String>,
}

impl Row for Visit {
    fn fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("user", self.user.clone().into()),
            ("count", self.count.into()),
            ("referrer", self.referrer.clone().into()),
        ]
    }
}

fn visit() -> Visit {
    Visit {
        user: "u1".into(),
        count: 3,
        referrer: None,
    }
}

#[test]
fn test_map_to_orders_by_column() {
    let row = visit().map_to(&["count", "referrer", "user"]).unwrap();
    assert_eq!(row, vec![Value::UInt32(3), Value::Null, Value::from("u1")]);
}

#[test]
fn test_map_to_ignores_extra_fields() {
    let row = visit().map_to(&["user"]).unwrap();
    assert_eq!(row, vec![Value::from("u1")]);
}

#[test]
fn test_map_to_missing_field() {
    let err = visit().map_to(&["user", "ts"]).unwrap_err();
    assert!(matches!(err, ProtocolError::MissingField(ref f) if f == "ts"));
}
