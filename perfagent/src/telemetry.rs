//! Telemetry records and the sink producers publish them to

use serde_json::{Map, Value};

/// Ordered field name → value mapping emitted by a producer
///
/// The server treats it as opaque; field order is preserved on the wire.
pub type TelemetryRecord = Map<String, Value>;

/// Anything that accepts telemetry records from arbitrary threads
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, record: &Value);
}

/// Build a record tagged with its producer category
///
/// The category comes first, followed by the producer's fields in order.
#[must_use]
pub fn tagged_record(category: &str, fields: TelemetryRecord) -> Value {
    let mut record = TelemetryRecord::with_capacity(fields.len() + 1);
    record.insert("category".to_string(), Value::String(category.to_string()));
    record.extend(fields);
    Value::Object(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_record_keeps_field_order() {
        let mut fields = TelemetryRecord::new();
        fields.insert("zeta".to_string(), json!(1));
        fields.insert("alpha".to_string(), json!("a"));

        let record = tagged_record("methodEntryEvents", fields);
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"category":"methodEntryEvents","zeta":1,"alpha":"a"}"#
        );
    }
}
