//! Append payload encoding
use serde_json::{Map, Value};

/// One record: flat mapping of column name to value
pub type Record = Map<String, Value>;

/// Records submitted together in one append call, in submission order
pub type Batch = Vec<Record>;

/// Wire payload of one append call
#[derive(Debug)]
pub struct EncodedBatch {
    pub payload: Vec<u8>,
    pub rows: usize,
}

impl EncodedBatch {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Serializes records as newline-delimited JSON, one record per line.
pub fn encode(records: &[Record]) -> Result<EncodedBatch, serde_json::Error> {
    let mut payload = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            payload.push(b'\n');
        }
        serde_json::to_writer(&mut payload, record)?;
    }
    Ok(EncodedBatch {
        payload,
        rows: records.len(),
    })
}
