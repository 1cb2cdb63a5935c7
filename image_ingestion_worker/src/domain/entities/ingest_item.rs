/// An image file handed to the ingestion queue by a producer (upload route, test ...)
#[derive(Debug, Clone)]
pub struct ImageFile {
    /// Name of the ingested resource, the collection record id is derived from it
    pub name: String,
    pub raw_bytes: Vec<u8>,
    pub mime_type: String,
}

/// An image file once accepted by the queue
///
/// Created on `enqueue`, consumed exactly once by the queue consumer. Immutable.
#[derive(Debug, Clone)]
pub struct IngestItem {
    name: String,
    raw_bytes: Vec<u8>,
    mime_type: String,
    sequence_index: u64,
}

impl IngestItem {
    pub fn new(file: ImageFile, sequence_index: u64) -> Self {
        let ImageFile {
            name,
            raw_bytes,
            mime_type,
        } = file;

        Self {
            name,
            raw_bytes,
            mime_type,
            sequence_index,
        }
    }

    /// Id of the collection record created for this item
    pub fn record_id(&self) -> &str {
        &self.name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw_bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Arrival position of the item in its queue
    pub fn sequence_index(&self) -> u64 {
        self.sequence_index
    }

    pub fn is_image(&self) -> bool {
        self.mime_type
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("image/")
    }
}
