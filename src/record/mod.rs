use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

// Mongoose bookkeeping field; never part of an outgoing payload.
pub const REVISION_KEY: &str = "__v";

pub const DEFAULT_ID_FIELD: &str = "_id";

/// One item of a resource collection. Schemaless from the client's point of
/// view: the backend owns the field set, the client only relies on the id.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(format!(
                "expected a JSON object for a record, got {}",
                value_kind(&other)
            )),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The reconciliation key. Ids arrive as strings or numbers depending on
    /// the backend; both normalize to a string.
    pub fn id(&self, id_field: &str) -> Option<String> {
        match self.fields.get(id_field) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Union of keys across records, id field first, rest sorted. Drives
    /// table rendering.
    pub fn column_set(records: &[&Record], id_field: &str) -> Vec<String> {
        let mut rest: BTreeMap<String, ()> = BTreeMap::new();
        let mut has_id = false;
        for record in records {
            for key in record.fields.keys() {
                if key == id_field {
                    has_id = true;
                } else if key != REVISION_KEY {
                    rest.insert(key.clone(), ());
                }
            }
        }
        let mut out = Vec::with_capacity(rest.len() + 1);
        if has_id {
            out.push(id_field.to_string());
        }
        out.extend(rest.into_keys());
        out
    }
}

/// A decoded list response: the records plus whatever pagination counters the
/// server chose to include.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListPage {
    pub records: Vec<Record>,
    pub total_pages: Option<usize>,
    pub total: Option<usize>,
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn records_from_array(items: Vec<Value>) -> Result<Vec<Record>, String> {
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let record =
            Record::from_value(item).map_err(|e| format!("list item {idx}: {e}"))?;
        out.push(record);
    }
    Ok(out)
}

fn usize_field(map: &Map<String, Value>, key: &str) -> Option<usize> {
    map.get(key).and_then(Value::as_u64).map(|v| v as usize)
}

/// Decodes a collection response. Both shapes occur in the wild: a bare array
/// and a `{ "data": [...] }` object (the latter optionally carrying
/// `totalPages` / `total`). Anything else is a contract violation and is
/// rejected rather than treated as an empty collection.
pub fn parse_list_envelope(value: Value) -> Result<ListPage, String> {
    match value {
        Value::Array(items) => Ok(ListPage {
            records: records_from_array(items)?,
            total_pages: None,
            total: None,
        }),
        Value::Object(map) => {
            let data = map
                .get("data")
                .cloned()
                .ok_or_else(|| "expected a list or an object with a 'data' list".to_string())?;
            let items = match data {
                Value::Array(items) => items,
                other => {
                    return Err(format!(
                        "expected 'data' to be a list, got {}",
                        value_kind(&other)
                    ))
                }
            };
            Ok(ListPage {
                records: records_from_array(items)?,
                total_pages: usize_field(&map, "totalPages"),
                total: usize_field(&map, "total"),
            })
        }
        other => Err(format!(
            "expected a list or an object with a 'data' list, got {}",
            value_kind(&other)
        )),
    }
}

/// Single-record analogue of [`parse_list_envelope`]: a bare object or
/// `{ "data": {...} }`.
pub fn parse_record_envelope(value: Value) -> Result<Record, String> {
    match value {
        Value::Object(map) => {
            if let Some(Value::Object(inner)) = map.get("data") {
                return Ok(Record::from_map(inner.clone()));
            }
            Ok(Record::from_map(map))
        }
        other => Err(format!(
            "expected a record object, got {}",
            value_kind(&other)
        )),
    }
}

/// A file/image field is either a reference the backend already persisted or
/// a local file awaiting upload. Never both at once: submission disambiguates
/// before the outgoing payload is built.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageRef {
    Persisted(String),
    Pending(PathBuf),
}

impl ImageRef {
    pub fn is_pending(&self) -> bool {
        matches!(self, ImageRef::Pending(_))
    }

    pub fn file_name(&self) -> Option<String> {
        match self {
            ImageRef::Persisted(_) => None,
            ImageRef::Pending(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string()),
        }
    }

    pub fn pending_path(&self) -> Option<&Path> {
        match self {
            ImageRef::Persisted(_) => None,
            ImageRef::Pending(path) => Some(path.as_path()),
        }
    }
}

/// A local, unsaved copy of a record being created or edited. Edits never
/// touch the loaded collection; only a successful remote mutation does.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Draft {
    fields: Map<String, Value>,
    images: BTreeMap<String, ImageRef>,
}

impl Draft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_record(record: &Record) -> Self {
        Self {
            fields: record.fields().clone(),
            images: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn set_image(&mut self, key: impl Into<String>, image: ImageRef) -> &mut Self {
        self.images.insert(key.into(), image);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn images(&self) -> &BTreeMap<String, ImageRef> {
        &self.images
    }

    pub fn has_pending_files(&self) -> bool {
        self.images.values().any(ImageRef::is_pending)
    }

    /// Swaps a pending file for the URL the upload helper returned.
    pub fn mark_uploaded(&mut self, key: &str, url: String) {
        self.images.insert(key.to_string(), ImageRef::Persisted(url));
    }

    fn is_truthy(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            Value::Array(items) => !items.is_empty(),
            _ => true,
        }
    }

    /// Client-side required-field check, reporting every missing field at
    /// once. An image slot satisfies its field either way (persisted or
    /// pending).
    pub fn validate_required(&self, required: &[String]) -> Result<(), Vec<String>> {
        let mut missing = Vec::new();
        for name in required {
            if self.images.contains_key(name.as_str()) {
                continue;
            }
            match self.fields.get(name.as_str()) {
                Some(value) if Self::is_truthy(value) => {}
                _ => missing.push(name.clone()),
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }

    /// Builds the JSON body for a create/update. The id field and the
    /// revision marker are client bookkeeping and are stripped; persisted
    /// image refs are inlined as URL strings. A still-pending file is a
    /// programming error at this point (it would serialize as nothing), so
    /// the call refuses rather than losing the binary.
    pub fn to_json_payload(&self, id_field: &str) -> Result<Value, String> {
        let mut body = self.fields.clone();
        body.remove(id_field);
        body.remove(REVISION_KEY);
        for (key, image) in &self.images {
            match image {
                ImageRef::Persisted(url) => {
                    body.insert(key.clone(), Value::String(url.clone()));
                }
                ImageRef::Pending(path) => {
                    return Err(format!(
                        "field '{}' still holds an unuploaded file '{}'",
                        key,
                        path.display()
                    ));
                }
            }
        }
        Ok(Value::Object(body))
    }
}
