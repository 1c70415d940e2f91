use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    engine::{EngineStats, MatchEngine},
    error::{Error, Result},
};

pub const DEFAULT_ID_FIELD: &str = "id";
pub const DEFAULT_TEXT_FIELD: &str = "text";

/// Records to index, tagged by how their id and texts are extracted.
///
/// Records are arbitrary JSON objects. The extraction rules for each shape
/// live here and nowhere else.
#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    /// `id`, `firstName`, `lastName`, plus the full name.
    Persons { records: Vec<Value> },
    /// `id`, then whichever of `title`, `content`, `description` exist.
    Documents { records: Vec<Value> },
    /// `record[id_field]`, then `record[f]` for each of `text_fields`.
    GenericItems {
        records: Vec<Value>,
        id_field: String,
        text_fields: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DatasetShape {
    Persons,
    Documents,
    GenericItems,
}

impl std::fmt::Display for DatasetShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Persons => "persons",
            Self::Documents => "documents",
            Self::GenericItems => "items",
        };
        f.write_str(name)
    }
}

impl Dataset {
    pub fn items(
        records: Vec<Value>,
        id_field: impl Into<String>,
        text_fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::GenericItems {
            records,
            id_field: id_field.into(),
            text_fields: text_fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn shape(&self) -> DatasetShape {
        match self {
            Self::Persons { .. } => DatasetShape::Persons,
            Self::Documents { .. } => DatasetShape::Documents,
            Self::GenericItems { .. } => DatasetShape::GenericItems,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Persons { records }
            | Self::Documents { records }
            | Self::GenericItems { records, .. } => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Classify a wire payload.
    ///
    /// Keys are checked in a fixed order: `persons`, then `documents`, then
    /// `items` (with optional `idField` and `textFields`). A payload with
    /// none of them is [`Error::UnrecognizedShape`].
    pub fn classify(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(Error::UnrecognizedShape);
        };

        if let Some(records) = take_records(&mut obj, "persons")? {
            return Ok(Self::Persons { records });
        }
        if let Some(records) = take_records(&mut obj, "documents")? {
            return Ok(Self::Documents { records });
        }
        if let Some(records) = take_records(&mut obj, "items")? {
            let id_field = match obj.get("idField") {
                None | Some(Value::Null) => DEFAULT_ID_FIELD.to_string(),
                Some(Value::String(s)) => s.clone(),
                Some(_) => {
                    return Err(Error::Indexing(
                        "`idField` must be a string".into(),
                    ));
                }
            };
            let text_fields = match obj.get("textFields") {
                None | Some(Value::Null) => vec![DEFAULT_TEXT_FIELD.to_string()],
                Some(Value::Array(fields)) => fields
                    .iter()
                    .map(|f| f.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| {
                        Error::Indexing(
                            "`textFields` must be an array of strings".into(),
                        )
                    })?,
                Some(_) => {
                    return Err(Error::Indexing(
                        "`textFields` must be an array of strings".into(),
                    ));
                }
            };
            return Ok(Self::GenericItems {
                records,
                id_field,
                text_fields,
            });
        }

        Err(Error::UnrecognizedShape)
    }

    /// Feed the records into `engine` with this shape's extractors.
    pub fn index_into(self, engine: &mut MatchEngine) -> Result<EngineStats> {
        match self {
            Self::Persons { records } => {
                engine.index_entities(records, |r| id_at(r, "id"), person_texts)
            }
            Self::Documents { records } => engine.index_entities(
                records,
                |r| id_at(r, "id"),
                |r| texts_at(r, ["title", "content", "description"]),
            ),
            Self::GenericItems {
                records,
                id_field,
                text_fields,
            } => engine.index_entities(
                records,
                |r| id_at(r, &id_field),
                |r| texts_at(r, text_fields.iter().map(String::as_str)),
            ),
        }
    }
}

fn take_records(
    obj: &mut Map<String, Value>,
    key: &str,
) -> Result<Option<Vec<Value>>> {
    match obj.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(records)) => Ok(Some(records)),
        Some(_) => Err(Error::Indexing(format!("`{key}` must be an array"))),
    }
}

fn id_at(record: &Value, field: &str) -> Option<Value> {
    record.get(field).filter(|v| !v.is_null()).cloned()
}

/// Strings as-is, numbers and booleans as their JSON text. Empty strings,
/// nulls, arrays and objects are absent.
fn text_at(record: &Value, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        v @ (Value::Number(_) | Value::Bool(_)) => Some(v.to_string()),
        _ => None,
    }
}

fn texts_at<'a>(
    record: &Value,
    fields: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    fields
        .into_iter()
        .filter_map(|f| text_at(record, f))
        .collect()
}

fn person_texts(record: &Value) -> Vec<String> {
    let first = text_at(record, "firstName");
    let last = text_at(record, "lastName");
    match (first, last) {
        (Some(first), Some(last)) => {
            let full = format!("{first} {last}");
            vec![first, last, full]
        }
        (first, last) => first.into_iter().chain(last).collect(),
    }
}
