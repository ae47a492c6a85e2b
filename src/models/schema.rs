//! Inferred column schema attached to a dataset.
//!
//! A schema is an ordered mapping from column name to a [`ColumnType`]. Order
//! follows first appearance in the sampled header, so it is stored as a vector
//! and serialized as a JSON object whose keys keep that order.

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};
use std::fmt;

/// Semantic type tag assigned to a column during inference.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    Boolean,
    Date,
    String,
    Object,
    Unknown,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::String => "string",
            ColumnType::Object => "object",
            ColumnType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered column name → type mapping. Names are unique.
///
/// An empty schema is legal and means "infer from preview rows at use time".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnSchema {
    columns: Vec<(String, ColumnType)>,
}

impl ColumnSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a column, replacing the type in place if the name already exists.
    pub fn insert(&mut self, name: impl Into<String>, ty: ColumnType) {
        let name = name.into();
        match self.columns.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = ty,
            None => self.columns.push((name, ty)),
        }
    }

    pub fn get(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, ty)| *ty)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, ColumnType)> for ColumnSchema {
    fn from_iter<I: IntoIterator<Item = (S, ColumnType)>>(iter: I) -> Self {
        let mut schema = ColumnSchema::new();
        for (name, ty) in iter {
            schema.insert(name, ty);
        }
        schema
    }
}

impl Serialize for ColumnSchema {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, ty) in &self.columns {
            map.serialize_entry(name, ty)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ColumnSchema {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = ColumnSchema;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of column names to type tags")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut schema = ColumnSchema::new();
                while let Some((name, ty)) = access.next_entry::<String, ColumnType>()? {
                    schema.insert(name, ty);
                }
                Ok(schema)
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_in_insertion_order() {
        let schema: ColumnSchema = [
            ("zeta", ColumnType::String),
            ("alpha", ColumnType::Number),
            ("mid", ColumnType::Boolean),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_string(&schema).unwrap();
        assert_eq!(json, r#"{"zeta":"string","alpha":"number","mid":"boolean"}"#);

        let back: ColumnSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back.names().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn insert_replaces_existing_column_in_place() {
        let mut schema = ColumnSchema::new();
        schema.insert("a", ColumnType::Unknown);
        schema.insert("b", ColumnType::Number);
        schema.insert("a", ColumnType::Date);

        assert_eq!(schema.len(), 2);
        assert_eq!(schema.get("a"), Some(ColumnType::Date));
        assert_eq!(schema.names().next(), Some("a"));
    }
}
