//! Type metadata - explicit descriptors that stand in for struct tags
//!
//! A `TypeMetadata` is built once per type (usually at start-up) and
//! consumed by the codec chain resolution in `service` and the DDL
//! generator in `storage::schema`. Descriptors are plain serde types so
//! they can also be loaded from TOML.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Column name that excludes a field from storage
pub const SKIP_COLUMN: &str = "-";

/// Declarative description of one stored type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeMetadata {
    /// Type name, e.g. `User`. Tables are named after it.
    pub name: String,
    /// Ordered codec chain; empty means the service default
    #[serde(default)]
    pub codecs: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldMetadata>,
}

impl TypeMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the codec chain
    pub fn with_codecs<I, S>(mut self, codecs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codecs = codecs.into_iter().map(Into::into).collect();
        self
    }

    /// Append a field
    pub fn field(mut self, field: FieldMetadata) -> Self {
        self.fields.push(field);
        self
    }

    /// Fields that map to a storage column
    pub fn stored_fields(&self) -> impl Iterator<Item = &FieldMetadata> {
        self.fields.iter().filter(|f| f.column_name() != SKIP_COLUMN)
    }
}

/// Declarative description of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    /// Field name in the type
    pub name: String,
    /// Storage tag; defaults to the lowercased field name
    #[serde(default)]
    pub column: Option<String>,
    /// Value kind of the field
    pub kind: FieldKind,
    /// Explicit SQL type; wins over every other rule
    #[serde(default)]
    pub sql_type: Option<String>,
    /// Comma-separated validation hints (`uuid`, `email`, `latitude`, ...)
    #[serde(default)]
    pub validate: Option<String>,
    /// Comma-separated constraint tokens (`pk`, `unique`, `not_null`, `fk`)
    #[serde(default)]
    pub constraints: Option<String>,
    /// Foreign-key target type name
    #[serde(default)]
    pub references: Option<String>,
}

impl FieldMetadata {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            column: None,
            kind,
            sql_type: None,
            validate: None,
            constraints: None,
            references: None,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn sql_type(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = Some(sql_type.into());
        self
    }

    pub fn validate(mut self, hints: impl Into<String>) -> Self {
        self.validate = Some(hints.into());
        self
    }

    pub fn constraints(mut self, tokens: impl Into<String>) -> Self {
        self.constraints = Some(tokens.into());
        self
    }

    pub fn references(mut self, target: impl Into<String>) -> Self {
        self.references = Some(target.into());
        self
    }

    /// Storage column name
    pub fn column_name(&self) -> String {
        match &self.column {
            Some(c) if !c.is_empty() => c.clone(),
            _ => self.name.to_lowercase(),
        }
    }

    /// Parsed validation hints, lowercased
    pub fn hints(&self) -> Vec<String> {
        split_tokens(self.validate.as_deref())
    }

    /// Parsed constraint tokens, lowercased
    pub fn constraint_tokens(&self) -> Vec<String> {
        split_tokens(self.constraints.as_deref())
    }

    pub fn has_constraint(&self, token: &str) -> bool {
        self.constraint_tokens().iter().any(|t| t == token)
    }
}

fn split_tokens(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Value kind of a field, the stand-in for the field's language type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Bool,
    I8,
    I16,
    I32,
    I64,
    Isize,
    U8,
    U16,
    U32,
    U64,
    Usize,
    F32,
    F64,
    Timestamp,
    Bytes,
    /// Sequence of another kind
    Slice(Box<FieldKind>),
    /// Nested struct, by type name
    Struct(String),
    Map,
    Other,
}

impl FieldKind {
    /// Whether this kind has a direct column mapping
    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            FieldKind::Slice(_) | FieldKind::Struct(_) | FieldKind::Map | FieldKind::Other
        )
    }
}

/// Rust type -> metadata lookup, keyed by `TypeId`.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<TypeId, Arc<TypeMetadata>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach metadata to `T`, replacing any previous descriptor
    pub fn describe<T: 'static>(&self, metadata: TypeMetadata) {
        tracing::debug!("Describing type {} as {}", std::any::type_name::<T>(), metadata.name);
        self.types.write().insert(TypeId::of::<T>(), Arc::new(metadata));
    }

    /// Metadata for `T`, if described
    pub fn get<T: 'static>(&self) -> Option<Arc<TypeMetadata>> {
        self.types.read().get(&TypeId::of::<T>()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_defaults_to_lowercase_name() {
        let field = FieldMetadata::new("OrgID", FieldKind::I64);
        assert_eq!(field.column_name(), "orgid");

        let field = field.column("org_id");
        assert_eq!(field.column_name(), "org_id");
    }

    #[test]
    fn test_tokens_parsed() {
        let field = FieldMetadata::new("id", FieldKind::String)
            .constraints("pk, UNIQUE,,not_null")
            .validate("required,uuid");
        assert_eq!(field.constraint_tokens(), vec!["pk", "unique", "not_null"]);
        assert!(field.has_constraint("unique"));
        assert!(!field.has_constraint("fk"));
        assert_eq!(field.hints(), vec!["required", "uuid"]);
    }

    #[test]
    fn test_skip_column() {
        let meta = TypeMetadata::new("User")
            .field(FieldMetadata::new("id", FieldKind::I64))
            .field(FieldMetadata::new("cache", FieldKind::Map).column("-"));
        let stored: Vec<_> = meta.stored_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(stored, vec!["id"]);
    }

    #[test]
    fn test_type_registry() {
        struct User;
        struct Order;

        let registry = TypeRegistry::new();
        registry.describe::<User>(TypeMetadata::new("User").with_codecs(["toml", "json"]));

        let meta = registry.get::<User>().unwrap();
        assert_eq!(meta.codecs, vec!["toml", "json"]);
        assert!(registry.get::<Order>().is_none());
    }

    #[test]
    fn test_metadata_from_toml() {
        let src = r#"
            name = "Post"
            codecs = ["json"]

            [[fields]]
            name = "id"
            kind = "string"
            validate = "uuid"
            constraints = "pk"

            [[fields]]
            name = "tags"
            kind = { slice = "string" }

            [[fields]]
            name = "author"
            kind = { struct = "User" }
            constraints = "fk"
        "#;
        let meta: TypeMetadata = toml::from_str(src).unwrap();
        assert_eq!(meta.name, "Post");
        assert_eq!(meta.fields.len(), 3);
        assert_eq!(meta.fields[1].kind, FieldKind::Slice(Box::new(FieldKind::String)));
        assert_eq!(meta.fields[2].kind, FieldKind::Struct("User".to_string()));
    }
}
