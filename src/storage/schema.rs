//! DDL generation from type metadata
//!
//! Emits PostgreSQL-flavored `CREATE TABLE` text. SQLite accepts all of it
//! except array column types, since it only uses declared types for affinity.

use crate::metadata::{FieldKind, FieldMetadata, TypeMetadata};

/// Constraint tokens understood by the generator
pub const PK: &str = "pk";
pub const FK: &str = "fk";
pub const UNIQUE: &str = "unique";
pub const NOT_NULL: &str = "not_null";

/// `CREATE TABLE IF NOT EXISTS` statement for a described type
pub fn create_table_sql(meta: &TypeMetadata) -> String {
    let mut lines = Vec::new();
    let mut primary_keys = Vec::new();
    let mut foreign_keys = Vec::new();

    for field in meta.stored_fields() {
        let column = field.column_name();
        let mut line = format!("{} {}", column, column_type(field));

        if field.has_constraint(NOT_NULL) {
            line.push_str(" NOT NULL");
        }
        if field.has_constraint(UNIQUE) {
            line.push_str(" UNIQUE");
        }
        if field.has_constraint(PK) {
            primary_keys.push(column.clone());
        }
        if field.has_constraint(FK) {
            let target = fk_target(field, &column);
            foreign_keys.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}(id)",
                column,
                table_name(&target)
            ));
        }
        lines.push(line);
    }

    if !primary_keys.is_empty() {
        lines.push(format!("PRIMARY KEY ({})", primary_keys.join(", ")));
    }
    lines.extend(foreign_keys);

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        table_name(&meta.name),
        lines.join(",\n    ")
    )
}

/// Table name for a type: lowercased and pluralized
pub fn table_name(type_name: &str) -> String {
    pluralize(&type_name.to_lowercase())
}

/// English plural: `-es` after sibilants, `-ies` after consonant+y, else `-s`
pub fn pluralize(word: &str) -> String {
    if ["s", "x", "z", "ch", "sh"].iter().any(|end| word.ends_with(end)) {
        return format!("{}es", word);
    }
    if let Some(stem) = word.strip_suffix('y') {
        if stem.chars().last().is_some_and(|c| !"aeiou".contains(c)) {
            return format!("{}ies", stem);
        }
    }
    format!("{}s", word)
}

/// Resolved SQL type for one field
pub fn column_type(field: &FieldMetadata) -> String {
    if let Some(explicit) = field.sql_type.as_deref().filter(|t| !t.is_empty()) {
        return explicit.to_string();
    }
    if let Some(hinted) = field.hints().iter().find_map(|h| hint_type(h)) {
        return hinted.to_string();
    }
    if field.has_constraint(FK) {
        if let FieldKind::Struct(_) = field.kind {
            return "UUID".to_string();
        }
    }
    kind_type(&field.kind).unwrap_or_else(|| "JSONB".to_string())
}

fn hint_type(hint: &str) -> Option<&'static str> {
    Some(match hint {
        "uuid" => "UUID",
        "ip" | "ipv4" | "ipv6" => "INET",
        "cidr" => "CIDR",
        "mac" => "MACADDR",
        "json" => "JSONB",
        "latitude" => "DECIMAL(10,8)",
        "longitude" => "DECIMAL(11,8)",
        "email" => "VARCHAR(255)",
        "url" | "uri" => "TEXT",
        "datetime" => "TIMESTAMPTZ",
        _ => return None,
    })
}

fn kind_type(kind: &FieldKind) -> Option<String> {
    let ty = match kind {
        FieldKind::String => "TEXT",
        FieldKind::I64 | FieldKind::U64 | FieldKind::Isize | FieldKind::Usize => "BIGINT",
        FieldKind::I8 | FieldKind::I16 | FieldKind::I32 | FieldKind::U8 | FieldKind::U16 | FieldKind::U32 => {
            "INTEGER"
        }
        FieldKind::F64 => "DOUBLE PRECISION",
        FieldKind::F32 => "REAL",
        FieldKind::Bool => "BOOLEAN",
        FieldKind::Timestamp => "TIMESTAMPTZ",
        FieldKind::Bytes => "BYTEA",
        FieldKind::Slice(inner) if inner.is_primitive() => {
            return kind_type(inner).map(|t| format!("{}[]", t));
        }
        FieldKind::Slice(_) | FieldKind::Struct(_) | FieldKind::Map | FieldKind::Other => return None,
    };
    Some(ty.to_string())
}

fn fk_target(field: &FieldMetadata, column: &str) -> String {
    if let Some(target) = field.references.as_deref().filter(|t| !t.is_empty()) {
        return target.to_string();
    }
    if let FieldKind::Struct(name) = &field.kind {
        return name.clone();
    }
    column.strip_suffix("_id").unwrap_or(column).to_string()
}
