//! AST -> SQL rendering
//!
//! Every operand, literal or parameter, is bound as a named placeholder
//! (`:p0`, `:p1`, ...) so values never reach the SQL text. Identifiers are
//! validated instead of quoted.

use std::sync::OnceLock;
use regex::Regex;
use serde_json::{Map, Value};
use super::ast::{Condition, Operand, Statement};
use crate::{Error, Result};

const IDENTIFIER_PATTERN: &str = "^[A-Za-z_][A-Za-z0-9_]*$";

/// Rendered statement ready to bind
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub sql: String,
    /// Placeholder name (with leading `:`) and its value, in SQL order
    pub bindings: Vec<(String, Value)>,
}

/// Check a table or column name
pub fn validate_identifier(name: &str) -> Result<()> {
    static IDENTIFIER: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    let pattern = IDENTIFIER
        .get_or_init(|| Regex::new(IDENTIFIER_PATTERN))
        .as_ref()
        .map_err(|e| Error::InvalidIdentifier(e.to_string()))?;
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}

struct Renderer<'a> {
    params: &'a Map<String, Value>,
    bindings: Vec<(String, Value)>,
}

impl<'a> Renderer<'a> {
    fn bind(&mut self, operand: &Operand) -> Result<String> {
        let value = match operand {
            Operand::Value(v) => v.clone(),
            Operand::Param(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| Error::MissingParameter(name.clone()))?,
        };
        let placeholder = format!(":p{}", self.bindings.len());
        self.bindings.push((placeholder.clone(), value));
        Ok(placeholder)
    }

    fn condition(&mut self, cond: &Condition) -> Result<String> {
        match cond {
            Condition::Cmp(column, op, rhs) => {
                validate_identifier(column)?;
                let placeholder = self.bind(rhs)?;
                Ok(format!("{} {} {}", column, op.as_sql(), placeholder))
            }
            Condition::In(column, values) => {
                validate_identifier(column)?;
                if values.is_empty() {
                    return Err(Error::NotSupported(format!("empty IN list on {}", column)));
                }
                let placeholders = values
                    .iter()
                    .map(|v| self.bind(v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{} IN ({})", column, placeholders.join(", ")))
            }
            Condition::And(parts) => self.group(parts, " AND ", "1 = 1"),
            Condition::Or(parts) => self.group(parts, " OR ", "1 = 0"),
        }
    }

    fn group(&mut self, parts: &[Condition], joiner: &str, empty: &str) -> Result<String> {
        if parts.is_empty() {
            return Ok(empty.to_string());
        }
        let rendered = parts
            .iter()
            .map(|c| self.condition(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("({})", rendered.join(joiner)))
    }

    fn where_clause(&mut self, filter: &Option<Condition>) -> Result<String> {
        match filter {
            Some(cond) => Ok(format!(" WHERE {}", self.condition(cond)?)),
            None => Ok(String::new()),
        }
    }

    fn assignments(&mut self, pairs: &[(String, Operand)]) -> Result<Vec<(String, String)>> {
        pairs
            .iter()
            .map(|(column, operand)| {
                validate_identifier(column)?;
                Ok((column.clone(), self.bind(operand)?))
            })
            .collect()
    }
}

/// Render a statement, resolving `Operand::Param`s from `params`
pub fn render(stmt: &Statement, params: &Map<String, Value>) -> Result<Rendered> {
    validate_identifier(stmt.table())?;
    let mut r = Renderer {
        params,
        bindings: Vec::new(),
    };

    let sql = match stmt {
        Statement::Select {
            table,
            columns,
            filter,
            limit,
        } => {
            for column in columns {
                validate_identifier(column)?;
            }
            let projection = if columns.is_empty() {
                "*".to_string()
            } else {
                columns.join(", ")
            };
            let mut sql = format!("SELECT {} FROM {}{}", projection, table, r.where_clause(filter)?);
            if let Some(n) = limit {
                sql.push_str(&format!(" LIMIT {}", n));
            }
            sql
        }
        Statement::Insert {
            table,
            values,
            upsert_key,
        } => {
            if values.is_empty() {
                return Err(Error::InvalidPayload(format!("insert into {} has no values", table)));
            }
            let pairs = r.assignments(values)?;
            let columns: Vec<&str> = pairs.iter().map(|(c, _)| c.as_str()).collect();
            let placeholders: Vec<&str> = pairs.iter().map(|(_, p)| p.as_str()).collect();
            let mut sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders.join(", ")
            );
            if let Some(key) = upsert_key {
                validate_identifier(key)?;
                let updates: Vec<String> = columns
                    .iter()
                    .filter(|c| **c != key.as_str())
                    .map(|c| format!("{} = excluded.{}", c, c))
                    .collect();
                if updates.is_empty() {
                    sql.push_str(&format!(" ON CONFLICT({}) DO NOTHING", key));
                } else {
                    sql.push_str(&format!(" ON CONFLICT({}) DO UPDATE SET {}", key, updates.join(", ")));
                }
            }
            sql
        }
        Statement::Update { table, set, filter } => {
            if set.is_empty() {
                return Err(Error::InvalidPayload(format!("update of {} sets nothing", table)));
            }
            let pairs = r.assignments(set)?;
            let assignments: Vec<String> = pairs.iter().map(|(c, p)| format!("{} = {}", c, p)).collect();
            format!("UPDATE {} SET {}{}", table, assignments.join(", "), r.where_clause(filter)?)
        }
        Statement::Delete { table, filter } => {
            format!("DELETE FROM {}{}", table, r.where_clause(filter)?)
        }
    };

    Ok(Rendered {
        sql,
        bindings: r.bindings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Op;
    use serde_json::json;

    fn no_params() -> Map<String, Value> {
        Map::new()
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("_tmp2").is_ok());
        assert!(matches!(validate_identifier("2fast"), Err(Error::InvalidIdentifier(_))));
        assert!(matches!(validate_identifier("users; DROP"), Err(Error::InvalidIdentifier(_))));
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_render_select() {
        let stmt = Statement::select("users")
            .filter(Condition::And(vec![
                Condition::eq("org", Operand::param("org")),
                Condition::cmp("age", Op::Ge, Operand::value(18)),
            ]))
            .limit(10);
        let params = json!({"org": "acme"}).as_object().cloned().unwrap();

        let rendered = render(&stmt, &params).unwrap();
        assert_eq!(
            rendered.sql,
            "SELECT * FROM users WHERE (org = :p0 AND age >= :p1) LIMIT 10"
        );
        assert_eq!(
            rendered.bindings,
            vec![(":p0".to_string(), json!("acme")), (":p1".to_string(), json!(18))]
        );
    }

    #[test]
    fn test_render_upsert() {
        let stmt = Statement::Insert {
            table: "users".into(),
            values: vec![
                ("id".into(), Operand::value("u1")),
                ("name".into(), Operand::value("Ann")),
            ],
            upsert_key: Some("id".into()),
        };
        let rendered = render(&stmt, &no_params()).unwrap();
        assert_eq!(
            rendered.sql,
            "INSERT INTO users (id, name) VALUES (:p0, :p1) ON CONFLICT(id) DO UPDATE SET name = excluded.name"
        );

        let key_only = Statement::Insert {
            table: "users".into(),
            values: vec![("id".into(), Operand::value("u1"))],
            upsert_key: Some("id".into()),
        };
        let rendered = render(&key_only, &no_params()).unwrap();
        assert!(rendered.sql.ends_with("ON CONFLICT(id) DO NOTHING"));
    }

    #[test]
    fn test_render_update_and_delete() {
        let update = Statement::Update {
            table: "users".into(),
            set: vec![("name".into(), Operand::param("name"))],
            filter: Some(Condition::is_in("id", vec![Operand::value(1), Operand::value(2)])),
        };
        let params = json!({"name": "Bo"}).as_object().cloned().unwrap();
        let rendered = render(&update, &params).unwrap();
        assert_eq!(rendered.sql, "UPDATE users SET name = :p0 WHERE id IN (:p1, :p2)");

        let delete = Statement::delete("users");
        assert_eq!(render(&delete, &no_params()).unwrap().sql, "DELETE FROM users");
    }

    #[test]
    fn test_render_errors() {
        let stmt = Statement::select("users").filter(Condition::eq("id", Operand::param("id")));
        assert!(matches!(render(&stmt, &no_params()), Err(Error::MissingParameter(p)) if p == "id"));

        let stmt = Statement::select("users").filter(Condition::is_in("id", vec![]));
        assert!(matches!(render(&stmt, &no_params()), Err(Error::NotSupported(_))));

        let stmt = Statement::select("bad-table");
        assert!(matches!(render(&stmt, &no_params()), Err(Error::InvalidIdentifier(_))));

        let stmt = Statement::select("users").columns(["name) FROM x --"]);
        assert!(matches!(render(&stmt, &no_params()), Err(Error::InvalidIdentifier(_))));
    }
}
