//! Query AST

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Right-hand side of a condition or assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// Literal bound as-is
    Value(Value),
    /// Looked up by name in the parameters at render time
    Param(String),
}

impl Operand {
    pub fn value(v: impl Into<Value>) -> Self {
        Operand::Value(v.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Operand::Param(name.into())
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        }
    }
}

/// WHERE clause tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Cmp(String, Op, Operand),
    In(String, Vec<Operand>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn eq(column: impl Into<String>, rhs: Operand) -> Self {
        Condition::Cmp(column.into(), Op::Eq, rhs)
    }

    pub fn cmp(column: impl Into<String>, op: Op, rhs: Operand) -> Self {
        Condition::Cmp(column.into(), op, rhs)
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Operand>) -> Self {
        Condition::In(column.into(), values)
    }
}

/// One SQL statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    Select {
        table: String,
        /// Empty selects `*`
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default)]
        filter: Option<Condition>,
        #[serde(default)]
        limit: Option<u64>,
    },
    Insert {
        table: String,
        values: Vec<(String, Operand)>,
        /// Conflict column; turns the insert into an upsert
        #[serde(default)]
        upsert_key: Option<String>,
    },
    Update {
        table: String,
        set: Vec<(String, Operand)>,
        #[serde(default)]
        filter: Option<Condition>,
    },
    Delete {
        table: String,
        #[serde(default)]
        filter: Option<Condition>,
    },
}

impl Statement {
    /// `SELECT * FROM table`
    pub fn select(table: impl Into<String>) -> Self {
        Statement::Select {
            table: table.into(),
            columns: Vec::new(),
            filter: None,
            limit: None,
        }
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Statement::Delete {
            table: table.into(),
            filter: None,
        }
    }

    /// Attach a WHERE clause (replaces any existing one; no-op on inserts)
    pub fn filter(mut self, condition: Condition) -> Self {
        match &mut self {
            Statement::Select { filter, .. }
            | Statement::Update { filter, .. }
            | Statement::Delete { filter, .. } => *filter = Some(condition),
            Statement::Insert { .. } => {}
        }
        self
    }

    /// Set the row limit on a select
    pub fn limit(mut self, n: u64) -> Self {
        if let Statement::Select { limit, .. } = &mut self {
            *limit = Some(n);
        }
        self
    }

    /// Restrict a select to the given columns
    pub fn columns<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Statement::Select { columns, .. } = &mut self {
            *columns = cols.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn table(&self) -> &str {
        match self {
            Statement::Select { table, .. }
            | Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. } => table,
        }
    }

    /// Whether the statement returns rows
    pub fn is_select(&self) -> bool {
        matches!(self, Statement::Select { .. })
    }
}
