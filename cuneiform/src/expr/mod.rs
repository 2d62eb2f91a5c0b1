// Predicate and ordering algebra.
//
// Comparisons on a field handle build `Expr` nodes instead of evaluating
// anything. Nodes are immutable; combinators share their operands through
// `Arc`. There is no operator overloading, so grouping is always explicit in
// the call structure: `a.and(b.or(c))` and `a.and(b).or(c)` are different
// trees and are never reordered.

use crate::error::{OrmError, Result};
use crate::registry::{Field, FieldKind, Model, Relation, IDENTITY};
use crate::value::Value;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinDirection {
    /// `from.via` holds the identity of a row in `table`.
    Forward,
    /// `table.via` holds the identity of a row in `from`.
    Reverse,
}

/// A single-level join from a model's table to a related table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Join {
    pub direction: JoinDirection,
    pub from: String,
    pub table: String,
    pub alias: String,
    pub via: String,
}

/// A column as addressed by a query: its table (or join alias) and name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub source: String,
    pub name: String,
    pub join: Option<Join>,
}

impl Column {
    /// The table the query starts from when this column is used.
    pub fn root(&self) -> &str {
        match &self.join {
            Some(join) => &join.from,
            None => &self.source,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    Value(Value),
    Column(Column),
}

/// A node of a filter predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expr {
    Compare {
        column: Column,
        op: CompareOp,
        operand: Operand,
    },
    IsNull {
        column: Column,
        negated: bool,
    },
    And {
        left: Arc<Expr>,
        right: Arc<Expr>,
    },
    Or {
        left: Arc<Expr>,
        right: Arc<Expr>,
    },
}

impl Expr {
    pub fn and(self, other: Expr) -> Expr {
        Expr::And {
            left: Arc::new(self),
            right: Arc::new(other),
        }
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Or {
            left: Arc::new(self),
            right: Arc::new(other),
        }
    }

    /// Every column the predicate reads, left to right.
    pub fn columns(&self) -> Vec<&Column> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a Column>) {
        match self {
            Expr::Compare {
                column, operand, ..
            } => {
                out.push(column);
                if let Operand::Column(other) = operand {
                    out.push(other);
                }
            }
            Expr::IsNull { column, .. } => out.push(column),
            Expr::And { left, right } | Expr::Or { left, right } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }

    /// Distinct joins the predicate needs, in order of first use.
    pub fn joins(&self) -> Vec<&Join> {
        let mut joins: Vec<&Join> = Vec::new();
        for join in self.columns().into_iter().filter_map(|c| c.join.as_ref()) {
            if !joins.iter().any(|j| j.alias == join.alias) {
                joins.push(join);
            }
        }
        joins
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Compare {
                column,
                op,
                operand,
            } => {
                write!(f, "{column} {} ", op.symbol())?;
                match operand {
                    Operand::Value(v) => write!(f, "{v}"),
                    Operand::Column(c) => write!(f, "{c}"),
                }
            }
            Expr::IsNull { column, negated } => {
                let not = if *negated { " NOT" } else { "" };
                write!(f, "{column} IS{not} NULL")
            }
            Expr::And { left, right } => write!(f, "({left} AND {right})"),
            Expr::Or { left, right } => write!(f, "({left} OR {right})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn keyword(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// An ordering directive: a column and a direction. Not a predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBy {
    pub column: Column,
    pub direction: Direction,
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.column, self.direction.keyword())
    }
}

/// A field descriptor as seen from a query: the field plus the column
/// (possibly behind a join) through which it is reached.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    field: Field,
    column: Column,
}

impl FieldRef {
    /// A field of the queried model itself.
    pub fn new(field: &Field) -> Self {
        FieldRef {
            column: Column {
                source: field.table.clone(),
                name: field.column.clone(),
                join: None,
            },
            field: field.clone(),
        }
    }

    /// `target_field` of the row that reference field `via` points at.
    pub fn follow(via: &Field, target_field: &Field) -> Result<Self> {
        let FieldKind::Ref {
            target,
            target_table,
        } = &via.kind
        else {
            return Err(OrmError::type_mismatch(
                &via.model,
                &via.name,
                "ref",
                via.kind.name(),
            ));
        };
        if target_field.model != *target {
            return Err(OrmError::unknown_field(target, &target_field.name));
        }
        let join = Join {
            direction: JoinDirection::Forward,
            from: via.table.clone(),
            table: target_table.clone(),
            alias: format!("{}__{}", via.table, via.name),
            via: via.column.clone(),
        };
        Ok(Self::joined(target_field, join))
    }

    /// `source_field` of the rows reached through reverse accessor
    /// `relation` of `model`.
    pub fn reverse(model: &Model, relation: &Relation, source_field: &Field) -> Result<Self> {
        if relation.target != model.name() {
            return Err(OrmError::unknown_field(model.name(), &relation.accessor));
        }
        if source_field.model != relation.source {
            return Err(OrmError::unknown_field(&relation.source, &source_field.name));
        }
        let join = Join {
            direction: JoinDirection::Reverse,
            from: model.table().to_string(),
            table: source_field.table.clone(),
            alias: format!("{}__{}", model.table(), relation.accessor),
            via: relation.column.clone(),
        };
        Ok(Self::joined(source_field, join))
    }

    fn joined(field: &Field, join: Join) -> Self {
        FieldRef {
            column: Column {
                source: join.alias.clone(),
                name: field.column.clone(),
                join: Some(join),
            },
            field: field.clone(),
        }
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    /// Compare against a literal. The literal must have the field's semantic
    /// type; `TypeMismatch` is raised here, not when the query runs.
    pub fn compare(&self, op: CompareOp, value: impl Into<Value>) -> Result<Expr> {
        let value = value.into();
        if value.is_null() {
            return Err(OrmError::Validation(format!(
                "cannot compare {} with null, use is_null()",
                self.column
            )));
        }
        self.field.check_kind(&value)?;
        Ok(Expr::Compare {
            column: self.column.clone(),
            op,
            operand: Operand::Value(value),
        })
    }

    /// Compare against another field of the same semantic type.
    pub fn compare_field(&self, op: CompareOp, other: &FieldRef) -> Result<Expr> {
        let (mine, theirs) = (self.field.kind.name(), other.field.kind.name());
        if mine != theirs {
            return Err(OrmError::type_mismatch(
                &self.field.model,
                &self.field.name,
                mine,
                format!("{theirs} ({}.{})", other.field.model, other.field.name),
            ));
        }
        Ok(Expr::Compare {
            column: self.column.clone(),
            op,
            operand: Operand::Column(other.column.clone()),
        })
    }

    pub fn eq(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(CompareOp::Ne, value)
    }

    pub fn lt(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(CompareOp::Le, value)
    }

    pub fn gt(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(CompareOp::Ge, value)
    }

    pub fn is_null(&self) -> Expr {
        Expr::IsNull {
            column: self.column.clone(),
            negated: false,
        }
    }

    pub fn is_not_null(&self) -> Expr {
        Expr::IsNull {
            column: self.column.clone(),
            negated: true,
        }
    }

    pub fn asc(&self) -> OrderBy {
        self.order(Direction::Asc)
    }

    pub fn desc(&self) -> OrderBy {
        self.order(Direction::Desc)
    }

    fn order(&self, direction: Direction) -> OrderBy {
        OrderBy {
            column: self.column.clone(),
            direction,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.column.join.is_none() && self.field.name == IDENTITY
    }
}
