// Lazy, immutable query descriptor over one model.
//
// Builder methods return a new RecordSet and leave the receiver untouched.
// Storage is read only by the materializing methods (`all`, `get`, `first`,
// `len`, `exists`, iteration) and written only by `delete` and `update`. Nothing is
// cached: every call is a fresh round trip.

use crate::error::{OrmError, Result};
use crate::expr::{Expr, FieldRef, OrderBy};
use crate::instance::Record;
use crate::registry::Model;
use crate::session::Session;
use crate::storage::Query;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct RecordSet<'s> {
    session: &'s Session,
    model: Arc<Model>,
    filter: Option<Arc<Expr>>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
}

impl<'s> RecordSet<'s> {
    /// All rows of `model`.
    pub(crate) fn new(session: &'s Session, model: Arc<Model>) -> Self {
        RecordSet {
            session,
            model,
            filter: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn filter_expr(&self) -> Option<&Expr> {
        self.filter.as_deref()
    }

    // ── Builders ───────────────────────────────────────────────────

    /// Narrow the set: the new filter is `existing AND expr`.
    ///
    /// Every column of `expr` must be reachable from this model, either
    /// directly or through a single join starting at its table.
    pub fn filter(&self, expr: Expr) -> Result<Self> {
        for column in expr.columns() {
            if column.root() != self.model.table() {
                return Err(OrmError::Validation(format!(
                    "{column} cannot be used to filter RecordSet({})",
                    self.model.name()
                )));
            }
        }
        let expr = Arc::new(expr);
        let filter = match &self.filter {
            Some(existing) => Arc::new(Expr::And {
                left: existing.clone(),
                right: expr,
            }),
            None => expr,
        };
        Ok(RecordSet {
            filter: Some(filter),
            ..self.clone()
        })
    }

    /// Replace the ordering with a single directive.
    pub fn order_by(&self, directive: OrderBy) -> Result<Self> {
        self.order_by_all(vec![directive])
    }

    /// Replace the ordering with a sequence of directives, most significant
    /// first. Only fields of this model itself can be ordered on.
    pub fn order_by_all(&self, directives: Vec<OrderBy>) -> Result<Self> {
        for directive in &directives {
            let column = &directive.column;
            if column.join.is_some() || column.source != self.model.table() {
                return Err(OrmError::Validation(format!(
                    "cannot order RecordSet({}) by {column}",
                    self.model.name()
                )));
            }
        }
        Ok(RecordSet {
            order_by: directives,
            ..self.clone()
        })
    }

    /// Cap the number of rows. Negative limits are rejected here, before
    /// anything is materialized.
    pub fn limit(&self, n: i64) -> Result<Self> {
        let limit = u64::try_from(n).map_err(|_| OrmError::InvalidLimit(n))?;
        Ok(RecordSet {
            limit: Some(limit),
            ..self.clone()
        })
    }

    /// The storage query this set currently describes.
    pub fn query(&self) -> Query {
        Query {
            table: self.model.table().to_string(),
            columns: self.model.columns(),
            filter: self.filter.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
        }
    }

    // ── Materialization ────────────────────────────────────────────

    /// Every matching row, in storage order, as clean records.
    pub fn all(&self) -> Result<Vec<Record<'s>>> {
        self.fetch(&self.query())
    }

    /// Exactly one matching row.
    pub fn get(&self) -> Result<Record<'s>> {
        let mut query = self.query();
        query.limit = Some(self.limit.map_or(2, |n| n.min(2)));
        let mut records = self.fetch(&query)?;
        match records.len() {
            0 => Err(OrmError::NotFound {
                model: self.model.name().to_string(),
                filter: self.describe_filter(),
            }),
            1 => Ok(records.remove(0)),
            _ => Err(OrmError::MultipleResultsFound {
                model: self.model.name().to_string(),
                filter: self.describe_filter(),
                count: self.len()? as usize,
            }),
        }
    }

    pub fn first(&self) -> Result<Option<Record<'s>>> {
        let mut query = self.query();
        query.limit = Some(self.limit.map_or(1, |n| n.min(1)));
        Ok(self.fetch(&query)?.into_iter().next())
    }

    /// Number of matching rows, counted by storage without fetching them.
    pub fn len(&self) -> Result<u64> {
        self.session.storage().count(&self.query())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(!self.is_empty()?)
    }

    fn fetch(&self, query: &Query) -> Result<Vec<Record<'s>>> {
        self.session
            .storage()
            .select(query)?
            .into_iter()
            .map(|row| Record::materialize(self.session, self.model.clone(), row))
            .collect()
    }

    // ── Bulk writes ────────────────────────────────────────────────

    /// Delete every matching row. Records already in memory are unaffected.
    pub fn delete(&self) -> Result<usize> {
        let removed = self.session.storage().delete(&self.query())?;
        log::debug!("Deleted {} {} rows", removed, self.model.name());
        Ok(removed)
    }

    /// Assign `values` on every matching row, bypassing dirty tracking.
    /// Values are checked against their fields like single assignments.
    pub fn update(&self, values: &[(&str, Value)]) -> Result<usize> {
        let mut assignments = Vec::with_capacity(values.len());
        for (name, value) in values {
            let field = self.model.field(name)?;
            if field.is_identity() {
                return Err(OrmError::Validation(format!(
                    "the identity of {} cannot be updated",
                    self.model.name()
                )));
            }
            field.check(value)?;
            assignments.push((field.column.clone(), value.clone()));
        }
        let changed = self.session.storage().update(&self.query(), &assignments)?;
        log::debug!("Updated {} {} rows", changed, self.model.name());
        Ok(changed)
    }

    /// Shorthand for a field handle on this set's own model.
    pub fn field(&self, name: &str) -> Result<FieldRef> {
        Ok(FieldRef::new(self.model.field(name)?))
    }

    fn describe_filter(&self) -> String {
        match &self.filter {
            Some(filter) => filter.to_string(),
            None => "all rows".into(),
        }
    }
}

impl fmt::Display for RecordSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<RecordSet({})", self.model.name())?;
        if let Some(filter) = &self.filter {
            write!(f, " {filter}")?;
        }
        if !self.order_by.is_empty() {
            let terms: Vec<String> = self.order_by.iter().map(|o| o.to_string()).collect();
            write!(f, " ORDER BY {}", terms.join(", "))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        write!(f, ">")
    }
}

/// Iterating a RecordSet runs one query. A storage failure is yielded as
/// the only item.
impl<'s> IntoIterator for &RecordSet<'s> {
    type Item = Result<Record<'s>>;
    type IntoIter = std::vec::IntoIter<Result<Record<'s>>>;

    fn into_iter(self) -> Self::IntoIter {
        match self.all() {
            Ok(records) => records.into_iter().map(Ok).collect::<Vec<_>>().into_iter(),
            Err(e) => vec![Err(e)].into_iter(),
        }
    }
}

impl fmt::Debug for RecordSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, ModelDefinition};
    use pretty_assertions::assert_eq;

    fn session() -> Session {
        let mut session = Session::open_in_memory().unwrap();
        session
            .register(
                &ModelDefinition::new("Town")
                    .field(FieldDefinition::text("name").required())
                    .field(FieldDefinition::integer("population")),
            )
            .unwrap();
        session
    }

    fn seed(session: &Session) {
        for (name, population) in [("Karlsruhe", 308), ("Stuttgart", 626), ("Ulm", 126)] {
            session
                .new_record("Town")
                .unwrap()
                .set("name", name)
                .set("population", population)
                .build()
                .unwrap()
                .save()
                .unwrap();
        }
    }

    fn names(records: &[Record]) -> Vec<String> {
        records
            .iter()
            .map(|r| r.get("name").unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_filter_does_not_mutate_receiver() {
        let session = session();
        seed(&session);
        let all = session.select("Town").unwrap();
        let before = names(&all.all().unwrap());

        let big = all
            .filter(all.field("population").unwrap().gt(200).unwrap())
            .unwrap();
        assert_eq!(big.len().unwrap(), 2);
        assert_eq!(names(&all.all().unwrap()), before);
        assert!(all.filter_expr().is_none());
    }

    #[test]
    fn test_filters_are_conjoined() {
        let session = session();
        seed(&session);
        let towns = session.select("Town").unwrap();
        let population = towns.field("population").unwrap();
        let mid = towns
            .filter(population.gt(200).unwrap())
            .unwrap()
            .filter(population.lt(500).unwrap())
            .unwrap();
        assert_eq!(names(&mid.all().unwrap()), ["\"Karlsruhe\""]);
        assert!(matches!(mid.filter_expr(), Some(Expr::And { .. })));
    }

    #[test]
    fn test_order_by_last_call_wins() {
        let session = session();
        seed(&session);
        let towns = session.select("Town").unwrap();
        let population = towns.field("population").unwrap();
        let name = towns.field("name").unwrap();

        let ordered = towns
            .order_by(population.asc())
            .unwrap()
            .order_by(name.desc())
            .unwrap();
        assert_eq!(
            names(&ordered.all().unwrap()),
            ["\"Ulm\"", "\"Stuttgart\"", "\"Karlsruhe\""]
        );
    }

    #[test]
    fn test_limit_boundaries() {
        let session = session();
        seed(&session);
        let towns = session.select("Town").unwrap();
        assert!(towns.limit(0).unwrap().all().unwrap().is_empty());
        assert_eq!(towns.limit(0).unwrap().len().unwrap(), 0);
        assert_eq!(towns.limit(2).unwrap().all().unwrap().len(), 2);
        assert!(matches!(towns.limit(-1), Err(OrmError::InvalidLimit(-1))));
    }

    #[test]
    fn test_get_cardinality() {
        let session = session();
        seed(&session);
        let towns = session.select("Town").unwrap();
        let population = towns.field("population").unwrap();

        let ulm = towns.filter(population.lt(200).unwrap()).unwrap().get().unwrap();
        assert_eq!(ulm.get("name").unwrap(), Value::from("Ulm"));

        let none = towns.filter(population.gt(1000).unwrap()).unwrap();
        assert!(matches!(none.get(), Err(OrmError::NotFound { .. })));
        assert!(none.first().unwrap().is_none());

        match towns.get() {
            Err(OrmError::MultipleResultsFound { count, .. }) => assert_eq!(count, 3),
            other => panic!("Expected MultipleResultsFound, got {other:?}"),
        }
    }

    #[test]
    fn test_iterate_recordset() {
        let session = session();
        seed(&session);
        let towns = session.select("Town").unwrap();
        let ordered = towns.order_by(towns.field("name").unwrap().asc()).unwrap();

        let mut seen = Vec::new();
        for record in &ordered {
            seen.push(record.unwrap().get("name").unwrap().to_string());
        }
        assert_eq!(seen, ["\"Karlsruhe\"", "\"Stuttgart\"", "\"Ulm\""]);

        let empty = towns.limit(0).unwrap();
        assert_eq!((&empty).into_iter().count(), 0);
    }

    #[test]
    fn test_materialization_reflects_current_storage() {
        let session = session();
        let towns = session.select("Town").unwrap();
        assert!(!towns.exists().unwrap());
        seed(&session);
        assert_eq!(towns.len().unwrap(), 3);
        assert!(towns.exists().unwrap());
    }

    #[test]
    fn test_bulk_update_and_delete() {
        let session = session();
        seed(&session);
        let towns = session.select("Town").unwrap();
        let population = towns.field("population").unwrap();
        let small = towns.filter(population.lt(400).unwrap()).unwrap();

        let in_memory = small.all().unwrap();
        assert_eq!(small.update(&[("population", Value::from(1))]).unwrap(), 2);
        // Bulk writes bypass records already in memory
        assert_eq!(in_memory[0].get("population").unwrap(), Value::from(308));
        assert!(!in_memory[0].is_dirty());

        let tiny = towns.filter(population.eq(1).unwrap()).unwrap();
        assert_eq!(tiny.len().unwrap(), 2);
        assert_eq!(tiny.delete().unwrap(), 2);
        assert_eq!(tiny.delete().unwrap(), 0);
        assert_eq!(towns.len().unwrap(), 1);
    }

    #[test]
    fn test_update_is_type_checked() {
        let session = session();
        let towns = session.select("Town").unwrap();
        assert!(matches!(
            towns.update(&[("population", Value::from("many"))]),
            Err(OrmError::TypeMismatch { .. })
        ));
        assert!(matches!(
            towns.update(&[("name", Value::Null)]),
            Err(OrmError::Validation(_))
        ));
        assert!(matches!(
            towns.update(&[("id", Value::from(7))]),
            Err(OrmError::Validation(_))
        ));
        assert!(matches!(
            towns.update(&[("mayor", Value::from("x"))]),
            Err(OrmError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_foreign_filter_rejected() {
        let mut session = session();
        session
            .register(&ModelDefinition::new("River").field(FieldDefinition::text("name")))
            .unwrap();
        let towns = session.select("Town").unwrap();
        let river = session.field("River", "name").unwrap();
        assert!(matches!(
            towns.filter(river.eq("Rhine").unwrap()),
            Err(OrmError::Validation(_))
        ));
        assert!(towns.order_by(river.asc()).is_err());
    }

    #[test]
    fn test_display() {
        let session = session();
        let towns = session.select("Town").unwrap();
        assert_eq!(towns.to_string(), "<RecordSet(Town)>");
        let named = towns
            .filter(towns.field("name").unwrap().eq("Ulm").unwrap())
            .unwrap()
            .limit(5)
            .unwrap();
        assert_eq!(named.to_string(), "<RecordSet(Town) town.name = \"Ulm\" LIMIT 5>");
    }
}
