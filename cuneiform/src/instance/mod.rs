// In-memory model instances with per-field dirty tracking and cascading save.

use crate::error::{OrmError, Result};
use crate::expr::FieldRef;
use crate::recordset::RecordSet;
use crate::registry::{Field, FieldKind, Model};
use crate::session::Session;
use crate::storage::{Query, Row};
use crate::value::{RefValue, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// What a field of an instance currently holds. Reference fields hold a
/// `Value::Ref` after materialization and a `Linked` record once one has
/// been linked or loaded.
enum Slot<'s> {
    Value(Value),
    Linked(Record<'s>),
}

struct Instance<'s> {
    session: &'s Session,
    model: Arc<Model>,
    id: Option<i64>,
    slots: Vec<Slot<'s>>,
    dirty: Vec<bool>,
    /// Identity each reference column held when last read or written.
    stored_refs: Vec<Option<i64>>,
}

impl Instance<'_> {
    fn is_dirty(&self) -> bool {
        self.id.is_none() || (0..self.slots.len()).any(|i| self.is_field_dirty(i))
    }

    /// A linked record counts as a change while its identity differs from
    /// the one stored, e.g. after it was deleted and saved again.
    fn is_field_dirty(&self, i: usize) -> bool {
        if self.dirty[i] {
            return true;
        }
        match &self.slots[i] {
            Slot::Linked(record) => {
                let id = record.id();
                id.is_none() || id != self.stored_refs[i]
            }
            Slot::Value(_) => false,
        }
    }

    /// Storage value of slot `i`. A linked record must have been saved.
    fn stored_value(&self, i: usize) -> Result<Value> {
        match &self.slots[i] {
            Slot::Value(v) => Ok(v.clone()),
            Slot::Linked(record) => record.reference().map(Value::Ref),
        }
    }
}

/// Shared handle to one model instance.
///
/// Cloning the handle shares the instance: linking a record into another
/// and saving the outer one assigns the identity the caller observes.
#[derive(Clone)]
pub struct Record<'s>(Rc<RefCell<Instance<'s>>>);

impl<'s> Record<'s> {
    fn new(session: &'s Session, model: Arc<Model>, id: Option<i64>, slots: Vec<Slot<'s>>) -> Self {
        let dirty = vec![id.is_none(); slots.len()];
        let stored_refs = slots.iter().map(stored_ref).collect();
        Record(Rc::new(RefCell::new(Instance {
            session,
            model,
            id,
            slots,
            dirty,
            stored_refs,
        })))
    }

    /// Build a clean record from a stored row (identity first, then one
    /// column per field).
    pub(crate) fn materialize(session: &'s Session, model: Arc<Model>, row: Row) -> Result<Self> {
        if row.len() != model.fields().len() + 1 {
            return Err(OrmError::Decode {
                table: model.table().to_string(),
                column: "*".into(),
                reason: format!("expected {} columns, got {}", model.fields().len() + 1, row.len()),
            });
        }
        let mut values = row.into_iter();
        let id = match values.next() {
            Some(Value::Integer(id)) => id,
            other => {
                return Err(OrmError::Decode {
                    table: model.table().to_string(),
                    column: model.identity().column.clone(),
                    reason: format!("identity is {:?}", other),
                })
            }
        };
        let slots = model
            .fields()
            .iter()
            .zip(values)
            .map(|(field, raw)| field.decode(raw).map(Slot::Value))
            .collect::<Result<Vec<_>>>()?;
        Ok(Record::new(session, model, Some(id), slots))
    }

    pub fn model(&self) -> Arc<Model> {
        self.0.borrow().model.clone()
    }

    /// Storage identity, absent until the first save.
    pub fn id(&self) -> Option<i64> {
        self.0.borrow().id
    }

    /// A reference value pointing at this record.
    pub fn reference(&self) -> Result<RefValue> {
        let inst = self.0.borrow();
        match inst.id {
            Some(id) => Ok(RefValue {
                model: inst.model.name().to_string(),
                id,
            }),
            None => Err(OrmError::Unsaved {
                model: inst.model.name().to_string(),
            }),
        }
    }

    /// True while the record has no identity or any field is unsaved.
    pub fn is_dirty(&self) -> bool {
        self.0.borrow().is_dirty()
    }

    /// Names of the fields changed since the last save.
    pub fn dirty_fields(&self) -> Vec<String> {
        let inst = self.0.borrow();
        inst.model
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| inst.is_field_dirty(*i))
            .map(|(_, f)| f.name.clone())
            .collect()
    }

    pub fn ptr_eq(&self, other: &Record<'_>) -> bool {
        std::ptr::eq(
            Rc::as_ptr(&self.0) as *const u8,
            Rc::as_ptr(&other.0) as *const u8,
        )
    }

    // ── Field access ───────────────────────────────────────────────

    /// Current value of a field, `id` included. A linked record that has
    /// not been saved yet reads as null; use [`Record::linked`] to reach it.
    pub fn get(&self, name: &str) -> Result<Value> {
        let inst = self.0.borrow();
        if inst.model.field(name)?.is_identity() {
            return Ok(inst.id.map(Value::Integer).unwrap_or(Value::Null));
        }
        let i = inst.model.position(name)?;
        Ok(match &inst.slots[i] {
            Slot::Value(v) => v.clone(),
            Slot::Linked(record) => record
                .reference()
                .map(Value::Ref)
                .unwrap_or(Value::Null),
        })
    }

    /// Assign a field. The value must match the field's semantic type;
    /// assigning the current value again does not mark the field dirty.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut inst = self.0.borrow_mut();
        let field = inst.model.field(name)?;
        if field.is_identity() {
            return Err(OrmError::Validation(format!(
                "the identity of {} is assigned by storage",
                inst.model.name()
            )));
        }
        field.check(&value)?;
        let i = inst.model.position(name)?;
        if let Slot::Value(current) = &inst.slots[i] {
            if *current == value {
                return Ok(());
            }
        }
        inst.slots[i] = Slot::Value(value);
        inst.dirty[i] = true;
        Ok(())
    }

    /// Point reference field `name` at `target`, saved or not.
    pub fn link(&self, name: &str, target: &Record<'s>) -> Result<()> {
        let target_model = target.model();
        let mut inst = self.0.borrow_mut();
        let field = inst.model.field(name)?;
        match &field.kind {
            FieldKind::Ref { target: expected, .. } if *expected == target_model.name() => {}
            _ => {
                return Err(OrmError::type_mismatch(
                    inst.model.name(),
                    name,
                    field.kind.name(),
                    format!("ref {}", target_model.name()),
                ))
            }
        }
        let i = inst.model.position(name)?;
        if let Slot::Linked(current) = &inst.slots[i] {
            if current.ptr_eq(target) {
                return Ok(());
            }
        }
        inst.slots[i] = Slot::Linked(target.clone());
        inst.dirty[i] = true;
        Ok(())
    }

    /// The record reference field `name` points at, loading it from storage
    /// on first access.
    pub fn linked(&self, name: &str) -> Result<Option<Record<'s>>> {
        let (session, field, i, stored) = {
            let inst = self.0.borrow();
            let field = inst.model.field(name)?.clone();
            if !field.is_reference() {
                return Err(OrmError::type_mismatch(
                    inst.model.name(),
                    name,
                    "ref",
                    field.kind.name(),
                ));
            }
            let i = inst.model.position(name)?;
            let stored = match &inst.slots[i] {
                Slot::Linked(record) => return Ok(Some(record.clone())),
                Slot::Value(Value::Ref(r)) => r.clone(),
                Slot::Value(_) => return Ok(None),
            };
            (inst.session, field, i, stored)
        };

        let target = session.model(&stored.model)?;
        let identity = FieldRef::new(target.identity());
        let record = session
            .select(target.name())?
            .filter(identity.eq(stored.id)?)?
            .get()?;
        log::debug!("Loaded {}.{} -> {}", field.model, field.name, stored);

        // Loading does not change what is stored, so the field stays as dirty as it was
        self.0.borrow_mut().slots[i] = Slot::Linked(record.clone());
        Ok(Some(record))
    }

    /// Field values in declaration order, identity excluded.
    pub fn values(&self) -> Result<Vec<(String, Value)>> {
        let fields: Vec<String> = self
            .model()
            .fields()
            .iter()
            .map(|f| f.name.clone())
            .collect();
        fields
            .into_iter()
            .map(|name| {
                let value = self.get(&name)?;
                Ok((name, value))
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("id".into(), self.id().map(serde_json::Value::from).unwrap_or_default());
        for (name, value) in self.values()? {
            map.insert(name, value.to_json());
        }
        Ok(serde_json::Value::Object(map))
    }

    // ── Relations ──────────────────────────────────────────────────

    /// The RecordSet behind reverse accessor `accessor`: every row of the
    /// referencing model that points at this record.
    pub fn related(&self, accessor: &str) -> Result<RecordSet<'s>> {
        let (session, model) = {
            let inst = self.0.borrow();
            (inst.session, inst.model.clone())
        };
        let relation = session.registry().relation(model.name(), accessor)?;
        let source = session.model(&relation.source)?;
        let via = FieldRef::new(source.field(&relation.field)?);
        session
            .select(source.name())?
            .filter(via.eq(self.reference()?)?)
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Persist this record, saving linked records that need it first.
    ///
    /// A clean, persisted record touches no storage. Inserts write every
    /// field, updates only the dirty ones. The whole reference graph is
    /// checked before anything is written: a cycle through a record with
    /// no identity cannot be ordered and fails with `CyclicSave`.
    pub fn save(&self) -> Result<()> {
        let mut plan: Vec<Record<'s>> = Vec::new();
        let mut in_progress: Vec<Record<'s>> = Vec::new();
        self.plan_save(&mut in_progress, &mut plan)?;
        for record in &plan {
            record.persist()?;
        }
        Ok(())
    }

    /// Post-order walk of the linked records: dependencies land in `plan`
    /// before the records that point at them.
    fn plan_save(&self, in_progress: &mut Vec<Record<'s>>, plan: &mut Vec<Record<'s>>) -> Result<()> {
        if plan.iter().any(|r| r.ptr_eq(self)) {
            return Ok(());
        }
        if in_progress.iter().any(|r| r.ptr_eq(self)) {
            let inst = self.0.borrow();
            // A persisted record can be referenced by its current identity
            return match inst.id {
                Some(_) => Ok(()),
                None => Err(OrmError::CyclicSave {
                    model: inst.model.name().to_string(),
                }),
            };
        }

        in_progress.push(self.clone());
        let linked: Vec<Record<'s>> = self
            .0
            .borrow()
            .slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Linked(record) => Some(record.clone()),
                Slot::Value(_) => None,
            })
            .collect();
        for record in &linked {
            record.plan_save(in_progress, plan)?;
        }
        in_progress.pop();

        if self.is_dirty() {
            plan.push(self.clone());
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let (session, model, id, assignments) = {
            let inst = self.0.borrow();
            let mut assignments = Vec::new();
            for (i, field) in inst.model.fields().iter().enumerate() {
                if inst.id.is_none() || inst.is_field_dirty(i) {
                    assignments.push((i, field.column.clone(), inst.stored_value(i)?));
                }
            }
            (inst.session, inst.model.clone(), inst.id, assignments)
        };
        let (positions, assignments): (Vec<usize>, Vec<(String, Value)>) = assignments
            .into_iter()
            .map(|(i, column, value)| (i, (column, value)))
            .unzip();

        let id = match id {
            None => {
                let id = session.storage().insert(model.table(), &assignments)?;
                log::debug!("Inserted {} #{}", model.name(), id);
                id
            }
            Some(id) => {
                if !assignments.is_empty() {
                    let query = identity_query(&model, id)?;
                    if session.storage().update(&query, &assignments)? == 0 {
                        return Err(OrmError::NotFound {
                            model: model.name().to_string(),
                            filter: format!("{}.id = {}", model.table(), id),
                        });
                    }
                    log::debug!("Updated {} #{}", model.name(), id);
                }
                id
            }
        };

        let mut inst = self.0.borrow_mut();
        inst.id = Some(id);
        inst.dirty.iter_mut().for_each(|d| *d = false);
        for (i, (_, value)) in positions.into_iter().zip(&assignments) {
            inst.stored_refs[i] = match value {
                Value::Ref(r) => Some(r.id),
                _ => None,
            };
        }
        Ok(())
    }

    /// Delete this record's row. The in-memory record keeps its values and
    /// becomes unsaved again: no identity, every field dirty.
    pub fn delete(&self) -> Result<()> {
        let (session, model, id) = {
            let inst = self.0.borrow();
            let id = inst.id.ok_or_else(|| OrmError::Unsaved {
                model: inst.model.name().to_string(),
            })?;
            (inst.session, inst.model.clone(), id)
        };
        session.storage().delete(&identity_query(&model, id)?)?;
        log::debug!("Deleted {} #{}", model.name(), id);

        let mut inst = self.0.borrow_mut();
        inst.id = None;
        inst.dirty.iter_mut().for_each(|d| *d = true);
        Ok(())
    }
}

fn stored_ref(slot: &Slot<'_>) -> Option<i64> {
    match slot {
        Slot::Value(Value::Ref(r)) => Some(r.id),
        _ => None,
    }
}

fn identity_query(model: &Model, id: i64) -> Result<Query> {
    let mut query = Query::new(model.table(), Vec::new());
    query.filter = Some(Arc::new(FieldRef::new(model.identity()).eq(id)?));
    Ok(query)
}

impl fmt::Display for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inst = self.0.borrow();
        write!(f, "<{}", inst.model.name())?;
        match inst.id {
            Some(id) if !inst.is_dirty() => write!(f, " #{id}")?,
            _ => write!(f, "[D]")?,
        }
        for (field, slot) in inst.model.fields().iter().zip(&inst.slots) {
            match slot {
                Slot::Value(value) => write!(f, " {}={}", field.name, value)?,
                Slot::Linked(record) => write!(f, " {}={}", field.name, record.summary())?,
            }
        }
        write!(f, ">")
    }
}

impl Record<'_> {
    /// `<Model #id>` or `<Model[D]>`, without field values.
    fn summary(&self) -> String {
        let inst = self.0.borrow();
        match inst.id {
            Some(id) if !inst.is_dirty() => format!("<{} #{}>", inst.model.name(), id),
            _ => format!("<{}[D]>", inst.model.name()),
        }
    }
}

impl fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inst = self.0.borrow();
        f.debug_struct("Record")
            .field("model", &inst.model.name())
            .field("id", &inst.id)
            .field("dirty", &inst.dirty)
            .finish()
    }
}

// ── Construction ───────────────────────────────────────────────────

/// Collects field values for a new record. Errors are deferred to
/// [`RecordBuilder::build`] so assignments chain without `?`.
pub struct RecordBuilder<'s> {
    session: &'s Session,
    model: Arc<Model>,
    slots: Vec<Option<Slot<'s>>>,
    error: Option<OrmError>,
}

impl<'s> RecordBuilder<'s> {
    pub(crate) fn new(session: &'s Session, model: Arc<Model>) -> Self {
        let slots = model.fields().iter().map(|_| None).collect();
        RecordBuilder {
            session,
            model,
            slots,
            error: None,
        }
    }

    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let result = self.assignable(name).and_then(|(i, field)| {
            field.check(&value)?;
            Ok(i)
        });
        match result {
            Ok(i) => self.slots[i] = Some(Slot::Value(value)),
            Err(e) => self.fail(e),
        }
        self
    }

    pub fn link(mut self, name: &str, target: &Record<'s>) -> Self {
        let target_model = target.model();
        let result = self.assignable(name).and_then(|(i, field)| match &field.kind {
            FieldKind::Ref { target, .. } if *target == target_model.name() => Ok(i),
            _ => Err(OrmError::type_mismatch(
                &field.model,
                &field.name,
                field.kind.name(),
                format!("ref {}", target_model.name()),
            )),
        });
        match result {
            Ok(i) => self.slots[i] = Some(Slot::Linked(target.clone())),
            Err(e) => self.fail(e),
        }
        self
    }

    /// The new, unsaved record: identity absent, every field dirty.
    /// Omitted fields take their default, or null when optional.
    pub fn build(self) -> Result<Record<'s>> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let mut slots = Vec::with_capacity(self.slots.len());
        for (field, slot) in self.model.fields().iter().zip(self.slots) {
            let slot = match slot {
                Some(slot) => slot,
                None => Slot::Value(omitted(field)?),
            };
            slots.push(slot);
        }
        Ok(Record::new(self.session, self.model, None, slots))
    }

    fn assignable(&self, name: &str) -> Result<(usize, &Field)> {
        let field = self.model.field(name)?;
        if field.is_identity() {
            return Err(OrmError::Validation(format!(
                "the identity of {} is assigned by storage",
                self.model.name()
            )));
        }
        Ok((self.model.position(name)?, field))
    }

    fn fail(&mut self, error: OrmError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

fn omitted(field: &Field) -> Result<Value> {
    match &field.default {
        Some(default) => Ok(default.clone()),
        None if field.required => Err(OrmError::Validation(format!(
            "{}.{} is required",
            field.model, field.name
        ))),
        None => Ok(Value::Null),
    }
}
