use std::{collections::HashSet, sync::Arc};

use log::debug;

use crate::{
    error::{Error, Result},
    parser::{CmpOp, Condition, Literal, LogicOp},
    storage::Uid,
    transaction::{Xid, SUPER_XID},
    utils::{get_u64, read_string, write_string},
    version::VersionStore,
};

use super::field::{Field, FieldType, Value};

/// A table: a name, an ordered schema, and a link to the next table in
/// the catalog chain.
///
/// Persisted as one versioned record
/// `[name:string][next_table_uid:8][field_uid:8]…`; the chain head uid
/// lives in the boot cell. Rows are field values concatenated in
/// declaration order, reached through the indexes of the table's
/// indexed fields.
pub struct Table {
    pub uid: Uid,
    pub name: String,
    pub next: Uid,
    pub fields: Vec<Field>,
}

impl Table {
    /// Persist a new table under `xid`, chained in front of `next`.
    pub fn create(
        vs: &Arc<VersionStore>,
        xid: Xid,
        name: &str,
        columns: &[(String, String)],
        indexed: &[String],
        next: Uid,
    ) -> Result<Self> {
        for want in indexed {
            if !columns.iter().any(|(n, _)| n == want) {
                return Err(Error::FieldNotFound(want.clone()));
            }
        }

        let mut fields = Vec::with_capacity(columns.len());
        for (field_name, type_name) in columns {
            let ftype = FieldType::parse(type_name)?;
            let with_index = indexed.iter().any(|n| n == field_name);
            fields.push(Field::create(vs, xid, field_name, ftype, with_index)?);
        }

        let mut raw = Vec::new();
        write_string(&mut raw, name);
        raw.extend_from_slice(&next.to_le_bytes());
        for field in &fields {
            raw.extend_from_slice(&field.uid.to_le_bytes());
        }
        let uid = vs.insert(xid, &raw)?;
        debug!("created table {} as record {:#x}", name, uid);

        Ok(Self {
            uid,
            name: name.to_string(),
            next,
            fields,
        })
    }

    /// Load the table record at `uid` with super visibility. The next
    /// pointer is recovered even from a dead record (a crashed or
    /// aborted create), so the chain survives; such a table itself is
    /// not registered.
    pub fn load(vs: &Arc<VersionStore>, uid: Uid) -> Result<(Option<Self>, Uid)> {
        // the raw payload, visible or not, for the chain link
        let record = vs.records().read_any(uid)?;
        let payload = record.payload();
        drop(record);
        let user = &payload[16..]; // skip the version stamps
        let (_, at) = read_string(user);
        let next = get_u64(&user[at..]);

        if vs.read(SUPER_XID, uid)?.is_none() {
            return Ok((None, next));
        }

        let (name, mut at) = read_string(user);
        at += 8;
        let mut fields = Vec::new();
        while at + 8 <= user.len() {
            let field_uid = get_u64(&user[at..]);
            at += 8;
            match Field::load(vs, field_uid)? {
                Some(field) => fields.push(field),
                None => return Ok((None, next)),
            }
        }

        Ok((
            Some(Self {
                uid,
                name,
                next,
                fields,
            }),
            next,
        ))
    }

    pub fn describe(&self) -> String {
        let columns: Vec<String> = self.fields.iter().map(|f| f.describe()).collect();
        format!("{} ({})", self.name, columns.join(", "))
    }

    fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::FieldNotFound(name.to_string()))
    }

    fn indexed_field(&self, name: &str) -> Result<&Field> {
        let field = self.field(name)?;
        if !field.is_indexed() {
            return Err(Error::FieldNotIndexed(name.to_string()));
        }
        Ok(field)
    }

    fn first_indexed(&self) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.is_indexed())
            .ok_or_else(|| Error::FieldNotIndexed(format!("{} has no index", self.name)))
    }

    fn parse_row(&self, raw: &[u8]) -> Vec<Value> {
        let mut values = Vec::with_capacity(self.fields.len());
        let mut at = 0;
        for field in &self.fields {
            let (value, used) = Value::decode(field.ftype, &raw[at..]);
            at += used;
            values.push(value);
        }
        values
    }

    fn encode_row(&self, values: &[Value]) -> Vec<u8> {
        let mut raw = Vec::new();
        for value in values {
            value.encode(&mut raw);
        }
        raw
    }

    fn typed_values(&self, literals: &[Literal]) -> Result<Vec<Value>> {
        if literals.len() != self.fields.len() {
            return Err(Error::InvalidValues);
        }
        self.fields
            .iter()
            .zip(literals)
            .map(|(field, literal)| Value::from_literal(field.ftype, literal))
            .collect()
    }

    /// Store a row and register it in every index.
    pub fn insert_row(&self, vs: &Arc<VersionStore>, xid: Xid, literals: &[Literal]) -> Result<Uid> {
        let values = self.typed_values(literals)?;
        let uid = vs.insert(xid, &self.encode_row(&values))?;
        self.index_row(&values, uid)?;
        Ok(uid)
    }

    fn index_row(&self, values: &[Value], uid: Uid) -> Result<()> {
        for (field, value) in self.fields.iter().zip(values) {
            if let Some(index) = &field.index {
                index.insert(value.key(), uid)?;
            }
        }
        Ok(())
    }

    /// Candidate row uids for a WHERE clause, via exactly one index
    /// range scan per range. No clause means the first indexed field's
    /// full key range.
    fn candidates(&self, cond: Option<&Condition>) -> Result<Vec<Uid>> {
        let (field, ranges) = match cond {
            None => (self.first_indexed()?, vec![(i64::MIN, i64::MAX)]),
            Some(cond) => {
                let field = self.indexed_field(&cond.first.field)?;
                (field, condition_ranges(self, cond)?)
            }
        };
        let index = field.index.as_ref().unwrap();

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (low, high) in ranges {
            if low > high {
                continue;
            }
            for uid in index.search_range(low, high)? {
                if seen.insert(uid) {
                    out.push(uid);
                }
            }
        }
        Ok(out)
    }

    /// Rows visible to `xid` matching the clause, as decoded values.
    pub fn select_rows(
        &self,
        vs: &Arc<VersionStore>,
        xid: Xid,
        cond: Option<&Condition>,
    ) -> Result<Vec<(Uid, Vec<Value>)>> {
        let mut rows = Vec::new();
        for uid in self.candidates(cond)? {
            if let Some(raw) = vs.read(xid, uid)? {
                let values = self.parse_row(&raw);
                if matches_condition(self, &values, cond)? {
                    rows.push((uid, values));
                }
            }
        }
        Ok(rows)
    }

    /// Delete matching rows; returns how many went away.
    pub fn delete_rows(
        &self,
        vs: &Arc<VersionStore>,
        xid: Xid,
        cond: Option<&Condition>,
    ) -> Result<usize> {
        let mut gone = 0;
        for (uid, _) in self.select_rows(vs, xid, cond)? {
            if vs.delete(xid, uid)? {
                gone += 1;
            }
        }
        Ok(gone)
    }

    /// Update is delete-then-reinsert: records never grow in place, so
    /// the new row gets a fresh uid, re-registered in every index.
    pub fn update_rows(
        &self,
        vs: &Arc<VersionStore>,
        xid: Xid,
        field_name: &str,
        literal: &Literal,
        cond: Option<&Condition>,
    ) -> Result<usize> {
        let slot = self
            .fields
            .iter()
            .position(|f| f.name == field_name)
            .ok_or_else(|| Error::FieldNotFound(field_name.to_string()))?;
        let new_value = Value::from_literal(self.fields[slot].ftype, literal)?;

        let mut touched = 0;
        for (uid, mut values) in self.select_rows(vs, xid, cond)? {
            if !vs.delete(xid, uid)? {
                continue;
            }
            values[slot] = new_value.clone();
            let new_uid = vs.insert(xid, &self.encode_row(&values))?;
            self.index_row(&values, new_uid)?;
            touched += 1;
        }
        Ok(touched)
    }
}

/// The key intervals a WHERE clause asks of its (single) field's
/// index: one for a bare comparison, intersection for AND, both for
/// OR.
fn condition_ranges(table: &Table, cond: &Condition) -> Result<Vec<(i64, i64)>> {
    let field = table.field(&cond.first.field)?;
    let first = compare_range(field.ftype, &cond.first.op, &cond.first.value)?;
    match &cond.rest {
        None => Ok(vec![first]),
        Some((logic, second_cmp)) => {
            if second_cmp.field != cond.first.field {
                return Err(Error::InvalidLogOp(
                    "both sides must test the same field".to_string(),
                ));
            }
            let second = compare_range(field.ftype, &second_cmp.op, &second_cmp.value)?;
            match logic {
                LogicOp::And => Ok(vec![(first.0.max(second.0), first.1.min(second.1))]),
                LogicOp::Or => Ok(vec![first, second]),
            }
        }
    }
}

/// Hashed keys make `<`/`>` on string fields meaningless; only
/// equality is allowed there.
fn compare_range(ftype: FieldType, op: &CmpOp, literal: &Literal) -> Result<(i64, i64)> {
    if ftype == FieldType::Str && *op != CmpOp::Eq {
        return Err(Error::InvalidLogOp(
            "string fields only support equality".to_string(),
        ));
    }
    let key = Value::from_literal(ftype, literal)?.key();
    Ok(match op {
        CmpOp::Eq => (key, key),
        CmpOp::Gt => (key.saturating_add(1), i64::MAX),
        CmpOp::Lt => (i64::MIN, key.saturating_sub(1)),
    })
}

/// Re-check a candidate row against the clause: index keys are exact
/// for integer fields but hashed for strings, so string equality must
/// be confirmed on the decoded value.
fn matches_condition(table: &Table, values: &[Value], cond: Option<&Condition>) -> Result<bool> {
    let cond = match cond {
        Some(cond) => cond,
        None => return Ok(true),
    };
    let first = check_compare(table, values, &cond.first)?;
    Ok(match &cond.rest {
        None => first,
        Some((LogicOp::And, second)) => first && check_compare(table, values, second)?,
        Some((LogicOp::Or, second)) => first || check_compare(table, values, second)?,
    })
}

fn check_compare(table: &Table, values: &[Value], cmp: &crate::parser::Compare) -> Result<bool> {
    let slot = table
        .fields
        .iter()
        .position(|f| f.name == cmp.field)
        .ok_or_else(|| Error::FieldNotFound(cmp.field.clone()))?;
    let wanted = Value::from_literal(table.fields[slot].ftype, &cmp.value)?;

    Ok(match cmp.op {
        CmpOp::Eq => values[slot] == wanted,
        CmpOp::Gt => values[slot].key() > wanted.key(),
        CmpOp::Lt => values[slot].key() < wanted.key(),
    })
}
