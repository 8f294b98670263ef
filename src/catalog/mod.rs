mod field;
mod table;

pub use field::{Field, FieldType, Value};
pub use table::Table;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::{info, warn};

use crate::{
    boot::BootCell,
    error::{Error, Result},
    parser::Statement,
    transaction::{IsolationLevel, Xid},
    version::VersionStore,
};

/// The table catalog: translates parsed statements into storage calls.
///
/// Committed tables hang off a record chain headed by the boot cell
/// and are registered in memory at open. Tables created inside a
/// still-open transaction are parked per-xid and only published at
/// commit; their records ride on ordinary version visibility, so a
/// crashed or aborted create leaves nothing visible.
pub struct TableManager {
    vs: Arc<VersionStore>,
    boot: BootCell,
    tables: Mutex<HashMap<String, Arc<Table>>>,
    pending: Mutex<HashMap<Xid, Vec<Arc<Table>>>>,
    // serialises chain-head updates
    create_lock: Mutex<()>,
}

impl TableManager {
    /// Walk the chain from the boot cell and register every table
    /// whose create committed.
    pub fn open(vs: Arc<VersionStore>, boot: BootCell) -> Result<Self> {
        let mut tables = HashMap::new();
        let mut cursor = boot.load()?;
        while cursor != 0 {
            let (loaded, next) = Table::load(&vs, cursor)?;
            match loaded {
                Some(table) => {
                    tables.insert(table.name.clone(), Arc::new(table));
                }
                None => warn!("skipping unreadable table record {:#x}", cursor),
            }
            cursor = next;
        }
        info!("catalog loaded, {} tables", tables.len());

        Ok(Self {
            vs,
            boot,
            tables: Mutex::new(tables),
            pending: Mutex::new(HashMap::new()),
            create_lock: Mutex::new(()),
        })
    }

    pub fn version_store(&self) -> &Arc<VersionStore> {
        &self.vs
    }

    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        self.vs.begin(level)
    }

    /// Commit `xid`, publishing any tables it created.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.vs.commit(xid)?;
        if let Some(created) = self.pending.lock().unwrap().remove(&xid) {
            let mut tables = self.tables.lock().unwrap();
            for table in created {
                tables.insert(table.name.clone(), table);
            }
        }
        Ok(())
    }

    /// Abort `xid`, discarding its unpublished tables.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.pending.lock().unwrap().remove(&xid);
        self.vs.abort(xid)
    }

    /// Run one non-transaction-control statement under `xid` and
    /// render its reply.
    pub fn execute(&self, xid: Xid, statement: &Statement) -> Result<Vec<u8>> {
        match statement {
            Statement::Show => self.show(xid),
            Statement::Create {
                table,
                fields,
                indexed,
            } => self.create(xid, table, fields, indexed),
            Statement::Insert { table, values } => {
                let table = self.table(xid, table)?;
                table.insert_row(&self.vs, xid, values)?;
                Ok(b"insert 1".to_vec())
            }
            Statement::Select {
                table,
                fields,
                cond,
            } => {
                let table = self.table(xid, table)?;
                let rows = table.select_rows(&self.vs, xid, cond.as_ref())?;
                render_rows(&table, fields, &rows)
            }
            Statement::Delete { table, cond } => {
                let table = self.table(xid, table)?;
                let gone = table.delete_rows(&self.vs, xid, cond.as_ref())?;
                Ok(format!("delete {}", gone).into_bytes())
            }
            Statement::Update {
                table,
                field,
                value,
                cond,
            } => {
                let table = self.table(xid, table)?;
                let touched = table.update_rows(&self.vs, xid, field, value, cond.as_ref())?;
                Ok(format!("update {}", touched).into_bytes())
            }
            Statement::Begin { .. } | Statement::Commit | Statement::Abort => {
                // transaction control is the connection executor's job
                Err(Error::InvalidCommand)
            }
        }
    }

    fn table(&self, xid: Xid, name: &str) -> Result<Arc<Table>> {
        if let Some(table) = self.tables.lock().unwrap().get(name) {
            return Ok(table.clone());
        }
        if let Some(own) = self.pending.lock().unwrap().get(&xid) {
            if let Some(table) = own.iter().find(|t| t.name == name) {
                return Ok(table.clone());
            }
        }
        Err(Error::TableNotFound(name.to_string()))
    }

    fn create(
        &self,
        xid: Xid,
        name: &str,
        fields: &[(String, String)],
        indexed: &[String],
    ) -> Result<Vec<u8>> {
        if self.tables.lock().unwrap().contains_key(name)
            || self
                .pending
                .lock()
                .unwrap()
                .values()
                .flatten()
                .any(|t| t.name == name)
        {
            return Err(Error::DuplicatedTable(name.to_string()));
        }

        let _chain = self.create_lock.lock().unwrap();
        let head = self.boot.load()?;
        let table = Arc::new(Table::create(&self.vs, xid, name, fields, indexed, head)?);
        self.boot.store(table.uid)?;
        self.pending
            .lock()
            .unwrap()
            .entry(xid)
            .or_default()
            .push(table);
        Ok(format!("create {}", name).into_bytes())
    }

    fn show(&self, xid: Xid) -> Result<Vec<u8>> {
        let mut lines: Vec<String> = self
            .tables
            .lock()
            .unwrap()
            .values()
            .map(|t| t.describe())
            .collect();
        if let Some(own) = self.pending.lock().unwrap().get(&xid) {
            lines.extend(own.iter().map(|t| t.describe()));
        }
        lines.sort();
        Ok(lines.join("\n").into_bytes())
    }
}

/// SELECT output: each row as `[v1, v2, …]`, one row per line, columns
/// in declaration (or selection) order.
fn render_rows(
    table: &Table,
    selected: &Option<Vec<String>>,
    rows: &[(crate::storage::Uid, Vec<Value>)],
) -> Result<Vec<u8>> {
    let slots: Vec<usize> = match selected {
        None => (0..table.fields.len()).collect(),
        Some(names) => names
            .iter()
            .map(|name| {
                table
                    .fields
                    .iter()
                    .position(|f| &f.name == name)
                    .ok_or_else(|| Error::FieldNotFound(name.clone()))
            })
            .collect::<Result<_>>()?,
    };

    let lines: Vec<String> = rows
        .iter()
        .map(|(_, values)| {
            let cells: Vec<String> = slots.iter().map(|&i| values[i].render()).collect();
            format!("[{}]", cells.join(", "))
        })
        .collect();
    Ok(lines.join("\n").into_bytes())
}
