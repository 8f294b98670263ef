use std::sync::Arc;

use crate::{
    btree::BPlusTree,
    error::{Error, Result},
    parser::Literal,
    storage::Uid,
    transaction::Xid,
    utils::{get_i32, get_i64, get_u64, read_string, write_string},
    version::VersionStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int32,
    Int64,
    Str,
}

impl FieldType {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "int32" => Ok(FieldType::Int32),
            "int64" => Ok(FieldType::Int64),
            "string" => Ok(FieldType::Str),
            other => Err(Error::InvalidField(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Str => "string",
        }
    }
}

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Str(String),
}

impl Value {
    pub fn from_literal(ftype: FieldType, literal: &Literal) -> Result<Self> {
        match (ftype, literal) {
            (FieldType::Int32, Literal::Int(v)) => {
                if *v < i32::MIN as i64 || *v > i32::MAX as i64 {
                    return Err(Error::InvalidValues);
                }
                Ok(Value::Int32(*v as i32))
            }
            (FieldType::Int64, Literal::Int(v)) => Ok(Value::Int64(*v)),
            (FieldType::Str, Literal::Str(s)) => Ok(Value::Str(s.clone())),
            _ => Err(Error::InvalidValues),
        }
    }

    /// The signed 64-bit index key for this value: numeric values map
    /// to themselves, strings to a 64-bit FNV-1a hash.
    pub fn key(&self) -> i64 {
        match self {
            Value::Int32(v) => *v as i64,
            Value::Int64(v) => *v,
            Value::Str(s) => fnv1a(s.as_bytes()) as i64,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Value::Int32(v) => v.to_string(),
            Value::Int64(v) => v.to_string(),
            Value::Str(s) => s.clone(),
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Str(s) => write_string(out, s),
        }
    }

    pub fn decode(ftype: FieldType, buf: &[u8]) -> (Self, usize) {
        match ftype {
            FieldType::Int32 => (Value::Int32(get_i32(buf)), 4),
            FieldType::Int64 => (Value::Int64(get_i64(buf)), 8),
            FieldType::Str => {
                let (s, used) = read_string(buf);
                (Value::Str(s), used)
            }
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// One column of a table, persisted as its own versioned record:
/// `[name:string][type:string][index_handle:8]`. Indexed fields carry
/// the handle uid of their B+tree; 0 means unindexed.
pub struct Field {
    pub uid: Uid,
    pub name: String,
    pub ftype: FieldType,
    pub index: Option<Arc<BPlusTree>>,
}

impl Field {
    /// Persist a new field under `xid`, building its index up front
    /// when requested.
    pub fn create(
        vs: &Arc<VersionStore>,
        xid: Xid,
        name: &str,
        ftype: FieldType,
        indexed: bool,
    ) -> Result<Self> {
        let handle = if indexed {
            BPlusTree::create(vs.records())?
        } else {
            0
        };

        let mut raw = Vec::new();
        write_string(&mut raw, name);
        write_string(&mut raw, ftype.name());
        raw.extend_from_slice(&handle.to_le_bytes());
        let uid = vs.insert(xid, &raw)?;

        Ok(Self {
            uid,
            name: name.to_string(),
            ftype,
            index: build_index(vs, handle),
        })
    }

    /// Load a field record as the catalog sees it (super visibility);
    /// `None` when the creating transaction never committed.
    pub fn load(vs: &Arc<VersionStore>, uid: Uid) -> Result<Option<Self>> {
        let raw = match vs.read(crate::transaction::SUPER_XID, uid)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let (name, mut at) = read_string(&raw);
        let (type_name, used) = read_string(&raw[at..]);
        at += used;
        let handle = get_u64(&raw[at..]);

        Ok(Some(Self {
            uid,
            name,
            ftype: FieldType::parse(&type_name)?,
            index: build_index(vs, handle),
        }))
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    pub fn describe(&self) -> String {
        if self.is_indexed() {
            format!("{} {} (index)", self.name, self.ftype.name())
        } else {
            format!("{} {}", self.name, self.ftype.name())
        }
    }
}

fn build_index(vs: &Arc<VersionStore>, handle: u64) -> Option<Arc<BPlusTree>> {
    if handle == 0 {
        None
    } else {
        Some(Arc::new(BPlusTree::open(vs.records().clone(), handle)))
    }
}
