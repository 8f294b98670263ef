mod codec;

pub use codec::Packet;

use std::{
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread,
};

use log::{debug, info, warn};

use crate::{
    catalog::TableManager,
    error::{Error, Result},
    parser::{self, Statement},
    transaction::{IsolationLevel, Xid},
};

/// Thread-per-connection TCP front end. Each line carries one
/// hex-encoded packet; each request gets exactly one reply.
pub struct Server {
    listener: TcpListener,
    tables: Arc<TableManager>,
}

impl Server {
    pub fn bind(addr: &str, tables: Arc<TableManager>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Self { listener, tables })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop; runs until the process exits.
    pub fn serve(&self) -> Result<()> {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let tables = self.tables.clone();
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(stream, tables) {
                            debug!("connection closed: {}", e);
                        }
                    });
                }
                Err(e) => warn!("accept failed: {}", e),
            }
        }
        Ok(())
    }
}

fn handle_connection(stream: TcpStream, tables: Arc<TableManager>) -> Result<()> {
    let peer = stream.peer_addr()?;
    debug!("connection from {}", peer);
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    let mut executor = Executor::new(tables);

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let sql = match Packet::from_line(&line) {
            Ok(Packet::Data(payload)) => String::from_utf8_lossy(&payload).into_owned(),
            // a malformed or non-data packet poisons the connection
            Ok(Packet::Err(_)) | Err(_) => break,
        };

        let reply = match executor.run(&sql) {
            Ok(bytes) => Packet::Data(bytes),
            Err(e) => Packet::Err(e.to_string()),
        };
        writer.write_all(reply.to_line().as_bytes())?;
        writer.flush()?;
    }

    executor.teardown();
    debug!("connection from {} done", peer);
    Ok(())
}

/// Per-connection statement executor holding the connection's current
/// transaction. Statements outside a transaction run in a one-shot
/// transaction that commits (or rolls back) immediately.
pub struct Executor {
    tables: Arc<TableManager>,
    current: Option<Xid>,
}

impl Executor {
    pub fn new(tables: Arc<TableManager>) -> Self {
        Self {
            tables,
            current: None,
        }
    }

    pub fn run(&mut self, sql: &str) -> Result<Vec<u8>> {
        let statement = parser::parse(sql)?;
        match statement {
            Statement::Begin { level } => self.begin(level),
            Statement::Commit => self.commit(),
            Statement::Abort => self.abort(),
            other => self.run_dml(&other),
        }
    }

    fn begin(&mut self, level: IsolationLevel) -> Result<Vec<u8>> {
        if self.current.is_some() {
            return Err(Error::NestedTransaction);
        }
        let xid = self.tables.begin(level)?;
        self.current = Some(xid);
        Ok(b"begin".to_vec())
    }

    fn commit(&mut self) -> Result<Vec<u8>> {
        let xid = self.current.ok_or(Error::NoTransaction)?;
        match self.tables.commit(xid) {
            Ok(()) => {
                self.current = None;
                Ok(b"commit".to_vec())
            }
            Err(e) => {
                self.drop_dead_transaction(&e);
                Err(e)
            }
        }
    }

    fn abort(&mut self) -> Result<Vec<u8>> {
        let xid = self.current.take().ok_or(Error::NoTransaction)?;
        self.tables.abort(xid)?;
        Ok(b"abort".to_vec())
    }

    fn run_dml(&mut self, statement: &Statement) -> Result<Vec<u8>> {
        match self.current {
            Some(xid) => {
                let outcome = self.tables.execute(xid, statement);
                if let Err(e) = &outcome {
                    self.drop_dead_transaction(e);
                }
                outcome
            }
            None => {
                // one-shot transaction around the single statement
                let xid = self.tables.begin(IsolationLevel::ReadCommitted)?;
                match self.tables.execute(xid, statement) {
                    Ok(reply) => {
                        self.tables.commit(xid)?;
                        Ok(reply)
                    }
                    Err(e) => {
                        let _ = self.tables.abort(xid);
                        Err(e)
                    }
                }
            }
        }
    }

    /// An internally aborted transaction is gone; stop tracking it so
    /// the client can start a new one.
    fn drop_dead_transaction(&mut self, e: &Error) {
        if e.aborts_transaction() {
            if let Some(xid) = self.current.take() {
                let _ = self.tables.abort(xid);
            }
        }
    }

    /// Connection teardown rolls back whatever is still open.
    pub fn teardown(&mut self) {
        if let Some(xid) = self.current.take() {
            let _ = self.tables.abort(xid);
        }
    }
}
