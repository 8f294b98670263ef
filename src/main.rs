use std::{env, process, sync::Arc};

use log::error;

use micro_db::{
    error::{Error, Result},
    server::Server,
    Database,
};

const DEFAULT_PORT: u16 = 9626;

fn main() {
    micro_db::utils::init_log();

    if let Err(e) = run() {
        error!("fatal: {}", e);
        eprintln!("fatal: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.split_first() {
        Some((mode, rest)) if mode == "create" => {
            let (base, _, _) = options(rest)?;
            Database::create(&base, 0)
        }
        Some((mode, rest)) if mode == "open" => {
            let (base, mem, port) = options(rest)?;
            let db = Database::open(&base, Database::capacity_for(mem))?;
            let server = Server::bind(&format!("0.0.0.0:{}", port), db.tables().clone())?;
            server.serve()
        }
        _ => {
            eprintln!("usage: micro-db create <path>");
            eprintln!("       micro-db open <path> [--mem <bytes|KB|MB|GB>] [--port <port>]");
            Err(Error::InvalidCommand)
        }
    }
}

fn options(rest: &[String]) -> Result<(String, u64, u16)> {
    let mut base = None;
    let mut mem = 0u64;
    let mut port = DEFAULT_PORT;

    let mut it = rest.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--mem" => {
                let value = it.next().ok_or(Error::InvalidMem)?;
                mem = parse_memory(value)?;
            }
            "--port" => {
                let value = it.next().ok_or(Error::InvalidCommand)?;
                port = value.parse().map_err(|_| Error::InvalidCommand)?;
            }
            path if base.is_none() => base = Some(path.to_string()),
            _ => return Err(Error::InvalidCommand),
        }
    }
    Ok((base.ok_or(Error::InvalidCommand)?, mem, port))
}

/// A byte budget, optionally suffixed `KB` / `MB` / `GB`; 0 means
/// unbounded.
fn parse_memory(input: &str) -> Result<u64> {
    let upper = input.to_ascii_uppercase();
    let (digits, unit) = match upper.find(|c: char| !c.is_ascii_digit()) {
        None => (upper.as_str(), 1u64),
        Some(at) => {
            let unit = match &upper[at..] {
                "KB" => 1u64 << 10,
                "MB" => 1u64 << 20,
                "GB" => 1u64 << 30,
                _ => return Err(Error::InvalidMem),
            };
            (&upper[..at], unit)
        }
    };
    let value: u64 = digits.parse().map_err(|_| Error::InvalidMem)?;
    Ok(value * unit)
}
