mod common;

use std::io::{BufRead, BufReader, Write};

use micro_db::{
    error::Error,
    server::{Executor, Packet, Server},
};

fn text(reply: Vec<u8>) -> String {
    String::from_utf8(reply).unwrap()
}

#[test]
fn test_create_insert_select() {
    let (_scratch, db) = common::fresh_db();
    let mut exec = Executor::new(db.tables().clone());

    exec.run("create table person id int32, name string (index id)")
        .unwrap();
    exec.run("insert into person values 1, \"ada\"").unwrap();
    exec.run("insert into person values 2, \"grace\"").unwrap();
    exec.run("insert into person values 3, \"edsger\"").unwrap();

    assert_eq!(
        text(exec.run("select * from person where id = 2").unwrap()),
        "[2, grace]"
    );
    assert_eq!(
        text(exec.run("select name from person where id > 1 and id < 3").unwrap()),
        "[grace]"
    );
    assert_eq!(
        text(exec.run("select * from person where id < 1 or id > 2").unwrap()),
        "[3, edsger]"
    );
    assert_eq!(
        text(exec.run("select * from person").unwrap()),
        "[1, ada]\n[2, grace]\n[3, edsger]"
    );
    db.close().unwrap();
}

#[test]
fn test_update_and_delete() {
    let (_scratch, db) = common::fresh_db();
    let mut exec = Executor::new(db.tables().clone());

    exec.run("create table counters k int64, v int64 (index k)")
        .unwrap();
    for i in 0..5 {
        exec.run(&format!("insert into counters values {}, {}", i, i * 10))
            .unwrap();
    }

    assert_eq!(
        text(exec.run("update counters set v = 99 where k = 3").unwrap()),
        "update 1"
    );
    assert_eq!(
        text(exec.run("select v from counters where k = 3").unwrap()),
        "[99]"
    );

    assert_eq!(
        text(exec.run("delete from counters where k > 2").unwrap()),
        "delete 2"
    );
    assert_eq!(
        text(exec.run("select * from counters").unwrap()),
        "[0, 0]\n[1, 10]\n[2, 20]"
    );
    db.close().unwrap();
}

#[test]
fn test_string_equality_through_hashed_index() {
    let (_scratch, db) = common::fresh_db();
    let mut exec = Executor::new(db.tables().clone());

    exec.run("create table tags name string (index name)").unwrap();
    exec.run("insert into tags values \"red\"").unwrap();
    exec.run("insert into tags values \"blue\"").unwrap();

    assert_eq!(
        text(exec.run("select * from tags where name = \"blue\"").unwrap()),
        "[blue]"
    );
    // order comparisons on hashed string keys are refused
    match exec.run("select * from tags where name > \"a\"") {
        Err(Error::InvalidLogOp(_)) => {}
        other => panic!("expected InvalidLogOp, got {:?}", other),
    }
    db.close().unwrap();
}

#[test]
fn test_catalog_errors() {
    let (_scratch, db) = common::fresh_db();
    let mut exec = Executor::new(db.tables().clone());

    exec.run("create table t a int32, b string (index a)").unwrap();

    match exec.run("create table t a int32 (index a)") {
        Err(Error::DuplicatedTable(_)) => {}
        other => panic!("expected DuplicatedTable, got {:?}", other),
    }
    match exec.run("select * from missing") {
        Err(Error::TableNotFound(_)) => {}
        other => panic!("expected TableNotFound, got {:?}", other),
    }
    match exec.run("select * from t where nope = 1") {
        Err(Error::FieldNotFound(_)) => {}
        other => panic!("expected FieldNotFound, got {:?}", other),
    }
    match exec.run("select * from t where b = \"x\"") {
        Err(Error::FieldNotIndexed(_)) => {}
        other => panic!("expected FieldNotIndexed, got {:?}", other),
    }
    match exec.run("insert into t values 1") {
        Err(Error::InvalidValues) => {}
        other => panic!("expected InvalidValues, got {:?}", other),
    }
    match exec.run("insert into t values \"one\", \"two\"") {
        Err(Error::InvalidValues) => {}
        other => panic!("expected InvalidValues, got {:?}", other),
    }
    db.close().unwrap();
}

#[test]
fn test_transaction_control_and_isolation() {
    let (_scratch, db) = common::fresh_db();
    let mut alice = Executor::new(db.tables().clone());
    let mut bob = Executor::new(db.tables().clone());

    alice
        .run("create table notes id int32, body string (index id)")
        .unwrap();

    // nested begin / stray commit
    alice.run("begin").unwrap();
    match alice.run("begin") {
        Err(Error::NestedTransaction) => {}
        other => panic!("expected NestedTransaction, got {:?}", other),
    }
    alice.run("abort").unwrap();
    match alice.run("commit") {
        Err(Error::NoTransaction) => {}
        other => panic!("expected NoTransaction, got {:?}", other),
    }

    // uncommitted work is invisible to the other connection
    alice.run("begin").unwrap();
    alice.run("insert into notes values 1, \"draft\"").unwrap();
    assert_eq!(text(bob.run("select * from notes").unwrap()), "");
    alice.run("commit").unwrap();
    assert_eq!(text(bob.run("select * from notes").unwrap()), "[1, draft]");

    // a snapshot transaction keeps its view across others' commits
    bob.run("begin isolation level repeatable read").unwrap();
    assert_eq!(
        text(bob.run("select * from notes where id = 2").unwrap()),
        ""
    );
    alice.run("insert into notes values 2, \"late\"").unwrap();
    assert_eq!(
        text(bob.run("select * from notes where id = 2").unwrap()),
        ""
    );
    bob.run("commit").unwrap();
    assert_eq!(
        text(bob.run("select * from notes where id = 2").unwrap()),
        "[2, late]"
    );
    db.close().unwrap();
}

#[test]
fn test_transactional_create_published_at_commit() {
    let (_scratch, db) = common::fresh_db();
    let mut alice = Executor::new(db.tables().clone());
    let mut bob = Executor::new(db.tables().clone());

    alice.run("begin").unwrap();
    alice.run("create table ephemeral a int32 (index a)").unwrap();
    alice.run("insert into ephemeral values 1").unwrap();

    // bob cannot see the table yet
    match bob.run("select * from ephemeral") {
        Err(Error::TableNotFound(_)) => {}
        other => panic!("expected TableNotFound, got {:?}", other),
    }

    alice.run("commit").unwrap();
    assert_eq!(text(bob.run("select * from ephemeral").unwrap()), "[1]");
    db.close().unwrap();
}

#[test]
fn test_aborted_create_stays_invisible_after_reopen() {
    let (scratch, db) = common::fresh_db();
    {
        let mut exec = Executor::new(db.tables().clone());
        exec.run("create table keep a int32 (index a)").unwrap();
        exec.run("begin").unwrap();
        exec.run("create table dropped a int32 (index a)").unwrap();
        exec.run("abort").unwrap();
    }
    db.close().unwrap();

    // the chain still reaches the surviving table past the dead one
    let db = scratch.reopen();
    let mut exec = Executor::new(db.tables().clone());
    assert_eq!(text(exec.run("show").unwrap()), "keep (a int32 (index))");
    match exec.run("select * from dropped") {
        Err(Error::TableNotFound(_)) => {}
        other => panic!("expected TableNotFound, got {:?}", other),
    }
    db.close().unwrap();
}

#[test]
fn test_show_lists_schemas() {
    let (_scratch, db) = common::fresh_db();
    let mut exec = Executor::new(db.tables().clone());

    exec.run("create table a x int32 (index x)").unwrap();
    exec.run("create table b y int64, z string (index y)").unwrap();
    assert_eq!(
        text(exec.run("show").unwrap()),
        "a (x int32 (index))\nb (y int64 (index), z string)"
    );
    db.close().unwrap();
}

#[test]
fn test_wire_protocol_round_trip() {
    let (_scratch, db) = common::fresh_db();
    let server = Server::bind("127.0.0.1:0", db.tables().clone()).unwrap();
    let addr = server.local_addr().unwrap();
    std::thread::spawn(move || {
        let _ = server.serve();
    });

    let stream = std::net::TcpStream::connect(addr).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;

    let mut request = |sql: &str| -> Packet {
        writer
            .write_all(Packet::Data(sql.as_bytes().to_vec()).to_line().as_bytes())
            .unwrap();
        writer.flush().unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        Packet::from_line(&line).unwrap()
    };

    assert_eq!(
        request("create table kv k int64, v string (index k)"),
        Packet::Data(b"create kv".to_vec())
    );
    assert_eq!(
        request("insert into kv values 1, \"one\""),
        Packet::Data(b"insert 1".to_vec())
    );
    assert_eq!(
        request("select v from kv where k = 1"),
        Packet::Data(b"[one]".to_vec())
    );
    match request("select * from nowhere") {
        Packet::Err(message) => assert!(message.contains("table not found")),
        other => panic!("expected error packet, got {:?}", other),
    }
}
