//! Demo: Basic CRUD Operations
//!
//! Create, read, update and delete records in a JSON collection file, then
//! show how ids behave after a delete.
//!
//! Run with: cargo run --example basic_crud

use chatdesk::{CorruptPolicy, Fields, Store};
use eyre::Result;
use serde_json::{Value, json};

fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

fn main() -> Result<()> {
    // Create a temporary directory for this demo
    let temp_dir = tempfile::tempdir()?;
    let path = temp_dir.path().join("users.json");

    println!("chatdesk Basic CRUD Demo");
    println!("========================\n");

    let store = Store::open(&path, CorruptPolicy::Recover)?;
    println!("Collection file: {}\n", store.path().display());

    // CREATE
    println!("1. CREATE - Adding two users...");
    let ana = store.create(fields(json!({"name": "Ana", "age": 20, "city": "Lima"})))?;
    let leo = store.create(fields(json!({"name": "Leo", "age": 21, "city": "Cusco"})))?;
    println!("   Created ids {} and {}\n", ana.id, leo.id);

    // UPDATE
    println!("2. UPDATE - Moving Leo to Puno...");
    let leo = store.update(leo.id, &fields(json!({"city": "Puno"})))?;
    println!("   {}\n", serde_json::to_string(&leo)?);

    // DELETE then CREATE
    println!("3. DELETE - Removing Ana, then adding Sara...");
    store.delete(ana.id)?;
    let sara = store.create(fields(json!({"name": "Sara", "age": 22, "city": "Arequipa"})))?;
    println!("   Sara got id {} (max existing id + 1)\n", sara.id);

    // READ
    println!("4. READ - File contents:");
    println!("{}", std::fs::read_to_string(store.path())?);

    println!("Demo complete!");
    Ok(())
}
