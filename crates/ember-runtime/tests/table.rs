//! Integration tests for the open-addressing hash table, keyed by interned
//! strings the way the globals table and the intern table both use it.

use ember_runtime::heap::{Heap, RootSource};
use ember_runtime::object::ObjHandle;
use ember_runtime::table::{hash_bytes, Table};
use ember_runtime::value::Value;

struct NoRoots;
impl RootSource for NoRoots {
    fn mark_roots(&self, _heap: &Heap, _grey: &mut Vec<ObjHandle>) {}
}

fn number_at(table: &Table<Value>, key: ObjHandle, hash: u32) -> Option<f64> {
    table.get(key, hash).and_then(|v| v.as_number())
}

#[test]
fn set_then_get_round_trips() {
    let mut heap = Heap::new();
    let mut table: Table<Value> = Table::new();
    let key = heap.intern_string("answer", &NoRoots);
    let hash = hash_bytes(b"answer");

    let is_new = table.set(key, hash, Value::Number(42.0));
    assert!(is_new);
    assert_eq!(number_at(&table, key, hash), Some(42.0));
}

#[test]
fn overwriting_an_existing_key_reports_it_is_not_new() {
    let mut heap = Heap::new();
    let mut table: Table<Value> = Table::new();
    let key = heap.intern_string("x", &NoRoots);
    let hash = hash_bytes(b"x");

    table.set(key, hash, Value::Number(1.0));
    let is_new = table.set(key, hash, Value::Number(2.0));
    assert!(!is_new);
    assert_eq!(number_at(&table, key, hash), Some(2.0));
}

#[test]
fn deleting_a_key_makes_it_unreachable() {
    let mut heap = Heap::new();
    let mut table: Table<Value> = Table::new();
    let key = heap.intern_string("gone", &NoRoots);
    let hash = hash_bytes(b"gone");

    table.set(key, hash, Value::Bool(true));
    assert!(table.delete(key, hash));
    assert_eq!(table.get(key, hash).is_none(), true);
}

#[test]
fn deleting_then_reinserting_the_same_key_works_around_the_tombstone() {
    let mut heap = Heap::new();
    let mut table: Table<Value> = Table::new();
    let key = heap.intern_string("churn", &NoRoots);
    let hash = hash_bytes(b"churn");

    table.set(key, hash, Value::Number(1.0));
    table.delete(key, hash);
    table.set(key, hash, Value::Number(2.0));
    assert_eq!(number_at(&table, key, hash), Some(2.0));
}

#[test]
fn grows_past_the_initial_capacity_without_losing_entries() {
    let mut heap = Heap::new();
    let mut table: Table<Value> = Table::new();
    let mut keys = Vec::new();
    for i in 0..200 {
        let name = format!("key{i}");
        let key = heap.intern_string(&name, &NoRoots);
        let hash = hash_bytes(name.as_bytes());
        table.set(key, hash, Value::Number(i as f64));
        keys.push((key, hash, i));
    }
    for (key, hash, i) in keys {
        assert_eq!(number_at(&table, key, hash), Some(i as f64));
    }
}
