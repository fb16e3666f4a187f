//! Tests for `Value` and `ValueType`.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use super::{Value, ValueType};

fn hash_of(v: &Value) -> u64 {
  let mut h = DefaultHasher::new();
  v.hash_into(&mut h);
  h.finish()
}

#[test]
fn value_type_of_variants() {
  assert_eq!(Value::Integer(1).value_type(), Some(ValueType::Integer));
  assert_eq!(Value::from("x").value_type(), Some(ValueType::String));
  assert_eq!(Value::from(1.5).value_type(), Some(ValueType::Number));
  assert_eq!(Value::Null.value_type(), None);
}

#[test]
fn null_conforms_to_every_type() {
  for ty in [
    ValueType::Integer,
    ValueType::Number,
    ValueType::String,
    ValueType::Boolean,
    ValueType::Date,
    ValueType::Binary,
  ] {
    assert!(Value::Null.conforms_to(ty));
  }
}

#[test]
fn integer_does_not_conform_to_string() {
  assert!(!Value::Integer(3).conforms_to(ValueType::String));
}

#[test]
fn equal_values_hash_equal() {
  assert_eq!(hash_of(&Value::from("k1")), hash_of(&Value::from("k1")));
  assert_eq!(hash_of(&Value::from(2.5)), hash_of(&Value::from(2.5)));
  assert_ne!(hash_of(&Value::Integer(1)), hash_of(&Value::from("1")));
}

#[test]
fn display_values() {
  assert_eq!(Value::Integer(7).to_string(), "7");
  assert_eq!(Value::Null.to_string(), "null");
  assert_eq!(ValueType::Boolean.to_string(), "boolean");
}
