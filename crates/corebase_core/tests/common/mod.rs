#![allow(dead_code)]

use corebase_core::{Entity, SqliteStore, StoreConfig, ValidationErrorSet};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub title: String,
    pub quantity: i64,
}

impl Order {
    pub fn new(title: &str, quantity: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            quantity,
        }
    }
}

impl Entity for Order {
    type Id = Uuid;
    const COLLECTION: &'static str = "orders";

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(&self) -> ValidationErrorSet {
        let mut errors = ValidationErrorSet::new();
        if self.title.trim().is_empty() {
            errors.push("title", "must not be empty");
        }
        if self.quantity <= 0 {
            errors.push("quantity", "must be positive");
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub code: String,
    pub name: String,
}

impl Entity for Customer {
    type Id = String;
    const COLLECTION: &'static str = "customers";

    fn id(&self) -> String {
        self.code.clone()
    }
}

/// File-backed store so separate sessions observe each other's commits.
pub fn file_store() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::new(StoreConfig::file(dir.path().join("corebase.db")));
    (dir, store)
}
