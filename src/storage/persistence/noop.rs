//! A backend that persists nothing.
//!
//! Useful for tests, or when the store should be purely in-memory.

use super::{Persistence, PersistenceResult};
use crate::storage::record::Record;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl NoopBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Persistence for NoopBackend {
    fn load(
        &self,
        _into: &mut HashMap<String, Record>,
        _now: DateTime<Utc>,
    ) -> PersistenceResult<()> {
        Ok(())
    }

    fn save(&self, _key: &str, _record: &Record) -> PersistenceResult<()> {
        Ok(())
    }

    fn save_async(&self, _key: &str, _record: &Record) {}

    fn delete(&self, _key: &str) -> PersistenceResult<()> {
        Ok(())
    }

    fn delete_async(&self, _key: &str) {}

    fn flush(&self) -> PersistenceResult<()> {
        Ok(())
    }

    fn stop(&self) -> PersistenceResult<()> {
        Ok(())
    }
}
