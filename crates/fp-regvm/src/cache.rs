//! Compiled-code cache keyed by code-object identity.
//!
//! Entries hold the `Arc<CodeObject>` they were compiled from, so an address stays reserved
//! for as long as it is used as a key.

use std::sync::Arc;

use dashmap::DashMap;
use fp_bytecode::CodeObject;

use crate::encode::RegisterCode;

fn identity(code: &Arc<CodeObject>) -> usize {
    Arc::as_ptr(code) as usize
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Compiled(Arc<RegisterCode>),
    /// Compilation failed earlier; the message is kept for diagnostics.
    Rejected(Arc<str>),
    Missing,
}

#[derive(Default)]
pub struct CodeCache {
    compiled: DashMap<usize, (Arc<CodeObject>, Arc<RegisterCode>)>,
    rejected: DashMap<usize, (Arc<CodeObject>, Arc<str>)>,
}

impl CodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, code: &Arc<CodeObject>) -> CacheLookup {
        let key = identity(code);
        if let Some(entry) = self.compiled.get(&key) {
            if Arc::ptr_eq(&entry.0, code) {
                return CacheLookup::Compiled(entry.1.clone());
            }
        }
        if let Some(entry) = self.rejected.get(&key) {
            if Arc::ptr_eq(&entry.0, code) {
                return CacheLookup::Rejected(entry.1.clone());
            }
        }
        CacheLookup::Missing
    }

    pub fn get(&self, code: &Arc<CodeObject>) -> Option<Arc<RegisterCode>> {
        match self.lookup(code) {
            CacheLookup::Compiled(compiled) => Some(compiled),
            _ => None,
        }
    }

    /// Stores a compilation; when two threads race, the first stored artifact wins.
    pub fn insert(&self, code: &Arc<CodeObject>, compiled: RegisterCode) -> Arc<RegisterCode> {
        let compiled = Arc::new(compiled);
        let entry = self
            .compiled
            .entry(identity(code))
            .or_insert_with(|| (code.clone(), compiled.clone()));
        entry.1.clone()
    }

    pub fn reject(&self, code: &Arc<CodeObject>, reason: impl Into<Arc<str>>) {
        self.rejected
            .insert(identity(code), (code.clone(), reason.into()));
    }

    pub fn is_rejected(&self, code: &Arc<CodeObject>) -> bool {
        matches!(self.lookup(code), CacheLookup::Rejected(_))
    }

    pub fn compiled_len(&self) -> usize {
        self.compiled.len()
    }

    pub fn rejected_len(&self) -> usize {
        self.rejected.len()
    }

    pub fn clear(&self) {
        self.compiled.clear();
        self.rejected.clear();
    }
}
