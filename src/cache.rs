//! Schema Cache
//!
//! Holds the last successfully fetched inventory, keyed by connection signature. There
//! is one slot: fetching for a different connection replaces it.

use std::future::Future;
use tracing::debug;

use crate::descriptor::{ConnectionDescriptor, ConnectionSignature};
use crate::engine::{EngineAdapter, SchemaEntry};
use crate::error::Result;

/// Lookup found nothing for the requested signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheMiss;

#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    slot: Option<(ConnectionSignature, Vec<SchemaEntry>)>,
}

impl SchemaCache {
    /// Empty cache
    #[must_use]
    pub const fn new() -> Self {
        Self { slot: None }
    }

    fn lookup(
        &self,
        signature: &ConnectionSignature,
    ) -> std::result::Result<&[SchemaEntry], CacheMiss> {
        match &self.slot {
            Some((cached, entries)) if cached == signature => Ok(entries),
            _ => Err(CacheMiss),
        }
    }

    /// Cached inventory for `descriptor`, loading it with `load` on a miss
    ///
    /// A failed load leaves the slot as it was and returns the error.
    pub async fn fetch_with<F, Fut>(
        &mut self,
        descriptor: &ConnectionDescriptor,
        load: F,
    ) -> Result<Vec<SchemaEntry>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<SchemaEntry>>>,
    {
        let signature = descriptor.signature();

        if let Ok(entries) = self.lookup(signature) {
            debug!(entries = entries.len(), "schema cache hit");
            return Ok(entries.to_vec());
        }

        debug!(db = %descriptor.redacted(), "schema cache miss");
        let entries = load().await?;
        self.slot = Some((signature.clone(), entries.clone()));
        Ok(entries)
    }

    /// Cached inventory for `descriptor`, listing it through `adapter` on a miss
    pub async fn fetch<A: EngineAdapter>(
        &mut self,
        adapter: &A,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Vec<SchemaEntry>> {
        self.fetch_with(descriptor, || adapter.list_schema(descriptor)).await
    }

    /// Signature of the cached inventory, if any
    #[must_use]
    pub fn cached_signature(&self) -> Option<&ConnectionSignature> {
        self.slot.as_ref().map(|(signature, _)| signature)
    }

    /// Empty the slot so the next fetch goes to the engine
    pub fn invalidate(&mut self) {
        self.slot = None;
    }
}
