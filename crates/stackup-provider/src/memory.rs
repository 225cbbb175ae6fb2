//! In-process control plane - deterministic backend for tests and local runs.
//!
//! Records every call and supports scripted failures per operation.

use crate::control_plane::{ApiObject, ApiRequest, ControlPlane};
use crate::error::{ProviderError, ProviderResult};
use dashmap::DashMap;
use stackup_core::Attributes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Update,
    Delete,
}

impl Op {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Op::Get)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub collection: String,
    /// Name for get/create, id for update/delete.
    pub key: String,
}

struct Fault {
    op: Op,
    collection: String,
    error: ProviderError,
    remaining: u32,
    /// Apply the call, then report the error anyway.
    after_success: bool,
}

#[derive(Default)]
pub struct MemoryControlPlane {
    /// id -> (collection, object)
    objects: DashMap<String, (String, ApiObject)>,
    preset_outputs: DashMap<(String, String), BTreeMap<String, String>>,
    calls: Mutex<Vec<Call>>,
    faults: Mutex<Vec<Fault>>,
    next_id: AtomicU64,
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `op` on `collection` with `error`.
    pub fn fail(&self, op: Op, collection: &str, error: ProviderError, times: u32) {
        self.push_fault(op, collection, error, times, false);
    }

    /// Carry out the next `times` calls of `op` on `collection`, then return
    /// `error` as if the response had been lost.
    pub fn lose_responses(&self, op: Op, collection: &str, error: ProviderError, times: u32) {
        self.push_fault(op, collection, error, times, true);
    }

    fn push_fault(&self, op: Op, collection: &str, error: ProviderError, times: u32, after_success: bool) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(Fault {
                op,
                collection: collection.to_string(),
                error,
                remaining: times,
                after_success,
            });
        }
    }

    /// Outputs the backend reports when `name` is created in `collection`.
    pub fn preset_outputs(&self, collection: &str, name: &str, outputs: BTreeMap<String, String>) {
        self.preset_outputs
            .insert((collection.to_string(), name.to_string()), outputs);
    }

    /// Place an object that nothing in this process created.
    pub fn insert_existing(&self, collection: &str, name: &str, attributes: Attributes) -> String {
        let id = self.allocate_id(collection, name);
        self.objects.insert(
            id.clone(),
            (
                collection.to_string(),
                ApiObject {
                    id: id.clone(),
                    name: name.to_string(),
                    attributes,
                    outputs: BTreeMap::new(),
                },
            ),
        );
        id
    }

    /// Remove an object behind the engine's back.
    pub fn remove_by_name(&self, collection: &str, name: &str) -> bool {
        let id = self.find(collection, name).map(|o| o.id);
        match id {
            Some(id) => self.objects.remove(&id).is_some(),
            None => false,
        }
    }

    pub fn find(&self, collection: &str, name: &str) -> Option<ApiObject> {
        self.objects
            .iter()
            .find(|e| e.value().0 == collection && e.value().1.name == name)
            .map(|e| e.value().1.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.op.is_mutating())
            .collect()
    }

    pub fn calls_for(&self, op: Op, collection: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.op == op && c.collection == collection)
            .count()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut c) = self.calls.lock() {
            c.clear();
        }
    }

    fn allocate_id(&self, collection: &str, name: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}/{}-{:04}", collection, name, n)
    }

    fn record(&self, op: Op, collection: &str, key: &str) -> ProviderResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Call {
                op,
                collection: collection.to_string(),
                key: key.to_string(),
            });
        }
        match self.take_fault(op, collection, false) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn take_fault(&self, op: Op, collection: &str, after_success: bool) -> Option<ProviderError> {
        let mut faults = self.faults.lock().ok()?;
        let pos = faults.iter().position(|f| {
            f.op == op && f.collection == collection && f.after_success == after_success && f.remaining > 0
        })?;
        let fault = &mut faults[pos];
        fault.remaining -= 1;
        let error = fault.error.clone();
        if fault.remaining == 0 {
            faults.remove(pos);
        }
        Some(error)
    }

    /// Error for a call that already took effect, if one is scripted.
    fn lost(&self, op: Op, collection: &str) -> ProviderResult<()> {
        match self.take_fault(op, collection, true) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ControlPlane for MemoryControlPlane {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, collection: &str, name: &str) -> ProviderResult<Option<ApiObject>> {
        self.record(Op::Get, collection, name)?;
        Ok(self.find(collection, name))
    }

    async fn create(&self, collection: &str, request: &ApiRequest) -> ProviderResult<ApiObject> {
        self.record(Op::Create, collection, &request.name)?;
        if self.find(collection, &request.name).is_some() {
            return Err(ProviderError::conflict(format!(
                "{} '{}' already exists",
                collection, request.name
            )));
        }
        let id = self.allocate_id(collection, &request.name);
        let mut outputs = self
            .preset_outputs
            .get(&(collection.to_string(), request.name.clone()))
            .map(|o| o.value().clone())
            .unwrap_or_default();
        outputs.entry("id".into()).or_insert_with(|| id.clone());

        let object = ApiObject {
            id: id.clone(),
            name: request.name.clone(),
            attributes: request.attributes.clone(),
            outputs,
        };
        self.objects
            .insert(id, (collection.to_string(), object.clone()));
        self.lost(Op::Create, collection)?;
        Ok(object)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        request: &ApiRequest,
    ) -> ProviderResult<ApiObject> {
        self.record(Op::Update, collection, id)?;
        let mut entry = self
            .objects
            .get_mut(id)
            .ok_or_else(|| ProviderError::not_found(format!("{} {}", collection, id)))?;
        entry.1.attributes = request.attributes.clone();
        let object = entry.1.clone();
        drop(entry);
        self.lost(Op::Update, collection)?;
        Ok(object)
    }

    async fn delete(&self, collection: &str, id: &str) -> ProviderResult<()> {
        self.record(Op::Delete, collection, id)?;
        match self.objects.remove(id) {
            Some(_) => self.lost(Op::Delete, collection),
            None => Err(ProviderError::not_found(format!("{} {}", collection, id))),
        }
    }
}
