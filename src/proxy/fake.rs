//! In-memory control plane for tests.  Records every call in order.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::model::{Backend, Frontend};
use super::ControlPlane;
use crate::error::ProxyError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Call {
    GetBackend(String),
    PutBackend(String),
    DeleteBackend(String),
    PutFrontend(String),
    DeleteFrontend(String),
}

#[derive(Default)]
struct State {
    backends: HashMap<String, Backend>,
    frontends: HashMap<String, Frontend>,
    calls: Vec<Call>,
    failing: HashSet<Call>,
}

#[derive(Clone, Default)]
pub struct FakeControlPlane {
    state: Arc<Mutex<State>>,
}

impl FakeControlPlane {
    pub fn seed_backend(&self, key: &str, backend: Backend) {
        self.state
            .lock()
            .unwrap()
            .backends
            .insert(key.to_string(), backend);
    }

    /// Makes `call` fail every time it is made.
    pub fn fail_on(&self, call: Call) {
        self.state.lock().unwrap().failing.insert(call);
    }

    pub fn backend(&self, key: &str) -> Option<Backend> {
        self.state.lock().unwrap().backends.get(key).cloned()
    }

    pub fn frontend(&self, key: &str) -> Option<Frontend> {
        self.state.lock().unwrap().frontends.get(key).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: Call) -> Result<std::sync::MutexGuard<'_, State>, ProxyError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());
        if state.failing.contains(&call) {
            return Err(ProxyError::Api {
                status: 503,
                path: format!("{:?}", call),
                body: "injected failure".into(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn get_backend(&self, key: &str) -> Result<Option<Backend>, ProxyError> {
        let state = self.record(Call::GetBackend(key.into()))?;
        Ok(state.backends.get(key).cloned())
    }

    async fn put_backend(&self, key: &str, backend: &Backend) -> Result<(), ProxyError> {
        let mut state = self.record(Call::PutBackend(key.into()))?;
        state.backends.insert(key.into(), backend.clone());
        Ok(())
    }

    async fn delete_backend(&self, key: &str) -> Result<(), ProxyError> {
        let mut state = self.record(Call::DeleteBackend(key.into()))?;
        state.backends.remove(key);
        Ok(())
    }

    async fn put_frontend(&self, key: &str, frontend: &Frontend) -> Result<(), ProxyError> {
        let mut state = self.record(Call::PutFrontend(key.into()))?;
        state.frontends.insert(key.into(), frontend.clone());
        Ok(())
    }

    async fn delete_frontend(&self, key: &str) -> Result<(), ProxyError> {
        let mut state = self.record(Call::DeleteFrontend(key.into()))?;
        state.frontends.remove(key);
        Ok(())
    }
}
