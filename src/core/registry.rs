use crate::core::matcher::RequestMatcher;
use crate::domain::model::{RecordedRequest, StubMapping};
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use std::cmp::Reverse;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

struct RegisteredStub {
    seq: u64,
    mapping: StubMapping,
    matcher: RequestMatcher,
}

#[derive(Default)]
struct RegistryState {
    stubs: Vec<RegisteredStub>,
    next_seq: u64,
}

/// 已註冊的 stub 映射
#[derive(Default)]
pub struct StubRegistry {
    state: RwLock<RegistryState>,
}

impl StubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 註冊映射；沒有 id 時自動產生，同 id 的舊映射會被取代
    pub fn add(&self, mut mapping: StubMapping) -> Result<Uuid> {
        mapping.validate()?;
        let matcher = RequestMatcher::compile(&mapping.request)?;
        let id = *mapping.id.get_or_insert_with(Uuid::new_v4);

        let mut state = self.write();
        let before = state.stubs.len();
        state.stubs.retain(|stub| stub.mapping.id != Some(id));
        if state.stubs.len() != before {
            tracing::debug!("🔁 Replacing stub mapping {}", id);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        tracing::debug!(
            "➕ Registered stub {} ({}, priority {})",
            mapping.label(),
            mapping.request,
            mapping.priority
        );
        state.stubs.push(RegisteredStub {
            seq,
            mapping,
            matcher,
        });

        Ok(id)
    }

    pub fn remove(&self, id: Uuid) -> bool {
        let mut state = self.write();
        let before = state.stubs.len();
        state.stubs.retain(|stub| stub.mapping.id != Some(id));
        state.stubs.len() != before
    }

    pub fn get(&self, id: Uuid) -> Option<StubMapping> {
        self.read()
            .stubs
            .iter()
            .find(|stub| stub.mapping.id == Some(id))
            .map(|stub| stub.mapping.clone())
    }

    pub fn reset(&self) {
        self.write().stubs.clear();
    }

    /// 依註冊順序列出
    pub fn list(&self) -> Vec<StubMapping> {
        self.read()
            .stubs
            .iter()
            .map(|stub| stub.mapping.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// priority 數字小者優先；同 priority 時最後註冊者優先
    pub fn find_match(&self, request: &RecordedRequest) -> Option<StubMapping> {
        self.read()
            .stubs
            .iter()
            .filter(|stub| stub.matcher.matches(request))
            .min_by_key(|stub| (stub.mapping.priority, Reverse(stub.seq)))
            .map(|stub| stub.mapping.clone())
    }
}
