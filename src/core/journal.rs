use crate::core::matcher::RequestMatcher;
use crate::domain::model::{RecordedRequest, RequestPattern};
use crate::utils::error::{Result, StubError};
use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{PoisonError, RwLock};

/// 驗證請求次數用的條件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMatch {
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
}

impl CountMatch {
    pub fn is_satisfied_by(&self, actual: usize) -> bool {
        match *self {
            CountMatch::Exactly(expected) => actual == expected,
            CountMatch::AtLeast(expected) => actual >= expected,
            CountMatch::AtMost(expected) => actual <= expected,
        }
    }
}

impl fmt::Display for CountMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountMatch::Exactly(n) => write!(f, "exactly {}", n),
            CountMatch::AtLeast(n) => write!(f, "at least {}", n),
            CountMatch::AtMost(n) => write!(f, "at most {}", n),
        }
    }
}

/// 請求紀錄；設定 capacity 時會先淘汰最舊的紀錄
pub struct RequestJournal {
    entries: RwLock<VecDeque<RecordedRequest>>,
    capacity: Option<NonZeroUsize>,
}

impl RequestJournal {
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn record(&self, request: RecordedRequest) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(capacity) = self.capacity {
            while entries.len() >= capacity.get() {
                entries.pop_front();
            }
        }
        entries.push_back(request);
    }

    pub fn all(&self) -> Vec<RecordedRequest> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn find(&self, pattern: &RequestPattern) -> Result<Vec<RecordedRequest>> {
        let matcher = RequestMatcher::compile(pattern)?;
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|request| matcher.matches(request))
            .cloned()
            .collect())
    }

    pub fn count(&self, pattern: &RequestPattern) -> Result<usize> {
        let matcher = RequestMatcher::compile(pattern)?;
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|request| matcher.matches(request))
            .count())
    }

    pub fn verify(&self, expected: CountMatch, pattern: &RequestPattern) -> Result<()> {
        let actual = self.count(pattern)?;
        if expected.is_satisfied_by(actual) {
            Ok(())
        } else {
            tracing::warn!("🔍 Verification failed for {}: expected {}, got {}", pattern, expected, actual);
            Err(StubError::Verification {
                expected: format!("{} {}", expected, pattern),
                actual,
            })
        }
    }
}

impl Default for RequestJournal {
    fn default() -> Self {
        Self::new(None)
    }
}
