//! In-memory executors for unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Result, SinkError};
use crate::pool::StatementExecutor;

type FailWhen = Box<dyn Fn(&str, &[Option<String>]) -> bool + Send + Sync>;

/// Records every statement; optionally fails the ones matching a predicate.
#[derive(Default)]
pub struct MockExecutor {
    statements: Mutex<Vec<(String, Vec<Option<String>>)>>,
    fail_when: Option<FailWhen>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_when(
        predicate: impl Fn(&str, &[Option<String>]) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            statements: Mutex::default(),
            fail_when: Some(Box::new(predicate)),
        }
    }

    /// All statements seen so far, including failed ones.
    pub fn statements(&self) -> Vec<(String, Vec<Option<String>>)> {
        self.statements.lock().unwrap().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|(sql, _)| sql).collect()
    }
}

#[async_trait]
impl StatementExecutor for MockExecutor {
    async fn execute(&self, sql: &str, params: &[Option<String>]) -> Result<u64> {
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        if let Some(fail) = &self.fail_when {
            if fail(sql, params) {
                return Err(SinkError::pool("mock statement failure", "mock executor"));
            }
        }
        Ok(1)
    }
}
