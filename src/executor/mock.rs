//! Scripted command runner for tests

use crate::domain::ports::RemoteCommandRunner;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Outcome of one scripted batch
pub enum Reply {
    Output(Vec<String>),
    Fail(String),
    Timeout,
}

/// Replays one reply per batch and records every command it was sent.
/// Batches beyond the script succeed with no output.
#[derive(Default)]
pub struct MockRunner {
    replies: Mutex<VecDeque<Reply>>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl MockRunner {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Every command in the order it was issued
    pub fn commands(&self) -> Vec<String> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

#[async_trait]
impl RemoteCommandRunner for MockRunner {
    async fn run(&self, host: &str, commands: &[String], timeout: Duration) -> Result<Vec<String>> {
        self.batches.lock().push(commands.to_vec());
        match self.replies.lock().pop_front() {
            None => Ok(Vec::new()),
            Some(Reply::Output(lines)) => Ok(lines),
            Some(Reply::Fail(reason)) => Err(Error::RemoteExecution {
                host: host.to_string(),
                reason,
            }),
            Some(Reply::Timeout) => Err(Error::RemoteTimeout {
                host: host.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}
