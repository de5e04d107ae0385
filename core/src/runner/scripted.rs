//! Scripted [`CommandRunner`] for unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{CommandRunner, RunOutcome};

/// One recorded invocation.
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub argv: Vec<String>,
    pub timeout: Duration,
    pub started: Instant,
    pub finished: Option<Instant>,
}

type Script = dyn Fn(&[String]) -> (Duration, RunOutcome) + Send + Sync;

/// Answers each call with `(delay, outcome)` from a script closure.
///
/// The delay is interrupted by cancellation, which yields
/// [`RunOutcome::Cancelled`] just like a killed process.
pub(crate) struct ScriptedRunner {
    script: Box<Script>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedRunner {
    pub fn new(
        script: impl Fn(&[String]) -> (Duration, RunOutcome) + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every call succeeds immediately with the given stdout.
    pub fn stdout(stdout: &'static str) -> Self {
        Self::new(move |_| (Duration::ZERO, completed(0, stdout, "")))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

pub(crate) fn completed(exit_code: i32, stdout: &str, stderr: &str) -> RunOutcome {
    RunOutcome::Completed {
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

#[async_trait::async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        argv: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                argv: argv.to_vec(),
                timeout,
                started: Instant::now(),
                finished: None,
            });
            calls.len() - 1
        };

        let (delay, outcome) = (self.script)(argv);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => RunOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => outcome,
        };

        self.calls.lock().unwrap()[index].finished = Some(Instant::now());
        outcome
    }
}
