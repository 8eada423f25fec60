use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::ProcessError;
use super::runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner};

/// Expectation-based process runner for tests.
///
/// Responses queued with the `expect_*` helpers are one-shot and drain in
/// FIFO order per program; `always` installs a sticky response consulted
/// once the queue for that program is empty.
#[derive(Clone, Default)]
pub struct MockProcessRunner {
    queue: Arc<Mutex<Vec<(String, MockResponse)>>>,
    sticky: Arc<Mutex<Vec<(String, MockResponse)>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
}

#[derive(Clone)]
enum MockResponse {
    Output(ProcessOutput),
    NotFound,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for the given program
    pub fn expect_success(&self, program: &str, stdout: &str) {
        self.queue.lock().unwrap().push((
            program.to_string(),
            MockResponse::Output(output(ExitStatus::Success, stdout, "")),
        ));
    }

    /// Queue a non-zero exit with the given stderr
    pub fn expect_failure(&self, program: &str, code: i32, stderr: &str) {
        self.queue.lock().unwrap().push((
            program.to_string(),
            MockResponse::Output(output(ExitStatus::Error(code), "", stderr)),
        ));
    }

    /// Queue a timeout whose partial stdout is what arrived before the kill
    pub fn expect_timeout(&self, program: &str, partial_stdout: &str) {
        self.queue.lock().unwrap().push((
            program.to_string(),
            MockResponse::Output(output(ExitStatus::Timeout, partial_stdout, "")),
        ));
    }

    /// Queue a command-not-found error
    pub fn expect_not_found(&self, program: &str) {
        self.queue
            .lock()
            .unwrap()
            .push((program.to_string(), MockResponse::NotFound));
    }

    /// Install a sticky success used whenever the one-shot queue is empty
    pub fn always_succeed(&self, program: &str, stdout: &str) {
        self.sticky.lock().unwrap().push((
            program.to_string(),
            MockResponse::Output(output(ExitStatus::Success, stdout, "")),
        ));
    }

    pub fn calls(&self) -> Vec<ProcessCommand> {
        self.call_history.lock().unwrap().clone()
    }

    pub fn call_count(&self, program: &str) -> usize {
        self.call_history
            .lock()
            .unwrap()
            .iter()
            .filter(|cmd| cmd.program == program)
            .count()
    }
}

fn output(status: ExitStatus, stdout: &str, stderr: &str) -> ProcessOutput {
    ProcessOutput {
        status,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        duration: Duration::from_millis(10),
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        self.call_history.lock().unwrap().push(command.clone());

        let response = {
            let mut queue = self.queue.lock().unwrap();
            match queue.iter().position(|(program, _)| *program == command.program) {
                Some(position) => Some(queue.remove(position).1),
                None => self
                    .sticky
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|(program, _)| *program == command.program)
                    .map(|(_, response)| response.clone()),
            }
        };

        match response {
            Some(MockResponse::Output(output)) => Ok(output),
            Some(MockResponse::NotFound) => {
                Err(ProcessError::CommandNotFound(command.program.clone()))
            }
            None => Err(ProcessError::MockExpectationNotMet(format!(
                "No expectation for command: {} {:?}",
                command.program, command.args
            ))),
        }
    }
}
