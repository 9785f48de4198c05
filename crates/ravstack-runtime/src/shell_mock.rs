//! Test mock for `shell::run_host`.
//!
//! Installs a thread-local handler that answers host commands by prefix
//! and records every command line it sees.

use std::cell::RefCell;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};

/// Mock response for a host command.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i32,
    pub stdout: String,
}

impl MockResponse {
    pub fn ok(stdout: &str) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.to_string(),
        }
    }

    pub fn empty() -> Self {
        Self::ok("")
    }

    pub fn failed(exit_code: i32) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
        }
    }

    pub(crate) fn to_output(&self) -> Output {
        Output {
            // Unix exit code encoding: status = code << 8
            status: ExitStatus::from_raw(self.exit_code << 8),
            stdout: self.stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }
}

type MockHandler = Box<dyn Fn(&str) -> MockResponse>;

thread_local! {
    static HANDLER: RefCell<Option<MockHandler>> = const { RefCell::new(None) };
}

/// Guard that clears the mock handler on drop.
pub struct MockGuard;

impl Drop for MockGuard {
    fn drop(&mut self) {
        HANDLER.with(|h| *h.borrow_mut() = None);
    }
}

/// Try to intercept a host command via the installed mock handler.
pub(crate) fn intercept(command: &str) -> Option<Output> {
    HANDLER.with(|h| h.borrow().as_ref().map(|f| f(command).to_output()))
}

/// Command lines seen by the mock, in order.
pub type CommandLog = Arc<Mutex<Vec<String>>>;

/// Build a mock answering commands by prefix. Unmatched commands succeed
/// with empty output.
pub fn mock_commands() -> MockCommandsBuilder {
    MockCommandsBuilder {
        responses: Vec::new(),
    }
}

pub struct MockCommandsBuilder {
    responses: Vec<(String, MockResponse)>,
}

impl MockCommandsBuilder {
    /// Answer commands starting with `prefix`. Earlier registrations win.
    pub fn respond(mut self, prefix: &str, response: MockResponse) -> Self {
        self.responses.push((prefix.to_string(), response));
        self
    }

    /// Install the mock. Returns a guard (clears on drop) and the log.
    pub fn install(self) -> (MockGuard, CommandLog) {
        let log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let log_ref = log.clone();
        let responses = self.responses;

        HANDLER.with(|h| {
            *h.borrow_mut() = Some(Box::new(move |command: &str| {
                log_ref.lock().unwrap().push(command.to_string());
                responses
                    .iter()
                    .find(|(prefix, _)| command.starts_with(prefix.as_str()))
                    .map(|(_, response)| response.clone())
                    .unwrap_or_else(MockResponse::empty)
            }));
        });

        (MockGuard, log)
    }
}
