//! Interfaces to the collaborators a component runs on top of.
//!
//! The runtime only moves messages. Test logic, configuration parsing,
//! process creation and the log formatter live behind these traits. Each
//! has a trivial implementation for components that do not need it.

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::{ComponentRef, Verdict};

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
}

impl Severity {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Info),
            4 => Some(Self::Debug),
            _ => None,
        }
    }
}

/// Destination of log records produced by the runtime.
pub trait LogSink: Send {
    fn log(&mut self, severity: Severity, text: &str);
}

/// Forwards records to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&mut self, severity: Severity, text: &str) {
        match severity {
            Severity::Error => tracing::error!("{}", text),
            Severity::Warning => tracing::warn!("{}", text),
            Severity::Info => tracing::info!("{}", text),
            Severity::Debug => tracing::debug!("{}", text),
        }
    }
}

/// Abnormal returns of test logic.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The running test case was ended early. This is a normal completion.
    #[error("Test case ended with verdict {}", .0.name())]
    TestCaseEnded(Verdict),

    /// The test logic failed.
    #[error("{0}")]
    Failed(String),
}

/// Result of a function started on a PTC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionOutcome {
    pub verdict: Verdict,
    pub reason: String,
    pub return_type: String,
    pub return_value: Bytes,
}

/// Generated test-module dispatch.
pub trait TestDispatcher: Send {
    fn execute_control(&mut self, module: &str) -> Result<(), DispatchError>;

    /// Run one test case and return its final verdict.
    fn execute_testcase(&mut self, module: &str, testcase: &str) -> Result<Verdict, DispatchError>;

    fn execute_all_testcases(&mut self, module: &str) -> Result<(), DispatchError>;

    /// Run the behaviour function a PTC was started with.
    fn start_function(
        &mut self,
        module: &str,
        function: &str,
        _arguments: &[u8],
    ) -> Result<FunctionOutcome, DispatchError> {
        Err(DispatchError::Failed(format!(
            "Function {}.{} is not available",
            module, function
        )))
    }
}

/// Dispatcher with no test logic; everything completes at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatcher;

impl TestDispatcher for NoopDispatcher {
    fn execute_control(&mut self, _module: &str) -> Result<(), DispatchError> {
        Ok(())
    }

    fn execute_testcase(&mut self, _module: &str, _testcase: &str) -> Result<Verdict, DispatchError> {
        Ok(Verdict::None)
    }

    fn execute_all_testcases(&mut self, _module: &str) -> Result<(), DispatchError> {
        Ok(())
    }

    fn start_function(
        &mut self,
        _module: &str,
        _function: &str,
        _arguments: &[u8],
    ) -> Result<FunctionOutcome, DispatchError> {
        Ok(FunctionOutcome::default())
    }
}

/// Configuration file parser.
pub trait ConfigParser: Send {
    /// Apply `config`, returning whether it was accepted.
    fn apply(&mut self, config: &str) -> bool;
}

/// Accepts every configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllConfig;

impl ConfigParser for AcceptAllConfig {
    fn apply(&mut self, _config: &str) -> bool {
        true
    }
}

/// Why a host controller could not create a component process.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Host is overloaded")]
    Overloaded,

    #[error("{0}")]
    Failed(String),
}

/// Parameters of a PTC creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtcRequest {
    pub component_ref: ComponentRef,
    pub type_module: String,
    pub type_name: String,
    pub component_name: String,
    pub is_alive: bool,
    pub testcase_module: String,
    pub testcase_name: String,
}

/// Process management of a host controller.
pub trait ProcessSpawner: Send {
    fn spawn_mtc(&mut self) -> Result<(), SpawnError>;
    fn spawn_ptc(&mut self, request: &PtcRequest) -> Result<(), SpawnError>;
    fn kill(&mut self, component: ComponentRef) -> Result<(), SpawnError>;
    /// Re-checked periodically while overloaded.
    fn is_overloaded(&mut self) -> bool;
}

/// Spawner that refuses every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSpawner;

impl ProcessSpawner for NoopSpawner {
    fn spawn_mtc(&mut self) -> Result<(), SpawnError> {
        Err(SpawnError::Failed("Process creation is not supported".into()))
    }

    fn spawn_ptc(&mut self, _request: &PtcRequest) -> Result<(), SpawnError> {
        Err(SpawnError::Failed("Process creation is not supported".into()))
    }

    fn kill(&mut self, _component: ComponentRef) -> Result<(), SpawnError> {
        Ok(())
    }

    fn is_overloaded(&mut self) -> bool {
        false
    }
}
