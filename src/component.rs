//! Component builder and runtime loop.
//!
//! The [`ComponentBuilder`] collects the role, configuration and the
//! collaborators. The [`Component`] owns everything else and runs the
//! lifecycle of one process:
//! 1. Connect the control channel and, once the loop reports the stream,
//!    announce the component
//! 2. Wait for events from the control socket, port sockets and the timer
//! 3. Check each incoming message against the transition table of the role
//!    and act on it
//! 4. Report port connection changes back to the main controller
//!
//! # Example
//!
//! ```ignore
//! use mctr_link::{Component, Role, RuntimeConfig};
//!
//! #[tokio::main]
//! async fn main() -> mctr_link::Result<()> {
//!     let config = RuntimeConfig::new().with_mc_address("127.0.0.1:9000".parse().unwrap());
//!     let mut ptc = Component::builder(Role::Ptc)
//!         .config(config)
//!         .component_ref(3)
//!         .build();
//!     ptc.connect()?;
//!     ptc.run().await
//! }
//! ```

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

use crate::config::RuntimeConfig;
use crate::control::{apply_local, next_state, ControlChannel, ExecutorState, LocalAction, PeriodicCall, Role};
use crate::error::{LinkError, Result};
use crate::hooks::{
    AcceptAllConfig, ConfigParser, DispatchError, FunctionOutcome, LogSink, NoopDispatcher,
    NoopSpawner, ProcessSpawner, PtcRequest, Severity, SpawnError, TestDispatcher, TracingLogSink,
};
use crate::port::{ConnectionKey, DataKind, MapParams, PortHandler, PortNotice, PortRegistry};
use crate::protocol::{
    ComponentRef, Direction, HostInfo, Message, MessageKind, ModuleInfo, TransportKind, Verdict,
    FIRST_PTC_COMPREF, MTC_COMPREF, NULL_COMPREF,
};
use crate::transport::{Event, EventLoop};

/// Version reported in `VERSION`.
pub const RUNTIME_VERSION: (i32, i32, i32, i32) = (1, 0, 0, 0);

/// Builder for configuring and creating a component.
pub struct ComponentBuilder {
    role: Role,
    config: RuntimeConfig,
    component_ref: Option<ComponentRef>,
    dispatcher: Box<dyn TestDispatcher>,
    config_parser: Box<dyn ConfigParser>,
    spawner: Box<dyn ProcessSpawner>,
    log_sink: Box<dyn LogSink>,
    host: HostInfo,
    version: (i32, i32, i32, i32),
    modules: Vec<ModuleInfo>,
    deferred_execution: bool,
}

impl ComponentBuilder {
    /// Create a builder for a process of `role`.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            config: RuntimeConfig::default(),
            component_ref: None,
            dispatcher: Box::new(NoopDispatcher),
            config_parser: Box::new(AcceptAllConfig),
            spawner: Box::new(NoopSpawner),
            log_sink: Box::new(TracingLogSink),
            host: HostInfo::default(),
            version: RUNTIME_VERSION,
            modules: Vec::new(),
            deferred_execution: false,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Component reference of a PTC, as assigned by the main controller.
    ///
    /// Ignored for the other roles. Default: the first PTC reference.
    pub fn component_ref(mut self, component_ref: ComponentRef) -> Self {
        self.component_ref = Some(component_ref);
        self
    }

    pub fn dispatcher(mut self, dispatcher: impl TestDispatcher + 'static) -> Self {
        self.dispatcher = Box::new(dispatcher);
        self
    }

    pub fn config_parser(mut self, parser: impl ConfigParser + 'static) -> Self {
        self.config_parser = Box::new(parser);
        self
    }

    pub fn spawner(mut self, spawner: impl ProcessSpawner + 'static) -> Self {
        self.spawner = Box::new(spawner);
        self
    }

    pub fn log_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.log_sink = Box::new(sink);
        self
    }

    /// Host description for `VERSION`.
    pub fn host(mut self, host: HostInfo) -> Self {
        self.host = host;
        self
    }

    pub fn version(mut self, major: i32, minor: i32, patch: i32, build: i32) -> Self {
        self.version = (major, minor, patch, build);
        self
    }

    /// Add a test module to the `VERSION` report.
    pub fn module(mut self, module: ModuleInfo) -> Self {
        self.modules.push(module);
        self
    }

    /// Do not run the dispatcher on `EXECUTE_*` and `START`.
    ///
    /// The caller then drives the execution itself with
    /// [`Component::begin_testcase`], [`Component::end_testcase`],
    /// [`Component::finish_execution`] and [`Component::finish_function`].
    pub fn deferred_execution(mut self, deferred: bool) -> Self {
        self.deferred_execution = deferred;
        self
    }

    pub fn build(self) -> Component {
        let own = match self.role {
            Role::Hc => NULL_COMPREF,
            Role::Mtc => MTC_COMPREF,
            Role::Ptc => self.component_ref.unwrap_or(FIRST_PTC_COMPREF),
        };
        let outgoing = match self.role {
            Role::Hc => Direction::HcToMc,
            Role::Mtc => Direction::MtcToMc,
            Role::Ptc => Direction::PtcToMc,
        };
        let channel = ControlChannel::new(outgoing, self.config.mc_address)
            .with_connect_timeout(self.config.connect_timeout())
            .with_nodelay(self.config.tcp_nodelay);
        let ports = PortRegistry::new(own)
            .with_connect_timeout(self.config.connect_timeout())
            .with_nodelay(self.config.tcp_nodelay);

        Component {
            role: self.role,
            state: self.role.initial_state(),
            component_ref: own,
            event_loop: EventLoop::with_read_chunk(self.config.read_chunk_size),
            channel,
            ports,
            liveness: PeriodicCall::new(),
            config: self.config,
            dispatcher: self.dispatcher,
            config_parser: self.config_parser,
            spawner: self.spawner,
            log_sink: self.log_sink,
            host: self.host,
            version: self.version,
            modules: self.modules,
            deferred_execution: self.deferred_execution,
            replies: VecDeque::new(),
            notifications: VecDeque::new(),
            ready_after_verdict: false,
            verdict: Verdict::None,
            verdict_reason: String::new(),
        }
    }
}

/// One running process: HC, MTC or PTC.
pub struct Component {
    role: Role,
    state: ExecutorState,
    component_ref: ComponentRef,
    config: RuntimeConfig,
    event_loop: EventLoop,
    channel: ControlChannel,
    ports: PortRegistry,
    /// Armed while the host is overloaded.
    liveness: PeriodicCall,
    dispatcher: Box<dyn TestDispatcher>,
    config_parser: Box<dyn ConfigParser>,
    spawner: Box<dyn ProcessSpawner>,
    log_sink: Box<dyn LogSink>,
    host: HostInfo,
    version: (i32, i32, i32, i32),
    modules: Vec<ModuleInfo>,
    deferred_execution: bool,
    /// Answers to requests sent with [`Component::send_request`].
    replies: VecDeque<Message>,
    /// Status updates and verdict reports from the main controller.
    notifications: VecDeque<Message>,
    /// MTC_READY is owed once PTC_VERDICT arrives.
    ready_after_verdict: bool,
    verdict: Verdict,
    verdict_reason: String,
}

impl Component {
    /// Create a new component builder.
    pub fn builder(role: Role) -> ComponentBuilder {
        ComponentBuilder::new(role)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn component_ref(&self) -> ComponentRef {
        self.component_ref
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn ports(&self) -> &PortRegistry {
        &self.ports
    }

    pub fn channel(&self) -> &ControlChannel {
        &self.channel
    }

    pub fn liveness(&self) -> &PeriodicCall {
        &self.liveness
    }

    /// Start connecting to the main controller.
    ///
    /// The component announces itself when the connect completes during
    /// [`Component::step`].
    pub fn connect(&mut self) -> Result<()> {
        self.channel.connect(&mut self.event_loop)?;
        Ok(())
    }

    fn announce(&mut self) -> Result<()> {
        self.apply(LocalAction::ChannelConnected)?;
        let announce = match self.role {
            Role::Hc => {
                let (major, minor, patch, build) = self.version;
                Message::Version {
                    major,
                    minor,
                    patch,
                    build,
                    host: self.host.clone(),
                    modules: self.modules.clone(),
                }
            }
            Role::Mtc => Message::MtcCreated,
            Role::Ptc => Message::PtcCreated {
                component_ref: self.component_ref,
            },
        };
        self.send(&announce)
    }

    /// Run until the component reaches its exit state.
    pub async fn run(&mut self) -> Result<()> {
        while !self.state.is_exit() {
            self.step().await?;
        }
        self.shutdown();
        Ok(())
    }

    /// Wait for one event and handle it.
    pub async fn step(&mut self) -> Result<()> {
        let event = self.event_loop.poll(self.liveness.deadline()).await;
        self.handle_event(event)
    }

    /// Handle one event of the event loop.
    pub fn handle_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Timer => self.on_timer(),
            Event::Data { handle, bytes } => {
                if self.channel.handle() == Some(handle) {
                    self.channel.receive(&bytes);
                    return self.process_all_messages();
                }
                let result = self.ports.handle_data(handle, &bytes, &mut self.event_loop);
                self.flush_port_notices()?;
                if let Ok(false) = result {
                    tracing::debug!("Data for unknown handle {:?} dropped", handle);
                }
                result.map(|_| ())
            }
            Event::Accepted {
                handle,
                stream,
                peer,
            } => {
                if !self.ports.handle_accept(handle, stream, &mut self.event_loop) {
                    tracing::debug!("Connection from {} on unknown listener dropped", peer);
                }
                self.flush_port_notices()
            }
            Event::Connected { handle, stream } => {
                if self.channel.owns(handle) {
                    self.channel
                        .complete_connect(handle, stream, &mut self.event_loop)?;
                    return self.announce();
                }
                if !self.ports.handle_connected(handle, stream, &mut self.event_loop) {
                    tracing::debug!("Finished connect for unknown handle {:?} dropped", handle);
                }
                self.flush_port_notices()
            }
            Event::Closed { handle, error } => {
                if self.channel.owns(handle) {
                    let connecting = self.channel.is_connecting();
                    self.channel.close(&mut self.event_loop);
                    if self.state.is_exit() {
                        return Ok(());
                    }
                    return Err(match (connecting, error) {
                        (true, Some(e)) => {
                            tracing::error!("Connecting to MC failed: {}", e);
                            LinkError::Io(e)
                        }
                        (false, Some(e)) => {
                            tracing::error!("Connection to MC failed: {}", e);
                            LinkError::ConnectionClosed
                        }
                        (_, None) => {
                            tracing::error!("MC closed the control connection");
                            LinkError::ConnectionClosed
                        }
                    });
                }
                self.ports.handle_closed(handle, error, &mut self.event_loop);
                self.flush_port_notices()
            }
        }
    }

    /// Decode and handle every complete message from the MC.
    pub fn process_all_messages(&mut self) -> Result<()> {
        while !self.state.is_exit() {
            let Some(message) = self.channel.next_message()? else {
                break;
            };
            self.handle_message(message)?;
        }
        Ok(())
    }

    fn handle_message(&mut self, message: Message) -> Result<()> {
        let kind = message.kind();
        let previous = self.state;
        let next = next_state(self.role, kind, previous)?;
        self.set_state(next);
        if let Message::Error { text } = message {
            return Err(LinkError::Coordinator(text));
        }
        match self.role {
            Role::Hc => self.handle_hc_message(message),
            Role::Mtc => self.handle_mtc_message(message, previous),
            Role::Ptc => self.handle_ptc_message(message, previous),
        }
    }

    fn handle_hc_message(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Configure { config } => self.configure(&config),
            Message::CreateMtc => match self.spawner.spawn_mtc() {
                Ok(()) => Ok(()),
                Err(e) => self.creation_failed(MTC_COMPREF, e),
            },
            Message::CreatePtc {
                component_ref,
                type_module,
                type_name,
                component_name,
                is_alive,
                testcase_module,
                testcase_name,
            } => {
                let request = PtcRequest {
                    component_ref,
                    type_module,
                    type_name,
                    component_name,
                    is_alive,
                    testcase_module,
                    testcase_name,
                };
                match self.spawner.spawn_ptc(&request) {
                    Ok(()) => Ok(()),
                    Err(e) => self.creation_failed(component_ref, e),
                }
            }
            Message::KillProcess { component_ref } => {
                if let Err(e) = self.spawner.kill(component_ref) {
                    tracing::warn!("Killing the process of component {} failed: {}", component_ref, e);
                }
                Ok(())
            }
            Message::ExitHc => {
                tracing::info!("Exit was requested by MC");
                Ok(())
            }
            other => self.unhandled(other),
        }
    }

    fn creation_failed(&mut self, component_ref: ComponentRef, error: SpawnError) -> Result<()> {
        if let SpawnError::Overloaded = error {
            self.apply(LocalAction::Overloaded)?;
            if !self.liveness.is_armed() {
                self.liveness.arm(self.config.liveness_interval());
            }
        }
        self.send(&Message::CreateNak {
            component_ref,
            reason: error.to_string(),
        })
    }

    fn on_timer(&mut self) -> Result<()> {
        if !self.liveness.fire(Instant::now()) {
            return Ok(());
        }
        match self.state {
            ExecutorState::HcOverloaded => {
                if self.spawner.is_overloaded() {
                    self.liveness.increase_call_interval();
                } else {
                    self.liveness.disable_periodic_call();
                    self.apply(LocalAction::OverloadCleared)?;
                    self.send(&Message::HcReady)?;
                }
            }
            // Checked again once the configuration is done.
            ExecutorState::HcConfiguringOverloaded => {}
            _ => self.liveness.disable_periodic_call(),
        }
        Ok(())
    }

    fn handle_mtc_message(&mut self, message: Message, previous: ExecutorState) -> Result<()> {
        match message {
            Message::Configure { config } => self.configure(&config),
            Message::ExecuteControl { module } => {
                if self.deferred_execution {
                    return Ok(());
                }
                let result = self.dispatcher.execute_control(&module);
                self.report_dispatch("Control part", result);
                self.finish_execution()
            }
            Message::ExecuteTestcase { module, testcase } => {
                if self.deferred_execution {
                    return Ok(());
                }
                if testcase.is_empty() {
                    let result = self.dispatcher.execute_all_testcases(&module);
                    self.report_dispatch("Test case execution", result);
                    return self.finish_execution();
                }
                self.begin_testcase(&module, &testcase)?;
                let (verdict, reason) = match self.dispatcher.execute_testcase(&module, &testcase) {
                    Ok(verdict) | Err(DispatchError::TestCaseEnded(verdict)) => (verdict, String::new()),
                    Err(DispatchError::Failed(reason)) => {
                        self.log_sink.log(Severity::Error, &reason);
                        (Verdict::Error, reason)
                    }
                };
                self.end_testcase(verdict, &reason)?;
                self.ready_after_verdict = true;
                Ok(())
            }
            Message::PtcVerdict { verdicts } => {
                self.notifications.push_back(Message::PtcVerdict { verdicts });
                if std::mem::take(&mut self.ready_after_verdict) {
                    self.finish_execution()?;
                }
                Ok(())
            }
            Message::Continue => Ok(()),
            Message::ExitMtc => {
                tracing::info!("Exit was requested by MC");
                self.deactivate_ports();
                Ok(())
            }
            Message::Stop => {
                if previous == self.state {
                    tracing::debug!("Stop ignored in state {}", self.state.as_str());
                    return Ok(());
                }
                self.ready_after_verdict = false;
                self.finish_execution()
            }
            other => self.handle_tc_message(other),
        }
    }

    /// Enter a test case and report it to the MC.
    pub fn begin_testcase(&mut self, module: &str, testcase: &str) -> Result<()> {
        self.apply(LocalAction::TestcaseStarted)?;
        self.send(&Message::TestcaseStarted {
            module: module.to_string(),
            testcase: testcase.to_string(),
        })
    }

    /// Leave the running test case with its final verdict.
    pub fn end_testcase(&mut self, verdict: Verdict, reason: &str) -> Result<()> {
        self.apply(LocalAction::TestcaseFinished)?;
        self.send(&Message::TestcaseFinished {
            verdict,
            reason: reason.to_string(),
        })
    }

    /// Return to idle and tell the MC the MTC is ready.
    pub fn finish_execution(&mut self) -> Result<()> {
        self.apply(LocalAction::ExecutionFinished)?;
        self.send(&Message::MtcReady)
    }

    fn report_dispatch(&mut self, what: &str, result: std::result::Result<(), DispatchError>) {
        match result {
            Ok(()) => {}
            Err(DispatchError::TestCaseEnded(verdict)) => {
                tracing::debug!("{} ended with verdict {}", what, verdict.name());
            }
            Err(DispatchError::Failed(reason)) => {
                let text = format!("{} failed: {}", what, reason);
                self.log_sink.log(Severity::Error, &text);
            }
        }
    }

    fn handle_ptc_message(&mut self, message: Message, previous: ExecutorState) -> Result<()> {
        match message {
            Message::Start {
                function_module,
                function_name,
                arguments,
            } => {
                if self.deferred_execution {
                    return Ok(());
                }
                let result =
                    self.dispatcher
                        .start_function(&function_module, &function_name, &arguments);
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(DispatchError::TestCaseEnded(verdict)) => FunctionOutcome {
                        verdict,
                        ..FunctionOutcome::default()
                    },
                    Err(DispatchError::Failed(reason)) => {
                        self.log_sink.log(Severity::Error, &reason);
                        FunctionOutcome {
                            verdict: Verdict::Error,
                            reason,
                            ..FunctionOutcome::default()
                        }
                    }
                };
                self.finish_function(outcome)
            }
            Message::Stop => {
                if previous == self.state {
                    tracing::debug!("Stop ignored in state {}", self.state.as_str());
                    return Ok(());
                }
                let outcome = FunctionOutcome {
                    verdict: self.verdict,
                    reason: self.verdict_reason.clone(),
                    ..FunctionOutcome::default()
                };
                self.report_stopped(outcome)
            }
            Message::Kill => {
                tracing::info!("Kill was requested by MC");
                self.deactivate_ports();
                self.send(&Message::Killed {
                    verdict: self.verdict,
                    reason: self.verdict_reason.clone(),
                })
            }
            other => self.handle_tc_message(other),
        }
    }

    /// End the behaviour function and report the outcome.
    ///
    /// An alive PTC stays around in `PTC_STOPPED`; any other PTC terminates.
    pub fn finish_function(&mut self, outcome: FunctionOutcome) -> Result<()> {
        self.apply(LocalAction::FunctionFinished)?;
        self.report_stopped(outcome)
    }

    fn report_stopped(&mut self, outcome: FunctionOutcome) -> Result<()> {
        self.verdict = outcome.verdict;
        self.verdict_reason = outcome.reason.clone();
        let FunctionOutcome {
            verdict,
            reason,
            return_type,
            return_value,
        } = outcome;
        if self.config.alive {
            return self.send(&Message::Stopped {
                verdict,
                reason,
                return_type,
                return_value,
            });
        }
        self.apply(LocalAction::Terminated)?;
        self.deactivate_ports();
        self.send(&Message::StoppedKilled {
            verdict,
            reason,
            return_type,
            return_value,
        })
    }

    fn handle_tc_message(&mut self, message: Message) -> Result<()> {
        match message {
            Message::CreateAck { .. }
            | Message::StartAck
            | Message::StopAck
            | Message::KillAck
            | Message::Running { .. }
            | Message::Alive { .. }
            | Message::DoneAck { .. }
            | Message::KilledAck { .. }
            | Message::ConnectAck
            | Message::DisconnectAck
            | Message::MapAck { .. }
            | Message::UnmapAck { .. } => {
                self.replies.push_back(message);
                Ok(())
            }
            Message::CancelDone { .. } | Message::ComponentStatus { .. } => {
                self.notifications.push_back(message);
                Ok(())
            }
            Message::ConnectListen {
                local_port,
                remote_component,
                remote_port,
                transport,
                ..
            } => self.connect_listen(local_port, remote_component, remote_port, transport),
            Message::Connect {
                local_port,
                remote_component,
                remote_port,
                transport,
                address,
                ..
            } => {
                let key = ConnectionKey::new(remote_component, remote_port);
                let result = match (transport, address) {
                    (TransportKind::Local, _) => self.ports.connect_local(&local_port, &key),
                    (TransportKind::InetStream, Some(addr)) => {
                        self.ports
                            .connect_inet(&local_port, &key, addr, &mut self.event_loop)
                    }
                    (TransportKind::InetStream, None) => Err(LinkError::port(
                        "Message CONNECT carries no address for transport INET_STREAM",
                    )),
                };
                match result {
                    Ok(true) => self.flush_port_notices(),
                    Ok(false) => self.send(&Message::Connected {
                        local_port,
                        remote_component: key.remote_component,
                        remote_port: key.remote_port,
                    }),
                    Err(e) => self.connect_failed(local_port, key, e),
                }
            }
            Message::Disconnect {
                local_port,
                remote_component,
                remote_port,
            } => {
                let key = ConnectionKey::new(remote_component, remote_port);
                match self.ports.disconnect(&local_port, &key, &mut self.event_loop) {
                    Ok(()) => self.flush_port_notices(),
                    Err(e) if !e.is_fatal() => {
                        tracing::warn!("Disconnecting port {} from {} failed: {}", local_port, key, e);
                        self.send(&Message::Disconnected {
                            local_port,
                            remote_component: key.remote_component,
                            remote_port: key.remote_port,
                        })
                    }
                    Err(e) => Err(e),
                }
            }
            Message::Map {
                local_port,
                system_port,
                translation,
                params,
            } => match self.ports.map(&local_port, &system_port, &params) {
                Ok(_) => self.send(&Message::Mapped {
                    local_port,
                    system_port,
                    translation,
                    params,
                }),
                Err(e) => self.port_operation_failed("Mapping", &local_port, &system_port, e),
            },
            Message::Unmap {
                local_port,
                system_port,
                translation,
                params,
            } => match self.ports.unmap(&local_port, &system_port, &params) {
                Ok(_) => self.send(&Message::Unmapped {
                    local_port,
                    system_port,
                    translation,
                    params,
                }),
                Err(e) => self.port_operation_failed("Unmapping", &local_port, &system_port, e),
            },
            other => self.unhandled(other),
        }
    }

    fn connect_listen(
        &mut self,
        local_port: String,
        remote_component: ComponentRef,
        remote_port: String,
        transport: TransportKind,
    ) -> Result<()> {
        let key = ConnectionKey::new(remote_component, remote_port);
        if transport == TransportKind::Local {
            return self.connect_failed(
                local_port,
                key,
                LinkError::port("Message CONNECT_LISTEN cannot refer to transport type LOCAL"),
            );
        }
        let bind_ip = self
            .config
            .bind_address
            .or_else(|| self.channel.local_address().map(|a| a.ip()))
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        match self.ports.listen(&local_port, &key, bind_ip, &mut self.event_loop) {
            Ok(Some(address)) => self.send(&Message::ConnectListenAck {
                local_port,
                remote_component: key.remote_component,
                remote_port: key.remote_port,
                transport,
                address,
            }),
            Ok(None) => self.send(&Message::Connected {
                local_port,
                remote_component: key.remote_component,
                remote_port: key.remote_port,
            }),
            Err(e) => self.connect_failed(local_port, key, e),
        }
    }

    fn connect_failed(&mut self, local_port: String, key: ConnectionKey, error: LinkError) -> Result<()> {
        if error.is_fatal() {
            return Err(error);
        }
        tracing::warn!("Connecting port {} to {} failed: {}", local_port, key, error);
        self.send(&Message::ConnectError {
            local_port,
            remote_component: key.remote_component,
            remote_port: key.remote_port,
            reason: error.to_string(),
        })
    }

    fn port_operation_failed(
        &mut self,
        what: &str,
        local_port: &str,
        system_port: &str,
        error: LinkError,
    ) -> Result<()> {
        if error.is_fatal() {
            return Err(error);
        }
        let text = format!(
            "{} port {} to system:{} failed: {}",
            what, local_port, system_port, error
        );
        tracing::warn!("{}", text);
        self.send(&Message::Error { text })
    }

    fn unhandled(&mut self, message: Message) -> Result<()> {
        Err(LinkError::UnexpectedMessage {
            message: message.kind().name(),
            state: self.state.as_str(),
        })
    }

    fn configure(&mut self, config: &str) -> Result<()> {
        if self.config_parser.apply(config) {
            self.apply(LocalAction::ConfigureSucceeded)?;
            self.send(&Message::ConfigureAck)
        } else {
            tracing::warn!("Configuration was rejected");
            self.apply(LocalAction::ConfigureFailed)?;
            self.send(&Message::ConfigureNak)
        }
    }

    /// Send a request and enter the state waiting for its answer.
    ///
    /// The answer is available from [`Component::take_reply`] once it has
    /// been processed.
    pub fn send_request(&mut self, request: &Message) -> Result<()> {
        let kind = request.kind();
        let action = LocalAction::for_request(kind).ok_or_else(|| {
            LinkError::Protocol(format!("{} is not a request message", kind.name()))
        })?;
        self.apply(action)?;
        self.send(request)
    }

    /// Oldest unclaimed answer to a request.
    pub fn take_reply(&mut self) -> Option<Message> {
        self.replies.pop_front()
    }

    /// Oldest unclaimed `CANCEL_DONE`, `COMPONENT_STATUS` or `PTC_VERDICT`.
    pub fn take_notification(&mut self) -> Option<Message> {
        self.notifications.pop_front()
    }

    /// Whether a reply of `kind` is queued.
    pub fn has_reply(&self, kind: MessageKind) -> bool {
        self.replies.iter().any(|m| m.kind() == kind)
    }

    /// Record a log line locally.
    pub fn log(&mut self, severity: Severity, text: &str) {
        self.log_sink.log(severity, text);
    }

    /// Record a log line locally and forward it to the MC.
    pub fn send_log(&mut self, severity: Severity, text: &str) -> Result<()> {
        self.log_sink.log(severity, text);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.send(&Message::Log {
            seconds: now.as_secs() as i64,
            microseconds: now.subsec_micros() as i32,
            severity: severity as i32,
            text: text.to_string(),
        })
    }

    /// Register a port of this component.
    pub fn activate_port(&mut self, name: impl Into<String>, handler: impl PortHandler + 'static) -> Result<()> {
        self.ports.activate(name, Box::new(handler))
    }

    pub fn start_port(&mut self, name: &str) -> Result<()> {
        self.ports.start(name)
    }

    pub fn stop_port(&mut self, name: &str) -> Result<()> {
        self.ports.stop(name)
    }

    pub fn halt_port(&mut self, name: &str) -> Result<()> {
        self.ports.halt(name)
    }

    /// Drop the data queued on `name`.
    pub fn clear_port(&mut self, name: &str) -> Result<()> {
        self.ports.clear(name)
    }

    /// Send application data on `port` to the component `destination`.
    pub fn send_data(
        &mut self,
        port: &str,
        destination: ComponentRef,
        kind: DataKind,
        payload: &[u8],
    ) -> Result<()> {
        self.ports.send(port, destination, kind, payload)
    }

    /// Map `port` to a system port without MC involvement.
    pub fn map_port(&mut self, port: &str, system_port: &str, params: &MapParams) -> Result<bool> {
        self.ports.map(port, system_port, params)
    }

    pub fn unmap_port(&mut self, port: &str, system_port: &str, params: &MapParams) -> Result<bool> {
        self.ports.unmap(port, system_port, params)
    }

    pub fn deactivate_port(&mut self, name: &str) -> Result<()> {
        self.ports.deactivate(name, &mut self.event_loop);
        self.flush_port_notices()
    }

    /// Report connection changes to the MC.
    fn flush_port_notices(&mut self) -> Result<()> {
        for notice in self.ports.drain_notices() {
            let message = match notice {
                PortNotice::State { port, key, state } => {
                    tracing::trace!(
                        "Connection {} of port {} is now {}",
                        key,
                        port,
                        state.map(|s| s.as_str()).unwrap_or("removed")
                    );
                    continue;
                }
                PortNotice::Connected { port, key } => Message::Connected {
                    local_port: port,
                    remote_component: key.remote_component,
                    remote_port: key.remote_port,
                },
                PortNotice::ConnectFailed { port, key, reason } => {
                    tracing::warn!("Connecting port {} to {} failed: {}", port, key, reason);
                    Message::ConnectError {
                        local_port: port,
                        remote_component: key.remote_component,
                        remote_port: key.remote_port,
                        reason,
                    }
                }
                PortNotice::Disconnected { port, key, reason } => {
                    tracing::debug!("Port {} was disconnected from {} ({:?})", port, key, reason);
                    Message::Disconnected {
                        local_port: port,
                        remote_component: key.remote_component,
                        remote_port: key.remote_port,
                    }
                }
            };
            self.send(&message)?;
        }
        Ok(())
    }

    /// Tear down every port; the MC learns about the end from the exit
    /// message, not from per-port reports.
    fn deactivate_ports(&mut self) {
        self.ports.deactivate_all(&mut self.event_loop);
        self.ports.drain_notices();
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        self.channel.send(message, &mut self.event_loop)
    }

    fn apply(&mut self, action: LocalAction) -> Result<()> {
        let next = apply_local(self.role, action, self.state)?;
        self.set_state(next);
        Ok(())
    }

    fn set_state(&mut self, next: ExecutorState) {
        if next != self.state {
            tracing::debug!("{} state: {} -> {}", self.role.as_str(), self.state.as_str(), next.as_str());
            self.state = next;
        }
    }

    fn shutdown(&mut self) {
        self.liveness.disable_periodic_call();
        self.deactivate_ports();
        self.channel.close(&mut self.event_loop);
    }
}
