//! Integration tests for mctr-link.
//!
//! These tests run components against a fake main controller and port
//! connections over real loopback sockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use mctr_link::control::ControlChannel;
use mctr_link::hooks::{DispatchError, ProcessSpawner, PtcRequest, SpawnError, TestDispatcher};
use mctr_link::port::{
    ConnState, ConnectionKey, DataKind, DisconnectReason, MapParams, PortNotice, PortRegistry,
    QueueHandler,
};
use mctr_link::protocol::{
    ComponentRef, Direction, FrameBuffer, FrameGuard, Message, MessageKind, TransportKind, Verdict,
};
use mctr_link::transport::{Event, EventLoop};
use mctr_link::{Component, ExecutorState, LinkError, Role, RuntimeConfig};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const WAIT: Duration = Duration::from_secs(5);

/// Main controller side of one control connection.
struct FakeMc {
    stream: TcpStream,
    incoming: FrameBuffer,
    /// Direction of the messages the MC sends.
    outgoing: Direction,
}

impl FakeMc {
    async fn start(role: Role) -> (TcpListener, SocketAddr, Direction) {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let outgoing = match role {
            Role::Hc => Direction::McToHc,
            Role::Mtc => Direction::McToMtc,
            Role::Ptc => Direction::McToPtc,
        };
        (listener, addr, outgoing)
    }

    /// Connect `component`, accept it and let it announce itself.
    async fn attach(listener: TcpListener, outgoing: Direction, component: &mut Component) -> Self {
        component.connect().unwrap();
        assert!(component.channel().is_connecting());
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        while !component.channel().is_connected() {
            step(component).await;
        }
        Self {
            stream,
            incoming: FrameBuffer::new(),
            outgoing,
        }
    }

    async fn send(&mut self, message: Message) {
        self.send_all(&[message]).await;
    }

    /// Write all `messages` with a single socket write.
    async fn send_all(&mut self, messages: &[Message]) {
        let mut wire = Vec::new();
        for message in messages {
            wire.extend_from_slice(message.encode(self.outgoing).unwrap().as_bytes());
        }
        self.stream.write_all(&wire).await.unwrap();
    }

    async fn recv(&mut self) -> Message {
        let direction = self.outgoing.reverse();
        loop {
            if let Some(mut frame) = FrameGuard::next(&mut self.incoming).unwrap() {
                if let Some(message) = Message::decode(direction, &mut frame).unwrap() {
                    return message;
                }
                continue;
            }
            let mut buf = [0u8; 4096];
            let n = timeout(WAIT, self.stream.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "component closed the control connection");
            self.incoming.push_received(&buf[..n]);
        }
    }
}

fn component(role: Role, mc: SocketAddr) -> mctr_link::ComponentBuilder {
    Component::builder(role).config(RuntimeConfig::new().with_mc_address(mc))
}

async fn step(component: &mut Component) {
    timeout(WAIT, component.step()).await.unwrap().unwrap();
}

/// Step until the component reaches `state`.
async fn step_until(component: &mut Component, state: ExecutorState) {
    while component.state() != state {
        step(component).await;
    }
}

/// Poll `event_loop` and feed the event to `registry`.
async fn pump(registry: &mut PortRegistry, event_loop: &mut EventLoop) {
    let event = timeout(WAIT, event_loop.poll(None)).await.unwrap();
    match event {
        Event::Data { handle, bytes } => {
            registry.handle_data(handle, &bytes, event_loop).unwrap();
        }
        Event::Accepted { handle, stream, .. } => {
            registry.handle_accept(handle, stream, event_loop);
        }
        Event::Connected { handle, stream } => {
            registry.handle_connected(handle, stream, event_loop);
        }
        Event::Closed { handle, error } => {
            registry.handle_closed(handle, error, event_loop);
        }
        Event::Timer => {}
    }
}

fn states(notices: &[PortNotice]) -> Vec<Option<ConnState>> {
    notices
        .iter()
        .filter_map(|n| match n {
            PortNotice::State { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

fn disconnect_reasons(notices: &[PortNotice]) -> Vec<DisconnectReason> {
    notices
        .iter()
        .filter_map(|n| match n {
            PortNotice::Disconnected { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect()
}

/// Control messages split into single bytes still decode in order.
#[test]
fn test_control_frames_fed_one_byte_at_a_time() {
    let messages = vec![
        Message::Start {
            function_module: "Mod".into(),
            function_name: "f_behaviour".into(),
            arguments: bytes::Bytes::from_static(&[0xde, 0xad, 0x00, 0x80]),
        },
        Message::ComponentStatus {
            component_ref: 7,
            is_done: true,
            is_killed: false,
            verdict: Verdict::Inconc,
            return_type: "integer".into(),
            return_value: bytes::Bytes::from_static(&[42]),
        },
        Message::Kill,
    ];
    let mut wire = Vec::new();
    for message in &messages {
        wire.extend_from_slice(message.encode(Direction::McToPtc).unwrap().as_bytes());
    }

    let mut channel = ControlChannel::new(Direction::PtcToMc, None);
    let mut decoded = Vec::new();
    for byte in &wire {
        channel.receive(std::slice::from_ref(byte));
        while let Some(message) = channel.next_message().unwrap() {
            decoded.push(message);
        }
    }
    assert_eq!(decoded, messages);
    assert!(channel.incoming_mut().is_empty());
}

/// Port data frames split across reads reach the handler whole.
#[tokio::test]
async fn test_port_data_in_fragments() {
    let mut ev_a = EventLoop::new();
    let mut ev_b = EventLoop::new();
    let mut a = PortRegistry::new(3);
    let mut b = PortRegistry::new(4);
    let handler = QueueHandler::new();
    let queue = handler.queue();
    a.activate("p", Box::new(handler)).unwrap();
    a.start("p").unwrap();
    b.activate("q", Box::new(QueueHandler::new())).unwrap();

    let addr = a
        .listen("p", &ConnectionKey::new(4, "q"), LOCALHOST, &mut ev_a)
        .unwrap()
        .unwrap();
    let key_b = ConnectionKey::new(3, "p");
    assert!(b.connect_inet("q", &key_b, addr, &mut ev_b).unwrap());
    while b.connection_state("q", &key_b) != Some(ConnState::Connected) {
        pump(&mut b, &mut ev_b).await;
    }
    pump(&mut a, &mut ev_a).await;

    let payload = vec![0x5a; 3000];
    for _ in 0..3 {
        b.send("q", 3, DataKind::Message, &payload).unwrap();
    }
    while queue.len() < 3 {
        pump(&mut a, &mut ev_a).await;
    }
    for _ in 0..3 {
        let received = queue.pop().unwrap();
        assert_eq!(received.sender, 4);
        assert_eq!(received.payload.as_ref(), payload.as_slice());
    }
}

/// Both sides of a stream connection pass through the LAST handshake.
#[tokio::test]
async fn test_graceful_disconnect_over_loopback() {
    let mut ev_a = EventLoop::new();
    let mut ev_b = EventLoop::new();
    let mut a = PortRegistry::new(3);
    let mut b = PortRegistry::new(4);
    let handler = QueueHandler::new();
    let queue = handler.queue();
    a.activate("p", Box::new(handler)).unwrap();
    a.start("p").unwrap();
    b.activate("q", Box::new(QueueHandler::new())).unwrap();
    b.start("q").unwrap();

    let key_a = ConnectionKey::new(4, "q");
    let key_b = ConnectionKey::new(3, "p");
    let addr = a.listen("p", &key_a, LOCALHOST, &mut ev_a).unwrap().unwrap();
    assert_eq!(a.connection_state("p", &key_a), Some(ConnState::Listening));
    assert!(b.connect_inet("q", &key_b, addr, &mut ev_b).unwrap());
    assert_eq!(b.connection_state("q", &key_b), Some(ConnState::Idle));
    pump(&mut b, &mut ev_b).await;
    assert_eq!(b.connection_state("q", &key_b), Some(ConnState::Connected));

    pump(&mut a, &mut ev_a).await;
    assert_eq!(a.connection_state("p", &key_a), Some(ConnState::Connected));

    // Data sent before LAST is still delivered.
    b.send("q", 3, DataKind::Message, b"trailing").unwrap();
    b.disconnect("q", &key_b, &mut ev_b).unwrap();
    assert_eq!(b.connection_state("q", &key_b), Some(ConnState::LastMsgSent));
    assert!(b.send("q", 3, DataKind::Message, b"late").is_err());

    while a.port("p").unwrap().connection(&key_a).is_some() {
        pump(&mut a, &mut ev_a).await;
    }
    assert_eq!(queue.pop().unwrap().payload.as_ref(), b"trailing");
    while b.port("q").unwrap().connection(&key_b).is_some() {
        pump(&mut b, &mut ev_b).await;
    }

    let notices_a = a.drain_notices();
    assert_eq!(
        states(&notices_a),
        vec![
            Some(ConnState::Idle),
            Some(ConnState::Listening),
            Some(ConnState::Connected),
            Some(ConnState::LastMsgRcvd),
            None,
        ]
    );
    assert_eq!(disconnect_reasons(&notices_a), vec![DisconnectReason::Peer]);

    let notices_b = b.drain_notices();
    assert_eq!(
        states(&notices_b),
        vec![
            Some(ConnState::Idle),
            Some(ConnState::Connected),
            Some(ConnState::LastMsgSent),
            None,
        ]
    );
    assert_eq!(disconnect_reasons(&notices_b), vec![DisconnectReason::Local]);
}

/// One connection per remote endpoint; connections exclude mappings.
#[test]
fn test_connection_uniqueness_and_mapping_exclusion() {
    let mut registry = PortRegistry::new(3);
    registry.activate("a", Box::new(QueueHandler::new())).unwrap();
    registry.activate("b", Box::new(QueueHandler::new())).unwrap();
    registry.activate("m", Box::new(QueueHandler::new())).unwrap();
    assert!(registry.activate("a", Box::new(QueueHandler::new())).is_err());

    let key = ConnectionKey::new(3, "b");
    assert!(registry.connect_local("a", &key).unwrap());
    assert!(!registry.connect_local("a", &key).unwrap());
    assert_eq!(registry.port("a").unwrap().connections().count(), 1);
    assert_eq!(
        registry.connection_state("b", &ConnectionKey::new(3, "a")),
        Some(ConnState::Connected)
    );

    let err = registry.map("a", "sys", &MapParams::default()).unwrap_err();
    assert!(matches!(err, LinkError::Configuration(_)));

    assert!(registry.map("m", "sys", &MapParams::default()).unwrap());
    assert!(!registry.map("m", "sys", &MapParams::default()).unwrap());
    let err = registry
        .connect_local("m", &ConnectionKey::new(3, "a"))
        .unwrap_err();
    assert!(err.is_fatal());
}

struct FlakySpawner {
    overloaded: Arc<AtomicBool>,
}

impl ProcessSpawner for FlakySpawner {
    fn spawn_mtc(&mut self) -> Result<(), SpawnError> {
        if self.overloaded.load(Ordering::SeqCst) {
            Err(SpawnError::Overloaded)
        } else {
            Ok(())
        }
    }

    fn spawn_ptc(&mut self, _request: &PtcRequest) -> Result<(), SpawnError> {
        Err(SpawnError::Failed("fork failed".into()))
    }

    fn kill(&mut self, _component: ComponentRef) -> Result<(), SpawnError> {
        Ok(())
    }

    fn is_overloaded(&mut self) -> bool {
        self.overloaded.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_host_controller_overload_cycle() {
    let (listener, addr, outgoing) = FakeMc::start(Role::Hc).await;
    let overloaded = Arc::new(AtomicBool::new(true));
    let mut hc = Component::builder(Role::Hc)
        .config(
            RuntimeConfig::new()
                .with_mc_address(addr)
                .with_liveness_interval(Duration::from_millis(20)),
        )
        .spawner(FlakySpawner {
            overloaded: overloaded.clone(),
        })
        .version(2, 1, 0, 7)
        .build();
    let mut mc = FakeMc::attach(listener, outgoing, &mut hc).await;

    match mc.recv().await {
        Message::Version {
            major, minor, build, ..
        } => assert_eq!((major, minor, build), (2, 1, 7)),
        other => panic!("expected VERSION, got {:?}", other),
    }
    assert_eq!(hc.state(), ExecutorState::HcIdle);

    mc.send(Message::Configure {
        config: "[LOGGING]".into(),
    })
    .await;
    step_until(&mut hc, ExecutorState::HcActive).await;
    assert_eq!(mc.recv().await, Message::ConfigureAck);

    mc.send(Message::CreateMtc).await;
    step_until(&mut hc, ExecutorState::HcOverloaded).await;
    assert!(matches!(mc.recv().await, Message::CreateNak { component_ref: 1, .. }));
    assert!(hc.liveness().is_armed());

    // Still overloaded at the first tick: the interval doubles.
    step(&mut hc).await;
    assert_eq!(hc.state(), ExecutorState::HcOverloaded);
    assert_eq!(hc.liveness().interval(), Some(Duration::from_millis(40)));

    overloaded.store(false, Ordering::SeqCst);
    step_until(&mut hc, ExecutorState::HcActive).await;
    assert_eq!(mc.recv().await, Message::HcReady);
    assert!(!hc.liveness().is_armed());

    mc.send(Message::CreatePtc {
        component_ref: 5,
        type_module: "M".into(),
        type_name: "CT".into(),
        component_name: "ptc5".into(),
        is_alive: false,
        testcase_module: "M".into(),
        testcase_name: "tc".into(),
    })
    .await;
    step(&mut hc).await;
    match mc.recv().await {
        Message::CreateNak {
            component_ref,
            reason,
        } => {
            assert_eq!(component_ref, 5);
            assert_eq!(reason, "fork failed");
        }
        other => panic!("expected CREATE_NAK, got {:?}", other),
    }

    mc.send(Message::ExitHc).await;
    timeout(WAIT, hc.run()).await.unwrap().unwrap();
    assert_eq!(hc.state(), ExecutorState::HcExit);
}

struct FixedVerdict(Verdict);

impl TestDispatcher for FixedVerdict {
    fn execute_control(&mut self, _module: &str) -> Result<(), DispatchError> {
        Err(DispatchError::Failed("control part aborted".into()))
    }

    fn execute_testcase(&mut self, _module: &str, _testcase: &str) -> Result<Verdict, DispatchError> {
        Err(DispatchError::TestCaseEnded(self.0))
    }

    fn execute_all_testcases(&mut self, _module: &str) -> Result<(), DispatchError> {
        Err(DispatchError::Failed("no test cases".into()))
    }
}

#[tokio::test]
async fn test_mtc_testcase_flow() {
    let (listener, addr, outgoing) = FakeMc::start(Role::Mtc).await;
    let mut mtc = component(Role::Mtc, addr)
        .dispatcher(FixedVerdict(Verdict::Pass))
        .build();
    let mut mc = FakeMc::attach(listener, outgoing, &mut mtc).await;
    assert_eq!(mc.recv().await, Message::MtcCreated);

    mc.send(Message::ExecuteTestcase {
        module: "M".into(),
        testcase: "tc_one".into(),
    })
    .await;
    step_until(&mut mtc, ExecutorState::MtcTerminatingTestcase).await;
    assert_eq!(
        mc.recv().await,
        Message::TestcaseStarted {
            module: "M".into(),
            testcase: "tc_one".into(),
        }
    );
    assert_eq!(
        mc.recv().await,
        Message::TestcaseFinished {
            verdict: Verdict::Pass,
            reason: String::new(),
        }
    );

    mc.send(Message::PtcVerdict { verdicts: vec![] }).await;
    step_until(&mut mtc, ExecutorState::MtcIdle).await;
    assert_eq!(mc.recv().await, Message::MtcReady);
    assert!(matches!(mtc.take_notification(), Some(Message::PtcVerdict { .. })));

    // A failing dispatcher still returns the MTC to idle.
    mc.send(Message::ExecuteControl { module: "M".into() }).await;
    step(&mut mtc).await;
    assert_eq!(mtc.state(), ExecutorState::MtcIdle);
    assert_eq!(mc.recv().await, Message::MtcReady);

    mc.send(Message::Continue).await;
    let err = timeout(WAIT, mtc.step()).await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        LinkError::UnexpectedMessage {
            message: "CONTINUE",
            state: "MTC_IDLE",
        }
    ));
}

#[tokio::test]
async fn test_mtc_request_and_reply() {
    let (listener, addr, outgoing) = FakeMc::start(Role::Mtc).await;
    let mut mtc = component(Role::Mtc, addr).deferred_execution(true).build();
    let mut mc = FakeMc::attach(listener, outgoing, &mut mtc).await;
    assert_eq!(mc.recv().await, Message::MtcCreated);

    mc.send(Message::ExecuteControl { module: "M".into() }).await;
    step_until(&mut mtc, ExecutorState::MtcControlpart).await;
    mtc.begin_testcase("M", "tc_create").unwrap();
    assert!(matches!(mc.recv().await, Message::TestcaseStarted { .. }));

    // Only requests enter a waiting state.
    assert!(mtc.send_request(&Message::MtcReady).is_err());

    mtc.send_request(&Message::CreateReq {
        type_module: "M".into(),
        type_name: "CT".into(),
        component_name: "worker".into(),
        location: String::new(),
        is_alive: true,
    })
    .unwrap();
    assert_eq!(mtc.state(), ExecutorState::MtcCreate);
    assert!(matches!(mc.recv().await, Message::CreateReq { is_alive: true, .. }));

    mc.send(Message::CreateAck { component_ref: 3 }).await;
    step_until(&mut mtc, ExecutorState::MtcTestcase).await;
    assert!(mtc.has_reply(MessageKind::CreateAck));
    assert_eq!(mtc.take_reply(), Some(Message::CreateAck { component_ref: 3 }));
    assert_eq!(mtc.take_reply(), None);

    mc.send(Message::Error {
        text: "test case aborted".into(),
    })
    .await;
    let err = timeout(WAIT, mtc.step()).await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::Coordinator(ref text) if text == "test case aborted"));
}

#[tokio::test]
async fn test_ptc_port_operations() {
    let (listener, addr, outgoing) = FakeMc::start(Role::Ptc).await;
    let mut ptc = component(Role::Ptc, addr).component_ref(3).build();
    let handler = QueueHandler::new();
    let queue = handler.queue();
    ptc.activate_port("p", handler).unwrap();
    ptc.start_port("p").unwrap();
    ptc.activate_port("sys", QueueHandler::new()).unwrap();
    let mut mc = FakeMc::attach(listener, outgoing, &mut ptc).await;
    assert_eq!(mc.recv().await, Message::PtcCreated { component_ref: 3 });

    mc.send(Message::ConnectListen {
        local_port: "p".into(),
        remote_component: 4,
        remote_component_name: "peer".into(),
        remote_port: "q".into(),
        transport: TransportKind::InetStream,
    })
    .await;
    step(&mut ptc).await;
    let listen_addr = match mc.recv().await {
        Message::ConnectListenAck {
            local_port,
            remote_component,
            address,
            ..
        } => {
            assert_eq!((local_port.as_str(), remote_component), ("p", 4));
            address
        }
        other => panic!("expected CONNECT_LISTEN_ACK, got {:?}", other),
    };

    let mut peer = TcpStream::connect(listen_addr).await.unwrap();
    step(&mut ptc).await;
    assert_eq!(
        mc.recv().await,
        Message::Connected {
            local_port: "p".into(),
            remote_component: 4,
            remote_port: "q".into(),
        }
    );

    peer.write_all(&DataKind::Message.frame(b"ping").unwrap())
        .await
        .unwrap();
    while queue.is_empty() {
        step(&mut ptc).await;
    }
    assert_eq!(queue.pop().unwrap().payload.as_ref(), b"ping");

    // The peer initiates the disconnect; the PTC acknowledges and reports.
    peer.write_all(&DataKind::Last.frame(&[]).unwrap()).await.unwrap();
    step(&mut ptc).await;
    assert_eq!(
        mc.recv().await,
        Message::Disconnected {
            local_port: "p".into(),
            remote_component: 4,
            remote_port: "q".into(),
        }
    );
    let mut ack = Vec::new();
    timeout(WAIT, peer.read_to_end(&mut ack)).await.unwrap().unwrap();
    assert_eq!(ack, DataKind::Last.frame(&[]).unwrap().as_ref());

    mc.send(Message::ConnectListen {
        local_port: "p".into(),
        remote_component: 5,
        remote_component_name: "peer".into(),
        remote_port: "q".into(),
        transport: TransportKind::Local,
    })
    .await;
    step(&mut ptc).await;
    assert!(matches!(mc.recv().await, Message::ConnectError { remote_component: 5, .. }));

    let params = MapParams::from_values(vec!["speed=fast".into()]);
    mc.send(Message::Map {
        local_port: "sys".into(),
        system_port: "eth0".into(),
        translation: false,
        params: params.clone(),
    })
    .await;
    step(&mut ptc).await;
    assert!(matches!(mc.recv().await, Message::Mapped { ref system_port, .. } if system_port == "eth0"));
    assert_eq!(ptc.ports().port("sys").unwrap().mappings().count(), 1);

    mc.send(Message::Kill).await;
    timeout(WAIT, ptc.run()).await.unwrap().unwrap();
    assert_eq!(ptc.state(), ExecutorState::PtcExit);
    assert_eq!(
        mc.recv().await,
        Message::Killed {
            verdict: Verdict::None,
            reason: String::new(),
        }
    );
    assert!(!ptc.ports().is_active("sys"));
}

/// CONNECT returns to the loop at once; the outcome is reported later.
#[tokio::test]
async fn test_ptc_connect_completes_in_background() {
    let (listener, addr, outgoing) = FakeMc::start(Role::Ptc).await;
    let mut ptc = component(Role::Ptc, addr).component_ref(3).build();
    ptc.activate_port("p", QueueHandler::new()).unwrap();
    ptc.activate_port("sys", QueueHandler::new()).unwrap();
    let mut mc = FakeMc::attach(listener, outgoing, &mut ptc).await;
    assert_eq!(mc.recv().await, Message::PtcCreated { component_ref: 3 });

    let peer = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let key = ConnectionKey::new(4, "q");
    mc.send_all(&[
        Message::Connect {
            local_port: "p".into(),
            remote_component: 4,
            remote_component_name: "peer".into(),
            remote_port: "q".into(),
            transport: TransportKind::InetStream,
            address: Some(peer.local_addr().unwrap()),
        },
        Message::Map {
            local_port: "sys".into(),
            system_port: "eth0".into(),
            translation: false,
            params: MapParams::default(),
        },
    ])
    .await;
    step(&mut ptc).await;
    // MAP was served while the connect is still in flight.
    assert_eq!(ptc.ports().connection_state("p", &key), Some(ConnState::Idle));
    assert!(matches!(mc.recv().await, Message::Mapped { .. }));

    step(&mut ptc).await;
    assert_eq!(
        mc.recv().await,
        Message::Connected {
            local_port: "p".into(),
            remote_component: 4,
            remote_port: "q".into(),
        }
    );
    assert_eq!(
        ptc.ports().connection_state("p", &key),
        Some(ConnState::Connected)
    );
    let _accepted = timeout(WAIT, peer.accept()).await.unwrap().unwrap();

    let refused = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let refused_addr = refused.local_addr().unwrap();
    drop(refused);
    mc.send(Message::Connect {
        local_port: "p".into(),
        remote_component: 5,
        remote_component_name: "gone".into(),
        remote_port: "q".into(),
        transport: TransportKind::InetStream,
        address: Some(refused_addr),
    })
    .await;
    step(&mut ptc).await;
    step(&mut ptc).await;
    match mc.recv().await {
        Message::ConnectError {
            local_port,
            remote_component,
            reason,
            ..
        } => {
            assert_eq!((local_port.as_str(), remote_component), ("p", 5));
            assert!(reason.contains("TCP connection establishment failed"));
        }
        other => panic!("expected CONNECT_ERROR, got {:?}", other),
    }
    assert_eq!(
        ptc.ports().connection_state("p", &ConnectionKey::new(5, "q")),
        None
    );
}

/// An unreachable MC ends the component with the connect error.
#[tokio::test]
async fn test_failed_control_connect_is_fatal() {
    let (listener, addr, _) = FakeMc::start(Role::Hc).await;
    drop(listener);
    let mut hc = component(Role::Hc, addr).build();
    hc.connect().unwrap();
    assert!(hc.connect().is_err());

    let err = timeout(WAIT, hc.run()).await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::Io(_)));
    assert!(hc.channel().is_disconnected());
    assert_eq!(hc.state(), ExecutorState::HcInitial);
}

#[tokio::test]
async fn test_ptc_function_ends_with_stopped_killed() {
    let (listener, addr, outgoing) = FakeMc::start(Role::Ptc).await;
    let mut ptc = component(Role::Ptc, addr).component_ref(4).build();
    let mut mc = FakeMc::attach(listener, outgoing, &mut ptc).await;
    assert_eq!(mc.recv().await, Message::PtcCreated { component_ref: 4 });

    mc.send(Message::Start {
        function_module: "M".into(),
        function_name: "f".into(),
        arguments: bytes::Bytes::new(),
    })
    .await;
    timeout(WAIT, ptc.run()).await.unwrap().unwrap();
    assert_eq!(ptc.state(), ExecutorState::PtcExit);
    assert!(matches!(
        mc.recv().await,
        Message::StoppedKilled {
            verdict: Verdict::None,
            ..
        }
    ));
}

#[tokio::test]
async fn test_alive_ptc_survives_function_end() {
    let (listener, addr, outgoing) = FakeMc::start(Role::Ptc).await;
    let mut ptc = Component::builder(Role::Ptc)
        .config(RuntimeConfig::new().with_mc_address(addr).with_alive(true))
        .component_ref(5)
        .build();
    let mut mc = FakeMc::attach(listener, outgoing, &mut ptc).await;
    assert_eq!(mc.recv().await, Message::PtcCreated { component_ref: 5 });

    mc.send(Message::Start {
        function_module: "M".into(),
        function_name: "f".into(),
        arguments: bytes::Bytes::new(),
    })
    .await;
    step_until(&mut ptc, ExecutorState::PtcStopped).await;
    assert!(matches!(mc.recv().await, Message::Stopped { .. }));

    // Starting again is allowed from PTC_STOPPED.
    mc.send(Message::Start {
        function_module: "M".into(),
        function_name: "g".into(),
        arguments: bytes::Bytes::new(),
    })
    .await;
    step(&mut ptc).await;
    assert_eq!(ptc.state(), ExecutorState::PtcStopped);
    assert!(matches!(mc.recv().await, Message::Stopped { .. }));
}

#[tokio::test]
async fn test_control_connection_loss_is_fatal() {
    let (listener, addr, outgoing) = FakeMc::start(Role::Ptc).await;
    let mut ptc = component(Role::Ptc, addr).build();
    let mut mc = FakeMc::attach(listener, outgoing, &mut ptc).await;
    assert!(matches!(mc.recv().await, Message::PtcCreated { .. }));
    drop(mc);

    let err = timeout(WAIT, ptc.run()).await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::ConnectionClosed));
    assert!(ptc.channel().is_disconnected());
}
