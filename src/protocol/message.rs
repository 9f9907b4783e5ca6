//! Control message catalogue.
//!
//! Opcodes are only unique per direction: opcode 2 is `VERSION` from a host
//! controller but `CREATE_MTC` towards one. Every lookup therefore goes
//! through a `(Direction, opcode)` table, and encoding checks the reverse
//! `(Direction, kind)` so a message cannot leave in a direction that does
//! not define it.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;

use super::{build_frame, FrameBuffer, FrameGuard};
use crate::error::{LinkError, Result};
use crate::port::MapParams;

/// Component reference as assigned by the main controller.
pub type ComponentRef = i32;

/// No component.
pub const NULL_COMPREF: ComponentRef = 0;
/// The main test component.
pub const MTC_COMPREF: ComponentRef = 1;
/// The system component (target of port mappings).
pub const SYSTEM_COMPREF: ComponentRef = 2;
/// First reference handed out to parallel test components.
pub const FIRST_PTC_COMPREF: ComponentRef = 3;

/// Sender and receiver of a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Main controller to host controller.
    McToHc,
    /// Host controller to main controller.
    HcToMc,
    /// Main controller to main test component.
    McToMtc,
    /// Main test component to main controller.
    MtcToMc,
    /// Main controller to parallel test component.
    McToPtc,
    /// Parallel test component to main controller.
    PtcToMc,
}

/// Test verdict as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verdict {
    /// No verdict yet.
    #[default]
    None = 0,
    /// Pass.
    Pass = 1,
    /// Inconclusive.
    Inconc = 2,
    /// Fail.
    Fail = 3,
    /// Error.
    Error = 4,
}

impl Verdict {
    /// Decode from the wire value.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Pass),
            2 => Some(Self::Inconc),
            3 => Some(Self::Fail),
            4 => Some(Self::Error),
            _ => None,
        }
    }

    /// Lower-case verdict name.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pass => "pass",
            Self::Inconc => "inconc",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

/// Transport used by a port connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// In-process direct dispatch.
    Local = 0,
    /// TCP byte stream.
    InetStream = 1,
}

impl TransportKind {
    /// Decode from the wire value.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Local),
            1 => Some(Self::InetStream),
            _ => None,
        }
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::InetStream => "INET_STREAM",
        }
    }
}

/// Host description sent with `VERSION`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostInfo {
    pub node_name: String,
    pub machine_type: String,
    pub system_name: String,
    pub system_release: String,
    pub system_version: String,
}

/// Test module and its checksum, sent with `VERSION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub checksum: Bytes,
}

/// Final verdict of one PTC, delivered to the MTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtcVerdictEntry {
    pub component_ref: ComponentRef,
    pub component_name: String,
    pub verdict: Verdict,
    pub reason: String,
}

/// Field-less message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Error,
    Log,
    // MC -> HC
    Configure,
    CreateMtc,
    CreatePtc,
    KillProcess,
    ExitHc,
    // HC -> MC
    Version,
    ConfigureAck,
    ConfigureNak,
    CreateNak,
    HcReady,
    // TC -> MC
    CreateReq,
    StartReq,
    StopReq,
    KillReq,
    IsRunning,
    IsAlive,
    DoneReq,
    KilledReq,
    CancelDoneAck,
    ConnectReq,
    ConnectListenAck,
    Connected,
    ConnectError,
    DisconnectReq,
    Disconnected,
    MapReq,
    Mapped,
    UnmapReq,
    Unmapped,
    // MTC -> MC
    TestcaseStarted,
    TestcaseFinished,
    MtcCreated,
    MtcReady,
    // PTC -> MC
    PtcCreated,
    Stopped,
    StoppedKilled,
    Killed,
    // MC -> TC
    CreateAck,
    StartAck,
    Stop,
    StopAck,
    KillAck,
    Running,
    Alive,
    DoneAck,
    KilledAck,
    CancelDone,
    ComponentStatus,
    ConnectListen,
    Connect,
    ConnectAck,
    Disconnect,
    DisconnectAck,
    Map,
    MapAck,
    Unmap,
    UnmapAck,
    // MC -> MTC
    ExecuteControl,
    ExecuteTestcase,
    PtcVerdict,
    Continue,
    ExitMtc,
    // MC -> PTC
    Start,
    Kill,
}

impl MessageKind {
    /// Protocol name of the message.
    pub fn name(self) -> &'static str {
        use MessageKind::*;
        match self {
            Error => "ERROR",
            Log => "LOG",
            Configure => "CONFIGURE",
            CreateMtc => "CREATE_MTC",
            CreatePtc => "CREATE_PTC",
            KillProcess => "KILL_PROCESS",
            ExitHc => "EXIT_HC",
            Version => "VERSION",
            ConfigureAck => "CONFIGURE_ACK",
            ConfigureNak => "CONFIGURE_NAK",
            CreateNak => "CREATE_NAK",
            HcReady => "HC_READY",
            CreateReq => "CREATE_REQ",
            StartReq => "START_REQ",
            StopReq => "STOP_REQ",
            KillReq => "KILL_REQ",
            IsRunning => "IS_RUNNING",
            IsAlive => "IS_ALIVE",
            DoneReq => "DONE_REQ",
            KilledReq => "KILLED_REQ",
            CancelDoneAck => "CANCEL_DONE_ACK",
            ConnectReq => "CONNECT_REQ",
            ConnectListenAck => "CONNECT_LISTEN_ACK",
            Connected => "CONNECTED",
            ConnectError => "CONNECT_ERROR",
            DisconnectReq => "DISCONNECT_REQ",
            Disconnected => "DISCONNECTED",
            MapReq => "MAP_REQ",
            Mapped => "MAPPED",
            UnmapReq => "UNMAP_REQ",
            Unmapped => "UNMAPPED",
            TestcaseStarted => "TESTCASE_STARTED",
            TestcaseFinished => "TESTCASE_FINISHED",
            MtcCreated => "MTC_CREATED",
            MtcReady => "MTC_READY",
            PtcCreated => "PTC_CREATED",
            Stopped => "STOPPED",
            StoppedKilled => "STOPPED_KILLED",
            Killed => "KILLED",
            CreateAck => "CREATE_ACK",
            StartAck => "START_ACK",
            Stop => "STOP",
            StopAck => "STOP_ACK",
            KillAck => "KILL_ACK",
            Running => "RUNNING",
            Alive => "ALIVE",
            DoneAck => "DONE_ACK",
            KilledAck => "KILLED_ACK",
            CancelDone => "CANCEL_DONE",
            ComponentStatus => "COMPONENT_STATUS",
            ConnectListen => "CONNECT_LISTEN",
            Connect => "CONNECT",
            ConnectAck => "CONNECT_ACK",
            Disconnect => "DISCONNECT",
            DisconnectAck => "DISCONNECT_ACK",
            Map => "MAP",
            MapAck => "MAP_ACK",
            Unmap => "UNMAP",
            UnmapAck => "UNMAP_ACK",
            ExecuteControl => "EXECUTE_CONTROL",
            ExecuteTestcase => "EXECUTE_TESTCASE",
            PtcVerdict => "PTC_VERDICT",
            Continue => "CONTINUE",
            ExitMtc => "EXIT_MTC",
            Start => "START",
            Kill => "KILL",
        }
    }
}

type Table = &'static [(i32, MessageKind)];

const MC_TO_HC: Table = &[
    (0, MessageKind::Error),
    (1, MessageKind::Configure),
    (2, MessageKind::CreateMtc),
    (3, MessageKind::CreatePtc),
    (4, MessageKind::KillProcess),
    (5, MessageKind::ExitHc),
];

const HC_TO_MC: Table = &[
    (0, MessageKind::Error),
    (1, MessageKind::Log),
    (2, MessageKind::Version),
    (3, MessageKind::ConfigureAck),
    (4, MessageKind::ConfigureNak),
    (5, MessageKind::CreateNak),
    (6, MessageKind::HcReady),
];

/// Shared by MTC and PTC towards the main controller.
const TC_TO_MC: Table = &[
    (50, MessageKind::CreateReq),
    (51, MessageKind::StartReq),
    (52, MessageKind::StopReq),
    (53, MessageKind::KillReq),
    (54, MessageKind::IsRunning),
    (55, MessageKind::IsAlive),
    (56, MessageKind::DoneReq),
    (57, MessageKind::KilledReq),
    (58, MessageKind::CancelDoneAck),
    (59, MessageKind::ConnectReq),
    (60, MessageKind::ConnectListenAck),
    (61, MessageKind::Connected),
    (62, MessageKind::ConnectError),
    (63, MessageKind::DisconnectReq),
    (64, MessageKind::Disconnected),
    (65, MessageKind::MapReq),
    (66, MessageKind::Mapped),
    (67, MessageKind::UnmapReq),
    (68, MessageKind::Unmapped),
];

const MTC_TO_MC: Table = &[
    (0, MessageKind::Error),
    (1, MessageKind::Log),
    (3, MessageKind::ConfigureAck),
    (4, MessageKind::ConfigureNak),
    (100, MessageKind::TestcaseStarted),
    (101, MessageKind::TestcaseFinished),
    (102, MessageKind::MtcCreated),
    (103, MessageKind::MtcReady),
];

const PTC_TO_MC: Table = &[
    (0, MessageKind::Error),
    (1, MessageKind::Log),
    (150, MessageKind::PtcCreated),
    (151, MessageKind::Stopped),
    (152, MessageKind::StoppedKilled),
    (153, MessageKind::Killed),
];

/// Shared by MTC and PTC from the main controller.
const MC_TO_TC: Table = &[
    (50, MessageKind::CreateAck),
    (51, MessageKind::StartAck),
    (52, MessageKind::Stop),
    (53, MessageKind::StopAck),
    (54, MessageKind::KillAck),
    (55, MessageKind::Running),
    (56, MessageKind::Alive),
    (57, MessageKind::DoneAck),
    (58, MessageKind::KilledAck),
    (59, MessageKind::CancelDone),
    (60, MessageKind::ComponentStatus),
    (61, MessageKind::ConnectListen),
    (62, MessageKind::Connect),
    (63, MessageKind::ConnectAck),
    (64, MessageKind::Disconnect),
    (65, MessageKind::DisconnectAck),
    (66, MessageKind::Map),
    (67, MessageKind::MapAck),
    (68, MessageKind::Unmap),
    (69, MessageKind::UnmapAck),
];

const MC_TO_MTC: Table = &[
    (0, MessageKind::Error),
    (1, MessageKind::Configure),
    (100, MessageKind::ExecuteControl),
    (101, MessageKind::ExecuteTestcase),
    (102, MessageKind::PtcVerdict),
    (103, MessageKind::Continue),
    (104, MessageKind::ExitMtc),
];

const MC_TO_PTC: Table = &[
    (0, MessageKind::Error),
    (150, MessageKind::Start),
    (151, MessageKind::Kill),
];

const EMPTY: Table = &[];

impl Direction {
    /// Every direction.
    pub const ALL: [Direction; 6] = [
        Direction::McToHc,
        Direction::HcToMc,
        Direction::McToMtc,
        Direction::MtcToMc,
        Direction::McToPtc,
        Direction::PtcToMc,
    ];

    fn tables(self) -> [Table; 2] {
        match self {
            Direction::McToHc => [MC_TO_HC, EMPTY],
            Direction::HcToMc => [HC_TO_MC, EMPTY],
            Direction::McToMtc => [MC_TO_MTC, MC_TO_TC],
            Direction::MtcToMc => [MTC_TO_MC, TC_TO_MC],
            Direction::McToPtc => [MC_TO_PTC, MC_TO_TC],
            Direction::PtcToMc => [PTC_TO_MC, TC_TO_MC],
        }
    }

    /// Every `(opcode, kind)` pair defined for this direction.
    pub fn catalogue(self) -> impl Iterator<Item = (i32, MessageKind)> {
        self.tables().into_iter().flat_map(|t| t.iter().copied())
    }

    /// Message kind for an opcode in this direction.
    pub fn lookup(self, opcode: i32) -> Option<MessageKind> {
        self.catalogue()
            .find(|(op, _)| *op == opcode)
            .map(|(_, kind)| kind)
    }

    /// Opcode of a message kind in this direction.
    pub fn opcode_of(self, kind: MessageKind) -> Option<i32> {
        self.catalogue()
            .find(|(_, k)| *k == kind)
            .map(|(op, _)| op)
    }

    /// The opposite direction over the same channel.
    pub fn reverse(self) -> Direction {
        match self {
            Direction::McToHc => Direction::HcToMc,
            Direction::HcToMc => Direction::McToHc,
            Direction::McToMtc => Direction::MtcToMc,
            Direction::MtcToMc => Direction::McToMtc,
            Direction::McToPtc => Direction::PtcToMc,
            Direction::PtcToMc => Direction::McToPtc,
        }
    }
}

/// A decoded control message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Error {
        text: String,
    },
    Log {
        seconds: i64,
        microseconds: i32,
        severity: i32,
        text: String,
    },
    Configure {
        config: String,
    },
    CreateMtc,
    CreatePtc {
        component_ref: ComponentRef,
        type_module: String,
        type_name: String,
        component_name: String,
        is_alive: bool,
        testcase_module: String,
        testcase_name: String,
    },
    KillProcess {
        component_ref: ComponentRef,
    },
    ExitHc,
    Version {
        major: i32,
        minor: i32,
        patch: i32,
        build: i32,
        host: HostInfo,
        modules: Vec<ModuleInfo>,
    },
    ConfigureAck,
    ConfigureNak,
    CreateNak {
        component_ref: ComponentRef,
        reason: String,
    },
    HcReady,
    CreateReq {
        type_module: String,
        type_name: String,
        component_name: String,
        location: String,
        is_alive: bool,
    },
    StartReq {
        component_ref: ComponentRef,
        function_module: String,
        function_name: String,
        arguments: Bytes,
    },
    StopReq {
        component_ref: ComponentRef,
    },
    KillReq {
        component_ref: ComponentRef,
    },
    IsRunning {
        component_ref: ComponentRef,
    },
    IsAlive {
        component_ref: ComponentRef,
    },
    DoneReq {
        component_ref: ComponentRef,
    },
    KilledReq {
        component_ref: ComponentRef,
    },
    CancelDoneAck {
        component_ref: ComponentRef,
    },
    ConnectReq {
        src_component: ComponentRef,
        src_port: String,
        dst_component: ComponentRef,
        dst_port: String,
    },
    ConnectListenAck {
        local_port: String,
        remote_component: ComponentRef,
        remote_port: String,
        transport: TransportKind,
        address: SocketAddr,
    },
    Connected {
        local_port: String,
        remote_component: ComponentRef,
        remote_port: String,
    },
    ConnectError {
        local_port: String,
        remote_component: ComponentRef,
        remote_port: String,
        reason: String,
    },
    DisconnectReq {
        src_component: ComponentRef,
        src_port: String,
        dst_component: ComponentRef,
        dst_port: String,
    },
    Disconnected {
        local_port: String,
        remote_component: ComponentRef,
        remote_port: String,
    },
    MapReq {
        src_component: ComponentRef,
        src_port: String,
        system_port: String,
        translation: bool,
        params: MapParams,
    },
    Mapped {
        local_port: String,
        system_port: String,
        translation: bool,
        params: MapParams,
    },
    UnmapReq {
        src_component: ComponentRef,
        src_port: String,
        system_port: String,
        translation: bool,
        params: MapParams,
    },
    Unmapped {
        local_port: String,
        system_port: String,
        translation: bool,
        params: MapParams,
    },
    TestcaseStarted {
        module: String,
        testcase: String,
    },
    TestcaseFinished {
        verdict: Verdict,
        reason: String,
    },
    MtcCreated,
    MtcReady,
    PtcCreated {
        component_ref: ComponentRef,
    },
    Stopped {
        verdict: Verdict,
        reason: String,
        return_type: String,
        return_value: Bytes,
    },
    StoppedKilled {
        verdict: Verdict,
        reason: String,
        return_type: String,
        return_value: Bytes,
    },
    Killed {
        verdict: Verdict,
        reason: String,
    },
    CreateAck {
        component_ref: ComponentRef,
    },
    StartAck,
    Stop,
    StopAck,
    KillAck,
    Running {
        answer: bool,
    },
    Alive {
        answer: bool,
    },
    DoneAck {
        answer: bool,
        verdict: Verdict,
        return_type: String,
        return_value: Bytes,
    },
    KilledAck {
        answer: bool,
    },
    CancelDone {
        component_ref: ComponentRef,
    },
    ComponentStatus {
        component_ref: ComponentRef,
        is_done: bool,
        is_killed: bool,
        verdict: Verdict,
        return_type: String,
        return_value: Bytes,
    },
    ConnectListen {
        local_port: String,
        remote_component: ComponentRef,
        remote_component_name: String,
        remote_port: String,
        transport: TransportKind,
    },
    Connect {
        local_port: String,
        remote_component: ComponentRef,
        remote_component_name: String,
        remote_port: String,
        transport: TransportKind,
        address: Option<SocketAddr>,
    },
    ConnectAck,
    Disconnect {
        local_port: String,
        remote_component: ComponentRef,
        remote_port: String,
    },
    DisconnectAck,
    Map {
        local_port: String,
        system_port: String,
        translation: bool,
        params: MapParams,
    },
    MapAck {
        params: MapParams,
    },
    Unmap {
        local_port: String,
        system_port: String,
        translation: bool,
        params: MapParams,
    },
    UnmapAck {
        params: MapParams,
    },
    ExecuteControl {
        module: String,
    },
    ExecuteTestcase {
        module: String,
        testcase: String,
    },
    PtcVerdict {
        verdicts: Vec<PtcVerdictEntry>,
    },
    Continue,
    ExitMtc,
    Start {
        function_module: String,
        function_name: String,
        arguments: Bytes,
    },
    Kill,
}

impl Message {
    /// Field-less identifier of this message.
    pub fn kind(&self) -> MessageKind {
        use Message as M;
        use MessageKind as K;
        match self {
            M::Error { .. } => K::Error,
            M::Log { .. } => K::Log,
            M::Configure { .. } => K::Configure,
            M::CreateMtc => K::CreateMtc,
            M::CreatePtc { .. } => K::CreatePtc,
            M::KillProcess { .. } => K::KillProcess,
            M::ExitHc => K::ExitHc,
            M::Version { .. } => K::Version,
            M::ConfigureAck => K::ConfigureAck,
            M::ConfigureNak => K::ConfigureNak,
            M::CreateNak { .. } => K::CreateNak,
            M::HcReady => K::HcReady,
            M::CreateReq { .. } => K::CreateReq,
            M::StartReq { .. } => K::StartReq,
            M::StopReq { .. } => K::StopReq,
            M::KillReq { .. } => K::KillReq,
            M::IsRunning { .. } => K::IsRunning,
            M::IsAlive { .. } => K::IsAlive,
            M::DoneReq { .. } => K::DoneReq,
            M::KilledReq { .. } => K::KilledReq,
            M::CancelDoneAck { .. } => K::CancelDoneAck,
            M::ConnectReq { .. } => K::ConnectReq,
            M::ConnectListenAck { .. } => K::ConnectListenAck,
            M::Connected { .. } => K::Connected,
            M::ConnectError { .. } => K::ConnectError,
            M::DisconnectReq { .. } => K::DisconnectReq,
            M::Disconnected { .. } => K::Disconnected,
            M::MapReq { .. } => K::MapReq,
            M::Mapped { .. } => K::Mapped,
            M::UnmapReq { .. } => K::UnmapReq,
            M::Unmapped { .. } => K::Unmapped,
            M::TestcaseStarted { .. } => K::TestcaseStarted,
            M::TestcaseFinished { .. } => K::TestcaseFinished,
            M::MtcCreated => K::MtcCreated,
            M::MtcReady => K::MtcReady,
            M::PtcCreated { .. } => K::PtcCreated,
            M::Stopped { .. } => K::Stopped,
            M::StoppedKilled { .. } => K::StoppedKilled,
            M::Killed { .. } => K::Killed,
            M::CreateAck { .. } => K::CreateAck,
            M::StartAck => K::StartAck,
            M::Stop => K::Stop,
            M::StopAck => K::StopAck,
            M::KillAck => K::KillAck,
            M::Running { .. } => K::Running,
            M::Alive { .. } => K::Alive,
            M::DoneAck { .. } => K::DoneAck,
            M::KilledAck { .. } => K::KilledAck,
            M::CancelDone { .. } => K::CancelDone,
            M::ComponentStatus { .. } => K::ComponentStatus,
            M::ConnectListen { .. } => K::ConnectListen,
            M::Connect { .. } => K::Connect,
            M::ConnectAck => K::ConnectAck,
            M::Disconnect { .. } => K::Disconnect,
            M::DisconnectAck => K::DisconnectAck,
            M::Map { .. } => K::Map,
            M::MapAck { .. } => K::MapAck,
            M::Unmap { .. } => K::Unmap,
            M::UnmapAck { .. } => K::UnmapAck,
            M::ExecuteControl { .. } => K::ExecuteControl,
            M::ExecuteTestcase { .. } => K::ExecuteTestcase,
            M::PtcVerdict { .. } => K::PtcVerdict,
            M::Continue => K::Continue,
            M::ExitMtc => K::ExitMtc,
            M::Start { .. } => K::Start,
            M::Kill => K::Kill,
        }
    }

    /// Encode as a complete frame for the given direction.
    pub fn encode(&self, direction: Direction) -> Result<FrameBuffer> {
        let kind = self.kind();
        let opcode = direction.opcode_of(kind).ok_or_else(|| {
            LinkError::Protocol(format!(
                "Message {} is not defined for direction {:?}",
                kind.name(),
                direction
            ))
        })?;
        build_frame(opcode, |buf| self.encode_fields(buf))
    }

    /// Decode the frame held by `frame` for the given direction.
    ///
    /// Returns `Ok(None)` for an opcode the direction does not define; the
    /// frame is skipped when the guard drops.
    pub fn decode(direction: Direction, frame: &mut FrameGuard<'_>) -> Result<Option<Message>> {
        let opcode = frame.pull_i32()?;
        let Some(kind) = direction.lookup(opcode) else {
            tracing::warn!(
                "Unsupported message type {} in direction {:?}, discarding",
                opcode,
                direction
            );
            return Ok(None);
        };
        let message = Self::decode_fields(kind, frame)?;
        frame.finish()?;
        Ok(Some(message))
    }

    fn encode_fields(&self, buf: &mut FrameBuffer) {
        use Message as M;
        match self {
            M::Error { text } => buf.push_string(text),
            M::Log {
                seconds,
                microseconds,
                severity,
                text,
            } => {
                buf.push_int(*seconds);
                buf.push_int(*microseconds);
                buf.push_int(*severity);
                buf.push_string(text);
            }
            M::Configure { config } => buf.push_string(config),
            M::CreatePtc {
                component_ref,
                type_module,
                type_name,
                component_name,
                is_alive,
                testcase_module,
                testcase_name,
            } => {
                buf.push_int(*component_ref);
                buf.push_string(type_module);
                buf.push_string(type_name);
                buf.push_string(component_name);
                buf.push_bool(*is_alive);
                buf.push_string(testcase_module);
                buf.push_string(testcase_name);
            }
            M::KillProcess { component_ref }
            | M::StopReq { component_ref }
            | M::KillReq { component_ref }
            | M::IsRunning { component_ref }
            | M::IsAlive { component_ref }
            | M::DoneReq { component_ref }
            | M::KilledReq { component_ref }
            | M::CancelDoneAck { component_ref }
            | M::PtcCreated { component_ref }
            | M::CreateAck { component_ref }
            | M::CancelDone { component_ref } => buf.push_int(*component_ref),
            M::Version {
                major,
                minor,
                patch,
                build,
                host,
                modules,
            } => {
                buf.push_int(*major);
                buf.push_int(*minor);
                buf.push_int(*patch);
                buf.push_int(*build);
                buf.push_string(&host.node_name);
                buf.push_string(&host.machine_type);
                buf.push_string(&host.system_name);
                buf.push_string(&host.system_release);
                buf.push_string(&host.system_version);
                buf.push_int(modules.len());
                for module in modules {
                    buf.push_string(&module.name);
                    buf.push_bytes(&module.checksum);
                }
            }
            M::CreateNak {
                component_ref,
                reason,
            } => {
                buf.push_int(*component_ref);
                buf.push_string(reason);
            }
            M::CreateReq {
                type_module,
                type_name,
                component_name,
                location,
                is_alive,
            } => {
                buf.push_string(type_module);
                buf.push_string(type_name);
                buf.push_string(component_name);
                buf.push_string(location);
                buf.push_bool(*is_alive);
            }
            M::StartReq {
                component_ref,
                function_module,
                function_name,
                arguments,
            } => {
                buf.push_int(*component_ref);
                buf.push_string(function_module);
                buf.push_string(function_name);
                buf.push_bytes(arguments);
            }
            M::ConnectReq {
                src_component,
                src_port,
                dst_component,
                dst_port,
            }
            | M::DisconnectReq {
                src_component,
                src_port,
                dst_component,
                dst_port,
            } => {
                buf.push_int(*src_component);
                buf.push_string(src_port);
                buf.push_int(*dst_component);
                buf.push_string(dst_port);
            }
            M::ConnectListenAck {
                local_port,
                remote_component,
                remote_port,
                transport,
                address,
            } => {
                push_endpoint(buf, local_port, *remote_component, remote_port);
                buf.push_int(*transport as i32);
                push_address(buf, Some(*address));
            }
            M::Connected {
                local_port,
                remote_component,
                remote_port,
            }
            | M::Disconnected {
                local_port,
                remote_component,
                remote_port,
            }
            | M::Disconnect {
                local_port,
                remote_component,
                remote_port,
            } => push_endpoint(buf, local_port, *remote_component, remote_port),
            M::ConnectError {
                local_port,
                remote_component,
                remote_port,
                reason,
            } => {
                push_endpoint(buf, local_port, *remote_component, remote_port);
                buf.push_string(reason);
            }
            M::MapReq {
                src_component,
                src_port,
                system_port,
                translation,
                params,
            }
            | M::UnmapReq {
                src_component,
                src_port,
                system_port,
                translation,
                params,
            } => {
                buf.push_int(*src_component);
                buf.push_string(src_port);
                buf.push_string(system_port);
                buf.push_bool(*translation);
                params.encode(buf);
            }
            M::Mapped {
                local_port,
                system_port,
                translation,
                params,
            }
            | M::Unmapped {
                local_port,
                system_port,
                translation,
                params,
            }
            | M::Map {
                local_port,
                system_port,
                translation,
                params,
            }
            | M::Unmap {
                local_port,
                system_port,
                translation,
                params,
            } => {
                buf.push_string(local_port);
                buf.push_string(system_port);
                buf.push_bool(*translation);
                params.encode(buf);
            }
            M::TestcaseStarted { module, testcase } | M::ExecuteTestcase { module, testcase } => {
                buf.push_string(module);
                buf.push_string(testcase);
            }
            M::TestcaseFinished { verdict, reason } | M::Killed { verdict, reason } => {
                buf.push_int(*verdict as i32);
                buf.push_string(reason);
            }
            M::Stopped {
                verdict,
                reason,
                return_type,
                return_value,
            }
            | M::StoppedKilled {
                verdict,
                reason,
                return_type,
                return_value,
            } => {
                buf.push_int(*verdict as i32);
                buf.push_string(reason);
                buf.push_string(return_type);
                buf.push_bytes(return_value);
            }
            M::Running { answer } | M::Alive { answer } | M::KilledAck { answer } => {
                buf.push_bool(*answer)
            }
            M::DoneAck {
                answer,
                verdict,
                return_type,
                return_value,
            } => {
                buf.push_bool(*answer);
                buf.push_int(*verdict as i32);
                buf.push_string(return_type);
                buf.push_bytes(return_value);
            }
            M::ComponentStatus {
                component_ref,
                is_done,
                is_killed,
                verdict,
                return_type,
                return_value,
            } => {
                buf.push_int(*component_ref);
                buf.push_bool(*is_done);
                buf.push_bool(*is_killed);
                buf.push_int(*verdict as i32);
                buf.push_string(return_type);
                buf.push_bytes(return_value);
            }
            M::ConnectListen {
                local_port,
                remote_component,
                remote_component_name,
                remote_port,
                transport,
            } => {
                buf.push_string(local_port);
                buf.push_int(*remote_component);
                buf.push_string(remote_component_name);
                buf.push_string(remote_port);
                buf.push_int(*transport as i32);
            }
            M::Connect {
                local_port,
                remote_component,
                remote_component_name,
                remote_port,
                transport,
                address,
            } => {
                buf.push_string(local_port);
                buf.push_int(*remote_component);
                buf.push_string(remote_component_name);
                buf.push_string(remote_port);
                buf.push_int(*transport as i32);
                push_address(buf, *address);
            }
            M::MapAck { params } | M::UnmapAck { params } => params.encode(buf),
            M::ExecuteControl { module } => buf.push_string(module),
            M::PtcVerdict { verdicts } => {
                buf.push_int(verdicts.len());
                for entry in verdicts {
                    buf.push_int(entry.component_ref);
                    buf.push_string(&entry.component_name);
                    buf.push_int(entry.verdict as i32);
                    buf.push_string(&entry.reason);
                }
            }
            M::Start {
                function_module,
                function_name,
                arguments,
            } => {
                buf.push_string(function_module);
                buf.push_string(function_name);
                buf.push_bytes(arguments);
            }
            M::CreateMtc
            | M::ExitHc
            | M::ConfigureAck
            | M::ConfigureNak
            | M::HcReady
            | M::MtcCreated
            | M::MtcReady
            | M::StartAck
            | M::Stop
            | M::StopAck
            | M::KillAck
            | M::ConnectAck
            | M::DisconnectAck
            | M::Continue
            | M::ExitMtc
            | M::Kill => {}
        }
    }

    fn decode_fields(kind: MessageKind, buf: &mut FrameBuffer) -> Result<Message> {
        use MessageKind as K;
        let message = match kind {
            K::Error => Message::Error {
                text: buf.pull_string()?,
            },
            K::Log => Message::Log {
                seconds: buf.pull_i64()?,
                microseconds: buf.pull_i32()?,
                severity: buf.pull_i32()?,
                text: buf.pull_string()?,
            },
            K::Configure => Message::Configure {
                config: buf.pull_string()?,
            },
            K::CreateMtc => Message::CreateMtc,
            K::CreatePtc => Message::CreatePtc {
                component_ref: buf.pull_i32()?,
                type_module: buf.pull_string()?,
                type_name: buf.pull_string()?,
                component_name: buf.pull_string()?,
                is_alive: buf.pull_bool()?,
                testcase_module: buf.pull_string()?,
                testcase_name: buf.pull_string()?,
            },
            K::KillProcess => Message::KillProcess {
                component_ref: buf.pull_i32()?,
            },
            K::ExitHc => Message::ExitHc,
            K::Version => {
                let major = buf.pull_i32()?;
                let minor = buf.pull_i32()?;
                let patch = buf.pull_i32()?;
                let build = buf.pull_i32()?;
                let host = HostInfo {
                    node_name: buf.pull_string()?,
                    machine_type: buf.pull_string()?,
                    system_name: buf.pull_string()?,
                    system_release: buf.pull_string()?,
                    system_version: buf.pull_string()?,
                };
                let count = buf.pull_len()?;
                let mut modules = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    modules.push(ModuleInfo {
                        name: buf.pull_string()?,
                        checksum: buf.pull_bytes()?,
                    });
                }
                Message::Version {
                    major,
                    minor,
                    patch,
                    build,
                    host,
                    modules,
                }
            }
            K::ConfigureAck => Message::ConfigureAck,
            K::ConfigureNak => Message::ConfigureNak,
            K::CreateNak => Message::CreateNak {
                component_ref: buf.pull_i32()?,
                reason: buf.pull_string()?,
            },
            K::HcReady => Message::HcReady,
            K::CreateReq => Message::CreateReq {
                type_module: buf.pull_string()?,
                type_name: buf.pull_string()?,
                component_name: buf.pull_string()?,
                location: buf.pull_string()?,
                is_alive: buf.pull_bool()?,
            },
            K::StartReq => Message::StartReq {
                component_ref: buf.pull_i32()?,
                function_module: buf.pull_string()?,
                function_name: buf.pull_string()?,
                arguments: buf.pull_bytes()?,
            },
            K::StopReq => Message::StopReq {
                component_ref: buf.pull_i32()?,
            },
            K::KillReq => Message::KillReq {
                component_ref: buf.pull_i32()?,
            },
            K::IsRunning => Message::IsRunning {
                component_ref: buf.pull_i32()?,
            },
            K::IsAlive => Message::IsAlive {
                component_ref: buf.pull_i32()?,
            },
            K::DoneReq => Message::DoneReq {
                component_ref: buf.pull_i32()?,
            },
            K::KilledReq => Message::KilledReq {
                component_ref: buf.pull_i32()?,
            },
            K::CancelDoneAck => Message::CancelDoneAck {
                component_ref: buf.pull_i32()?,
            },
            K::ConnectReq => Message::ConnectReq {
                src_component: buf.pull_i32()?,
                src_port: buf.pull_string()?,
                dst_component: buf.pull_i32()?,
                dst_port: buf.pull_string()?,
            },
            K::ConnectListenAck => {
                let (local_port, remote_component, remote_port) = pull_endpoint(buf)?;
                let transport = pull_transport(buf)?;
                let address = pull_address(buf)?
                    .ok_or_else(|| LinkError::decode("CONNECT_LISTEN_ACK without address"))?;
                Message::ConnectListenAck {
                    local_port,
                    remote_component,
                    remote_port,
                    transport,
                    address,
                }
            }
            K::Connected => {
                let (local_port, remote_component, remote_port) = pull_endpoint(buf)?;
                Message::Connected {
                    local_port,
                    remote_component,
                    remote_port,
                }
            }
            K::ConnectError => {
                let (local_port, remote_component, remote_port) = pull_endpoint(buf)?;
                Message::ConnectError {
                    local_port,
                    remote_component,
                    remote_port,
                    reason: buf.pull_string()?,
                }
            }
            K::DisconnectReq => Message::DisconnectReq {
                src_component: buf.pull_i32()?,
                src_port: buf.pull_string()?,
                dst_component: buf.pull_i32()?,
                dst_port: buf.pull_string()?,
            },
            K::Disconnected => {
                let (local_port, remote_component, remote_port) = pull_endpoint(buf)?;
                Message::Disconnected {
                    local_port,
                    remote_component,
                    remote_port,
                }
            }
            K::MapReq | K::UnmapReq => {
                let src_component = buf.pull_i32()?;
                let src_port = buf.pull_string()?;
                let system_port = buf.pull_string()?;
                let translation = buf.pull_bool()?;
                let params = MapParams::decode(buf)?;
                if kind == K::MapReq {
                    Message::MapReq {
                        src_component,
                        src_port,
                        system_port,
                        translation,
                        params,
                    }
                } else {
                    Message::UnmapReq {
                        src_component,
                        src_port,
                        system_port,
                        translation,
                        params,
                    }
                }
            }
            K::Mapped | K::Unmapped | K::Map | K::Unmap => {
                let local_port = buf.pull_string()?;
                let system_port = buf.pull_string()?;
                let translation = buf.pull_bool()?;
                let params = MapParams::decode(buf)?;
                match kind {
                    K::Mapped => Message::Mapped {
                        local_port,
                        system_port,
                        translation,
                        params,
                    },
                    K::Unmapped => Message::Unmapped {
                        local_port,
                        system_port,
                        translation,
                        params,
                    },
                    K::Map => Message::Map {
                        local_port,
                        system_port,
                        translation,
                        params,
                    },
                    _ => Message::Unmap {
                        local_port,
                        system_port,
                        translation,
                        params,
                    },
                }
            }
            K::TestcaseStarted => Message::TestcaseStarted {
                module: buf.pull_string()?,
                testcase: buf.pull_string()?,
            },
            K::TestcaseFinished => Message::TestcaseFinished {
                verdict: pull_verdict(buf)?,
                reason: buf.pull_string()?,
            },
            K::MtcCreated => Message::MtcCreated,
            K::MtcReady => Message::MtcReady,
            K::PtcCreated => Message::PtcCreated {
                component_ref: buf.pull_i32()?,
            },
            K::Stopped | K::StoppedKilled => {
                let verdict = pull_verdict(buf)?;
                let reason = buf.pull_string()?;
                let return_type = buf.pull_string()?;
                let return_value = buf.pull_bytes()?;
                if kind == K::Stopped {
                    Message::Stopped {
                        verdict,
                        reason,
                        return_type,
                        return_value,
                    }
                } else {
                    Message::StoppedKilled {
                        verdict,
                        reason,
                        return_type,
                        return_value,
                    }
                }
            }
            K::Killed => Message::Killed {
                verdict: pull_verdict(buf)?,
                reason: buf.pull_string()?,
            },
            K::CreateAck => Message::CreateAck {
                component_ref: buf.pull_i32()?,
            },
            K::StartAck => Message::StartAck,
            K::Stop => Message::Stop,
            K::StopAck => Message::StopAck,
            K::KillAck => Message::KillAck,
            K::Running => Message::Running {
                answer: buf.pull_bool()?,
            },
            K::Alive => Message::Alive {
                answer: buf.pull_bool()?,
            },
            K::DoneAck => Message::DoneAck {
                answer: buf.pull_bool()?,
                verdict: pull_verdict(buf)?,
                return_type: buf.pull_string()?,
                return_value: buf.pull_bytes()?,
            },
            K::KilledAck => Message::KilledAck {
                answer: buf.pull_bool()?,
            },
            K::CancelDone => Message::CancelDone {
                component_ref: buf.pull_i32()?,
            },
            K::ComponentStatus => Message::ComponentStatus {
                component_ref: buf.pull_i32()?,
                is_done: buf.pull_bool()?,
                is_killed: buf.pull_bool()?,
                verdict: pull_verdict(buf)?,
                return_type: buf.pull_string()?,
                return_value: buf.pull_bytes()?,
            },
            K::ConnectListen => Message::ConnectListen {
                local_port: buf.pull_string()?,
                remote_component: buf.pull_i32()?,
                remote_component_name: buf.pull_string()?,
                remote_port: buf.pull_string()?,
                transport: pull_transport(buf)?,
            },
            K::Connect => Message::Connect {
                local_port: buf.pull_string()?,
                remote_component: buf.pull_i32()?,
                remote_component_name: buf.pull_string()?,
                remote_port: buf.pull_string()?,
                transport: pull_transport(buf)?,
                address: pull_address(buf)?,
            },
            K::ConnectAck => Message::ConnectAck,
            K::Disconnect => {
                let (local_port, remote_component, remote_port) = pull_endpoint(buf)?;
                Message::Disconnect {
                    local_port,
                    remote_component,
                    remote_port,
                }
            }
            K::DisconnectAck => Message::DisconnectAck,
            K::MapAck => Message::MapAck {
                params: MapParams::decode(buf)?,
            },
            K::UnmapAck => Message::UnmapAck {
                params: MapParams::decode(buf)?,
            },
            K::ExecuteControl => Message::ExecuteControl {
                module: buf.pull_string()?,
            },
            K::ExecuteTestcase => Message::ExecuteTestcase {
                module: buf.pull_string()?,
                testcase: buf.pull_string()?,
            },
            K::PtcVerdict => {
                let count = buf.pull_len()?;
                let mut verdicts = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    verdicts.push(PtcVerdictEntry {
                        component_ref: buf.pull_i32()?,
                        component_name: buf.pull_string()?,
                        verdict: pull_verdict(buf)?,
                        reason: buf.pull_string()?,
                    });
                }
                Message::PtcVerdict { verdicts }
            }
            K::Continue => Message::Continue,
            K::ExitMtc => Message::ExitMtc,
            K::Start => Message::Start {
                function_module: buf.pull_string()?,
                function_name: buf.pull_string()?,
                arguments: buf.pull_bytes()?,
            },
            K::Kill => Message::Kill,
        };
        Ok(message)
    }
}

fn push_endpoint(buf: &mut FrameBuffer, local_port: &str, remote: ComponentRef, remote_port: &str) {
    buf.push_string(local_port);
    buf.push_int(remote);
    buf.push_string(remote_port);
}

fn pull_endpoint(buf: &mut FrameBuffer) -> Result<(String, ComponentRef, String)> {
    Ok((buf.pull_string()?, buf.pull_i32()?, buf.pull_string()?))
}

fn pull_verdict(buf: &mut FrameBuffer) -> Result<Verdict> {
    let raw = buf.pull_i32()?;
    Verdict::from_i32(raw).ok_or_else(|| LinkError::decode(format!("Invalid verdict {}", raw)))
}

fn pull_transport(buf: &mut FrameBuffer) -> Result<TransportKind> {
    let raw = buf.pull_i32()?;
    TransportKind::from_i32(raw)
        .ok_or_else(|| LinkError::decode(format!("Unsupported transport type {}", raw)))
}

/// `string(ip) int(port)`; an empty ip means no address.
pub(crate) fn push_address(buf: &mut FrameBuffer, address: Option<SocketAddr>) {
    match address {
        Some(addr) => {
            buf.push_string(&addr.ip().to_string());
            buf.push_int(addr.port() as i32);
        }
        None => {
            buf.push_string("");
            buf.push_int(0);
        }
    }
}

pub(crate) fn pull_address(buf: &mut FrameBuffer) -> Result<Option<SocketAddr>> {
    let ip = buf.pull_string()?;
    let port = buf.pull_i32()?;
    if ip.is_empty() {
        return Ok(None);
    }
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| LinkError::decode(format!("Invalid IP address {:?}", ip)))?;
    let port = u16::try_from(port).map_err(|_| LinkError::decode(format!("Invalid port {}", port)))?;
    Ok(Some(SocketAddr::new(ip, port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn decode_one(direction: Direction, frame: &FrameBuffer) -> Option<Message> {
        let mut incoming = FrameBuffer::new();
        incoming.push_received(frame.as_bytes());
        let mut guard = FrameGuard::next(&mut incoming).unwrap().unwrap();
        Message::decode(direction, &mut guard).unwrap()
    }

    #[test]
    fn test_opcode_reuse_across_directions() {
        assert_eq!(Direction::HcToMc.lookup(2), Some(MessageKind::Version));
        assert_eq!(Direction::McToHc.lookup(2), Some(MessageKind::CreateMtc));
        assert_eq!(Direction::McToPtc.lookup(150), Some(MessageKind::Start));
        assert_eq!(Direction::PtcToMc.lookup(150), Some(MessageKind::PtcCreated));
    }

    #[test]
    fn test_opcodes_unique_within_direction() {
        for direction in Direction::ALL {
            let mut opcodes = HashSet::new();
            let mut kinds = HashSet::new();
            for (op, kind) in direction.catalogue() {
                assert!(opcodes.insert(op), "{:?} reuses opcode {}", direction, op);
                assert!(kinds.insert(kind), "{:?} lists {:?} twice", direction, kind);
            }
        }
    }

    #[test]
    fn test_encode_rejects_wrong_direction() {
        let err = Message::Version {
            major: 1,
            minor: 0,
            patch: 0,
            build: 0,
            host: HostInfo::default(),
            modules: vec![],
        }
        .encode(Direction::McToHc)
        .unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)));
    }

    #[test]
    fn test_unknown_opcode_is_skipped() {
        let frame = build_frame(42, |b| b.push_string("junk")).unwrap();
        let mut incoming = FrameBuffer::new();
        incoming.push_received(frame.as_bytes());
        {
            let mut guard = FrameGuard::next(&mut incoming).unwrap().unwrap();
            assert_eq!(Message::decode(Direction::McToHc, &mut guard).unwrap(), None);
        }
        assert!(incoming.is_empty());
    }

    #[test]
    fn test_connect_with_address() {
        let msg = Message::Connect {
            local_port: "p1".into(),
            remote_component: 5,
            remote_component_name: "peer".into(),
            remote_port: "p2".into(),
            transport: TransportKind::InetStream,
            address: Some("127.0.0.1:4000".parse().unwrap()),
        };
        let frame = msg.encode(Direction::McToPtc).unwrap();
        assert_eq!(decode_one(Direction::McToPtc, &frame), Some(msg));
    }

    #[test]
    fn test_local_connect_without_address() {
        let msg = Message::Connect {
            local_port: "p1".into(),
            remote_component: 3,
            remote_component_name: String::new(),
            remote_port: "p2".into(),
            transport: TransportKind::Local,
            address: None,
        };
        let frame = msg.encode(Direction::McToMtc).unwrap();
        assert_eq!(decode_one(Direction::McToMtc, &frame), Some(msg));
    }

    #[test]
    fn test_version_with_modules() {
        let msg = Message::Version {
            major: 9,
            minor: 0,
            patch: 0,
            build: 1,
            host: HostInfo {
                node_name: "node".into(),
                machine_type: "x86_64".into(),
                system_name: "Linux".into(),
                system_release: "6.1".into(),
                system_version: "#1".into(),
            },
            modules: vec![ModuleInfo {
                name: "MyModule".into(),
                checksum: Bytes::from_static(&[1, 2, 3, 4]),
            }],
        };
        let frame = msg.encode(Direction::HcToMc).unwrap();
        assert_eq!(decode_one(Direction::HcToMc, &frame), Some(msg));
    }

    #[test]
    fn test_map_params_in_map() {
        let mut params = MapParams::new(2);
        params.set(0, "a").unwrap();
        params.set(1, "b").unwrap();
        let msg = Message::Map {
            local_port: "pt".into(),
            system_port: "sys".into(),
            translation: false,
            params,
        };
        let frame = msg.encode(Direction::McToPtc).unwrap();
        assert_eq!(decode_one(Direction::McToPtc, &frame), Some(msg));
    }

    #[test]
    fn test_invalid_verdict_is_decode_error() {
        let frame = build_frame(101, |b| {
            b.push_int(9);
            b.push_string("x");
        })
        .unwrap();
        let mut incoming = FrameBuffer::new();
        incoming.push_received(frame.as_bytes());
        {
            let mut guard = FrameGuard::next(&mut incoming).unwrap().unwrap();
            let err = Message::decode(Direction::MtcToMc, &mut guard).unwrap_err();
            assert!(!err.is_fatal());
        }
        assert!(incoming.is_empty());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let frame = build_frame(52, |b| b.push_int(1)).unwrap();
        let mut incoming = FrameBuffer::new();
        incoming.push_received(frame.as_bytes());
        let mut guard = FrameGuard::next(&mut incoming).unwrap().unwrap();
        // STOP carries no fields.
        assert!(Message::decode(Direction::McToPtc, &mut guard).is_err());
    }
}
