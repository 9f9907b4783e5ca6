//! Executor states and their transition tables.
//!
//! Every transition is a row in a static table: either an incoming control
//! message or a local action, the states it is valid in, and the successor.
//! Anything not in a table is an [`LinkError::UnexpectedMessage`].

use crate::error::{LinkError, Result};
use crate::protocol::MessageKind;

/// Process role of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Host controller.
    Hc,
    /// Main test component.
    Mtc,
    /// Parallel test component.
    Ptc,
}

impl Role {
    /// Initial executor state of the role.
    pub fn initial_state(self) -> ExecutorState {
        match self {
            Role::Hc => ExecutorState::HcInitial,
            Role::Mtc => ExecutorState::MtcInitial,
            Role::Ptc => ExecutorState::PtcInitial,
        }
    }

    /// Every state of the role.
    pub fn states(self) -> &'static [ExecutorState] {
        match self {
            Role::Hc => HC_STATES,
            Role::Mtc => MTC_STATES,
            Role::Ptc => PTC_STATES,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Hc => "HC",
            Role::Mtc => "MTC",
            Role::Ptc => "PTC",
        }
    }
}

/// Coarse lifecycle phase of a process role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorState {
    HcInitial,
    HcIdle,
    HcConfiguring,
    HcActive,
    HcOverloaded,
    HcConfiguringOverloaded,
    HcExit,

    MtcInitial,
    MtcIdle,
    MtcConfiguring,
    MtcControlpart,
    MtcTestcase,
    MtcTerminatingTestcase,
    MtcTerminatingExecution,
    MtcPaused,
    MtcCreate,
    MtcStart,
    MtcStop,
    MtcKill,
    MtcRunning,
    MtcAlive,
    MtcDone,
    MtcKilled,
    MtcConnect,
    MtcDisconnect,
    MtcMap,
    MtcUnmap,
    MtcExit,

    PtcInitial,
    PtcIdle,
    PtcFunction,
    PtcCreate,
    PtcStart,
    PtcStop,
    PtcKill,
    PtcRunning,
    PtcAlive,
    PtcDone,
    PtcKilled,
    PtcConnect,
    PtcDisconnect,
    PtcMap,
    PtcUnmap,
    PtcStopped,
    PtcExit,
}

impl ExecutorState {
    pub fn role(self) -> Role {
        use ExecutorState::*;
        match self {
            HcInitial | HcIdle | HcConfiguring | HcActive | HcOverloaded
            | HcConfiguringOverloaded | HcExit => Role::Hc,
            MtcInitial | MtcIdle | MtcConfiguring | MtcControlpart | MtcTestcase
            | MtcTerminatingTestcase | MtcTerminatingExecution | MtcPaused | MtcCreate
            | MtcStart | MtcStop | MtcKill | MtcRunning | MtcAlive | MtcDone | MtcKilled
            | MtcConnect | MtcDisconnect | MtcMap | MtcUnmap | MtcExit => Role::Mtc,
            _ => Role::Ptc,
        }
    }

    /// Whether the process is done.
    pub fn is_exit(self) -> bool {
        matches!(
            self,
            ExecutorState::HcExit | ExecutorState::MtcExit | ExecutorState::PtcExit
        )
    }

    pub fn as_str(self) -> &'static str {
        use ExecutorState::*;
        match self {
            HcInitial => "HC_INITIAL",
            HcIdle => "HC_IDLE",
            HcConfiguring => "HC_CONFIGURING",
            HcActive => "HC_ACTIVE",
            HcOverloaded => "HC_OVERLOADED",
            HcConfiguringOverloaded => "HC_CONFIGURING_OVERLOADED",
            HcExit => "HC_EXIT",
            MtcInitial => "MTC_INITIAL",
            MtcIdle => "MTC_IDLE",
            MtcConfiguring => "MTC_CONFIGURING",
            MtcControlpart => "MTC_CONTROLPART",
            MtcTestcase => "MTC_TESTCASE",
            MtcTerminatingTestcase => "MTC_TERMINATING_TESTCASE",
            MtcTerminatingExecution => "MTC_TERMINATING_EXECUTION",
            MtcPaused => "MTC_PAUSED",
            MtcCreate => "MTC_CREATE",
            MtcStart => "MTC_START",
            MtcStop => "MTC_STOP",
            MtcKill => "MTC_KILL",
            MtcRunning => "MTC_RUNNING",
            MtcAlive => "MTC_ALIVE",
            MtcDone => "MTC_DONE",
            MtcKilled => "MTC_KILLED",
            MtcConnect => "MTC_CONNECT",
            MtcDisconnect => "MTC_DISCONNECT",
            MtcMap => "MTC_MAP",
            MtcUnmap => "MTC_UNMAP",
            MtcExit => "MTC_EXIT",
            PtcInitial => "PTC_INITIAL",
            PtcIdle => "PTC_IDLE",
            PtcFunction => "PTC_FUNCTION",
            PtcCreate => "PTC_CREATE",
            PtcStart => "PTC_START",
            PtcStop => "PTC_STOP",
            PtcKill => "PTC_KILL",
            PtcRunning => "PTC_RUNNING",
            PtcAlive => "PTC_ALIVE",
            PtcDone => "PTC_DONE",
            PtcKilled => "PTC_KILLED",
            PtcConnect => "PTC_CONNECT",
            PtcDisconnect => "PTC_DISCONNECT",
            PtcMap => "PTC_MAP",
            PtcUnmap => "PTC_UNMAP",
            PtcStopped => "PTC_STOPPED",
            PtcExit => "PTC_EXIT",
        }
    }
}

/// A transition not caused by an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalAction {
    ChannelConnected,
    ConfigureSucceeded,
    ConfigureFailed,
    Overloaded,
    OverloadCleared,
    AwaitCreate,
    AwaitStart,
    AwaitStop,
    AwaitKill,
    AwaitRunning,
    AwaitAlive,
    AwaitDone,
    AwaitKilled,
    AwaitConnect,
    AwaitDisconnect,
    AwaitMap,
    AwaitUnmap,
    TestcaseStarted,
    TestcaseFinished,
    Pause,
    ExecutionFinished,
    FunctionFinished,
    Terminated,
}

impl LocalAction {
    /// Every local action.
    pub const ALL: [LocalAction; 23] = [
        LocalAction::ChannelConnected,
        LocalAction::ConfigureSucceeded,
        LocalAction::ConfigureFailed,
        LocalAction::Overloaded,
        LocalAction::OverloadCleared,
        LocalAction::AwaitCreate,
        LocalAction::AwaitStart,
        LocalAction::AwaitStop,
        LocalAction::AwaitKill,
        LocalAction::AwaitRunning,
        LocalAction::AwaitAlive,
        LocalAction::AwaitDone,
        LocalAction::AwaitKilled,
        LocalAction::AwaitConnect,
        LocalAction::AwaitDisconnect,
        LocalAction::AwaitMap,
        LocalAction::AwaitUnmap,
        LocalAction::TestcaseStarted,
        LocalAction::TestcaseFinished,
        LocalAction::Pause,
        LocalAction::ExecutionFinished,
        LocalAction::FunctionFinished,
        LocalAction::Terminated,
    ];

    /// The waiting action entered when a component sends request `kind`.
    pub fn for_request(kind: MessageKind) -> Option<Self> {
        use MessageKind as K;
        let action = match kind {
            K::CreateReq => LocalAction::AwaitCreate,
            K::StartReq => LocalAction::AwaitStart,
            K::StopReq => LocalAction::AwaitStop,
            K::KillReq => LocalAction::AwaitKill,
            K::IsRunning => LocalAction::AwaitRunning,
            K::IsAlive => LocalAction::AwaitAlive,
            K::DoneReq => LocalAction::AwaitDone,
            K::KilledReq => LocalAction::AwaitKilled,
            K::ConnectReq => LocalAction::AwaitConnect,
            K::DisconnectReq => LocalAction::AwaitDisconnect,
            K::MapReq => LocalAction::AwaitMap,
            K::UnmapReq => LocalAction::AwaitUnmap,
            _ => return None,
        };
        Some(action)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LocalAction::ChannelConnected => "channel connected",
            LocalAction::ConfigureSucceeded => "configure succeeded",
            LocalAction::ConfigureFailed => "configure failed",
            LocalAction::Overloaded => "overloaded",
            LocalAction::OverloadCleared => "overload cleared",
            LocalAction::AwaitCreate => "create request",
            LocalAction::AwaitStart => "start request",
            LocalAction::AwaitStop => "stop request",
            LocalAction::AwaitKill => "kill request",
            LocalAction::AwaitRunning => "running request",
            LocalAction::AwaitAlive => "alive request",
            LocalAction::AwaitDone => "done request",
            LocalAction::AwaitKilled => "killed request",
            LocalAction::AwaitConnect => "connect request",
            LocalAction::AwaitDisconnect => "disconnect request",
            LocalAction::AwaitMap => "map request",
            LocalAction::AwaitUnmap => "unmap request",
            LocalAction::TestcaseStarted => "testcase started",
            LocalAction::TestcaseFinished => "testcase finished",
            LocalAction::Pause => "pause",
            LocalAction::ExecutionFinished => "execution finished",
            LocalAction::FunctionFinished => "function finished",
            LocalAction::Terminated => "terminated",
        }
    }
}

/// Successor of a matching row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Stay in the current state.
    Same,
    To(ExecutorState),
}

/// `(trigger, valid current states, successor)`.
pub type Row<T> = (T, &'static [ExecutorState], Target);

use ExecutorState::*;
use MessageKind as K;
use Target::{Same, To};

const HC_STATES: &[ExecutorState] = &[
    HcInitial,
    HcIdle,
    HcConfiguring,
    HcActive,
    HcOverloaded,
    HcConfiguringOverloaded,
    HcExit,
];

const MTC_STATES: &[ExecutorState] = &[
    MtcInitial,
    MtcIdle,
    MtcConfiguring,
    MtcControlpart,
    MtcTestcase,
    MtcTerminatingTestcase,
    MtcTerminatingExecution,
    MtcPaused,
    MtcCreate,
    MtcStart,
    MtcStop,
    MtcKill,
    MtcRunning,
    MtcAlive,
    MtcDone,
    MtcKilled,
    MtcConnect,
    MtcDisconnect,
    MtcMap,
    MtcUnmap,
    MtcExit,
];

const PTC_STATES: &[ExecutorState] = &[
    PtcInitial,
    PtcIdle,
    PtcFunction,
    PtcCreate,
    PtcStart,
    PtcStop,
    PtcKill,
    PtcRunning,
    PtcAlive,
    PtcDone,
    PtcKilled,
    PtcConnect,
    PtcDisconnect,
    PtcMap,
    PtcUnmap,
    PtcStopped,
    PtcExit,
];

const HC_ALIVE: &[ExecutorState] = &[
    HcIdle,
    HcConfiguring,
    HcActive,
    HcOverloaded,
    HcConfiguringOverloaded,
];

/// Where the MTC may serve port operations and status updates.
const MTC_SERVING: &[ExecutorState] = &[
    MtcTestcase,
    MtcTerminatingTestcase,
    MtcTerminatingExecution,
    MtcCreate,
    MtcStart,
    MtcStop,
    MtcKill,
    MtcRunning,
    MtcAlive,
    MtcDone,
    MtcKilled,
    MtcConnect,
    MtcDisconnect,
    MtcMap,
    MtcUnmap,
];

const MTC_STOPPABLE: &[ExecutorState] = &[
    MtcControlpart,
    MtcTestcase,
    MtcTerminatingTestcase,
    MtcPaused,
    MtcCreate,
    MtcStart,
    MtcStop,
    MtcKill,
    MtcRunning,
    MtcAlive,
    MtcDone,
    MtcKilled,
    MtcConnect,
    MtcDisconnect,
    MtcMap,
    MtcUnmap,
];

const MTC_ALIVE: &[ExecutorState] = &[
    MtcIdle,
    MtcConfiguring,
    MtcControlpart,
    MtcTestcase,
    MtcTerminatingTestcase,
    MtcTerminatingExecution,
    MtcPaused,
    MtcCreate,
    MtcStart,
    MtcStop,
    MtcKill,
    MtcRunning,
    MtcAlive,
    MtcDone,
    MtcKilled,
    MtcConnect,
    MtcDisconnect,
    MtcMap,
    MtcUnmap,
];

/// Where a PTC may serve port operations and status updates.
const PTC_SERVING: &[ExecutorState] = &[
    PtcIdle,
    PtcFunction,
    PtcStopped,
    PtcCreate,
    PtcStart,
    PtcStop,
    PtcKill,
    PtcRunning,
    PtcAlive,
    PtcDone,
    PtcKilled,
    PtcConnect,
    PtcDisconnect,
    PtcMap,
    PtcUnmap,
];

const PTC_RUNNING_STATES: &[ExecutorState] = &[
    PtcFunction,
    PtcCreate,
    PtcStart,
    PtcStop,
    PtcKill,
    PtcRunning,
    PtcAlive,
    PtcDone,
    PtcKilled,
    PtcConnect,
    PtcDisconnect,
    PtcMap,
    PtcUnmap,
];

const PTC_ALIVE: &[ExecutorState] = &[
    PtcIdle,
    PtcFunction,
    PtcCreate,
    PtcStart,
    PtcStop,
    PtcKill,
    PtcRunning,
    PtcAlive,
    PtcDone,
    PtcKilled,
    PtcConnect,
    PtcDisconnect,
    PtcMap,
    PtcUnmap,
    PtcStopped,
];

const HC_INCOMING: &[Row<MessageKind>] = &[
    (K::Configure, &[HcIdle, HcActive], To(HcConfiguring)),
    (K::Configure, &[HcOverloaded], To(HcConfiguringOverloaded)),
    (K::CreateMtc, &[HcActive, HcOverloaded], Same),
    (K::CreatePtc, &[HcActive, HcOverloaded], Same),
    (K::KillProcess, &[HcIdle, HcActive, HcOverloaded], Same),
    (K::ExitHc, HC_ALIVE, To(HcExit)),
];

const MTC_INCOMING: &[Row<MessageKind>] = &[
    (K::Configure, &[MtcIdle], To(MtcConfiguring)),
    (K::ExecuteControl, &[MtcIdle], To(MtcControlpart)),
    (K::ExecuteTestcase, &[MtcIdle], To(MtcControlpart)),
    (K::PtcVerdict, &[MtcTerminatingTestcase], To(MtcControlpart)),
    (K::Continue, &[MtcPaused], To(MtcControlpart)),
    (K::ExitMtc, &[MtcIdle], To(MtcExit)),
    (K::Stop, MTC_STOPPABLE, To(MtcTerminatingExecution)),
    (K::Stop, &[MtcIdle, MtcTerminatingExecution], Same),
    (K::CreateAck, &[MtcCreate], To(MtcTestcase)),
    (K::StartAck, &[MtcStart], To(MtcTestcase)),
    (K::StopAck, &[MtcStop], To(MtcTestcase)),
    (K::KillAck, &[MtcKill], To(MtcTestcase)),
    (K::Running, &[MtcRunning], To(MtcTestcase)),
    (K::Alive, &[MtcAlive], To(MtcTestcase)),
    (K::DoneAck, &[MtcDone], To(MtcTestcase)),
    (K::KilledAck, &[MtcKilled], To(MtcTestcase)),
    (K::ConnectAck, &[MtcConnect], To(MtcTestcase)),
    (K::DisconnectAck, &[MtcDisconnect], To(MtcTestcase)),
    (K::MapAck, &[MtcMap], To(MtcTestcase)),
    (K::UnmapAck, &[MtcUnmap], To(MtcTestcase)),
    (K::CancelDone, MTC_SERVING, Same),
    (K::ComponentStatus, MTC_SERVING, Same),
    (K::ConnectListen, MTC_SERVING, Same),
    (K::Connect, MTC_SERVING, Same),
    (K::Disconnect, MTC_SERVING, Same),
    (K::Map, MTC_SERVING, Same),
    (K::Unmap, MTC_SERVING, Same),
];

const PTC_INCOMING: &[Row<MessageKind>] = &[
    (K::Start, &[PtcIdle, PtcStopped], To(PtcFunction)),
    (K::Stop, PTC_RUNNING_STATES, To(PtcStopped)),
    (K::Stop, &[PtcIdle, PtcStopped], Same),
    (K::Kill, PTC_ALIVE, To(PtcExit)),
    (K::CreateAck, &[PtcCreate], To(PtcFunction)),
    (K::StartAck, &[PtcStart], To(PtcFunction)),
    (K::StopAck, &[PtcStop], To(PtcFunction)),
    (K::KillAck, &[PtcKill], To(PtcFunction)),
    (K::Running, &[PtcRunning], To(PtcFunction)),
    (K::Alive, &[PtcAlive], To(PtcFunction)),
    (K::DoneAck, &[PtcDone], To(PtcFunction)),
    (K::KilledAck, &[PtcKilled], To(PtcFunction)),
    (K::ConnectAck, &[PtcConnect], To(PtcFunction)),
    (K::DisconnectAck, &[PtcDisconnect], To(PtcFunction)),
    (K::MapAck, &[PtcMap], To(PtcFunction)),
    (K::UnmapAck, &[PtcUnmap], To(PtcFunction)),
    (K::CancelDone, PTC_SERVING, Same),
    (K::ComponentStatus, PTC_SERVING, Same),
    (K::ConnectListen, PTC_SERVING, Same),
    (K::Connect, PTC_SERVING, Same),
    (K::Disconnect, PTC_SERVING, Same),
    (K::Map, PTC_SERVING, Same),
    (K::Unmap, PTC_SERVING, Same),
];

type A = LocalAction;

const HC_LOCAL: &[Row<LocalAction>] = &[
    (A::ChannelConnected, &[HcInitial], To(HcIdle)),
    (A::ConfigureSucceeded, &[HcConfiguring], To(HcActive)),
    (A::ConfigureSucceeded, &[HcConfiguringOverloaded], To(HcOverloaded)),
    (A::ConfigureFailed, &[HcConfiguring, HcConfiguringOverloaded], To(HcIdle)),
    (A::Overloaded, &[HcActive], To(HcOverloaded)),
    (A::Overloaded, &[HcOverloaded], Same),
    (A::OverloadCleared, &[HcOverloaded], To(HcActive)),
    (A::Terminated, HC_ALIVE, To(HcExit)),
];

const MTC_LOCAL: &[Row<LocalAction>] = &[
    (A::ChannelConnected, &[MtcInitial], To(MtcIdle)),
    (A::ConfigureSucceeded, &[MtcConfiguring], To(MtcIdle)),
    (A::ConfigureFailed, &[MtcConfiguring], To(MtcIdle)),
    (A::AwaitCreate, &[MtcTestcase], To(MtcCreate)),
    (A::AwaitStart, &[MtcTestcase], To(MtcStart)),
    (A::AwaitStop, &[MtcTestcase], To(MtcStop)),
    (A::AwaitKill, &[MtcTestcase], To(MtcKill)),
    (A::AwaitRunning, &[MtcTestcase], To(MtcRunning)),
    (A::AwaitAlive, &[MtcTestcase], To(MtcAlive)),
    (A::AwaitDone, &[MtcTestcase], To(MtcDone)),
    (A::AwaitKilled, &[MtcTestcase], To(MtcKilled)),
    (A::AwaitConnect, &[MtcTestcase], To(MtcConnect)),
    (A::AwaitDisconnect, &[MtcTestcase], To(MtcDisconnect)),
    (A::AwaitMap, &[MtcTestcase], To(MtcMap)),
    (A::AwaitUnmap, &[MtcTestcase], To(MtcUnmap)),
    (A::TestcaseStarted, &[MtcControlpart], To(MtcTestcase)),
    (A::TestcaseFinished, &[MtcTestcase], To(MtcTerminatingTestcase)),
    (A::Pause, &[MtcControlpart], To(MtcPaused)),
    (
        A::ExecutionFinished,
        &[MtcControlpart, MtcTerminatingExecution],
        To(MtcIdle),
    ),
    (A::Terminated, MTC_ALIVE, To(MtcExit)),
];

const PTC_LOCAL: &[Row<LocalAction>] = &[
    (A::ChannelConnected, &[PtcInitial], To(PtcIdle)),
    (A::AwaitCreate, &[PtcFunction], To(PtcCreate)),
    (A::AwaitStart, &[PtcFunction], To(PtcStart)),
    (A::AwaitStop, &[PtcFunction], To(PtcStop)),
    (A::AwaitKill, &[PtcFunction], To(PtcKill)),
    (A::AwaitRunning, &[PtcFunction], To(PtcRunning)),
    (A::AwaitAlive, &[PtcFunction], To(PtcAlive)),
    (A::AwaitDone, &[PtcFunction], To(PtcDone)),
    (A::AwaitKilled, &[PtcFunction], To(PtcKilled)),
    (A::AwaitConnect, &[PtcFunction], To(PtcConnect)),
    (A::AwaitDisconnect, &[PtcFunction], To(PtcDisconnect)),
    (A::AwaitMap, &[PtcFunction], To(PtcMap)),
    (A::AwaitUnmap, &[PtcFunction], To(PtcUnmap)),
    (A::FunctionFinished, &[PtcFunction], To(PtcStopped)),
    (A::Terminated, PTC_ALIVE, To(PtcExit)),
];

/// Incoming-message table of a role.
pub fn incoming_table(role: Role) -> &'static [Row<MessageKind>] {
    match role {
        Role::Hc => HC_INCOMING,
        Role::Mtc => MTC_INCOMING,
        Role::Ptc => PTC_INCOMING,
    }
}

/// Local-action table of a role.
pub fn local_table(role: Role) -> &'static [Row<LocalAction>] {
    match role {
        Role::Hc => HC_LOCAL,
        Role::Mtc => MTC_LOCAL,
        Role::Ptc => PTC_LOCAL,
    }
}

fn resolve<T: PartialEq>(
    table: &[Row<T>],
    trigger: T,
    current: ExecutorState,
) -> Option<ExecutorState> {
    table
        .iter()
        .find(|(t, from, _)| *t == trigger && from.contains(&current))
        .map(|(_, _, target)| match target {
            Same => current,
            To(next) => *next,
        })
}

/// Successor state for an incoming message.
///
/// ERROR is accepted everywhere and keeps the state; the caller then
/// raises the coordinator error.
pub fn next_state(role: Role, kind: MessageKind, current: ExecutorState) -> Result<ExecutorState> {
    if kind == MessageKind::Error && current.role() == role {
        return Ok(current);
    }
    resolve(incoming_table(role), kind, current).ok_or(LinkError::UnexpectedMessage {
        message: kind.name(),
        state: current.as_str(),
    })
}

/// Successor state for a local action.
pub fn apply_local(role: Role, action: LocalAction, current: ExecutorState) -> Result<ExecutorState> {
    resolve(local_table(role), action, current).ok_or(LinkError::UnexpectedMessage {
        message: action.as_str(),
        state: current.as_str(),
    })
}
