//! Debug state machine types.

use crate::debugger::BreakpointSet;

/// Execution mode of the debug controller.
///
/// `StepOver` and `StepOut` carry the call depth recorded when the step was
/// issued; the pause rule compares the depth of later trace events against
/// it, which is what distinguishes "step over a call" from "step into it".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugState {
    /// Free-running; pauses only at breakpoints.
    Running,
    /// Worker parked at a pause point, waiting for a resume command.
    Paused,
    /// Pause at the next executed line, regardless of depth.
    StepInto,
    /// Pause at the next line at or above the recorded depth.
    StepOver { depth: u32 },
    /// Pause at the next line strictly above the recorded depth.
    StepOut { depth: u32 },
}

impl DebugState {
    pub fn is_paused(self) -> bool {
        self == DebugState::Paused
    }

    /// True for the three single-step modes (execution-delay pacing applies).
    pub fn is_stepping(self) -> bool {
        matches!(
            self,
            DebugState::StepInto | DebugState::StepOver { .. } | DebugState::StepOut { .. }
        )
    }

    pub(crate) fn should_pause(self, line: u32, depth: u32, breakpoints: &BreakpointSet) -> bool {
        match self {
            DebugState::Running => breakpoints.contains(line),
            // Only reachable if a trace event fires while nominally parked;
            // stay at the pause point rather than running away.
            DebugState::Paused => true,
            DebugState::StepInto => true,
            DebugState::StepOver { depth: recorded } => depth <= recorded,
            DebugState::StepOut { depth: recorded } => depth < recorded,
        }
    }
}

/// A resume command issued by the controller.
///
/// Commands carry no depth; the worker materializes them into a `DebugState`
/// at its next trace callback, where the current call depth is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRequest {
    Continue,
    StepInto,
    StepOver,
    StepOut,
}

impl StepRequest {
    pub(crate) fn materialize(self, depth: u32) -> DebugState {
        match self {
            StepRequest::Continue => DebugState::Running,
            StepRequest::StepInto => DebugState::StepInto,
            StepRequest::StepOver => DebugState::StepOver { depth },
            StepRequest::StepOut => DebugState::StepOut { depth },
        }
    }
}
