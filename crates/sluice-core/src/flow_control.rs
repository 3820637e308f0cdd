//! Read/write interest reconciliation (spec §4.E). Tracks what the user
//! has locked/unlocked against what the engine currently has armed, and
//! emits at most one `show`/`hide` call per direction per reconciliation.
use std::fmt;

/// What the engine should do, if anything, for one direction after a
/// reconciliation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineAction {
    Show,
    Hide,
    None,
}

/// Both directions' reconciliation results from one call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    pub read: EngineAction,
    pub write: EngineAction,
}

/// Read/write interest bookkeeping for one socket. `*_wants_data` are fed
/// by the session (read: "queue has room and isn't closed"; write: "queue
/// has bytes to drain") on every queue mutation; `apply_*`/`relax_*` are
/// the user-facing lock/unlock calls.
#[derive(Debug)]
pub struct FlowControlState {
    read_locked_by_user: bool,
    write_locked_by_user: bool,
    read_armed_on_engine: bool,
    write_armed_on_engine: bool,
    read_closed: bool,
    write_closed: bool,
}

impl Default for FlowControlState {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowControlState {
    pub fn new() -> Self {
        Self {
            read_locked_by_user: false,
            write_locked_by_user: false,
            read_armed_on_engine: false,
            write_armed_on_engine: false,
            read_closed: false,
            write_closed: false,
        }
    }

    pub fn apply_read(&mut self) {
        self.read_locked_by_user = true;
    }

    pub fn relax_read(&mut self) {
        self.read_locked_by_user = false;
    }

    pub fn apply_write(&mut self) {
        self.write_locked_by_user = true;
    }

    pub fn relax_write(&mut self) {
        self.write_locked_by_user = false;
    }

    pub fn close_read(&mut self) {
        self.read_closed = true;
    }

    pub fn close_write(&mut self) {
        self.write_closed = true;
    }

    /// Recomputes desired engine interest from current state and the
    /// queue-driven `*_wants_data` inputs, returning at most one `Show` or
    /// `Hide` action per direction. The engine-armed bits are updated in
    /// place so a repeated reconciliation with unchanged inputs yields
    /// `None` for both directions.
    pub fn reconcile(&mut self, read_queue_wants_data: bool, write_queue_has_data: bool) -> Reconciliation {
        let desired_read = !self.read_locked_by_user && !self.read_closed && read_queue_wants_data;
        let desired_write = !self.write_locked_by_user && !self.write_closed && write_queue_has_data;

        let read = match (self.read_armed_on_engine, desired_read) {
            (false, true) => EngineAction::Show,
            (true, false) => EngineAction::Hide,
            _ => EngineAction::None,
        };
        let write = match (self.write_armed_on_engine, desired_write) {
            (false, true) => EngineAction::Show,
            (true, false) => EngineAction::Hide,
            _ => EngineAction::None,
        };

        self.read_armed_on_engine = desired_read;
        self.write_armed_on_engine = desired_write;

        Reconciliation { read, write }
    }

    pub fn read_armed_on_engine(&self) -> bool {
        self.read_armed_on_engine
    }

    pub fn write_armed_on_engine(&self) -> bool {
        self.write_armed_on_engine
    }
}

impl fmt::Display for FlowControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FlowControlState{{read_armed={}, write_armed={}}}",
            self.read_armed_on_engine, self.write_armed_on_engine
        )
    }
}
