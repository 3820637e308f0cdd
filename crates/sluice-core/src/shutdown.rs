//! Half-close / full-close shutdown state machine (spec §4.D).
use std::fmt;

/// Which direction a shutdown call targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// Who originated a receive-direction shutdown. Send-direction shutdowns
/// are always user-originated, so this only matters for `Receive`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Source,
    Remote,
}

/// Half-open mode keeps the two directions independent; full-close forces
/// both shut on any shutdown call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseMode {
    HalfOpen,
    FullClose,
}

/// Per-transition delta: which edges fired on *this* call. All fields
/// false means nothing changed (the call was a no-op against current
/// state).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownContext {
    pub initiated: bool,
    pub send: bool,
    pub receive: bool,
    pub completed: bool,
}

impl ShutdownContext {
    /// True iff any edge in this context fired.
    pub fn any(&self) -> bool {
        self.initiated || self.send || self.receive || self.completed
    }
}

/// Tracks shutdown progress for one socket. `completed` is derived, not
/// stored: it is true exactly when both directions are closed.
#[derive(Debug)]
pub struct ShutdownState {
    initiated: bool,
    send_open: bool,
    receive_open: bool,
    mode: CloseMode,
}

impl ShutdownState {
    pub fn new(mode: CloseMode) -> Self {
        Self {
            initiated: false,
            send_open: true,
            receive_open: true,
            mode,
        }
    }

    pub fn send_open(&self) -> bool {
        self.send_open
    }

    pub fn receive_open(&self) -> bool {
        self.receive_open
    }

    pub fn completed(&self) -> bool {
        !self.send_open && !self.receive_open
    }

    fn begin_transition(&mut self, context: &mut ShutdownContext) {
        if !self.initiated {
            self.initiated = true;
            context.initiated = true;
        }
    }

    fn finish_transition(&mut self, send_changed: bool, receive_changed: bool, context: &mut ShutdownContext) {
        context.send = send_changed;
        context.receive = receive_changed;
        if (send_changed || receive_changed) && self.completed() {
            context.completed = true;
        }
    }

    /// Attempts to shut the send direction. Returns `true` iff any edge
    /// transitioned.
    pub fn try_shutdown_send(&mut self) -> ShutdownContext {
        let mut context = ShutdownContext::default();
        if self.completed() {
            return context;
        }
        self.begin_transition(&mut context);

        let send_changed = self.send_open;
        self.send_open = false;

        let receive_changed = matches!(self.mode, CloseMode::FullClose) && self.receive_open;
        if receive_changed {
            self.receive_open = false;
        }

        if !send_changed && !receive_changed {
            return ShutdownContext::default();
        }
        self.finish_transition(send_changed, receive_changed, &mut context);
        context
    }

    /// Attempts to shut the receive direction. `origin` is recorded only
    /// for observability hooks external to this state machine; the
    /// transition rules are identical regardless of origin.
    pub fn try_shutdown_receive(&mut self, _origin: Origin) -> ShutdownContext {
        let mut context = ShutdownContext::default();
        if self.completed() {
            return context;
        }
        self.begin_transition(&mut context);

        let receive_changed = self.receive_open;
        self.receive_open = false;

        let send_changed = matches!(self.mode, CloseMode::FullClose) && self.send_open;
        if send_changed {
            self.send_open = false;
        }

        if !send_changed && !receive_changed {
            return ShutdownContext::default();
        }
        self.finish_transition(send_changed, receive_changed, &mut context);
        context
    }
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ShutdownState{{send_open={}, receive_open={}, completed={}}}",
            self.send_open,
            self.receive_open,
            self.completed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_open_send_then_receive_remote_completes() {
        let mut s = ShutdownState::new(CloseMode::HalfOpen);

        let ctx = s.try_shutdown_send();
        assert_eq!(ctx, ShutdownContext { initiated: true, send: true, receive: false, completed: false });

        let ctx = s.try_shutdown_receive(Origin::Remote);
        assert_eq!(ctx, ShutdownContext { initiated: false, send: false, receive: true, completed: true });
    }

    #[test]
    fn half_open_receive_then_send_completes() {
        let mut s = ShutdownState::new(CloseMode::HalfOpen);

        let ctx = s.try_shutdown_receive(Origin::Remote);
        assert_eq!(ctx, ShutdownContext { initiated: true, send: false, receive: true, completed: false });

        let ctx = s.try_shutdown_send();
        assert_eq!(ctx, ShutdownContext { initiated: false, send: true, receive: false, completed: true });
    }

    #[test]
    fn post_completion_calls_always_return_false() {
        let mut s = ShutdownState::new(CloseMode::HalfOpen);
        s.try_shutdown_send();
        s.try_shutdown_receive(Origin::Remote);
        assert!(s.completed());

        let ctx = s.try_shutdown_send();
        assert_eq!(ctx, ShutdownContext::default());
        let ctx = s.try_shutdown_receive(Origin::Source);
        assert_eq!(ctx, ShutdownContext::default());
    }

    #[test]
    fn full_close_shuts_both_directions_on_first_call() {
        let mut s = ShutdownState::new(CloseMode::FullClose);
        let ctx = s.try_shutdown_send();
        assert_eq!(ctx, ShutdownContext { initiated: true, send: true, receive: true, completed: true });
        assert!(s.completed());
    }

    #[test]
    fn repeated_identical_call_is_a_no_op() {
        let mut s = ShutdownState::new(CloseMode::HalfOpen);
        s.try_shutdown_send();
        let ctx = s.try_shutdown_send();
        assert_eq!(ctx, ShutdownContext::default(), "second send-shutdown changes nothing");
    }
}
