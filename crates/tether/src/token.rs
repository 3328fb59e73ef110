//! One-shot signals checked when a device operation settles.
//!
//! `CancelToken` and `ConfirmToken` share a shape but are distinct types so
//! the two roles cannot be swapped at a call site. Clones share state: the
//! host keeps one clone to signal, the automaton keeps another to check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

macro_rules! one_shot_token {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            signalled: Arc<AtomicBool>,
        }

        impl $name {
            pub fn new() -> Self {
                Self::default()
            }

            /// Raise the signal. Idempotent.
            pub fn signal(&self) {
                self.signalled.store(true, Ordering::SeqCst);
            }

            pub fn is_signalled(&self) -> bool {
                self.signalled.load(Ordering::SeqCst)
            }

            /// Lower the signal so the token can be reused.
            pub fn reset(&self) {
                self.signalled.store(false, Ordering::SeqCst);
            }
        }
    };
}

one_shot_token!(
    /// Unconditional stop request for the current task.
    CancelToken
);

one_shot_token!(
    /// "Take the shot now" request raised by the operator during live view.
    ConfirmToken
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_and_reset() {
        let token = CancelToken::new();
        assert!(!token.is_signalled());

        token.signal();
        token.signal();
        assert!(token.is_signalled());

        token.reset();
        assert!(!token.is_signalled());
    }

    #[test]
    fn test_clones_share_state() {
        let confirm = ConfirmToken::new();
        let host_side = confirm.clone();

        host_side.signal();
        assert!(confirm.is_signalled());
    }

    #[test]
    fn test_tokens_are_independent() {
        let cancel = CancelToken::new();
        let confirm = ConfirmToken::new();

        confirm.signal();
        assert!(!cancel.is_signalled());
    }
}
