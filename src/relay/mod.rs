//! Remote command relay: resolve a token, inject the command into its tmux
//! target, and alert the operator when that fails.

pub mod dispatcher;
pub mod failure;
pub mod inbound;
pub mod injector;
pub mod tmux;

pub use dispatcher::{
    DispatchReceipt, RelayDispatcher, RelayError, DEFAULT_INJECTION_DEADLINE,
};
pub use failure::{FailureAlert, FailureContext, FailureNotifier, FailureReporter};
pub use inbound::{parse_reply, ParsedReply};
pub use injector::{InjectionError, InjectionReceipt, TerminalInjector, TmuxInjector};
pub use tmux::{current_session, SystemTmux, TmuxOutput, TmuxRunner};
