//! Trellis ephemeral-media disclosure
//!
//! One-time-view ("disappearing") media for direct messages: the
//! recipient gets exactly one reveal, open for a fixed dwell window,
//! after which only a locked placeholder renders, forever. The sender
//! always sees their own media; their view never consumes the budget.
//!
//! The crate splits the concern the same way the thread core does:
//! [`machine`] is the pure state machine (`Unviewed → Viewing →
//! Viewed`, every transition explicit and clock-free), and
//! [`controller`] is the impure shell that confirms reveals against
//! the store's conditional update before any pixel is shown, so a
//! reload can never re-grant a second view.

pub mod controller;
pub mod machine;

pub use controller::DisclosureController;
pub use machine::{DisclosureError, DisclosureMachine, MediaPresentation};
