//! Peer-to-peer transport: the framed channel, the per-peer session state
//! machine, the peer registry, and the shared echo-guard table (spec.md
//! §4.2, §4.3, §4.4).

pub mod apply;
pub mod echo_guard;
pub mod frame;
pub mod fs_util;
pub mod reconcile;
pub mod registry;
pub mod session;

pub use apply::{ApplyError, UpdateOp};
pub use echo_guard::{ECHO_WINDOW, EchoGuard};
pub use frame::{FrameError, FramedChannel};
pub use reconcile::{ReconcileError, build_manifest, diff_manifest};
pub use registry::PeerRegistry;
pub use session::{PeerId, PeerSession, SessionError};
