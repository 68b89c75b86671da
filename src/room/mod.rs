//! The fan-out / fan-in core: one session per room visit, a dedup router in
//! front of the application and a peer tracker beside it.

pub mod router;
pub mod session;
pub mod tracker;

pub use router::DedupRouter;
pub use session::{MessageIdGenerator, RoomSession, SessionManager, Teardown};
pub use tracker::PeerTracker;
