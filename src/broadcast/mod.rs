//! Version-cached snapshot/patch broadcasting.
//!
//! Every subscribed path owns a [`Pool`]: its live members, the last view sent
//! to them and a version counter. On each storage event the dispatcher
//! recomputes the filtered view of the affected pools, diffs it against the
//! cache and fans out either the full view or the patch operations.

mod diff;
mod dispatcher;
mod message;
mod pool;
mod subscription;

pub use diff::*;
pub use dispatcher::*;
pub use message::*;
pub use pool::*;
pub use subscription::*;
