pub mod types;
pub mod slot_utils;
pub mod session_index;
pub mod scope;
pub mod availability;
pub mod applier;
pub mod sync;
pub mod legend;
pub mod view;

pub use types::{AssignmentScope, Course, Monitor, ScopeKind};
pub use sync::SyncBus;
pub use view::{AttemptResult, CourseView};
