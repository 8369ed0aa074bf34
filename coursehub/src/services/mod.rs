//! Services module
//!
//! Business logic that sits between the UI layer and the repository.

pub mod courses;
pub mod engagement;
pub mod notifications;
pub mod session;

pub use courses::CoursesService;
pub use engagement::{can_modify_comment, format_rating, EngagementService};
pub use notifications::NotificationsService;
pub use session::{authorize, AccessDecision, SessionService};
