pub mod session;
pub mod volunteers;

pub use session::{AuthUser, Session};
pub use volunteers::{NewVolunteer, ProfileEdit, VolunteerRow};
