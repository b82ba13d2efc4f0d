pub mod error;
pub mod model;
pub mod store;

pub use error::{CoreError, ErrorCategory, Result};
pub use model::{Contact, ContactDraft, ContactId, Role, User, UserId, UserUpdate};
pub use store::{ContactStore, DynContactStore, DynUserStore, UserLookup, UserStore};
