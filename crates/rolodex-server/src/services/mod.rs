//! Cache-aware account services.
//!
//! Each service reads through the cache and, after every authoritative
//! write, invalidates the affected entries. The store write always completes
//! before the invalidation is issued.

pub mod admin;
pub mod contacts;
pub mod password_reset;
pub mod users;

use rolodex_core::CoreError;
use thiserror::Error;

use crate::cache::CacheError;

pub use admin::AdminService;
pub use contacts::ContactService;
pub use password_reset::{PasswordResetService, ResetRequestOutcome, ResetTicket};
pub use users::UserService;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ServiceError {
    pub fn is_client_error(&self) -> bool {
        match self {
            ServiceError::Core(e) => e.is_client_error(),
            ServiceError::Cache(_) => false,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
