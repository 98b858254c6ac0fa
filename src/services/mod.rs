pub mod auth;
pub mod blog;
pub mod error;
pub mod mailer;
pub mod media;
pub mod slug;
pub mod tokens;
pub mod users;
pub mod validation;
pub mod verification;

pub use error::{ServiceError, ServiceResult};
