mod blog;
mod media;
mod user;

pub use blog::*;
pub use media::*;
pub use user::*;
