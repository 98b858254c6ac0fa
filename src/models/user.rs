use super::BlogView;
use serde::{Deserialize, Serialize};

/// Lifecycle of an account. Registration creates `PendingVerification`;
/// following the emailed link moves it to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    PendingVerification,
    Active,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub profile_picture_url: Option<String>,
    pub job_title: Option<String>,
    pub facebook: Option<String>,
    pub youtube: Option<String>,
    pub instagram: Option<String>,
    pub twitter: Option<String>,
    pub linkedin: Option<String>,
    pub is_active: bool,
    pub date_joined: String,
    pub updated_at: String,
}

impl User {
    pub fn state(&self) -> AccountState {
        if self.is_active {
            AccountState::Active
        } else {
            AccountState::PendingVerification
        }
    }
}

/// The author block embedded in every serialized post.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorSummary {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub profile_picture: Option<String>,
}

impl From<&User> for AuthorSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            profile_picture: user.profile_picture.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUser {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub password: String,
}

/// Editable profile fields. Absent fields are left alone; for optional
/// fields an empty string clears the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfile {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub job_title: Option<String>,
    pub profile_picture: Option<String>,
    pub profile_picture_url: Option<String>,
    pub facebook: Option<String>,
    pub youtube: Option<String>,
    pub instagram: Option<String>,
    pub twitter: Option<String>,
    pub linkedin: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: Option<String>,
    pub job_title: Option<String>,
    pub profile_picture: Option<String>,
    pub profile_picture_url: Option<String>,
    pub facebook: Option<String>,
    pub youtube: Option<String>,
    pub instagram: Option<String>,
    pub twitter: Option<String>,
    pub linkedin: Option<String>,
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            bio: user.bio.clone(),
            job_title: user.job_title.clone(),
            profile_picture: user.profile_picture.clone(),
            profile_picture_url: user.profile_picture_url.clone(),
            facebook: user.facebook.clone(),
            youtube: user.youtube.clone(),
            instagram: user.instagram.clone(),
            twitter: user.twitter.clone(),
            linkedin: user.linkedin.clone(),
        }
    }
}

/// Public profile page: the profile plus the author's most recent posts.
#[derive(Debug, Clone, Serialize)]
pub struct PublicProfile {
    #[serde(flatten)]
    pub profile: Profile,
    pub author_posts: Vec<BlogView>,
}
