use super::AuthorSummary;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Frontend,
    Backend,
    Fullstack,
    Design,
    Blockchain,
    DevOps,
    AI,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Self::Frontend,
        Self::Backend,
        Self::Fullstack,
        Self::Design,
        Self::Blockchain,
        Self::DevOps,
        Self::AI,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frontend => "Frontend",
            Self::Backend => "Backend",
            Self::Fullstack => "Fullstack",
            Self::Design => "Design",
            Self::Blockchain => "Blockchain",
            Self::DevOps => "DevOps",
            Self::AI => "AI",
            Self::Other => "Other",
        }
    }
}

impl FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or(())
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Blog {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub author_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub published_date: Option<String>,
    pub is_draft: bool,
    pub category: Option<Category>,
    pub featured_image: Option<String>,
}

/// Wire shape of a post: the row plus its author block.
#[derive(Debug, Clone, Serialize)]
pub struct BlogView {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub author: Option<AuthorSummary>,
    pub category: Option<Category>,
    pub content: String,
    pub featured_image: Option<String>,
    pub published_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub is_draft: bool,
}

impl BlogView {
    pub fn new(blog: Blog, author: Option<AuthorSummary>) -> Self {
        Self {
            id: blog.id,
            title: blog.title,
            slug: blog.slug,
            author,
            category: blog.category,
            content: blog.content,
            featured_image: blog.featured_image,
            published_date: blog.published_date,
            created_at: blog.created_at,
            updated_at: blog.updated_at,
            is_draft: blog.is_draft,
        }
    }
}

/// Request body for creating a post. `category` stays a string so an unknown
/// value surfaces as a field error rather than a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBlog {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub category: Option<String>,
    pub featured_image: Option<String>,
    pub is_draft: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBlog {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub featured_image: Option<String>,
    pub is_draft: Option<bool>,
}
