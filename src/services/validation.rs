use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("email regex")
});

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w.@+-]+$").expect("username regex"));

pub const MAX_NAME_LENGTH: usize = 150;
pub const MAX_EMAIL_LENGTH: usize = 254;
pub const MAX_URL_LENGTH: usize = 255;

/// Field-level validation messages, serialized as `{"field": ["msg", ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

pub fn check_username(errors: &mut FieldErrors, username: &str) {
    if username.trim().is_empty() {
        errors.add("username", "This field may not be blank.");
    } else if username.chars().count() > MAX_NAME_LENGTH {
        errors.add(
            "username",
            format!(
                "Ensure this field has no more than {} characters.",
                MAX_NAME_LENGTH
            ),
        );
    } else if !USERNAME_RE.is_match(username) {
        errors.add(
            "username",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        );
    }
}

pub fn check_email(errors: &mut FieldErrors, email: &str) {
    if email.trim().is_empty() {
        errors.add("email", "This field may not be blank.");
    } else if email.len() > MAX_EMAIL_LENGTH || !EMAIL_RE.is_match(email) {
        errors.add("email", "Enter a valid email address.");
    }
}

pub fn check_max_length(errors: &mut FieldErrors, field: &str, value: &str, max: usize) {
    if value.chars().count() > max {
        errors.add(
            field,
            format!("Ensure this field has no more than {} characters.", max),
        );
    }
}

/// Social and picture links must be absolute http(s) URLs.
pub fn check_url(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.len() > MAX_URL_LENGTH {
        check_max_length(errors, field, value, MAX_URL_LENGTH);
        return;
    }
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {}
        _ => errors.add(field, "Enter a valid URL."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails() {
        let mut errors = FieldErrors::new();
        check_email(&mut errors, "someone@example.com");
        check_email(&mut errors, "first.last+tag@sub.example.org");
        assert!(errors.is_empty());

        for bad in ["", "plain", "a@b", "a@@b.com", "a b@c.com"] {
            let mut errors = FieldErrors::new();
            check_email(&mut errors, bad);
            assert!(errors.contains("email"), "{bad:?} accepted");
        }
    }

    #[test]
    fn usernames() {
        let mut errors = FieldErrors::new();
        check_username(&mut errors, "jane.doe+blog@home_1");
        assert!(errors.is_empty());

        check_username(&mut errors, "has space");
        assert_eq!(errors.get("username").map(|m| m.len()), Some(1));
    }

    #[test]
    fn urls() {
        let mut errors = FieldErrors::new();
        check_url(&mut errors, "twitter", "https://twitter.com/someone");
        assert!(errors.is_empty());
        check_url(&mut errors, "twitter", "javascript:alert(1)");
        check_url(&mut errors, "youtube", "not a url");
        assert!(errors.contains("twitter"));
        assert!(errors.contains("youtube"));
    }

    #[test]
    fn serializes_as_field_map() {
        let mut errors = FieldErrors::new();
        errors.add("password", "too short");
        errors.add("password", "needs a digit");
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"password": ["too short", "needs a digit"]})
        );
    }
}
