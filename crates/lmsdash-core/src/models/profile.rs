use serde::{Deserialize, Serialize};

/// The logged-in user, as returned by `profiles/my_profile/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl UserProfile {
    /// "First Last", falling back to the username.
    pub fn display_name(&self) -> String {
        match (non_empty(&self.first_name), non_empty(&self.last_name)) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(name), None) | (None, Some(name)) => name.to_string(),
            (None, None) => self.username.clone(),
        }
    }

    /// Two-letter avatar initials, or the first letter of the username.
    pub fn initials(&self) -> String {
        if let (Some(first), Some(last)) = (non_empty(&self.first_name), non_empty(&self.last_name)) {
            let mut initials = String::new();
            initials.extend(first.chars().next());
            initials.extend(last.chars().next());
            return initials;
        }
        self.username
            .chars()
            .next()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "U".to_string())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
