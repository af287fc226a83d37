use unicode_segmentation::UnicodeSegmentation;

const MAX_NAME_LENGTH: usize = 100;

#[derive(Debug, Clone)]
pub struct SubscriberName(String);

impl SubscriberName {
    pub fn parse(s: String) -> Result<SubscriberName, String> {
        let trimmed = s.trim();

        if trimmed.is_empty() {
            return Err("name cannot be empty".to_string());
        }

        if trimmed.graphemes(true).count() > MAX_NAME_LENGTH {
            return Err(format!(
                "name cannot be longer than {} characters",
                MAX_NAME_LENGTH
            ));
        }

        let forbidden_chars = ['/', '(', ')', '"', '<', '>', '\\', '{', '}'];
        if trimmed.chars().any(|c| forbidden_chars.contains(&c)) {
            return Err("name contains forbidden characters".to_string());
        }

        Ok(SubscriberName(trimmed.to_string()))
    }
}

impl AsRef<str> for SubscriberName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
