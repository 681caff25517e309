// Chat invite link detection.

use regex::Regex;

const INVITE_PATTERN: &str = r"(?i)(?:https?://)?discord(?:\.gg|(?:app)?\.com/invite)/\S+";

pub struct InviteFilter {
    pattern: Regex,
}

impl InviteFilter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(INVITE_PATTERN)?,
        })
    }

    pub fn contains_invite(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_invite_links() {
        let filter = InviteFilter::new().unwrap();
        assert!(filter.contains_invite("join us at discord.gg/abc123"));
        assert!(filter.contains_invite("https://discord.com/invite/xyz"));
        assert!(filter.contains_invite("HTTPS://DISCORDAPP.COM/INVITE/xyz"));
        assert!(!filter.contains_invite("I like discord a lot"));
        assert!(!filter.contains_invite("discord.gg/"));
    }
}
