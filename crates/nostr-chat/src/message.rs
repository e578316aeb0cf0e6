//! Chat message types.

/// A decoded chat message, ready for display.
///
/// For direct messages the content has already been decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Event id (hex)
    pub id: String,
    /// Author public key (hex)
    pub author: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Displayable message text
    pub content: String,
    /// Whether the local identity authored this message
    pub mine: bool,
}

impl ChatMessage {
    /// Short form of the author pubkey for display.
    pub fn author_short(&self) -> &str {
        &self.author[..self.author.len().min(8)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_author_short() {
        let msg = ChatMessage {
            id: "id1".to_string(),
            author: "4f355bdcb7cc0af728ef3cceb9615d90684bb5b2ca5f859ab0f0b704075871aa"
                .to_string(),
            created_at: 1700000000,
            content: "hi".to_string(),
            mine: false,
        };
        assert_eq!(msg.author_short(), "4f355bdc");
    }

    #[test]
    fn test_author_short_handles_short_keys() {
        let msg = ChatMessage {
            id: "id1".to_string(),
            author: "abc".to_string(),
            created_at: 1700000000,
            content: "hi".to_string(),
            mine: false,
        };
        assert_eq!(msg.author_short(), "abc");
    }
}
