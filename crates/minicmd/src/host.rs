//! The contract between the plugin and the chat host carrying it

use hashbrown::HashSet;

use crate::{grammar::Capability, prelude::*};

/// The user who sent a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// Stable identity, used for authorization
    pub id: String,
    /// Display name
    pub nick: String,
}

/// An inbound chat message
#[derive(Debug, Clone)]
pub struct Incoming {
    /// Message body, with any addressing prefix already removed
    pub text: String,
    /// Whether the message was directed at the bot
    pub addressed: bool,
    /// Who sent the message
    pub sender: Sender,
}

/// Outbound messaging for a single inbound message
#[async_trait]
pub trait Responder: fmt::Debug + Send + Sync + 'static {
    /// Send a message to the channel the inbound message arrived in
    async fn reply(&self, text: &str) -> Result;

    /// Send a private message to the sender of the inbound message
    async fn tell(&self, text: &str) -> Result;
}

/// Decides which senders hold which capabilities
pub trait Authorizer: fmt::Debug + Send + Sync {
    /// Returns true if `sender` holds `cap`
    fn permits(&self, sender: &Sender, cap: Capability) -> bool;
}

/// Grants every capability to everyone
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn permits(&self, _: &Sender, _: Capability) -> bool { true }
}

/// Grants [`Capability::CommandEdit`] to a fixed set of user ids
#[derive(Debug, Clone, Default)]
pub struct EditorList(HashSet<String>);

impl EditorList {
    /// Construct a list from the given user ids
    pub fn new(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(ids.into_iter().map(Into::into).collect())
    }

    /// Returns true if nobody can edit commands
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl Authorizer for EditorList {
    fn permits(&self, sender: &Sender, cap: Capability) -> bool {
        match cap {
            Capability::CommandEdit => self.0.contains(&sender.id),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Authorizer, Capability, EditorList, Sender};

    #[test]
    fn test_editor_list() {
        let editors = EditorList::new(["1", "2"]);
        let sender = |id: &str| Sender {
            id: id.into(),
            nick: "n".into(),
        };

        assert!(editors.permits(&sender("1"), Capability::CommandEdit));
        assert!(!editors.permits(&sender("3"), Capability::CommandEdit));
        assert!(EditorList::default().is_empty());
    }
}
