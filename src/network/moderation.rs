//! Chat Moderation Hook
//!
//! Optional collaborator consulted before a chat message is relayed.
//! The router acts on the returned [`Verdict`]; the hook itself never touches
//! connections or the registry.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::registry::ClientId;

/// Decision on one chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Relay as-is.
    Allow,
    /// Relay, but record the reason.
    Warn(String),
    /// Do not relay.
    Block(String),
    /// Do not relay and drop the sender.
    Disconnect(String),
}

/// Reviews chat text before relay.
pub trait Moderator: Send + Sync {
    /// Decide what happens to `text` sent by `sender`.
    fn review(&self, sender: &ClientId, text: &str) -> Verdict;

    /// Forget anything kept about a client that has disconnected.
    fn forget(&self, _client: &ClientId) {}
}

/// Lets everything through.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Moderator for AllowAll {
    fn review(&self, _sender: &ClientId, _text: &str) -> Verdict {
        Verdict::Allow
    }
}

/// Blocks messages containing listed words or phrases; repeat offenders are
/// disconnected.
///
/// Matching is case-insensitive on whole words. A multi-word entry such as
/// `"buy now"` matches only when its words appear consecutively. Each blocked
/// message is a strike; reaching `strike_limit` strikes turns the verdict into
/// [`Verdict::Disconnect`]. A limit of zero never disconnects.
#[derive(Debug)]
pub struct KeywordModerator {
    /// Each entry split into lowercase words.
    blocked: Vec<Vec<String>>,
    strike_limit: u32,
    strikes: Mutex<BTreeMap<ClientId, u32>>,
}

/// Lowercase alphanumeric words of `text`.
fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

impl KeywordModerator {
    /// Build from a word or phrase list.
    pub fn new<I, S>(entries: I, strike_limit: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blocked = entries
            .into_iter()
            .map(|entry| words(entry.as_ref()))
            .filter(|phrase| !phrase.is_empty())
            .collect();

        Self {
            blocked,
            strike_limit,
            strikes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Whether no usable entries are configured.
    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }

    fn find_blocked(&self, text: &str) -> Option<String> {
        let tokens = words(text);
        self.blocked
            .iter()
            .find(|phrase| tokens.windows(phrase.len()).any(|window| window == phrase.as_slice()))
            .map(|phrase| phrase.join(" "))
    }

    /// Current strike count for a client.
    #[cfg(test)]
    fn strikes(&self, client: &ClientId) -> u32 {
        self.strikes
            .lock()
            .map(|s| s.get(client).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl Moderator for KeywordModerator {
    fn review(&self, sender: &ClientId, text: &str) -> Verdict {
        let Some(word) = self.find_blocked(text) else {
            return Verdict::Allow;
        };

        let reason = format!("blocked word \"{word}\"");
        let strikes = match self.strikes.lock() {
            Ok(mut map) => {
                let count = map.entry(sender.clone()).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => return Verdict::Block(reason),
        };

        if self.strike_limit > 0 && strikes >= self.strike_limit {
            Verdict::Disconnect(format!("{reason}, {strikes} strikes"))
        } else {
            Verdict::Block(reason)
        }
    }

    fn forget(&self, client: &ClientId) {
        if let Ok(mut map) = self.strikes.lock() {
            map.remove(client);
        }
    }
}
