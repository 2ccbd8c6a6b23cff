// pool.rs
use crate::profile::{compatible, Gender, Preference, UserId};

/// Incremented per `find_match`, so a fallback timer armed for an earlier
/// search cannot fire into a later one.
pub type SearchTicket = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Searcher {
    pub user: UserId,
    pub gender: Gender,
    pub preference: Preference,
    pub ticket: SearchTicket,
}

impl Searcher {
    pub fn accepts(&self, other: &Searcher) -> bool {
        self.user != other.user
            && compatible(self.gender, self.preference, other.gender, other.preference)
    }
}

/// Users currently looking for a partner, oldest first.
#[derive(Debug, Default)]
pub struct WaitingPool {
    waiting: Vec<Searcher>,
}

impl WaitingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the searcher, replacing an older entry for the same user.
    pub fn join(&mut self, searcher: Searcher) {
        self.remove(&searcher.user);
        self.waiting.push(searcher);
    }

    pub fn remove(&mut self, user: &str) -> Option<Searcher> {
        let idx = self.waiting.iter().position(|s| s.user == user)?;
        Some(self.waiting.remove(idx))
    }

    /// Removes and returns the longest-waiting member compatible with `searcher`.
    pub fn take_compatible(&mut self, searcher: &Searcher) -> Option<Searcher> {
        let idx = self.waiting.iter().position(|s| searcher.accepts(s))?;
        Some(self.waiting.remove(idx))
    }

    pub fn ticket_of(&self, user: &str) -> Option<SearchTicket> {
        self.waiting.iter().find(|s| s.user == user).map(|s| s.ticket)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }
}
