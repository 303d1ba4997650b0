use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of points-scoring session. Sprints run before the race of the same round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum SessionKind {
    Sprint,
    #[default]
    Race,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Sprint => f.write_str("sprint"),
            SessionKind::Race => f.write_str("race"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct EventKey {
    pub year: u16,
    pub round: u8,
    pub session: SessionKind,
}

impl EventKey {
    pub fn round_key(&self) -> RoundKey {
        RoundKey {
            year: self.year,
            round: self.round,
        }
    }
}

/// A race weekend; constructor totals are summed per weekend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct RoundKey {
    pub year: u16,
    pub round: u8,
}

/// Chronologically ordered series of observations.
#[derive(Debug, Deserialize, Serialize)]
pub struct History<K: Ord, T>(BTreeMap<K, T>);

impl<K: Ord, T> History<K, T> {
    pub fn new() -> History<K, T> {
        History(BTreeMap::new())
    }

    pub fn insert(&mut self, key: K, value: T) -> Option<T> {
        self.0.insert(key, value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut T> {
        self.0.get_mut(key)
    }

    pub fn latest(&self) -> Option<&T> {
        self.0.values().next_back()
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        self.0.values()
    }

    /// The last `n` observations, most recent first.
    pub fn trailing(&self, n: usize) -> impl Iterator<Item = &T> + '_ {
        self.0.values().rev().take(n)
    }

    /// The last `n` observations strictly before `key`, most recent first.
    pub fn trailing_before<'a>(&'a self, key: &K, n: usize) -> impl Iterator<Item = &'a T> + 'a {
        self.0.range(..key).rev().take(n).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<K: Ord, T> Default for History<K, T> {
    fn default() -> History<K, T> {
        History::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{EventKey, History, SessionKind};
    use maplit::btreemap;

    fn key(round: u8, session: SessionKind) -> EventKey {
        EventKey {
            year: 2024,
            round,
            session,
        }
    }

    #[test]
    fn test_sprint_orders_before_race() {
        assert!(key(5, SessionKind::Sprint) < key(5, SessionKind::Race));
        assert!(key(5, SessionKind::Race) < key(6, SessionKind::Sprint));
        assert!(
            EventKey {
                year: 2023,
                round: 22,
                session: SessionKind::Race
            } < key(1, SessionKind::Sprint)
        );
    }

    #[test]
    fn test_trailing() {
        let history = History(btreemap! {
            1 => "a",
            3 => "b",
            5 => "c",
            7 => "d",
        });
        assert_eq!(history.latest(), Some(&"d"));
        assert_eq!(history.trailing(2).collect::<Vec<_>>(), vec![&"d", &"c"]);
        assert_eq!(history.trailing(10).count(), 4);
        assert_eq!(history.trailing_before(&5, 2).collect::<Vec<_>>(), vec![&"b", &"a"]);
        assert_eq!(history.trailing_before(&6, 1).collect::<Vec<_>>(), vec![&"c"]);
        assert_eq!(history.trailing_before(&1, 5).count(), 0);
    }

    #[test]
    fn test_insert_replaces() {
        let mut history = History::new();
        assert_eq!(history.insert(key(1, SessionKind::Race), 25.0), None);
        assert_eq!(history.insert(key(1, SessionKind::Race), 18.0), Some(25.0));
        assert_eq!(history.len(), 1);
        *history.get_mut(&key(1, SessionKind::Race)).unwrap() += 1.0;
        assert_eq!(history.latest(), Some(&19.0));
    }
}
