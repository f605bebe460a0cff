//! Presence Tracker
//!
//! Last presence reported by each online user. Entries are written on
//! identify and on op 3, and removed when the user's last session closes.

use dashmap::DashMap;

use super::messages::PresenceSnapshot;
use crate::domain::{Presence, Snowflake, Status};

#[derive(Default)]
pub struct PresenceTracker {
    presences: DashMap<Snowflake, Presence>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a presence. Returns true when the visible status or activities
    /// changed. A user with no entry is seen as offline.
    pub fn update(&self, user_id: Snowflake, presence: Presence) -> bool {
        match self.presences.insert(user_id, presence.clone()) {
            Some(previous) => {
                previous.status.visible() != presence.status.visible()
                    || previous.activities != presence.activities
            }
            None => presence.status.visible() != Status::Offline,
        }
    }

    pub fn remove(&self, user_id: Snowflake) -> Option<Presence> {
        self.presences.remove(&user_id).map(|(_, presence)| presence)
    }

    pub fn get(&self, user_id: Snowflake) -> Option<Presence> {
        self.presences.get(&user_id).map(|entry| entry.value().clone())
    }

    /// Presence entries for the given users, as seen by others. Offline and
    /// invisible users are left out.
    pub fn snapshot(&self, user_ids: &[Snowflake]) -> Vec<PresenceSnapshot> {
        user_ids
            .iter()
            .filter_map(|user_id| {
                let presence = self.presences.get(user_id)?;
                let status = presence.status.visible();
                if status == Status::Offline {
                    return None;
                }
                Some(PresenceSnapshot {
                    user_id: *user_id,
                    status,
                    activities: presence.activities.clone(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.presences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presences.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn presence(status: Status) -> Presence {
        Presence {
            status,
            ..Presence::default()
        }
    }

    #[test]
    fn test_update_reports_visible_changes() {
        let tracker = PresenceTracker::new();
        assert!(tracker.update(Snowflake(1), presence(Status::Online)));
        assert!(!tracker.update(Snowflake(1), presence(Status::Online)));
        assert!(tracker.update(Snowflake(1), presence(Status::Idle)));

        // invisible and offline look the same to everyone else
        tracker.update(Snowflake(2), presence(Status::Invisible));
        assert!(!tracker.update(Snowflake(2), presence(Status::Offline)));
    }

    #[test]
    fn test_first_hidden_presence_is_not_a_change() {
        let tracker = PresenceTracker::new();
        assert!(!tracker.update(Snowflake(1), presence(Status::Invisible)));
        assert_eq!(tracker.get(Snowflake(1)).map(|p| p.status), Some(Status::Invisible));

        // Coming out of invisibility is announced
        assert!(tracker.update(Snowflake(1), presence(Status::Online)));
    }

    #[test]
    fn test_snapshot_hides_invisible_users() {
        let tracker = PresenceTracker::new();
        tracker.update(
            Snowflake(1),
            Presence {
                status: Status::Dnd,
                activities: vec![json!({"name": "focus"})],
                ..Presence::default()
            },
        );
        tracker.update(Snowflake(2), presence(Status::Invisible));

        let snapshot = tracker.snapshot(&[Snowflake(1), Snowflake(2), Snowflake(3)]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].user_id, Snowflake(1));
        assert_eq!(snapshot[0].status, Status::Dnd);
        assert_eq!(snapshot[0].activities, vec![json!({"name": "focus"})]);
    }

    #[test]
    fn test_remove() {
        let tracker = PresenceTracker::new();
        tracker.update(Snowflake(1), presence(Status::Online));
        assert!(tracker.remove(Snowflake(1)).is_some());
        assert!(tracker.get(Snowflake(1)).is_none());
        assert!(tracker.is_empty());
    }
}
