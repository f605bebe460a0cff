//! Session Registry
//!
//! Index from connection id to session, and from user / guild ids to the set
//! of sessions that must receive events scoped to them.
//!
//! All indexes sit behind a single `RwLock`: the router resolves targets and
//! enqueues under the read lock, while register, unregister and membership
//! changes take the write lock. A removal racing a publish therefore either
//! happens entirely before the fan-out or entirely after it.
//!
//! A handshake loads the user's guilds before its session is indexed, so a
//! membership change in between would find nothing to update. Handshakes hold
//! a [`MembershipWatch`] across the load; registration refuses the snapshot if
//! a change touched that user in the meantime.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::session::{Session, SessionId};
use crate::domain::{MembershipChange, Scope, Snowflake};
use crate::shared::error::GatewayError;

#[derive(Default)]
struct RegistryIndex {
    sessions: HashMap<SessionId, Arc<Session>>,
    by_user: HashMap<Snowflake, HashSet<SessionId>>,
    by_guild: HashMap<Snowflake, HashSet<SessionId>>,
    /// Guilds each session is subscribed to (its subscription scope)
    subscriptions: HashMap<SessionId, HashSet<Snowflake>>,
    /// Handshakes currently loading a ready snapshot
    watches: HashMap<u64, WatchEntry>,
    next_watch: u64,
}

struct WatchEntry {
    user_id: Snowflake,
    /// A join or leave for this user was applied
    changed: bool,
    /// Guilds dissolved since the watch started
    dissolved: HashSet<Snowflake>,
}

impl WatchEntry {
    fn is_stale(&self, guilds: &[Snowflake]) -> bool {
        self.changed || guilds.iter().any(|g| self.dissolved.contains(g))
    }
}

impl RegistryIndex {
    fn subscribe(&mut self, session_id: &str, guild_id: Snowflake) -> bool {
        let Some(guilds) = self.subscriptions.get_mut(session_id) else {
            return false;
        };
        if !guilds.insert(guild_id) {
            return false;
        }
        self.by_guild
            .entry(guild_id)
            .or_default()
            .insert(session_id.to_string());
        true
    }

    fn unsubscribe(&mut self, session_id: &str, guild_id: Snowflake) -> bool {
        let removed = self
            .subscriptions
            .get_mut(session_id)
            .map(|guilds| guilds.remove(&guild_id))
            .unwrap_or(false);
        if removed {
            if let Some(members) = self.by_guild.get_mut(&guild_id) {
                members.remove(session_id);
                if members.is_empty() {
                    self.by_guild.remove(&guild_id);
                }
            }
        }
        removed
    }

    fn user_session_ids(&self, user_id: Snowflake) -> Vec<SessionId> {
        self.by_user
            .get(&user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Result of removing a session from every index
#[derive(Debug)]
pub struct Unregistered {
    pub session: Arc<Session>,
    pub guilds: HashSet<Snowflake>,
    /// True when the user has no other open session
    pub last_for_user: bool,
}

/// Concurrent-safe session index shared by handshake, router and monitor
pub struct SessionRegistry {
    index: RwLock<RegistryIndex>,
    max_sessions_per_user: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions_per_user: usize) -> Self {
        Self {
            index: RwLock::new(RegistryIndex::default()),
            max_sessions_per_user: max_sessions_per_user.max(1),
        }
    }

    /// Start recording membership changes for `user_id`. Take this before
    /// loading the snapshot passed to [`register_watched`](Self::register_watched).
    pub fn watch_membership(&self, user_id: Snowflake) -> MembershipWatch<'_> {
        let mut index = self.index.write();
        let id = index.next_watch;
        index.next_watch += 1;
        index.watches.insert(
            id,
            WatchEntry {
                user_id,
                changed: false,
                dissolved: HashSet::new(),
            },
        );
        MembershipWatch { registry: self, id }
    }

    /// Admit a session under the user's current guild memberships and mark it
    /// identified. Index insertion and the state change happen under one
    /// write lock, so the router never sees a half-registered session.
    pub fn register(
        &self,
        session: Arc<Session>,
        guilds: Vec<Snowflake>,
    ) -> Result<(), GatewayError> {
        let mut index = self.index.write();
        self.insert(&mut index, session, guilds)
    }

    /// Like [`register`](Self::register), but fails with
    /// `MembershipChanged` if the user's memberships changed since `watch`
    /// was taken. The caller should reload the snapshot and try again.
    pub fn register_watched(
        &self,
        session: Arc<Session>,
        guilds: Vec<Snowflake>,
        watch: MembershipWatch<'_>,
    ) -> Result<(), GatewayError> {
        let mut index = self.index.write();
        let stale = index
            .watches
            .remove(&watch.id)
            .map(|entry| entry.is_stale(&guilds))
            .unwrap_or(false);
        if stale {
            return Err(GatewayError::MembershipChanged(session.user_id().as_i64()));
        }
        self.insert(&mut index, session, guilds)
    }

    fn insert(
        &self,
        index: &mut RegistryIndex,
        session: Arc<Session>,
        guilds: Vec<Snowflake>,
    ) -> Result<(), GatewayError> {
        let session_id = session.id().to_string();
        let user_id = session.user_id();

        if index.sessions.contains_key(&session_id) {
            return Err(GatewayError::DuplicateSession(session_id));
        }
        let open = index.by_user.get(&user_id).map(|s| s.len()).unwrap_or(0);
        if open >= self.max_sessions_per_user {
            return Err(GatewayError::SessionLimitReached(user_id.as_i64()));
        }
        if !session.mark_identified() {
            return Err(GatewayError::SessionClosed(session_id));
        }

        index.sessions.insert(session_id.clone(), session);
        index
            .by_user
            .entry(user_id)
            .or_default()
            .insert(session_id.clone());
        index
            .subscriptions
            .insert(session_id.clone(), HashSet::new());
        for guild_id in &guilds {
            index.subscribe(&session_id, *guild_id);
        }

        tracing::info!(
            user_id = %user_id,
            session_id = %session_id,
            guilds = guilds.len(),
            "Session registered"
        );
        Ok(())
    }

    /// Remove a session from every index. Idempotent.
    pub fn unregister(&self, session_id: &str) -> Option<Unregistered> {
        let mut index = self.index.write();
        let session = index.sessions.remove(session_id)?;
        let user_id = session.user_id();

        let guilds = index.subscriptions.remove(session_id).unwrap_or_default();
        for guild_id in &guilds {
            if let Some(members) = index.by_guild.get_mut(guild_id) {
                members.remove(session_id);
                if members.is_empty() {
                    index.by_guild.remove(guild_id);
                }
            }
        }

        let mut last_for_user = true;
        if let Some(ids) = index.by_user.get_mut(&user_id) {
            ids.remove(session_id);
            last_for_user = ids.is_empty();
            if last_for_user {
                index.by_user.remove(&user_id);
            }
        }

        tracing::info!(
            user_id = %user_id,
            session_id = %session_id,
            "Session unregistered"
        );

        Some(Unregistered {
            session,
            guilds,
            last_for_user,
        })
    }

    /// Call `f` for every session the scope resolves to, holding the read
    /// lock for the whole fan-out. `f` must not block or touch the registry.
    pub fn for_each_target<F>(&self, scope: &Scope, mut f: F)
    where
        F: FnMut(&Arc<Session>),
    {
        let index = self.index.read();
        let mut visit = |ids: &HashSet<SessionId>| {
            for id in ids {
                if let Some(session) = index.sessions.get(id) {
                    f(session);
                }
            }
        };

        match scope {
            Scope::Guild(guild_id) => {
                if let Some(ids) = index.by_guild.get(guild_id) {
                    visit(ids);
                }
            }
            Scope::User(user_id) => {
                if let Some(ids) = index.by_user.get(user_id) {
                    visit(ids);
                }
            }
            Scope::ChannelRecipients { user_ids, .. } => {
                // Each session belongs to exactly one user, so distinct users
                // yield disjoint session sets.
                let mut seen = HashSet::new();
                for user_id in user_ids {
                    if !seen.insert(*user_id) {
                        continue;
                    }
                    if let Some(ids) = index.by_user.get(user_id) {
                        visit(ids);
                    }
                }
            }
        }
    }

    /// Apply a membership change. Returns the number of sessions affected.
    pub fn apply_membership(&self, change: &MembershipChange) -> usize {
        let mut index = self.index.write();
        for watch in index.watches.values_mut() {
            match *change {
                MembershipChange::Join { user_id, .. } | MembershipChange::Leave { user_id, .. } => {
                    if watch.user_id == user_id {
                        watch.changed = true;
                    }
                }
                MembershipChange::Dissolve { guild_id } => {
                    watch.dissolved.insert(guild_id);
                }
            }
        }
        let affected = match *change {
            MembershipChange::Join { guild_id, user_id } => index
                .user_session_ids(user_id)
                .iter()
                .filter(|id| index.subscribe(id, guild_id))
                .count(),
            MembershipChange::Leave { guild_id, user_id } => index
                .user_session_ids(user_id)
                .iter()
                .filter(|id| index.unsubscribe(id, guild_id))
                .count(),
            MembershipChange::Dissolve { guild_id } => {
                let ids = index.by_guild.remove(&guild_id).unwrap_or_default();
                for id in &ids {
                    if let Some(guilds) = index.subscriptions.get_mut(id) {
                        guilds.remove(&guild_id);
                    }
                }
                ids.len()
            }
        };

        tracing::debug!(change = ?change, affected, "Membership index updated");
        affected
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.index.read().sessions.get(session_id).cloned()
    }

    /// Snapshot of every registered session
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.index.read().sessions.values().cloned().collect()
    }

    pub fn user_sessions(&self, user_id: Snowflake) -> Vec<Arc<Session>> {
        let index = self.index.read();
        index
            .by_user
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| index.sessions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Guilds a session is currently subscribed to
    pub fn guilds_of(&self, session_id: &str) -> Vec<Snowflake> {
        self.index
            .read()
            .subscriptions
            .get(session_id)
            .map(|guilds| guilds.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, session_id: &str, guild_id: Snowflake) -> bool {
        self.index
            .read()
            .subscriptions
            .get(session_id)
            .map(|guilds| guilds.contains(&guild_id))
            .unwrap_or(false)
    }

    pub fn is_user_online(&self, user_id: Snowflake) -> bool {
        self.index.read().by_user.contains_key(&user_id)
    }

    pub fn session_count(&self) -> usize {
        self.index.read().sessions.len()
    }

    pub fn guild_session_count(&self, guild_id: Snowflake) -> usize {
        self.index
            .read()
            .by_guild
            .get(&guild_id)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }
}

/// Outstanding membership watch; see [`SessionRegistry::watch_membership`]
pub struct MembershipWatch<'a> {
    registry: &'a SessionRegistry,
    id: u64,
}

impl Drop for MembershipWatch<'_> {
    fn drop(&mut self) {
        self.registry.index.write().watches.remove(&self.id);
    }
}
