//! Event envelopes handed to the gateway by mutation collaborators.
//!
//! An envelope is produced once per committed mutation and is never persisted.
//! Its scope is exactly one of guild, user or channel recipients.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

use super::event::EventKind;
use crate::domain::value_objects::Snowflake;
use crate::shared::error::GatewayError;

/// Targeting rule attached to an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every session currently subscribed to the guild
    Guild(Snowflake),
    /// Every session of one user (all devices)
    User(Snowflake),
    /// Sessions of the listed users; used by DM and group DM channels which
    /// have no guild membership index
    ChannelRecipients {
        channel_id: Snowflake,
        user_ids: Vec<Snowflake>,
    },
}

impl Scope {
    /// Label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Scope::Guild(_) => "guild",
            Scope::User(_) => "user",
            Scope::ChannelRecipients { .. } => "channel_recipients",
        }
    }
}

/// Index change implied by a membership-changing event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    Join { guild_id: Snowflake, user_id: Snowflake },
    Leave { guild_id: Snowflake, user_id: Snowflake },
    Dissolve { guild_id: Snowflake },
}

/// Internal unit handed from a collaborator to the router
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub kind: EventKind,
    pub scope: Scope,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(kind: EventKind, scope: Scope, payload: Value) -> Self {
        Self {
            kind,
            scope,
            payload,
        }
    }

    pub fn guild(kind: EventKind, guild_id: Snowflake, payload: Value) -> Self {
        Self::new(kind, Scope::Guild(guild_id), payload)
    }

    pub fn user(kind: EventKind, user_id: Snowflake, payload: Value) -> Self {
        Self::new(kind, Scope::User(user_id), payload)
    }

    pub fn channel_recipients(
        kind: EventKind,
        channel_id: Snowflake,
        user_ids: Vec<Snowflake>,
        payload: Value,
    ) -> Self {
        Self::new(
            kind,
            Scope::ChannelRecipients {
                channel_id,
                user_ids,
            },
            payload,
        )
    }

    /// Derive the registry index update this event implies, if any.
    ///
    /// Guild ids come from the guild scope or from the payload (`guild_id`, or
    /// `id` for guild objects); user ids from `user.id` / `user_id` or the user
    /// scope.
    pub fn membership_change(&self) -> Option<MembershipChange> {
        match (self.kind, &self.scope) {
            (EventKind::GuildCreate, Scope::User(user_id)) => Some(MembershipChange::Join {
                guild_id: self.payload_snowflake("id")?,
                user_id: *user_id,
            }),
            (EventKind::GuildMemberAdd, _) => Some(MembershipChange::Join {
                guild_id: self.guild_id()?,
                user_id: self.subject_user_id()?,
            }),
            (EventKind::GuildMemberRemove | EventKind::GuildBanAdd, _) => {
                Some(MembershipChange::Leave {
                    guild_id: self.guild_id()?,
                    user_id: self.subject_user_id()?,
                })
            }
            (EventKind::GuildDelete, Scope::Guild(guild_id)) => Some(MembershipChange::Dissolve {
                guild_id: *guild_id,
            }),
            (EventKind::GuildDelete, Scope::User(user_id)) => Some(MembershipChange::Leave {
                guild_id: self.payload_snowflake("id")?,
                user_id: *user_id,
            }),
            _ => None,
        }
    }

    fn guild_id(&self) -> Option<Snowflake> {
        match &self.scope {
            Scope::Guild(guild_id) => Some(*guild_id),
            _ => self.payload_snowflake("guild_id"),
        }
    }

    fn subject_user_id(&self) -> Option<Snowflake> {
        self.payload
            .get("user")
            .and_then(|user| user.get("id"))
            .and_then(Snowflake::from_value)
            .or_else(|| self.payload_snowflake("user_id"))
            .or(match &self.scope {
                Scope::User(user_id) => Some(*user_id),
                _ => None,
            })
    }

    fn payload_snowflake(&self, field: &str) -> Option<Snowflake> {
        self.payload.get(field).and_then(Snowflake::from_value)
    }
}

/// Collaborator contract: `{type, guild_id?, channel_id?, user_id?, data}`.
///
/// Exactly one scope field must be set. A channel scope also carries the
/// explicit recipient list because the gateway never reads channel state.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, alias = "guildId")]
    pub guild_id: Option<Snowflake>,
    #[serde(default, alias = "channelId")]
    pub channel_id: Option<Snowflake>,
    #[serde(default, alias = "userId")]
    pub user_id: Option<Snowflake>,
    #[serde(default, alias = "recipientIds")]
    pub recipient_ids: Vec<Snowflake>,
    #[serde(default)]
    pub data: Value,
}

impl TryFrom<PublishRequest> for EventEnvelope {
    type Error = GatewayError;

    fn try_from(request: PublishRequest) -> Result<Self, Self::Error> {
        let kind: EventKind = request.event_type.parse()?;
        if !kind.is_publishable() {
            return Err(GatewayError::InvalidEnvelope(format!(
                "{} cannot be published",
                kind
            )));
        }

        if request.channel_id.is_none() && !request.recipient_ids.is_empty() {
            return Err(GatewayError::InvalidEnvelope(
                "recipient_ids is only valid with channel_id".into(),
            ));
        }

        let scope = match (request.guild_id, request.user_id, request.channel_id) {
            (Some(guild_id), None, None) => Scope::Guild(guild_id),
            (None, Some(user_id), None) => Scope::User(user_id),
            (None, None, Some(channel_id)) => {
                if request.recipient_ids.is_empty() {
                    return Err(GatewayError::InvalidEnvelope(
                        "channel scope requires recipient_ids".into(),
                    ));
                }
                let mut seen = HashSet::new();
                let user_ids = request
                    .recipient_ids
                    .into_iter()
                    .filter(|id| seen.insert(*id))
                    .collect();
                Scope::ChannelRecipients {
                    channel_id,
                    user_ids,
                }
            }
            (None, None, None) => {
                return Err(GatewayError::InvalidEnvelope(
                    "exactly one of guild_id, user_id, channel_id is required".into(),
                ))
            }
            _ => {
                return Err(GatewayError::InvalidEnvelope(
                    "only one of guild_id, user_id, channel_id may be set".into(),
                ))
            }
        };

        Ok(EventEnvelope::new(kind, scope, request.data))
    }
}
