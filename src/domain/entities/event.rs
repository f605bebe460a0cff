//! Gateway event kinds.
//!
//! Every dispatch name the gateway can carry is a variant here, so adding an
//! event is a compile-checked change on both the server router and the client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::shared::error::GatewayError;

/// Dispatch event names (`t` field of an op 0 frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Ready,

    // Message events
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    MessageDeleteBulk,
    MessageReactionAdd,
    MessageReactionRemove,

    // Channel events
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    ChannelPinsUpdate,
    ChannelRecipientAdd,
    ChannelRecipientRemove,

    // Guild events
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    GuildBanAdd,
    GuildBanRemove,
    GuildRoleCreate,
    GuildRoleUpdate,
    GuildRoleDelete,

    // Member events
    GuildMemberAdd,
    GuildMemberUpdate,
    GuildMemberRemove,

    // Invite events
    InviteCreate,
    InviteDelete,

    // User-level events
    UserUpdate,
    RelationshipAdd,
    RelationshipRemove,

    // Presence & voice
    PresenceUpdate,
    TypingStart,
    VoiceStateUpdate,
}

impl EventKind {
    pub const ALL: [EventKind; 32] = [
        EventKind::Ready,
        EventKind::MessageCreate,
        EventKind::MessageUpdate,
        EventKind::MessageDelete,
        EventKind::MessageDeleteBulk,
        EventKind::MessageReactionAdd,
        EventKind::MessageReactionRemove,
        EventKind::ChannelCreate,
        EventKind::ChannelUpdate,
        EventKind::ChannelDelete,
        EventKind::ChannelPinsUpdate,
        EventKind::ChannelRecipientAdd,
        EventKind::ChannelRecipientRemove,
        EventKind::GuildCreate,
        EventKind::GuildUpdate,
        EventKind::GuildDelete,
        EventKind::GuildBanAdd,
        EventKind::GuildBanRemove,
        EventKind::GuildRoleCreate,
        EventKind::GuildRoleUpdate,
        EventKind::GuildRoleDelete,
        EventKind::GuildMemberAdd,
        EventKind::GuildMemberUpdate,
        EventKind::GuildMemberRemove,
        EventKind::InviteCreate,
        EventKind::InviteDelete,
        EventKind::UserUpdate,
        EventKind::RelationshipAdd,
        EventKind::RelationshipRemove,
        EventKind::PresenceUpdate,
        EventKind::TypingStart,
        EventKind::VoiceStateUpdate,
    ];

    /// Get the event name for dispatch
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Ready => "READY",
            EventKind::MessageCreate => "MESSAGE_CREATE",
            EventKind::MessageUpdate => "MESSAGE_UPDATE",
            EventKind::MessageDelete => "MESSAGE_DELETE",
            EventKind::MessageDeleteBulk => "MESSAGE_DELETE_BULK",
            EventKind::MessageReactionAdd => "MESSAGE_REACTION_ADD",
            EventKind::MessageReactionRemove => "MESSAGE_REACTION_REMOVE",
            EventKind::ChannelCreate => "CHANNEL_CREATE",
            EventKind::ChannelUpdate => "CHANNEL_UPDATE",
            EventKind::ChannelDelete => "CHANNEL_DELETE",
            EventKind::ChannelPinsUpdate => "CHANNEL_PINS_UPDATE",
            EventKind::ChannelRecipientAdd => "CHANNEL_RECIPIENT_ADD",
            EventKind::ChannelRecipientRemove => "CHANNEL_RECIPIENT_REMOVE",
            EventKind::GuildCreate => "GUILD_CREATE",
            EventKind::GuildUpdate => "GUILD_UPDATE",
            EventKind::GuildDelete => "GUILD_DELETE",
            EventKind::GuildBanAdd => "GUILD_BAN_ADD",
            EventKind::GuildBanRemove => "GUILD_BAN_REMOVE",
            EventKind::GuildRoleCreate => "GUILD_ROLE_CREATE",
            EventKind::GuildRoleUpdate => "GUILD_ROLE_UPDATE",
            EventKind::GuildRoleDelete => "GUILD_ROLE_DELETE",
            EventKind::GuildMemberAdd => "GUILD_MEMBER_ADD",
            EventKind::GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
            EventKind::GuildMemberRemove => "GUILD_MEMBER_REMOVE",
            EventKind::InviteCreate => "INVITE_CREATE",
            EventKind::InviteDelete => "INVITE_DELETE",
            EventKind::UserUpdate => "USER_UPDATE",
            EventKind::RelationshipAdd => "RELATIONSHIP_ADD",
            EventKind::RelationshipRemove => "RELATIONSHIP_REMOVE",
            EventKind::PresenceUpdate => "PRESENCE_UPDATE",
            EventKind::TypingStart => "TYPING_START",
            EventKind::VoiceStateUpdate => "VOICE_STATE_UPDATE",
        }
    }

    /// Whether collaborators may publish this kind. `READY` is produced by the
    /// handshake only.
    pub fn is_publishable(&self) -> bool {
        !matches!(self, EventKind::Ready)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| GatewayError::UnknownEvent(s.to_string()))
    }
}
