use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Staff,
    Captain,
    Player,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UserRole::Staff => "staff",
            UserRole::Captain => "captain",
            UserRole::Player => "player",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staff" => Ok(UserRole::Staff),
            "captain" => Ok(UserRole::Captain),
            "player" => Ok(UserRole::Player),
            _ => Err(anyhow::anyhow!("Unknown role: {s}")),
        }
    }
}

/// Read-only view of a user account joined with its player profile.
/// Accounts and rosters are owned by the league side of the system.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    /// From `players.is_captain`; false when the account has no player profile.
    pub is_captain: bool,
}

impl UserAccount {
    pub fn is_captain_or_staff(&self) -> bool {
        self.is_staff || self.is_captain
    }

    pub fn has_email(&self) -> bool {
        !self.email.trim().is_empty()
    }

    pub fn full_name(&self) -> Option<String> {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}

/// Roster record. A player may exist without a linked login.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Player {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub is_captain: bool,
}

impl Player {
    pub fn full_name(&self) -> Option<String> {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}

/// Who a dispatch is addressed to: a login directly, or a roster entry
/// that is followed to its linked login (and skipped when it has none).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipient {
    User { id: Uuid },
    Player(Player),
}

impl Recipient {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Recipient::User { id } => Some(*id),
            Recipient::Player(p) => p.user_id,
        }
    }
}

impl From<Uuid> for Recipient {
    fn from(id: Uuid) -> Self {
        Recipient::User { id }
    }
}

impl From<Player> for Recipient {
    fn from(p: Player) -> Self {
        Recipient::Player(p)
    }
}
