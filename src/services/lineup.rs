use std::collections::HashSet;

use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::user::Player;
use crate::services::{
    catalog::EventKey,
    context::TemplateContext,
    dispatch::{DispatchRequest, Dispatcher},
};

pub const LINEUP_TITLE: &str = "You're in the Royals Lineup!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SlotCode {
    S1,
    S2,
    S3,
    D1,
    D2,
    D3,
}

impl SlotCode {
    pub fn label(self) -> &'static str {
        match self {
            SlotCode::S1 => "Singles 1",
            SlotCode::S2 => "Singles 2",
            SlotCode::S3 => "Singles 3",
            SlotCode::D1 => "Doubles 1",
            SlotCode::D2 => "Doubles 2",
            SlotCode::D3 => "Doubles 3",
        }
    }

    pub fn is_doubles(self) -> bool {
        matches!(self, SlotCode::D1 | SlotCode::D2 | SlotCode::D3)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureSummary {
    pub id: Uuid,
    #[serde(default)]
    pub season_id: Option<Uuid>,
    #[serde(default)]
    pub opponent: String,
    #[serde(default)]
    pub home: bool,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineupSlot {
    pub slot: SlotCode,
    #[serde(default)]
    pub player1: Option<Player>,
    #[serde(default)]
    pub player2: Option<Player>,
}

/// A published lineup. `players` narrows the recipients; when empty every
/// linked player in the slots is notified.
#[derive(Debug, Clone, Deserialize)]
pub struct LineupPublished {
    pub fixture: FixtureSummary,
    #[serde(default)]
    pub slots: Vec<LineupSlot>,
    #[serde(default)]
    pub players: Vec<Player>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineupOutcome {
    pub recipients: usize,
    pub attempts: usize,
    pub notification_id: Option<Uuid>,
}

impl FixtureSummary {
    fn home_away(&self) -> &'static str {
        if self.home {
            "Home"
        } else {
            "Away"
        }
    }

    fn opponent(&self) -> &str {
        match self.opponent.trim() {
            "" => "Opponent",
            o => o,
        }
    }

    fn match_date(&self) -> Option<String> {
        self.date
            .map(|d| d.with_timezone(&Local).format("%a %b %d").to_string())
    }

    pub fn path(&self) -> String {
        format!("/fixtures/{}", self.id)
    }
}

/// Linked players, each once, from `players` or else from the slots.
fn recipients(lineup: &LineupPublished) -> Vec<Player> {
    let mut seen = HashSet::new();
    let candidates: Vec<&Player> = if lineup.players.is_empty() {
        lineup
            .slots
            .iter()
            .flat_map(|s| [s.player1.as_ref(), s.player2.as_ref()])
            .flatten()
            .collect()
    } else {
        lineup.players.iter().collect()
    };
    candidates
        .into_iter()
        .filter(|p| p.user_id.is_some() && seen.insert(p.id))
        .cloned()
        .collect()
}

/// Slot extras for every linked player, keyed by user id.
fn slot_extras(slots: &[LineupSlot]) -> Vec<(Uuid, TemplateContext)> {
    let mut out = Vec::new();
    for s in slots {
        let pairs = [
            (s.player1.as_ref(), s.player2.as_ref()),
            (s.player2.as_ref(), s.player1.as_ref()),
        ];
        for (me, partner) in pairs {
            let Some(me) = me else { continue };
            let Some(user_id) = me.user_id else { continue };

            let mut extras = TemplateContext::new();
            extras.insert("slot_label".into(), json!(s.slot.label()));
            extras.insert("slot_name".into(), json!(s.slot.label()));
            extras.insert("is_doubles".into(), json!(s.slot.is_doubles()));
            let first = me.first_name.trim();
            if !first.is_empty() {
                extras.insert("player_first_name".into(), json!(first));
            }
            if let (true, Some(p)) = (s.slot.is_doubles(), partner) {
                extras.insert("partner_first_name".into(), json!(p.first_name));
                extras.insert("partner_last_name".into(), json!(p.last_name));
                extras.insert("partner_full_name".into(), json!(p.full_name()));
            }
            out.push((user_id, extras));
        }
    }
    out
}

/// Notifies every linked player in a freshly published lineup. Returns an
/// empty outcome without creating a notification when nobody is linked.
pub async fn lineup_published(
    dispatcher: &Dispatcher,
    lineup: LineupPublished,
) -> anyhow::Result<LineupOutcome> {
    let players = recipients(&lineup);
    if players.is_empty() {
        tracing::info!(fixture = %lineup.fixture.id, "lineup published with no eligible recipients");
        return Ok(LineupOutcome::default());
    }

    let fixture = &lineup.fixture;
    let body = match fixture.match_date() {
        Some(d) => format!("{} vs {} on {}", fixture.home_away(), fixture.opponent(), d),
        None => format!("{} vs {}", fixture.home_away(), fixture.opponent()),
    };

    let mut req = DispatchRequest::new(EventKey::LineupPublishedForPlayer)
        .title(LINEUP_TITLE)
        .body(body)
        .url(fixture.path());
    req.season_id = fixture.season_id;
    req.fixture_id = Some(fixture.id);
    req.context.insert("fixture_id".into(), json!(fixture.id));
    req.context.insert("opponent".into(), json!(fixture.opponent()));
    req.context.insert("home_away".into(), json!(fixture.home_away()));
    req.context.insert(
        "fixture_url".into(),
        Value::String(dispatcher.site().absolute_url(&fixture.path())),
    );
    if let Some(d) = fixture.match_date() {
        req.context.insert("match_date".into(), json!(d));
    }
    req.per_recipient.extend(slot_extras(&lineup.slots));
    req.recipients = players.into_iter().map(Into::into).collect();

    let outcome = dispatcher.dispatch(req).await?;
    tracing::info!(
        fixture = %fixture.id,
        notification = %outcome.notification.id,
        recipients = outcome.recipients,
        attempts = outcome.attempts,
        "lineup published"
    );
    Ok(LineupOutcome {
        recipients: outcome.recipients,
        attempts: outcome.attempts,
        notification_id: Some(outcome.notification.id),
    })
}
