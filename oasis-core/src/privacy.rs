//! Per-message authorization and redaction

use std::fmt;
use std::str::FromStr;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::model::{FeedId, GatedMessage, Message, RedactionReason};

/// Who is looking at the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    /// No identity, e.g. a visitor of the public web deployment
    Anonymous,
    Identity(FeedId),
}

impl Viewer {
    pub fn feed(&self) -> Option<&FeedId> {
        match self {
            Viewer::Anonymous => None,
            Viewer::Identity(feed) => Some(feed),
        }
    }
}

/// Deployment flavour deciding how public messages are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// The viewer runs their own peer; public messages are shown as-is
    #[default]
    Peer,
    /// Served to the open web; public messages need the author's hosting consent
    PublicWeb,
}

impl FromStr for GateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "peer" => Ok(GateMode::Peer),
            "public_web" | "public-web" | "publicweb" => Ok(GateMode::PublicWeb),
            other => Err(format!("unknown privacy mode: {}", other)),
        }
    }
}

impl fmt::Display for GateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateMode::Peer => f.write_str("peer"),
            GateMode::PublicWeb => f.write_str("public_web"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PrivacyGate {
    mode: GateMode,
}

impl PrivacyGate {
    pub fn new(mode: GateMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> GateMode {
        self.mode
    }

    /// Whether gating needs the author's `publicWebHosting` setting
    pub fn needs_hosting_consent(&self, message: &Message) -> bool {
        self.mode == GateMode::PublicWeb && !message.is_private()
    }

    /// Decide what `viewer` gets to see of `message`
    ///
    /// `hosting_consent` is only consulted for public messages in
    /// [`GateMode::PublicWeb`].
    pub fn gate(&self, message: Message, viewer: &Viewer, hosting_consent: bool) -> GatedMessage {
        match self.redaction_reason(&message, viewer, hosting_consent) {
            None => GatedMessage::Visible(message),
            Some(reason) => {
                counter!("oasis_redactions_total", "reason" => reason_label(reason)).increment(1);
                trace!(key = %message.key, ?reason, "Redacted message");
                GatedMessage::redact(&message, reason)
            }
        }
    }

    /// Gate an entry that may already have been gated; redacted entries pass through unchanged
    pub fn regate(&self, entry: GatedMessage, viewer: &Viewer, hosting_consent: bool) -> GatedMessage {
        match entry {
            GatedMessage::Visible(message) => self.gate(message, viewer, hosting_consent),
            redacted @ GatedMessage::Redacted(_) => redacted,
        }
    }

    fn redaction_reason(
        &self,
        message: &Message,
        viewer: &Viewer,
        hosting_consent: bool,
    ) -> Option<RedactionReason> {
        if message.is_private() {
            let authorized = viewer.feed().is_some_and(|me| {
                me == message.author() || message.recipients().contains(me)
            });
            return (!authorized).then_some(RedactionReason::Private);
        }

        match self.mode {
            GateMode::Peer => None,
            GateMode::PublicWeb if hosting_consent => None,
            GateMode::PublicWeb => Some(RedactionReason::NotHosted),
        }
    }
}

fn reason_label(reason: RedactionReason) -> &'static str {
    match reason {
        RedactionReason::Private => "private",
        RedactionReason::NotHosted => "not_hosted",
    }
}
