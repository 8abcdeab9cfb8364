//! Dispatch action vocabulary.
//!
//! Every rule resolves to exactly one primary action (`send`, `queue` or
//! `destroy`), optionally combined with the `notifySender` modifier. The
//! combination is validated once when a rule document is parsed so that the
//! engine only ever switches over a closed set of values.

use std::fmt;
use std::str::FromStr;

use crate::utils::error::RuleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimaryAction {
    Send,
    Queue,
    Destroy,
}

impl PrimaryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PrimaryAction::Send => "send",
            PrimaryAction::Queue => "queue",
            PrimaryAction::Destroy => "destroy",
        }
    }
}

pub const NOTIFY_SENDER: &str = "notifySender";

/// A validated dispatch action: one primary action plus the optional
/// sender-notification modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionSet {
    primary: PrimaryAction,
    notify_sender: bool,
}

impl ActionSet {
    pub const SEND: ActionSet = ActionSet::new(PrimaryAction::Send);
    pub const QUEUE: ActionSet = ActionSet::new(PrimaryAction::Queue);
    pub const DESTROY: ActionSet = ActionSet::new(PrimaryAction::Destroy);

    pub const fn new(primary: PrimaryAction) -> Self {
        Self {
            primary,
            notify_sender: false,
        }
    }

    /// Adds the notification modifier without validation. Rule documents
    /// can never produce `send` + `notifySender`; the engine may, when it
    /// annotates a downgraded action.
    pub const fn with_notify(self) -> Self {
        Self {
            primary: self.primary,
            notify_sender: true,
        }
    }

    pub fn primary(self) -> PrimaryAction {
        self.primary
    }

    pub fn do_send(self) -> bool {
        self.primary == PrimaryAction::Send
    }

    pub fn do_queue(self) -> bool {
        self.primary == PrimaryAction::Queue
    }

    pub fn do_destroy(self) -> bool {
        self.primary == PrimaryAction::Destroy
    }

    pub fn notify_sender(self) -> bool {
        self.notify_sender
    }

    /// Parses a top-level default action, which must be a bare primary.
    pub fn parse_primary_only(s: &str) -> Result<Self, RuleError> {
        let action: ActionSet = s.parse()?;
        if action.notify_sender {
            return Err(RuleError::InvalidActionCombination(s.to_string()));
        }
        Ok(action)
    }
}

impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.primary.as_str())?;
        if self.notify_sender {
            write!(f, ",{NOTIFY_SENDER}")?;
        }
        Ok(())
    }
}

impl FromStr for ActionSet {
    type Err = RuleError;

    /// Accepts `|` and `,` as token separators, tokens are case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut primary: Option<PrimaryAction> = None;
        let mut notify_sender = false;

        for token in s.split(['|', ',']).map(str::trim) {
            let next = match token.to_ascii_lowercase().as_str() {
                "send" => PrimaryAction::Send,
                "queue" => PrimaryAction::Queue,
                "destroy" => PrimaryAction::Destroy,
                "notifysender" => {
                    if notify_sender {
                        return Err(RuleError::InvalidActionCombination(s.to_string()));
                    }
                    notify_sender = true;
                    continue;
                }
                _ => return Err(RuleError::UnknownAction(token.to_string())),
            };
            if primary.replace(next).is_some() {
                return Err(RuleError::InvalidActionCombination(s.to_string()));
            }
        }

        let primary = primary.ok_or_else(|| RuleError::InvalidActionCombination(s.to_string()))?;
        if primary == PrimaryAction::Send && notify_sender {
            return Err(RuleError::InvalidActionCombination(s.to_string()));
        }

        Ok(ActionSet {
            primary,
            notify_sender,
        })
    }
}
