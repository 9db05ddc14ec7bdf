use core::fmt::{Display, Error as FmtError, Formatter};
use core::str::FromStr;

use serde_derive::{Deserialize, Serialize};

use crate::error::Error;

/// The kind of event a [`Message`](crate::Message) was decoded from.
///
/// `CallMessage` and `EmitMessage` carry cross-chain payloads; the remaining
/// kinds are control operations routed through the same delivery path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    CallMessage,
    EmitMessage,
    RevertMessage,
    SetAdmin,
    SetFee,
    ClaimFee,
    ExecuteRollback,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallMessage => "CallMessage",
            Self::EmitMessage => "EmitMessage",
            Self::RevertMessage => "RevertMessage",
            Self::SetAdmin => "SetAdmin",
            Self::SetFee => "SetFee",
            Self::ClaimFee => "ClaimFee",
            Self::ExecuteRollback => "ExecuteRollback",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CallMessage" => Ok(Self::CallMessage),
            "EmitMessage" => Ok(Self::EmitMessage),
            "RevertMessage" => Ok(Self::RevertMessage),
            "SetAdmin" => Ok(Self::SetAdmin),
            "SetFee" => Ok(Self::SetFee),
            "ClaimFee" => Ok(Self::ClaimFee),
            "ExecuteRollback" => Ok(Self::ExecuteRollback),
            _ => Err(Error::unknown_event_kind(s.to_string())),
        }
    }
}
