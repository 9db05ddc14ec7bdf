use serde_derive::{Deserialize, Serialize};

use crate::message::Message;

/// All relay-relevant messages decoded from one source block.
///
/// Produced by a chain listener only once every event of the height has been
/// decoded; heights without matching events produce no `BlockInfo`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub messages: Vec<Message>,
}
