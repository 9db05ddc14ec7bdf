use core::fmt::{Display, Error as FmtError, Formatter};

use serde_derive::{Deserialize, Serialize};

/// Result code of an executed transaction, as reported by the chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    Ok,
    Err(u32),
}

impl ResponseCode {
    pub fn from_u32(code: u32) -> Self {
        if code == 0 {
            Self::Ok
        } else {
            Self::Err(code)
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl Display for ResponseCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Ok => write!(f, "0"),
            Self::Err(code) => write!(f, "{code}"),
        }
    }
}

/// Terminal result of a broadcast transaction, observed at inclusion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResponse {
    pub height: i64,
    pub tx_hash: String,
    pub codespace: String,
    pub code: ResponseCode,
    pub data: String,
}

impl TxResponse {
    pub fn is_success(&self) -> bool {
        self.code.is_ok()
    }
}

/// Inclusion receipt for a transaction hash queried on a chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: String,
    pub height: u64,
    pub status: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_code_zero_is_ok() {
        assert!(ResponseCode::from_u32(0).is_ok());
        assert!(!ResponseCode::from_u32(32).is_ok());
        assert_eq!(ResponseCode::from_u32(32), ResponseCode::Err(32));
    }
}
