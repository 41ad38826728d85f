//! 订阅状态定义

use crate::error::SocketError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 订阅状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketState {
    /// 已发送 join，等待服务器确认
    Pending,
    /// 服务器已确认订阅
    Open,
    /// 已发送 leave，等待服务器确认
    Closing,
    /// 订阅已关闭
    Closed,
    /// 服务器拒绝订阅或连接出错
    Error,
}

impl SocketState {
    /// 所有合法状态
    pub const ALL: [SocketState; 5] = [
        SocketState::Pending,
        SocketState::Open,
        SocketState::Closed,
        SocketState::Closing,
        SocketState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SocketState::Pending => "pending",
            SocketState::Open => "open",
            SocketState::Closing => "closing",
            SocketState::Closed => "closed",
            SocketState::Error => "error",
        }
    }

    /// 状态迁移表
    ///
    /// 任意状态都可以被强制终止为 `Closed`，其余迁移由服务器握手驱动。
    pub fn can_transition_to(&self, to: SocketState) -> bool {
        matches!(
            (self, to),
            (_, SocketState::Closed)
                | (SocketState::Pending, SocketState::Open)
                | (SocketState::Pending, SocketState::Error)
                | (SocketState::Open, SocketState::Closing)
                | (SocketState::Open, SocketState::Error)
                | (SocketState::Closing, SocketState::Error)
        )
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, SocketState::Closed | SocketState::Error)
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocketState {
    type Err = SocketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| SocketError::InvalidState(s.to_string()))
    }
}

impl TryFrom<&str> for SocketState {
    type Error = SocketError;

    fn try_from(value: &str) -> Result<Self, SocketError> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_states() {
        for state in SocketState::ALL {
            assert_eq!(state.as_str().parse::<SocketState>().unwrap(), state);
        }
    }

    #[test]
    fn test_parse_rejects_unknown_state() {
        let err = "opened".parse::<SocketState>().unwrap_err();
        assert!(matches!(err, SocketError::InvalidState(ref s) if s == "opened"));
        assert_eq!(err.to_string(), "opened is not a valid socket state");

        assert!(SocketState::try_from("").is_err());
        assert!(SocketState::try_from("OPEN").is_err());
    }

    #[test]
    fn test_try_from_str() {
        let state: Result<SocketState, SocketError> = SocketState::try_from("closing");
        assert_eq!(state.unwrap(), SocketState::Closing);

        let err = SocketState::try_from("gone").unwrap_err();
        assert!(matches!(err, SocketError::InvalidState(ref s) if s == "gone"));
    }

    #[test]
    fn test_transitions() {
        use SocketState::*;

        assert!(Pending.can_transition_to(Open));
        assert!(Pending.can_transition_to(Error));
        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(Closing.can_transition_to(Error));

        // terminate 可以从任意状态进入 closed
        for state in SocketState::ALL {
            assert!(state.can_transition_to(Closed));
        }

        assert!(!Pending.can_transition_to(Closing));
        assert!(!Closing.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Error.can_transition_to(Open));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&SocketState::Closing).unwrap(), r#""closing""#);
        let state: SocketState = serde_json::from_str(r#""error""#).unwrap();
        assert_eq!(state, SocketState::Error);
    }
}
