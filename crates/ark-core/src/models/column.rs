use serde::{Deserialize, Serialize};

/// View type of a column, stored as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ColumnKind {
    Feed,
    Thread,
    User,
    Hashtag,
    Group,
    Notification,
    Article,
    Unknown(i64),
}

impl ColumnKind {
    pub fn code(self) -> i64 {
        match self {
            ColumnKind::Feed => 1,
            ColumnKind::Thread => 2,
            ColumnKind::User => 3,
            ColumnKind::Hashtag => 4,
            ColumnKind::Group => 5,
            ColumnKind::Notification => 6,
            ColumnKind::Article => 7,
            ColumnKind::Unknown(code) => code,
        }
    }
}

impl From<i64> for ColumnKind {
    fn from(code: i64) -> Self {
        match code {
            1 => ColumnKind::Feed,
            2 => ColumnKind::Thread,
            3 => ColumnKind::User,
            4 => ColumnKind::Hashtag,
            5 => ColumnKind::Group,
            6 => ColumnKind::Notification,
            7 => ColumnKind::Article,
            other => ColumnKind::Unknown(other),
        }
    }
}

impl From<ColumnKind> for i64 {
    fn from(kind: ColumnKind) -> Self {
        kind.code()
    }
}

/// A persisted view configuration owned by an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: i64,
    pub account_id: i64,
    pub kind: ColumnKind,
    pub title: String,
    /// A JSON filter or a pubkey, depending on `kind`.
    pub content: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewColumn {
    pub kind: ColumnKind,
    pub title: String,
    pub content: String,
}

impl NewColumn {
    pub fn new(kind: ColumnKind, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_kind_codes() {
        for kind in [
            ColumnKind::Feed,
            ColumnKind::Thread,
            ColumnKind::User,
            ColumnKind::Hashtag,
            ColumnKind::Group,
            ColumnKind::Notification,
            ColumnKind::Article,
        ] {
            assert_eq!(ColumnKind::from(kind.code()), kind);
        }
        assert_eq!(ColumnKind::from(99), ColumnKind::Unknown(99));
        assert_eq!(serde_json::to_string(&ColumnKind::User).unwrap(), "3");
    }
}
