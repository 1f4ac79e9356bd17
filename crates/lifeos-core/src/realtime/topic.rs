use std::fmt;

use crate::cache::QueryKey;

/// Change notifications published on the realtime stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealtimeTopic {
    Habits,
    HabitLogs,
    Tasks,
    Transactions,
    TaskHabitLinks,
    AiLogs,
    JournalEntries,
}

impl RealtimeTopic {
    pub const ALL: [Self; 7] = [
        Self::Habits,
        Self::HabitLogs,
        Self::Tasks,
        Self::Transactions,
        Self::TaskHabitLinks,
        Self::AiLogs,
        Self::JournalEntries,
    ];

    /// Event name as sent by the server (the table name)
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::Habits => "habits",
            Self::HabitLogs => "habit_logs",
            Self::Tasks => "tasks",
            Self::Transactions => "transactions",
            Self::TaskHabitLinks => "task_habit_links",
            Self::AiLogs => "ai_logs",
            Self::JournalEntries => "journal_entries",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.event_name() == name)
    }

    /// Cache keys that go stale when this topic changes.
    pub fn invalidation_keys(self) -> Vec<QueryKey> {
        match self {
            Self::Habits => vec![QueryKey::from(["habits"])],
            Self::HabitLogs => vec![QueryKey::from(["habits", "logs"]), QueryKey::from(["habits"])],
            Self::Tasks => vec![QueryKey::from(["tasks"])],
            Self::Transactions => vec![
                QueryKey::from(["transactions"]),
                QueryKey::from(["finance-summary"]),
            ],
            Self::TaskHabitLinks => vec![QueryKey::from(["tasks"]), QueryKey::from(["habits"])],
            Self::AiLogs => vec![QueryKey::from(["ai-logs"])],
            Self::JournalEntries => vec![QueryKey::from(["journal"])],
        }
    }
}

impl fmt::Display for RealtimeTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}
