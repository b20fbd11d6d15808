pub mod accounts;
pub mod columns;
pub mod db;
pub mod events;
pub mod profiles;
pub mod settings;

pub use db::Database;
pub use events::TagRow;

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    /// The write was ignored; the stored row already won.
    AlreadyExists,
    Updated,
}

impl WriteOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, WriteOutcome::AlreadyExists)
    }
}
