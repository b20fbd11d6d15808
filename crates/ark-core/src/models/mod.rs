pub mod account;
pub mod column;
pub mod profile;
pub mod relay_list;
pub mod settings;

pub use account::Account;
pub use column::{Column, ColumnKind, NewColumn};
pub use profile::{CachedProfile, Profile};
pub use relay_list::{relay_entries, RelayEntry, RelayPurpose};
pub use settings::{Interests, SettingKey, SettingValue, Settings};
