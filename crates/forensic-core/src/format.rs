use serde::{Deserialize, Serialize};

use crate::CommitId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitIdFormat {
    Full,
    Abbreviated(usize),
}

impl Default for CommitIdFormat {
    fn default() -> Self {
        Self::Abbreviated(7)
    }
}

pub fn format_commit_id(id: &CommitId, format: CommitIdFormat) -> String {
    if id.is_zero() {
        return "-".to_owned();
    }

    match format {
        CommitIdFormat::Full => id.as_str().to_owned(),
        CommitIdFormat::Abbreviated(length) => {
            let length = length.max(1);
            id.as_str().chars().take(length).collect()
        }
    }
}
