mod generate_commit;
mod types;

pub(crate) use generate_commit::{generate_commit, NO_CONTENT_SNAPSHOT_ID};
pub(crate) use types::GenerateCommitArgs;
pub use types::{
    ChangeRow, ChangeSetElementRow, CommitRow, GenerateCommitResult, MaterializedUpsert,
    SnapshotRow, VersionContext, VersionTipUpdate,
};
