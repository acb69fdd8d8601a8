pub mod activity;
pub mod adapter;
pub mod git2_adapter;

pub use activity::{ActivityReport, FileActivity};
pub use adapter::{ActivityProvider, RepoStateProvider};
pub use git2_adapter::{EMPTY_HASH, Git2Repository};
