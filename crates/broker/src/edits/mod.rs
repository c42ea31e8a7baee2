//! Workspace-edit handling: normalize the wire shape, apply it (with or
//! without transactional backup/rollback), and render a human-readable
//! preview.

pub mod applier;
pub mod diff;
pub mod resolve;
pub mod transaction;

pub use applier::{apply_direct, DirectApplyResult};
pub use diff::{render as render_diff, EditPreview};
pub use resolve::{resolve, EditStep, ResolvedEdit, ResourceOperation};
pub use transaction::{DryRunResult, EditTransactionManager, TransactionOptions, TransactionResult};
