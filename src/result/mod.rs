//! Run-result data model.
//!
//! - `RunResult` / `RunResultBuilder`: evidence for one tag of one iteration
//! - `ResultSet`: every result, tag and execution error of one execution
//! - `Assertion` / `AssertionError`: checks run against a `ResultSet`

pub mod assertion;
pub mod result_set;
pub mod run_result;

pub use assertion::{Assertion, AssertionError, SubjectKind, SubjectRef};
pub use result_set::{ResultEntry, ResultSet, RunSummary};
pub use run_result::{
    IterationOutput, RunResult, RunResultBuilder, TAG_ALL, TAG_END, TAG_START, is_reserved_tag,
};
