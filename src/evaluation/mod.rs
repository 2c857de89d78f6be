//! Single-listing evaluation runs
//!
//! Drives one run end to end:
//!
//! 1. validate the stage graph against the schema set
//! 2. select the listing row and segment it (nothing is allocated yet)
//! 3. open the workspace (lock, purge, fresh index) and store the extracts
//! 4. orchestrate the stage graph
//! 5. render and write the report
//! 6. tear the workspace down, on every path out of step 3 onwards
//!
//! The run's result is a [`RunOutcome`] or a [`RunError`] whose `kind()` and
//! `exit_code()` classify the failure.

mod error;
mod run;

pub use error::RunError;
pub use run::{Evaluation, RunOutcome};
