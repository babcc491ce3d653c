//! Run orchestration for kubeup
//!
//! The reconcile crate does the work; this layer adds the terminal side:
//! 1. Planning - dry run against the selected backend
//! 2. Diffing - display of the planned changes
//! 3. Executing - confirmation, progress and the final summary

pub mod differ;
pub mod executor;

pub use executor::{RunOptions, apply, plan, terraform};
