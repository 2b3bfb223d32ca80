//! Summary merging.
//!
//! Combines independently produced [`FleetSummary`] documents (repeated
//! runs, different hosts) into one. Merging is never an error beyond
//! "nothing to merge": conflicts resolve deterministically with the
//! first-seen side winning per test.

pub mod documents;

use std::collections::btree_map::Entry;

use crate::model::{DeviceResult, FleetSummary};

/// Result type for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;

/// Errors raised while merging summaries.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("no summaries to merge")]
    NoInputs,
}

/// Merge summaries into one.
///
/// Title is the override or the first input's; start is the minimum of
/// all input starts; duration spans to the maximum input end. Device
/// results union by serial. When two inputs share a serial the merge
/// happens at the test level: the union of both sides' tests, with the
/// first-seen ("master") side winning any per-test conflict. Inputs with
/// zero devices are valid and contribute only to the time bounds.
pub fn merge_summaries(
    inputs: &[FleetSummary],
    title_override: Option<&str>,
) -> MergeResult<FleetSummary> {
    let first = inputs.first().ok_or(MergeError::NoInputs)?;

    let title = title_override.unwrap_or(&first.title).to_string();
    let started_at = inputs
        .iter()
        .map(|summary| summary.started_at)
        .min()
        .unwrap_or(first.started_at);
    let ended_at = inputs
        .iter()
        .map(|summary| summary.ended_at())
        .max()
        .unwrap_or_else(|| first.ended_at());
    let duration = (ended_at - started_at).to_std().unwrap_or_default();

    let mut results = std::collections::BTreeMap::new();
    for summary in inputs {
        for (serial, incoming) in &summary.results {
            match results.entry(serial.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(incoming.clone());
                }
                Entry::Occupied(mut slot) => {
                    merge_device(slot.get_mut(), incoming);
                }
            }
        }
    }

    Ok(FleetSummary {
        title,
        started_at,
        duration,
        results,
    })
}

/// Merge a later result for a serial into the master one, test by test.
/// The master keeps its device metadata, timing, and exceptions; tests
/// only present on the incoming side are adopted.
fn merge_device(master: &mut DeviceResult, incoming: &DeviceResult) {
    for (test, result) in &incoming.test_results {
        master
            .test_results
            .entry(test.clone())
            .or_insert_with(|| result.clone());
    }
}
