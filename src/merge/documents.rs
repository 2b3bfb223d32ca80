//! Result-document persistence and image relocation for the merge tool.
//!
//! A fleet run persists its summary as pretty-printed JSON at a fixed
//! filename in the run output directory; those documents are the inputs
//! the merge tool consumes. When merging, screenshot and animation files
//! referenced by each input are copied into a unified `images/`
//! subdirectory of the merge output and the in-document references are
//! rewritten to the new relative paths.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::warn;

use crate::model::{DeviceTest, FleetSummary};

/// Fixed filename of the summary document inside a run output directory.
pub const RESULT_DOCUMENT: &str = "result.json";

/// Subdirectory of the merge output that collects relocated images.
pub const IMAGES_DIR: &str = "images";

/// Read a summary document from disk.
pub fn load_summary(path: &Path) -> anyhow::Result<FleetSummary> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read result document {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("malformed result document {}", path.display()))
}

/// Write a summary document, creating parent directories as needed.
pub fn write_summary(path: &Path, summary: &FleetSummary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write result document {}", path.display()))?;
    Ok(())
}

/// Copy every screenshot and animation the summary references into
/// `<output_dir>/images`, rewriting the references to the new relative
/// paths. Relative references resolve against `document_dir`. A missing
/// source file is warned about and its reference left untouched.
pub fn relocate_images(
    summary: &mut FleetSummary,
    document_dir: &Path,
    output_dir: &Path,
) -> anyhow::Result<()> {
    let images_dir = output_dir.join(IMAGES_DIR);
    for (serial, device) in &mut summary.results {
        for (test, result) in &mut device.test_results {
            for reference in result
                .screenshots
                .iter_mut()
                .chain(result.animated_gif.iter_mut())
            {
                relocate(reference, serial, test, document_dir, &images_dir)?;
            }
        }
    }
    Ok(())
}

fn relocate(
    reference: &mut PathBuf,
    serial: &str,
    test: &DeviceTest,
    document_dir: &Path,
    images_dir: &Path,
) -> anyhow::Result<()> {
    let source = if reference.is_absolute() {
        reference.clone()
    } else {
        document_dir.join(&reference)
    };
    if !source.is_file() {
        warn!("referenced image {} does not exist, keeping reference", source.display());
        return Ok(());
    }

    let file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    // Prefix with the owning identity so same-named files from different
    // tests or devices cannot collide.
    let unified_name = format!(
        "{serial}_{}_{}_{file_name}",
        test.class_name, test.method_name
    );

    std::fs::create_dir_all(images_dir)?;
    let destination = images_dir.join(&unified_name);
    std::fs::copy(&source, &destination)
        .with_context(|| format!("failed to copy {}", source.display()))?;

    *reference = PathBuf::from(IMAGES_DIR).join(unified_name);
    Ok(())
}
