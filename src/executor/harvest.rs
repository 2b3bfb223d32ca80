//! Post-run evidence harvest.
//!
//! Tests write screenshots on-device under a fixed root, one directory
//! per test class and method:
//!
//! ```text
//! /sdcard/fleet-screenshots/<ClassName>/<methodName>/<name>.png
//! ```
//!
//! After the instrumentation run the tree is pulled into the device's
//! output directory, partitioned back into test identities by its
//! directory naming, and attached to the matching result builders. A test
//! with more than one screenshot additionally gets an animated GIF; a
//! single screenshot animates nothing.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame};
use tracing::debug;

use crate::backend::DeviceBackend;
use crate::model::{DeviceTest, DeviceTestResultBuilder};

/// On-device root directory tests write screenshots to.
pub const DEVICE_SCREENSHOT_DIR: &str = "/sdcard/fleet-screenshots";

/// Frame delay used for synthesized animations.
const GIF_FRAME_DELAY_MS: u32 = 1000;

/// Pull the screenshot tree for one device and attach artifacts to the
/// matching builders.
///
/// Best-effort: the caller records any error as a top-level exception;
/// results collected before the failure are unaffected.
pub(crate) async fn harvest_screenshots<B: DeviceBackend + ?Sized>(
    backend: &B,
    serial: &str,
    output_dir: &Path,
    builders: &mut BTreeMap<DeviceTest, DeviceTestResultBuilder>,
) -> anyhow::Result<()> {
    let local_root = output_dir.join("screenshots");
    backend
        .pull_directory(serial, DEVICE_SCREENSHOT_DIR, &local_root)
        .await
        .context("failed to pull screenshot directory")?;

    if !local_root.is_dir() {
        debug!("no screenshots pulled from {serial}");
        return Ok(());
    }

    for (test, shots) in partition_by_test(&local_root)? {
        let Some(builder) = builders.get_mut(&test) else {
            debug!("screenshots for unknown test {test} on {serial}");
            continue;
        };
        for shot in &shots {
            builder.add_screenshot(shot.clone())?;
        }
        if shots.len() > 1 {
            let gif_path = output_dir
                .join("animations")
                .join(&test.class_name)
                .join(format!("{}.gif", test.method_name));
            synthesize_animation(&shots, &gif_path)
                .with_context(|| format!("failed to animate screenshots for {test}"))?;
            builder.set_animated_gif(gif_path)?;
        }
    }
    Ok(())
}

/// Walk `<class>/<method>/*.png` under the pulled root, in sorted order.
fn partition_by_test(root: &Path) -> anyhow::Result<Vec<(DeviceTest, Vec<PathBuf>)>> {
    let mut partitioned = Vec::new();
    for class_dir in sorted_entries(root)? {
        if !class_dir.is_dir() {
            continue;
        }
        let class_name = file_name(&class_dir);
        for method_dir in sorted_entries(&class_dir)? {
            if !method_dir.is_dir() {
                continue;
            }
            let shots: Vec<PathBuf> = sorted_entries(&method_dir)?
                .into_iter()
                .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
                .collect();
            if shots.is_empty() {
                continue;
            }
            partitioned.push((DeviceTest::new(&class_name, file_name(&method_dir)), shots));
        }
    }
    Ok(partitioned)
}

fn sorted_entries(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

/// Encode the screenshot sequence as a looping animated GIF.
fn synthesize_animation(frames: &[PathBuf], output: &Path) -> anyhow::Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(output)?;
    let mut encoder = GifEncoder::new(file);
    encoder.set_repeat(Repeat::Infinite)?;
    for path in frames {
        let decoded = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgba8();
        let frame = Frame::from_parts(decoded, 0, 0, Delay::from_numer_denom_ms(GIF_FRAME_DELAY_MS, 1));
        encoder.encode_frame(frame)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::tiny_png;

    fn write_shot(root: &Path, class: &str, method: &str, name: &str) {
        let dir = root.join(class).join(method);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), tiny_png()).unwrap();
    }

    #[test]
    fn test_partition_by_test() {
        let dir = tempfile::tempdir().unwrap();
        write_shot(dir.path(), "com.example.FooTest", "testBar", "shot_2.png");
        write_shot(dir.path(), "com.example.FooTest", "testBar", "shot_1.png");
        write_shot(dir.path(), "com.example.FooTest", "testBaz", "only.png");
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        let partitioned = partition_by_test(dir.path()).unwrap();
        assert_eq!(partitioned.len(), 2);

        let (test, shots) = &partitioned[0];
        assert_eq!(*test, DeviceTest::new("com.example.FooTest", "testBar"));
        assert_eq!(shots.len(), 2);
        // Sorted order within a test.
        assert!(shots[0].ends_with("shot_1.png"));
        assert!(shots[1].ends_with("shot_2.png"));
    }

    #[test]
    fn test_synthesize_animation_writes_gif() {
        let dir = tempfile::tempdir().unwrap();
        let frames: Vec<PathBuf> = (0..3)
            .map(|i| {
                let path = dir.path().join(format!("frame_{i}.png"));
                std::fs::write(&path, tiny_png()).unwrap();
                path
            })
            .collect();
        let gif = dir.path().join("animations/out.gif");

        synthesize_animation(&frames, &gif).unwrap();
        assert!(gif.is_file());
        let bytes = std::fs::read(&gif).unwrap();
        assert_eq!(&bytes[..3], b"GIF");
    }

    #[test]
    fn test_synthesize_animation_rejects_garbage_frame() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"not a png").unwrap();
        let gif = dir.path().join("out.gif");

        assert!(synthesize_animation(&[bad], &gif).is_err());
    }
}
