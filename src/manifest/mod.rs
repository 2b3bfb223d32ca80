//! Instrumentation metadata extraction from a test artifact.
//!
//! The test artifact is a zip container carrying a compiled binary XML
//! manifest. This module walks that document's tag stream and recovers
//! the four fields the fleet needs before any device work can start:
//! application package, instrumentation (test) package, minimum SDK, and
//! the test-runner class. Extraction failure is fatal for the whole run.

pub mod axml;

#[cfg(test)]
pub(crate) mod testdoc;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use axml::{AxmlError, AxmlReader, Event};

/// Name of the manifest entry inside the artifact container.
pub const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

/// Result type for manifest extraction.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Errors raised while extracting instrumentation metadata.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact is not a readable archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("artifact has no `{MANIFEST_ENTRY}` entry")]
    MissingManifest,

    #[error("malformed binary manifest: {0}")]
    Axml(#[from] AxmlError),

    #[error("manifest is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Package and runner identity extracted from a test artifact's manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentationInfo {
    /// Package of the application under test.
    pub application_package: String,

    /// Package of the instrumentation (test) artifact itself.
    pub instrumentation_package: String,

    /// Minimum SDK level the artifact declares.
    pub min_sdk_version: u32,

    /// Fully qualified instrumentation runner class.
    pub test_runner_class: String,
}

impl InstrumentationInfo {
    /// Extract instrumentation info from an artifact on disk.
    pub fn from_artifact(path: &Path) -> ManifestResult<Self> {
        let file = File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        let mut entry = archive.by_name(MANIFEST_ENTRY).map_err(|err| match err {
            zip::result::ZipError::FileNotFound => ManifestError::MissingManifest,
            other => ManifestError::Archive(other),
        })?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        let info = Self::from_document(&bytes)?;
        debug!(
            package = %info.instrumentation_package,
            runner = %info.test_runner_class,
            "extracted instrumentation info from {}",
            path.display()
        );
        Ok(info)
    }

    /// Extract instrumentation info from raw binary manifest bytes.
    ///
    /// Single forward pass over the tag stream; only the `manifest`,
    /// `uses-sdk`, and `instrumentation` elements are inspected, and
    /// attribute values are resolved lazily per matching attribute.
    pub fn from_document(bytes: &[u8]) -> ManifestResult<Self> {
        let mut reader = AxmlReader::new(bytes)?;

        let mut instrumentation_package: Option<String> = None;
        let mut application_package: Option<String> = None;
        let mut min_sdk_version: Option<u32> = None;
        let mut runner: Option<String> = None;

        loop {
            match reader.next_event()? {
                Event::StartTag { name, attributes } => {
                    let Some(tag) = reader.string(name) else {
                        continue;
                    };
                    match tag {
                        "manifest" => {
                            for attribute in &attributes {
                                if reader.string(attribute.name) == Some("package") {
                                    instrumentation_package =
                                        reader.attribute_string(attribute).map(str::to_string);
                                }
                            }
                        }
                        "uses-sdk" => {
                            for attribute in &attributes {
                                if reader.string(attribute.name) == Some("minSdkVersion") {
                                    min_sdk_version = reader.attribute_int(attribute).or_else(|| {
                                        reader
                                            .attribute_string(attribute)
                                            .and_then(|value| value.parse().ok())
                                    });
                                }
                            }
                        }
                        "instrumentation" => {
                            for attribute in &attributes {
                                match reader.string(attribute.name) {
                                    Some("targetPackage") => {
                                        application_package =
                                            reader.attribute_string(attribute).map(str::to_string);
                                    }
                                    Some("name") => {
                                        runner =
                                            reader.attribute_string(attribute).map(str::to_string);
                                    }
                                    _ => {}
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Event::EndTag | Event::Text => {}
                Event::EndDocument => break,
            }
        }

        let instrumentation_package = non_empty(instrumentation_package)
            .ok_or(ManifestError::MissingField("package"))?;
        let application_package = non_empty(application_package)
            .ok_or(ManifestError::MissingField("targetPackage"))?;
        let min_sdk_version =
            min_sdk_version.ok_or(ManifestError::MissingField("minSdkVersion"))?;
        let runner = non_empty(runner).ok_or(ManifestError::MissingField("name"))?;

        Ok(Self {
            application_package,
            test_runner_class: resolve_runner_class(&runner, &instrumentation_package),
            instrumentation_package,
            min_sdk_version,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Resolve a possibly-relative runner class against the test package.
///
/// A leading `.` or a bare name with no `.` at all is relative.
fn resolve_runner_class(runner: &str, test_package: &str) -> String {
    if runner.starts_with('.') {
        format!("{test_package}{runner}")
    } else if !runner.contains('.') {
        format!("{test_package}.{runner}")
    } else {
        runner.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::testdoc::{DocSpec, manifest_doc};
    use super::*;

    const PACKAGE: &str = "com.example.app.test";
    const TARGET: &str = "com.example.app";
    const RUNNER: &str = "androidx.test.runner.AndroidJUnitRunner";

    #[test]
    fn test_extract_utf8_document() {
        let doc = manifest_doc(true, PACKAGE, TARGET, RUNNER, 21);
        let info = InstrumentationInfo::from_document(&doc).unwrap();

        assert_eq!(info.instrumentation_package, PACKAGE);
        assert_eq!(info.application_package, TARGET);
        assert_eq!(info.min_sdk_version, 21);
        assert_eq!(info.test_runner_class, RUNNER);
    }

    #[test]
    fn test_extract_utf16_document() {
        let doc = manifest_doc(false, PACKAGE, TARGET, RUNNER, 21);
        let info = InstrumentationInfo::from_document(&doc).unwrap();

        assert_eq!(info.instrumentation_package, PACKAGE);
        assert_eq!(info.application_package, TARGET);
        assert_eq!(info.min_sdk_version, 21);
        assert_eq!(info.test_runner_class, RUNNER);
    }

    #[test]
    fn test_both_encodings_extract_identical_values() {
        let utf8 = InstrumentationInfo::from_document(&manifest_doc(true, PACKAGE, TARGET, RUNNER, 24)).unwrap();
        let utf16 = InstrumentationInfo::from_document(&manifest_doc(false, PACKAGE, TARGET, RUNNER, 24)).unwrap();
        assert_eq!(utf8, utf16);
    }

    #[test]
    fn test_long_strings_use_wide_length_prefix() {
        // Both encodings switch to a 2-unit length prefix past 127
        // chars/units; a 200-char package exercises that path.
        let long_package = format!("com.example.{}", "x".repeat(188));
        for utf8 in [true, false] {
            let doc = manifest_doc(utf8, &long_package, TARGET, RUNNER, 21);
            let info = InstrumentationInfo::from_document(&doc).unwrap();
            assert_eq!(info.instrumentation_package, long_package);
        }
    }

    #[test]
    fn test_runner_with_leading_dot_resolves_against_test_package() {
        let doc = manifest_doc(true, PACKAGE, TARGET, ".CustomRunner", 21);
        let info = InstrumentationInfo::from_document(&doc).unwrap();
        assert_eq!(info.test_runner_class, format!("{PACKAGE}.CustomRunner"));
    }

    #[test]
    fn test_bare_runner_name_resolves_against_test_package() {
        let doc = manifest_doc(true, PACKAGE, TARGET, "CustomRunner", 21);
        let info = InstrumentationInfo::from_document(&doc).unwrap();
        assert_eq!(info.test_runner_class, format!("{PACKAGE}.CustomRunner"));
    }

    #[test]
    fn test_missing_instrumentation_element_fields() {
        let doc = DocSpec {
            utf8: true,
            package: Some(PACKAGE.to_string()),
            target_package: None,
            runner: Some(RUNNER.to_string()),
            min_sdk: Some(21),
        }
        .build();
        let err = InstrumentationInfo::from_document(&doc).unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("targetPackage")));
    }

    #[test]
    fn test_missing_min_sdk() {
        let doc = DocSpec {
            utf8: true,
            package: Some(PACKAGE.to_string()),
            target_package: Some(TARGET.to_string()),
            runner: Some(RUNNER.to_string()),
            min_sdk: None,
        }
        .build();
        let err = InstrumentationInfo::from_document(&doc).unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("minSdkVersion")));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let err = InstrumentationInfo::from_document(&[0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, ManifestError::Axml(AxmlError::BadMagic(_))));
    }

    #[test]
    fn test_truncated_document_rejected() {
        let doc = manifest_doc(true, PACKAGE, TARGET, RUNNER, 21);
        // Cut inside the string-pool offset table.
        let err = InstrumentationInfo::from_document(&doc[..40]).unwrap_err();
        assert!(matches!(err, ManifestError::Axml(AxmlError::UnexpectedEof)));
    }

    #[test]
    fn test_from_artifact_reads_zip_entry() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("app-test.apk");
        let file = File::create(&artifact).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file(MANIFEST_ENTRY, zip::write::SimpleFileOptions::default()).unwrap();
        zip.write_all(&manifest_doc(true, PACKAGE, TARGET, RUNNER, 21)).unwrap();
        zip.finish().unwrap();

        let info = InstrumentationInfo::from_artifact(&artifact).unwrap();
        assert_eq!(info.application_package, TARGET);
    }

    #[test]
    fn test_artifact_without_manifest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("empty.apk");
        let file = File::create(&artifact).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("classes.dex", zip::write::SimpleFileOptions::default()).unwrap();
        zip.write_all(b"dex").unwrap();
        zip.finish().unwrap();

        let err = InstrumentationInfo::from_artifact(&artifact).unwrap_err();
        assert!(matches!(err, ManifestError::MissingManifest));
    }
}
