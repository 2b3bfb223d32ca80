//! Test-only builder for compiled binary manifest documents.
//!
//! Produces byte-exact documents in either string-pool encoding so parser
//! tests (and fleet tests that need a real artifact on disk) don't depend
//! on checked-in binary fixtures.

use super::axml::{
    CHUNK_DOCUMENT, CHUNK_END_NAMESPACE, CHUNK_END_TAG, CHUNK_START_NAMESPACE, CHUNK_START_TAG,
    CHUNK_STRING_POOL, NIL, TYPE_INT_FIRST, TYPE_STRING, UTF8_FLAG,
};

const IDX_MANIFEST: u32 = 0;
const IDX_PACKAGE: u32 = 1;
const IDX_PACKAGE_VALUE: u32 = 2;
const IDX_USES_SDK: u32 = 3;
const IDX_MIN_SDK: u32 = 4;
const IDX_INSTRUMENTATION: u32 = 5;
const IDX_TARGET_PACKAGE: u32 = 6;
const IDX_NAME: u32 = 7;
const IDX_TARGET_VALUE: u32 = 8;
const IDX_RUNNER_VALUE: u32 = 9;

enum Value {
    Str(u32),
    Int(u32),
}

/// Which fields the generated document carries. `None` omits the
/// attribute entirely, for missing-field tests.
pub(crate) struct DocSpec {
    pub utf8: bool,
    pub package: Option<String>,
    pub target_package: Option<String>,
    pub runner: Option<String>,
    pub min_sdk: Option<u32>,
}

impl DocSpec {
    pub(crate) fn complete(utf8: bool, package: &str, target: &str, runner: &str, min_sdk: u32) -> Self {
        Self {
            utf8,
            package: Some(package.to_string()),
            target_package: Some(target.to_string()),
            runner: Some(runner.to_string()),
            min_sdk: Some(min_sdk),
        }
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let package = self.package.clone().unwrap_or_default();
        let target = self.target_package.clone().unwrap_or_default();
        let runner = self.runner.clone().unwrap_or_default();
        let strings: Vec<&str> = vec![
            "manifest",
            "package",
            &package,
            "uses-sdk",
            "minSdkVersion",
            "instrumentation",
            "targetPackage",
            "name",
            &target,
            &runner,
        ];
        let pool = build_pool(&strings, self.utf8);

        let mut body = Vec::new();
        push_namespace(&mut body, CHUNK_START_NAMESPACE);

        let mut manifest_attrs = Vec::new();
        if self.package.is_some() {
            manifest_attrs.push((IDX_PACKAGE, Value::Str(IDX_PACKAGE_VALUE)));
        }
        push_start_tag(&mut body, IDX_MANIFEST, &manifest_attrs);

        let mut sdk_attrs = Vec::new();
        if let Some(min_sdk) = self.min_sdk {
            sdk_attrs.push((IDX_MIN_SDK, Value::Int(min_sdk)));
        }
        push_start_tag(&mut body, IDX_USES_SDK, &sdk_attrs);
        push_end_tag(&mut body, IDX_USES_SDK);

        let mut instrumentation_attrs = Vec::new();
        if self.target_package.is_some() {
            instrumentation_attrs.push((IDX_TARGET_PACKAGE, Value::Str(IDX_TARGET_VALUE)));
        }
        if self.runner.is_some() {
            instrumentation_attrs.push((IDX_NAME, Value::Str(IDX_RUNNER_VALUE)));
        }
        push_start_tag(&mut body, IDX_INSTRUMENTATION, &instrumentation_attrs);
        push_end_tag(&mut body, IDX_INSTRUMENTATION);

        push_end_tag(&mut body, IDX_MANIFEST);
        push_namespace(&mut body, CHUNK_END_NAMESPACE);

        let mut doc = Vec::new();
        doc.extend_from_slice(&CHUNK_DOCUMENT.to_le_bytes());
        doc.extend_from_slice(&((8 + pool.len() + body.len()) as u32).to_le_bytes());
        doc.extend_from_slice(&pool);
        doc.extend_from_slice(&body);
        doc
    }
}

/// A complete document with all four fields present.
pub(crate) fn manifest_doc(utf8: bool, package: &str, target: &str, runner: &str, min_sdk: u32) -> Vec<u8> {
    DocSpec::complete(utf8, package, target, runner, min_sdk).build()
}

fn build_pool(strings: &[&str], utf8: bool) -> Vec<u8> {
    let mut data = Vec::new();
    let mut offsets = Vec::with_capacity(strings.len());
    for s in strings {
        offsets.push(data.len() as u32);
        if utf8 {
            push_length8(&mut data, s.chars().count());
            push_length8(&mut data, s.len());
            data.extend_from_slice(s.as_bytes());
            data.push(0);
        } else {
            let units: Vec<u16> = s.encode_utf16().collect();
            push_length16(&mut data, units.len());
            for unit in &units {
                data.extend_from_slice(&unit.to_le_bytes());
            }
            data.extend_from_slice(&0u16.to_le_bytes());
        }
    }
    while data.len() % 4 != 0 {
        data.push(0);
    }

    let strings_start = 28 + 4 * strings.len();
    let chunk_size = strings_start + data.len();

    let mut pool = Vec::new();
    pool.extend_from_slice(&CHUNK_STRING_POOL.to_le_bytes());
    pool.extend_from_slice(&(chunk_size as u32).to_le_bytes());
    pool.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    pool.extend_from_slice(&0u32.to_le_bytes());
    pool.extend_from_slice(&(if utf8 { UTF8_FLAG } else { 0 }).to_le_bytes());
    pool.extend_from_slice(&(strings_start as u32).to_le_bytes());
    pool.extend_from_slice(&0u32.to_le_bytes());
    for offset in offsets {
        pool.extend_from_slice(&offset.to_le_bytes());
    }
    pool.extend_from_slice(&data);
    pool
}

fn push_length8(data: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        data.push(len as u8);
    } else {
        data.push(0x80 | ((len >> 8) as u8));
        data.push((len & 0xff) as u8);
    }
}

fn push_length16(data: &mut Vec<u8>, len: usize) {
    if len < 0x8000 {
        data.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        data.extend_from_slice(&((0x8000 | (len >> 16)) as u16).to_le_bytes());
        data.extend_from_slice(&((len & 0xffff) as u16).to_le_bytes());
    }
}

fn push_start_tag(body: &mut Vec<u8>, name: u32, attributes: &[(u32, Value)]) {
    body.extend_from_slice(&CHUNK_START_TAG.to_le_bytes());
    body.extend_from_slice(&((36 + 20 * attributes.len()) as u32).to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes()); // line
    body.extend_from_slice(&NIL.to_le_bytes()); // comment
    body.extend_from_slice(&NIL.to_le_bytes()); // namespace
    body.extend_from_slice(&name.to_le_bytes());
    body.extend_from_slice(&20u16.to_le_bytes()); // attribute start
    body.extend_from_slice(&20u16.to_le_bytes()); // attribute size
    body.extend_from_slice(&(attributes.len() as u16).to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes()); // id index
    body.extend_from_slice(&0u16.to_le_bytes()); // class index
    body.extend_from_slice(&0u16.to_le_bytes()); // style index
    for (name, value) in attributes {
        body.extend_from_slice(&NIL.to_le_bytes()); // namespace
        body.extend_from_slice(&name.to_le_bytes());
        match value {
            Value::Str(index) => {
                body.extend_from_slice(&index.to_le_bytes());
                body.extend_from_slice(&8u16.to_le_bytes());
                body.push(0);
                body.push(TYPE_STRING);
                body.extend_from_slice(&index.to_le_bytes());
            }
            Value::Int(data) => {
                body.extend_from_slice(&NIL.to_le_bytes());
                body.extend_from_slice(&8u16.to_le_bytes());
                body.push(0);
                body.push(TYPE_INT_FIRST);
                body.extend_from_slice(&data.to_le_bytes());
            }
        }
    }
}

fn push_end_tag(body: &mut Vec<u8>, name: u32) {
    body.extend_from_slice(&CHUNK_END_TAG.to_le_bytes());
    body.extend_from_slice(&24u32.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes()); // line
    body.extend_from_slice(&NIL.to_le_bytes()); // comment
    body.extend_from_slice(&NIL.to_le_bytes()); // namespace
    body.extend_from_slice(&name.to_le_bytes());
}

fn push_namespace(body: &mut Vec<u8>, chunk_type: u32) {
    body.extend_from_slice(&chunk_type.to_le_bytes());
    body.extend_from_slice(&24u32.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes()); // line
    body.extend_from_slice(&NIL.to_le_bytes()); // comment
    body.extend_from_slice(&NIL.to_le_bytes()); // prefix
    body.extend_from_slice(&NIL.to_le_bytes()); // uri
}
