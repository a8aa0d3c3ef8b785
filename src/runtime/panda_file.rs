//! Class files.
//!
//! A class file is a list of class records, one per line:
//!
//! ```text
//! # comment
//! .record LFoo; extends=Lpanda/Object; fields=2 static=16 vmethods=1 access=public,final
//! .record LBar; external
//! ```
//!
//! `fields` is the number of instance fields, `static` the size of the static fields in bytes and
//! `vmethods` the number of virtual methods the class declares. An `external` record only
//! declares a class that is defined by another file.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::runtime::class::AccessFlags;
use crate::runtime::class_helper::ClassHelper;

#[derive(Debug, Error)]
pub enum PandaFileError {
    #[error("cannot open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },
}

/// Index of a record within its file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassRecord {
    pub descriptor: Box<[u8]>,
    pub base: Option<Box<[u8]>>,
    pub instance_fields: usize,
    pub static_fields_size: usize,
    pub vmethods: usize,
    pub access_flags: AccessFlags,
    pub external: bool,
}

impl ClassRecord {
    fn new(descriptor: &[u8]) -> Self {
        ClassRecord {
            descriptor: descriptor.into(),
            base: None,
            instance_fields: 0,
            static_fields_size: 0,
            vmethods: 0,
            access_flags: AccessFlags::empty(),
            external: false,
        }
    }
}

#[derive(Debug)]
pub struct File {
    filename: String,
    records: Vec<ClassRecord>,
    index: HashMap<Box<[u8]>, EntityId>,
}

impl File {
    pub fn parse(filename: &str, source: &str) -> Result<File, PandaFileError> {
        let error = |line: usize, message: String| PandaFileError::Parse {
            file: filename.to_string(),
            line,
            message,
        };
        let mut records: Vec<ClassRecord> = vec![];
        let mut index = HashMap::new();
        for (line_no, line) in source.lines().enumerate().map(|(i, l)| (i + 1, l)) {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut tokens = line.split_whitespace();
            if tokens.next() != Some(".record") {
                return Err(error(line_no, format!("expected .record, found '{}'", line)));
            }
            let descriptor = tokens
                .next()
                .ok_or_else(|| error(line_no, "missing class descriptor".to_string()))?;
            if !ClassHelper::is_reference_descriptor(descriptor.as_bytes()) {
                return Err(error(line_no, format!("'{}' is not a class descriptor", descriptor)));
            }
            let mut record = ClassRecord::new(descriptor.as_bytes());
            for token in tokens {
                if token == "external" {
                    record.external = true;
                    continue;
                }
                let (key, value) = token
                    .split_once('=')
                    .ok_or_else(|| error(line_no, format!("malformed attribute '{}'", token)))?;
                let number = |value: &str| {
                    value
                        .parse::<usize>()
                        .map_err(|_| error(line_no, format!("'{}' is not a number in '{}'", value, token)))
                };
                match key {
                    "extends" => {
                        if !ClassHelper::is_reference_descriptor(value.as_bytes()) {
                            return Err(error(line_no, format!("'{}' is not a class descriptor", value)));
                        }
                        record.base = Some(value.as_bytes().into());
                    }
                    "fields" => record.instance_fields = number(value)?,
                    "static" => record.static_fields_size = number(value)?,
                    "vmethods" => record.vmethods = number(value)?,
                    "access" => {
                        for flag in value.split(',').filter(|f| !f.is_empty()) {
                            record.access_flags |= AccessFlags::from_class_file_name(flag)
                                .ok_or_else(|| error(line_no, format!("unknown access flag '{}'", flag)))?;
                        }
                    }
                    _ => return Err(error(line_no, format!("unknown attribute '{}'", key))),
                }
            }
            let id = EntityId(records.len() as u32);
            if index.insert(record.descriptor.clone(), id).is_some() {
                return Err(error(line_no, format!("duplicate record {}", descriptor)));
            }
            records.push(record);
        }
        debug!("Parsed {}: {} records", filename, records.len());
        Ok(File {
            filename: filename.to_string(),
            records,
            index,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Id of the record of `descriptor`, external or not.
    pub fn get_class_id(&self, descriptor: &[u8]) -> Option<EntityId> {
        self.index.get(descriptor).copied()
    }

    pub fn is_external(&self, id: EntityId) -> bool {
        self.record(id).external
    }

    pub fn record(&self, id: EntityId) -> &ClassRecord {
        &self.records[id.0 as usize]
    }

    pub fn classes(&self) -> impl Iterator<Item = (EntityId, &ClassRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| (EntityId(i as u32), r))
    }

    pub fn num_classes(&self) -> usize {
        self.records.len()
    }
}

/// Open and parse the class file at `path`.
pub fn open_panda_file(path: impl AsRef<Path>) -> Result<File, PandaFileError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|source| PandaFileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    File::parse(&path.display().to_string(), &source)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "
        # test
        .record LA; access=public,abstract
        .record LB; extends=LA; fields=3 static=12 vmethods=2   # trailing comment
        .record LC; external
    ";

    #[test]
    fn parse_records() {
        let file = File::parse("test.abc", SOURCE).unwrap();
        assert_eq!(file.filename(), "test.abc");
        assert_eq!(file.num_classes(), 3);

        let a = file.get_class_id(b"LA;").unwrap();
        assert_eq!(
            file.record(a).access_flags,
            AccessFlags::PUBLIC | AccessFlags::ABSTRACT
        );
        let b = file.record(file.get_class_id(b"LB;").unwrap());
        assert_eq!(b.base.as_deref(), Some(&b"LA;"[..]));
        assert_eq!((b.instance_fields, b.static_fields_size, b.vmethods), (3, 12, 2));

        let c = file.get_class_id(b"LC;").unwrap();
        assert!(file.is_external(c));
        assert!(!file.is_external(a));
        assert_eq!(file.get_class_id(b"LD;"), None);
    }

    #[test]
    fn parse_errors_name_the_line() {
        let err = File::parse("bad.abc", ".record LA;\n.record LA;").unwrap_err();
        assert_eq!(err.to_string(), "bad.abc:2: duplicate record LA;");

        for source in [
            ".class LA;",
            ".record",
            ".record I",
            ".record LA; fields=x",
            ".record LA; access=open",
            ".record LA; extends=[I",
            ".record LA; color=red",
            ".record LA; orphan",
        ] {
            assert!(
                matches!(File::parse("bad.abc", source), Err(PandaFileError::Parse { line: 1, .. })),
                "{}",
                source
            );
        }
    }

    #[test]
    fn open_missing_file() {
        let err = open_panda_file("/nonexistent/boot.abc").unwrap_err();
        assert!(matches!(err, PandaFileError::Io { .. }));
    }

    #[test]
    fn open_from_disk() {
        let path = std::env::temp_dir().join(format!("panda-file-test-{}.abc", std::process::id()));
        std::fs::write(&path, SOURCE).unwrap();
        let file = open_panda_file(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(file.unwrap().num_classes(), 3);
    }
}
