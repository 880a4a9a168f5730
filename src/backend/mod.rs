//! Backends consume the fully lowered MIR. The flat rule IR in `fir` is the
//! shared middle step; `ninja` turns it into a build.ninja.

use std::fs::File as FsFile;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

pub mod fir;
pub mod ninja;

const SERIAL_VERSION: i64 = 0;

/// A test registered by the build description, serialized next to the build
/// files so the test runner can find it without reconfiguring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Test {
    pub name: String,
    pub exe: PathBuf,
    pub arguments: Vec<String>,
    pub should_fail: bool,
}

impl Test {
    fn serialize(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "BEGIN_TEST")?;
        writeln!(out, "  name:{}", self.name)?;
        let exe = if self.exe.parent().is_some_and(|p| !p.as_os_str().is_empty()) {
            self.exe.display().to_string()
        } else {
            format!("./{}", self.exe.display())
        };
        writeln!(out, "  exe:{exe}")?;
        writeln!(out, "  xfail:{}", i32::from(self.should_fail))?;
        writeln!(out, "END_TEST")?;
        Ok(())
    }
}

pub fn serialize_tests(tests: &[Test], path: &Path) -> Result<()> {
    let mut out = FsFile::create(path)?;
    writeln!(out, "SERIAL_VERSION:{SERIAL_VERSION}")?;
    for test in tests {
        test.serialize(&mut out)?;
    }
    out.flush()?;
    Ok(())
}

pub fn deserialize_tests(reader: impl BufRead) -> Result<Vec<Test>> {
    let mut lines = reader.lines();

    let header = lines
        .next()
        .transpose()?
        .ok_or_else(|| Error::meson("Malformed test serialization: empty file"))?;
    let Some(("SERIAL_VERSION", version)) = header.split_once(':') else {
        return Err(Error::meson(format!(
            "Malformed test serialization, first line is not a version: {header}"
        )));
    };
    if version.parse::<i64>().ok() != Some(SERIAL_VERSION) {
        return Err(Error::meson(
            "Test serialization for a different version of boson",
        ));
    }

    let mut out = Vec::new();
    let mut current = Test::default();
    for line in lines {
        let line = line?;
        match line.as_str() {
            "BEGIN_TEST" => current = Test::default(),
            "END_TEST" => out.push(std::mem::take(&mut current)),
            _ => {
                let Some((key, value)) = line.trim_start().split_once(':') else {
                    return Err(Error::meson(format!(
                        "Malformed test serialization: {line}"
                    )));
                };
                match key {
                    "name" => current.name = value.to_owned(),
                    "exe" => current.exe = PathBuf::from(value),
                    "xfail" => current.should_fail = value == "1",
                    _ => {
                        return Err(Error::meson(format!(
                            "Malformed test serialization: {line}"
                        )))
                    }
                }
            }
        }
    }

    Ok(out)
}

pub fn load_tests(path: &Path) -> Result<Vec<Test>> {
    deserialize_tests(BufReader::new(FsFile::open(path)?))
}
