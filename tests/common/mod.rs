//! Shared helpers for integration tests.
//!
//! Stub tools are tiny shell scripts that honour the same CLI contracts as
//! typst and ImageMagick: `--version` probes, `compile <src>` writing
//! `<stem>.pdf`, and a rasterizer writing its last argument.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use pagesmith::Config;
use tempfile::TempDir;

pub const PREVIEW_WIDTH: u32 = 8;
pub const PREVIEW_HEIGHT: u32 = 11;

/// How a stub tool behaves when asked to do real work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Succeed,
    Fail,
    /// Fail, reporting the received source on stderr
    EchoSource,
    Hang,
    FailProbe,
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn version_check(behaviour: Behaviour, version: &str) -> String {
    let exit = if behaviour == Behaviour::FailProbe { 2 } else { 0 };
    format!(
        "if [ \"$1\" = \"--version\" ]; then echo \"{}\"; exit {}; fi",
        version, exit
    )
}

pub fn typst_stub(dir: &Path, behaviour: Behaviour) -> PathBuf {
    let work = match behaviour {
        Behaviour::Succeed | Behaviour::FailProbe => {
            "src=\"$2\"\nprintf '%%PDF-1.7\\n' > \"${src%.typ}.pdf\"\nexit 0"
        }
        Behaviour::Fail => "echo \"error: unclosed delimiter\" >&2\nexit 1",
        Behaviour::EchoSource => "cat \"$2\" >&2\nexit 1",
        Behaviour::Hang => "exec sleep 30",
    };
    let body = format!("{}\n{}", version_check(behaviour, "typst 0.11.0 (stub)"), work);
    write_script(dir, "typst", &body)
}

pub fn magick_stub(dir: &Path, behaviour: Behaviour, fixture: &Path) -> PathBuf {
    let work = match behaviour {
        Behaviour::Succeed | Behaviour::FailProbe | Behaviour::EchoSource => format!(
            "for last; do :; done\ncp \"{}\" \"$last\"",
            fixture.display()
        ),
        Behaviour::Fail => "echo \"convert: no images defined\" >&2\nexit 1".to_string(),
        Behaviour::Hang => "exec sleep 30".to_string(),
    };
    let body = format!(
        "{}\n{}",
        version_check(behaviour, "Version: ImageMagick 7.1.1-0 (stub)"),
        work
    );
    write_script(dir, "magick", &body)
}

pub fn write_fixture_png(dir: &Path) -> PathBuf {
    let path = dir.join("fixture.png");
    RgbaImage::from_pixel(PREVIEW_WIDTH, PREVIEW_HEIGHT, Rgba([255, 255, 255, 255]))
        .save(&path)
        .unwrap();
    path
}

/// A temp directory holding stub tools and a separate work directory
pub struct Harness {
    pub temp: TempDir,
    pub config: Config,
}

impl Harness {
    pub fn new(typst: Behaviour, magick: Behaviour) -> Self {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();

        let fixture = write_fixture_png(&bin);
        let config = Config {
            work_dir: temp.path().join("work"),
            typst_path: typst_stub(&bin, typst),
            magick_path: magick_stub(&bin, magick, &fixture),
            tool_timeout_seconds: 5,
            ..Default::default()
        };

        Self { temp, config }
    }

    pub fn work_dir(&self) -> &Path {
        &self.config.work_dir
    }

    /// Number of entries left in the work directory
    pub fn leftovers(&self) -> usize {
        std::fs::read_dir(self.work_dir())
            .map(|d| d.count())
            .unwrap_or(0)
    }
}
