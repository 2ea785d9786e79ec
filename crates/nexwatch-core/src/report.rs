//! Cycle reports and the most-recent-first report files.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;

pub const COMMON_REPORT_FILE: &str = "common_diff_output.txt";
pub const DETAIL_REPORT_FILE: &str = "all_diff_output.txt";

const BANNER_WIDTH: usize = 40;
const FOOTER_WIDTH: usize = 102;

fn frame(taken_at: &DateTime<Local>, body: &str) -> String {
    let rule = "-".repeat(BANNER_WIDTH);
    format!(
        "\n{rule} {} {rule}\n{body}\n{}",
        taken_at.format("%Y-%b-%d %X"),
        "-".repeat(FOOTER_WIDTH)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSection {
    pub monitor: &'static str,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub host: String,
    pub taken_at: DateTime<Local>,
    /// Changed monitors only, in registration order.
    pub sections: Vec<ReportSection>,
}

impl CycleReport {
    pub fn is_changed(&self) -> bool {
        !self.sections.is_empty()
    }

    pub fn section(&self, monitor: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|section| section.monitor == monitor)
    }

    pub fn render(&self) -> String {
        let body = if self.is_changed() {
            self.sections.iter().map(|section| section.body.as_str()).collect::<String>()
        } else {
            format!("{} does not change.\n", self.host)
        };
        frame(&self.taken_at, &body)
    }
}

#[derive(Debug, Clone)]
pub struct DetailReport {
    pub taken_at: DateTime<Local>,
    /// `None` when nothing outside the volatile fields moved.
    pub changes: Option<String>,
}

impl DetailReport {
    pub fn render(&self) -> String {
        match &self.changes {
            Some(changes) => frame(&self.taken_at, &format!("   {changes}")),
            None => frame(&self.taken_at, "None\n"),
        }
    }
}

#[derive(Debug, Error)]
#[error("report file {}: {source}", path.display())]
pub struct ReportLogError {
    path: PathBuf,
    #[source]
    source: io::Error,
}

impl ReportLogError {
    fn at(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportLog {
    path: PathBuf,
}

impl ReportLog {
    /// Starts a fresh log, removing whatever a previous run left behind.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, ReportLogError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(ReportLogError::at(parent))?;
        }
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(ReportLogError::at(&path)(err)),
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn prepend(&self, text: &str) -> Result<(), ReportLogError> {
        let previous = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(ReportLogError::at(&self.path)(err)),
        };

        let mut staging = self.path.clone().into_os_string();
        staging.push(".bak");
        let staging = PathBuf::from(staging);

        let write = || -> io::Result<()> {
            let mut file = File::create(&staging)?;
            file.write_all(text.as_bytes())?;
            file.write_all(b"\n")?;
            file.write_all(&previous)?;
            file.sync_all()
        };
        write().map_err(ReportLogError::at(&staging))?;
        fs::rename(&staging, &self.path).map_err(ReportLogError::at(&self.path))
    }
}
