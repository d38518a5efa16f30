//! Archive deployer
//! Extracts a zip into a versioned workdir, infers the launchable entrypoint
//! and optionally runs it

use glob::Pattern;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::domain::ports::{ProcessExecutor, SpawnConfig, SpawnResult};
use crate::domain::{DomainError, Result};

/// Zip-based deployment for one controller start.
///
/// Deployer switches are parsed out of the service's argument string; the
/// remaining tokens become the child's arguments.
pub struct ArchiveDeployer {
    zip_path: PathBuf,
    archive_name: String,
    execute_file: Option<String>,
    overwrite: Vec<Pattern>,
    debug: bool,
    child_args: Vec<String>,
    extract_dir: Option<PathBuf>,
    resolved_exe: Option<PathBuf>,
    last_error: Option<String>,
}

impl ArchiveDeployer {
    pub fn new(zip_path: impl Into<PathBuf>) -> Self {
        let zip_path = zip_path.into();
        let archive_name = zip_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            zip_path,
            archive_name,
            execute_file: None,
            overwrite: Vec::new(),
            debug: false,
            child_args: Vec::new(),
            extract_dir: None,
            resolved_exe: None,
            last_error: None,
        }
    }

    /// Parse deployer switches out of the argument vector. Unknown `-`
    /// options are rejected; everything else is kept for the child.
    pub fn parse(&mut self, argv: &[String]) -> Result<()> {
        for token in argv {
            if token == "-debug" {
                self.debug = true;
            } else if let Some(value) = token.strip_prefix("-name=") {
                if !value.trim().is_empty() {
                    self.archive_name = value.trim().to_string();
                }
            } else if let Some(value) = token.strip_prefix("-exec=") {
                self.execute_file = Some(value.trim().to_string());
            } else if let Some(value) = token.strip_prefix("-file=") {
                self.zip_path = PathBuf::from(value.trim());
                if self.archive_name.is_empty() {
                    if let Some(stem) = self.zip_path.file_stem() {
                        self.archive_name = stem.to_string_lossy().into_owned();
                    }
                }
            } else if let Some(value) = token.strip_prefix("-overwrite=") {
                let globs: Vec<String> = value
                    .split(';')
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| s.trim().to_string())
                    .collect();
                self.add_overwrite_globs(&globs)?;
            } else if token.starts_with('-') {
                return Err(DomainError::InvalidService(format!(
                    "unknown deployer option '{}'",
                    token
                )));
            } else {
                self.child_args.push(token.clone());
            }
        }
        Ok(())
    }

    /// Merge overwrite globs from the deployment overlay
    pub fn add_overwrite_globs(&mut self, globs: &[String]) -> Result<()> {
        for raw in globs {
            let pattern = Pattern::new(raw).map_err(|e| {
                DomainError::InvalidService(format!("bad overwrite glob '{}': {}", raw, e))
            })?;
            self.overwrite.push(pattern);
        }
        Ok(())
    }

    /// Enable stdio capture for the launched entrypoint
    pub fn enable_debug(&mut self) {
        self.debug = true;
    }

    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    pub fn zip_path(&self) -> &Path {
        &self.zip_path
    }

    pub fn child_args(&self) -> &[String] {
        &self.child_args
    }

    pub fn extract_dir(&self) -> Option<&Path> {
        self.extract_dir.as_deref()
    }

    pub fn resolved_exe(&self) -> Option<&Path> {
        self.resolved_exe.as_deref()
    }

    /// Captured stderr tail from the last failed launch, debug mode only
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Resolve the archive path when the service record carries only the
    /// deployment marker: use the `-file=` switch if one was parsed, else the
    /// sole `*.zip` in the workdir.
    pub fn locate_archive(&mut self, work_dir: &Path) -> Result<()> {
        if self.zip_path.as_os_str().is_empty() || !self.zip_path.is_file() {
            let mut zips = Vec::new();
            if let Ok(entries) = fs::read_dir(work_dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    let is_zip = path
                        .extension()
                        .map(|e| e.eq_ignore_ascii_case("zip"))
                        .unwrap_or(false);
                    if path.is_file() && is_zip {
                        zips.push(path);
                    }
                }
            }
            if zips.len() != 1 {
                return Err(DomainError::Extraction(format!(
                    "cannot locate deployment archive in {} ({} candidates)",
                    work_dir.display(),
                    zips.len()
                )));
            }
            self.zip_path = zips.remove(0);
            if self.archive_name.is_empty() {
                if let Some(stem) = self.zip_path.file_stem() {
                    self.archive_name = stem.to_string_lossy().into_owned();
                }
            }
        }
        Ok(())
    }

    /// Unpack the archive into `work_dir/<archive-name>`.
    ///
    /// A destination outside the overwrite set that is newer than the archive
    /// is a local edit and is preserved with a warning.
    pub fn extract(&mut self, work_dir: &Path) -> Result<PathBuf> {
        let file = File::open(&self.zip_path).map_err(|e| {
            DomainError::Extraction(format!("cannot open {}: {}", self.zip_path.display(), e))
        })?;
        let archive_mtime = fs::metadata(&self.zip_path)
            .and_then(|m| m.modified())
            .ok();
        let mut archive = zip::ZipArchive::new(file).map_err(|e| {
            DomainError::Extraction(format!("bad archive {}: {}", self.zip_path.display(), e))
        })?;

        let dest_root = work_dir.join(&self.archive_name);
        fs::create_dir_all(&dest_root)?;

        let mut written = 0usize;
        let mut preserved = 0usize;
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| DomainError::Extraction(format!("entry {}: {}", index, e)))?;
            let rel = match entry.enclosed_name() {
                Some(p) => p.to_owned(),
                None => continue,
            };
            let dest = dest_root.join(&rel);

            if entry.is_dir() {
                fs::create_dir_all(&dest)?;
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }

            if dest.exists() && !self.must_overwrite(&rel) {
                if is_newer_than(&dest, archive_mtime) {
                    warn!(
                        file = %dest.display(),
                        "destination newer than archive, keeping local edit"
                    );
                    preserved += 1;
                    continue;
                }
            }

            let mut out = File::create(&dest)?;
            io::copy(&mut entry, &mut out)?;
            written += 1;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(&dest, fs::Permissions::from_mode(mode));
            }
        }

        info!(
            archive = %self.zip_path.display(),
            dest = %dest_root.display(),
            written = written,
            preserved = preserved,
            "archive extracted"
        );
        self.extract_dir = Some(dest_root.clone());
        Ok(dest_root)
    }

    fn must_overwrite(&self, rel: &Path) -> bool {
        let rel_str = rel.to_string_lossy();
        self.overwrite.iter().any(|p| {
            p.matches(&rel_str)
                || rel
                    .file_name()
                    .map(|n| p.matches(&n.to_string_lossy()))
                    .unwrap_or(false)
        })
    }

    /// Locate the entrypoint. Policy, in order: the explicit execute file,
    /// a `dll`/`jar`/native binary named after the archive, the sole
    /// launchable file in the extraction root.
    pub fn find_exe_file(&mut self) -> Result<PathBuf> {
        let dir = self
            .extract_dir
            .clone()
            .ok_or_else(|| DomainError::MissingEntrypoint("archive not extracted".into()))?;

        if let Some(ref name) = self.execute_file {
            let candidate = dir.join(name);
            if candidate.is_file() {
                self.resolved_exe = Some(candidate.clone());
                return Ok(candidate);
            }
            return Err(DomainError::MissingEntrypoint(format!(
                "configured entrypoint '{}' not found in {}",
                name,
                dir.display()
            )));
        }

        for suffix in [".dll", ".jar", ".exe", ""] {
            let candidate = dir.join(format!("{}{}", self.archive_name, suffix));
            if candidate.is_file() {
                self.resolved_exe = Some(candidate.clone());
                return Ok(candidate);
            }
        }

        let mut candidates = Vec::new();
        for dir_entry in fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            if !path.is_file() {
                continue;
            }
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase());
            if matches!(ext.as_deref(), Some("dll") | Some("jar") | Some("exe")) {
                candidates.push(path);
            }
        }
        if candidates.len() == 1 {
            let exe = candidates.remove(0);
            debug!(exe = %exe.display(), "entrypoint resolved as the sole launchable file");
            self.resolved_exe = Some(exe.clone());
            return Ok(exe);
        }

        Err(DomainError::MissingEntrypoint(format!(
            "no entrypoint for archive '{}' in {} ({} candidates)",
            self.archive_name,
            dir.display(),
            candidates.len()
        )))
    }

    /// Translate the resolved entrypoint into a host command line
    /// (`dotnet x.dll`, `java -jar x.jar`, or the binary itself)
    pub fn launch_command(&self) -> Result<(String, Vec<String>)> {
        let exe = self
            .resolved_exe
            .clone()
            .ok_or_else(|| DomainError::MissingEntrypoint("entrypoint not resolved".into()))?;
        let exe_str = exe.to_string_lossy().into_owned();
        let ext = exe
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());

        let (file_name, mut args) = match ext.as_deref() {
            Some("dll") => ("dotnet".to_string(), vec![exe_str]),
            Some("jar") => ("java".to_string(), vec!["-jar".to_string(), exe_str]),
            _ => (exe_str, Vec::new()),
        };
        args.extend(self.child_args.iter().cloned());
        Ok((file_name, args))
    }

    /// Short process name the launched entrypoint will appear under
    pub fn host_process_name(&self) -> Option<String> {
        let exe = self.resolved_exe.as_deref()?;
        let ext = exe
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match ext.as_deref() {
            Some("dll") => Some("dotnet".to_string()),
            Some("jar") => Some("java".to_string()),
            _ => exe
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned()),
        }
    }

    /// Run the entrypoint. Succeeds when the child is still alive at the
    /// deadline or exited cleanly within it.
    pub async fn execute(
        &mut self,
        executor: &dyn ProcessExecutor,
        start_wait: Duration,
        user_name: Option<String>,
        capture_output: bool,
    ) -> Result<SpawnResult> {
        if self.resolved_exe.is_none() {
            self.find_exe_file()?;
        }
        let (file_name, args) = self.launch_command()?;
        let work_dir = self
            .extract_dir
            .clone()
            .ok_or_else(|| DomainError::MissingEntrypoint("archive not extracted".into()))?;

        let spawned = executor
            .spawn(SpawnConfig {
                file_name,
                args,
                work_dir,
                user_name,
                capture_output: capture_output || self.debug,
            })
            .await?;

        if !start_wait.is_zero() {
            if let Some(report) = spawned.exit.wait(start_wait).await {
                if !report.clean() {
                    self.last_error = report.stderr_tail.clone();
                    return Err(DomainError::EarlyExit {
                        code: report.code.unwrap_or(-1),
                    });
                }
            }
        }
        Ok(spawned)
    }
}

fn is_newer_than(dest: &Path, archive_mtime: Option<SystemTime>) -> bool {
    let Some(archive_mtime) = archive_mtime else {
        return false;
    };
    fs::metadata(dest)
        .and_then(|m| m.modified())
        .map(|dest_mtime| dest_mtime > archive_mtime)
        .unwrap_or(false)
}
