//! Input preparation: safe zip extraction and main document discovery.

use crate::{Error, Result};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Maximum number of entries accepted in an uploaded archive.
pub const MAX_ENTRIES: usize = 1000;
/// Maximum total uncompressed size (zip-bomb guard).
pub const MAX_UNCOMPRESSED_BYTES: u64 = 50 * 1024 * 1024;

/// Summary of a successfully extracted archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveStats {
    pub entries: usize,
    pub uncompressed_bytes: u64,
}

impl ArchiveStats {
    pub fn size_mb(&self) -> f64 {
        self.uncompressed_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Turn an input path into a directory tree that contains the page.
///
/// - `.zip`: extracted into `work_dir/extract`
/// - `.html`/`.htm`: copied to `work_dir/extract/index.html`
/// - directory: used in place
pub fn prepare_input(input: &Path, work_dir: &Path) -> Result<PathBuf> {
    if input.is_dir() {
        return Ok(input.to_path_buf());
    }
    if !input.is_file() {
        return Err(Error::UnsupportedInput(format!("{} does not exist", input.display())));
    }

    let extension = input
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let extract_dir = work_dir.join("extract");
    match extension.as_str() {
        "zip" => {
            std::fs::create_dir_all(&extract_dir)?;
            let stats = extract_zip(input, &extract_dir)?;
            log::info!(
                "extracted {} entries ({:.1} MB) from {}",
                stats.entries,
                stats.size_mb(),
                input.display()
            );
            Ok(extract_dir)
        }
        "html" | "htm" => {
            std::fs::create_dir_all(&extract_dir)?;
            std::fs::copy(input, extract_dir.join("index.html"))?;
            Ok(extract_dir)
        }
        _ => Err(Error::UnsupportedInput(format!(
            "{}: expected a .zip, .html or .htm file",
            input.display()
        ))),
    }
}

/// Validate every entry of `zip_path`, then extract it into `dest`.
///
/// Nothing is written unless the whole archive passes the checks. Symbolic
/// link entries are rejected along with traversal and absolute names.
pub fn extract_zip(zip_path: &Path, dest: &Path) -> Result<ArchiveStats> {
    let mut archive = zip::ZipArchive::new(File::open(zip_path)?)?;

    let entries = archive.len();
    if entries == 0 {
        return Err(Error::ArchiveError("ZIP file is empty".into()));
    }
    if entries > MAX_ENTRIES {
        return Err(Error::ArchiveError(format!(
            "ZIP contains too many files ({}). Maximum {} files allowed.",
            entries, MAX_ENTRIES
        )));
    }

    let mut total: u64 = 0;
    for i in 0..entries {
        let entry = archive.by_index_raw(i)?;
        if is_unsafe_entry(entry.name()) {
            return Err(Error::UnsafePath(entry.name().to_string()));
        }
        // Extraction would materialize these as real links pointing anywhere.
        if entry.is_symlink() {
            return Err(Error::UnsafePath(format!("{} (symbolic link)", entry.name())));
        }
        total = total.saturating_add(entry.size());
    }

    let stats = ArchiveStats {
        entries,
        uncompressed_bytes: total,
    };
    if total > MAX_UNCOMPRESSED_BYTES {
        return Err(Error::ArchiveError(format!(
            "Uncompressed size too large ({:.1} MB). Maximum 50 MB allowed.",
            stats.size_mb()
        )));
    }

    archive.extract(dest)?;
    Ok(stats)
}

/// Lexically normalize an entry name the way a POSIX `normpath` would.
fn normalize_entry(name: &str) -> String {
    let absolute = name.starts_with('/') || name.starts_with('\\');
    let mut parts: Vec<&str> = Vec::new();
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(p) if *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            p => parts.push(p),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Entries that climb out of the destination or are absolute are rejected.
pub fn is_unsafe_entry(name: &str) -> bool {
    let normalized = normalize_entry(name);
    let has_drive = normalized.len() >= 2 && normalized.as_bytes()[1] == b':';
    normalized.starts_with("..") || normalized.starts_with('/') || has_drive
}

/// Find the page to render: `index.html`/`index.htm` anywhere in the tree,
/// otherwise the first HTML file in sorted walk order.
pub fn find_main_html(root: &Path) -> Result<PathBuf> {
    let mut html_files = Vec::new();
    collect_html(root, &mut html_files)?;

    let main = html_files
        .iter()
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| matches!(n.to_ascii_lowercase().as_str(), "index.html" | "index.htm"))
                .unwrap_or(false)
        })
        .or_else(|| html_files.first())
        .ok_or(Error::NoHtml)?;

    Ok(std::path::absolute(main)?)
}

fn collect_html(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();

    let (dirs, files): (Vec<_>, Vec<_>) = entries.into_iter().partition(|p| p.is_dir());
    for file in files {
        let is_html = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
            .unwrap_or(false);
        if is_html {
            out.push(file);
        }
    }
    for sub in dirs {
        collect_html(&sub, out)?;
    }
    Ok(())
}
