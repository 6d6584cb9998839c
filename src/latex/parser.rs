use log::info;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::ZipArchive;
use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::{Result, TexDeckError};
use crate::latex::diagnostics::{DiagnosticSink, LatexWarning};

/// Markers identifying the document's entry point.
const DOCUMENT_CLASS_MARKERS: [&str; 2] = ["\\documentclass", "\\documentstyle"];

/// Find every file with the given extension below `dir`, sorted by path
fn find_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
        {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

/// Find all TeX files in a directory
pub fn find_tex_files(dir: &Path) -> Result<Vec<PathBuf>> {
    find_files_with_extension(dir, "tex")
}

/// Find all BBL files in a directory
pub fn find_bbl_files(dir: &Path) -> Result<Vec<PathBuf>> {
    find_files_with_extension(dir, "bbl")
}

/// Find all BibTeX files in a directory
pub fn find_bib_files(dir: &Path) -> Result<Vec<PathBuf>> {
    find_files_with_extension(dir, "bib")
}

/// Find the main LaTeX file in a directory.
///
/// A lone `.tex` file is returned without being read. Otherwise the first
/// file (in path order) declaring a document class wins.
pub fn find_main_tex_file(dir: &Path, sink: &dyn DiagnosticSink) -> Result<PathBuf> {
    let tex_files = find_tex_files(dir)?;

    if let [single] = tex_files.as_slice() {
        return Ok(single.clone());
    }
    if tex_files.is_empty() {
        return Err(TexDeckError::MainDocumentNotFound(dir.to_path_buf()));
    }

    sink.report(LatexWarning::MultipleMainCandidates { count: tex_files.len() });
    for file in &tex_files {
        let bytes = fs::read(file)?;
        let content = String::from_utf8_lossy(&bytes);
        if DOCUMENT_CLASS_MARKERS.iter().any(|marker| content.contains(marker)) {
            sink.report(LatexWarning::MainDocumentChosen { path: file.clone() });
            return Ok(file.clone());
        }
    }

    Err(TexDeckError::MainDocumentNotFound(dir.to_path_buf()))
}

/// Resolve the file referenced by `\input{name}` or `\include{name}`.
///
/// A path relative to `base_dir` wins as long as it stays inside `base_dir`;
/// otherwise the candidates are matched by base file name, ignoring the
/// extension. Absolute paths and `..` escapes never reach outside the tree.
pub fn resolve_input_path(base_dir: &Path, candidates: &[PathBuf], name: &str) -> Option<PathBuf> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut direct = vec![base_dir.join(name)];
    if !name.ends_with(".tex") {
        direct.push(base_dir.join(format!("{}.tex", name)));
    }
    if let Some(path) = direct.into_iter().find(|path| path.is_file() && is_inside(base_dir, path)) {
        return Some(path);
    }

    let wanted = Path::new(name).file_stem()?;
    candidates
        .iter()
        .find(|candidate| candidate.file_stem() == Some(wanted))
        .cloned()
}

/// Whether `path` resolves, symlinks included, to somewhere below `dir`.
fn is_inside(dir: &Path, path: &Path) -> bool {
    match (dir.canonicalize(), path.canonicalize()) {
        (Ok(dir), Ok(path)) => path.starts_with(dir),
        _ => false,
    }
}

/// Read a source file, replacing invalid UTF-8 sequences
pub fn read_source(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// A paper's source folder, possibly unpacked from an archive.
pub struct SourceFolder {
    pub path: PathBuf,
    // Temporary directory (keep alive while the folder is used)
    temp_dir: Option<TempDir>,
}

impl SourceFolder {
    /// Use `path` directly when it is a directory, or extract it when it is a
    /// `.zip`, `.tar.gz` or `.tgz` archive.
    pub fn open(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(Self { path: path.to_path_buf(), temp_dir: None });
        }

        let temp_dir = TempDir::new()?;
        extract_source(path, temp_dir.path())?;
        Ok(Self { path: temp_dir.path().to_path_buf(), temp_dir: Some(temp_dir) })
    }

    /// Like [`SourceFolder::open`], but an archive is extracted into `target`,
    /// which is created when missing and left in place afterwards.
    pub fn open_into(path: &Path, target: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(Self { path: path.to_path_buf(), temp_dir: None });
        }

        fs::create_dir_all(target)?;
        extract_source(path, target)?;
        Ok(Self { path: target.to_path_buf(), temp_dir: None })
    }

    /// Whether the folder is deleted when this value is dropped.
    pub fn is_temporary(&self) -> bool {
        self.temp_dir.is_some()
    }

    /// Keep a temporary extraction on disk once this value is dropped.
    /// Returns the directory that is now left behind, if any.
    pub fn persist(&mut self) -> Option<PathBuf> {
        self.temp_dir.take().map(TempDir::keep)
    }
}

fn extract_source(path: &Path, target: &Path) -> Result<()> {
    let archive = fs::File::open(path)?;
    extract_archive(archive, target).map_err(|e| match e {
        TexDeckError::Io(_) => TexDeckError::UnsupportedArchive(path.to_path_buf()),
        other => other,
    })?;
    info!("Extracted {:?} into {:?}", path, target);
    Ok(())
}

/// Extract archive (supports ZIP and TAR.GZ)
pub fn extract_archive<R: Read + Seek>(mut archive: R, output_dir: &Path) -> Result<()> {
    // Try to open as ZIP first
    match ZipArchive::new(&mut archive) {
        Ok(mut zip) => {
            info!("Extracting ZIP archive");
            for i in 0..zip.len() {
                let mut file = zip.by_index(i)?;
                let outpath = match file.enclosed_name() {
                    Some(path) => output_dir.join(path),
                    None => continue,
                };

                if file.name().ends_with('/') {
                    fs::create_dir_all(&outpath)?;
                } else {
                    if let Some(p) = outpath.parent() {
                        fs::create_dir_all(p)?;
                    }
                    let mut outfile = fs::File::create(&outpath)?;
                    io::copy(&mut file, &mut outfile)?;
                }
            }
            Ok(())
        }
        Err(_) => {
            // Rewind the file
            archive.seek(SeekFrom::Start(0))?;

            info!("Trying to extract as TAR.GZ archive");
            let gz = GzDecoder::new(archive);
            let mut tar = Archive::new(gz);
            tar.unpack(output_dir)?;
            Ok(())
        }
    }
}
