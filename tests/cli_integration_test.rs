use assert_cmd::Command;
use flate2::write::GzEncoder;
use flate2::Compression;
use predicates::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const PAPER: &str = "\\documentclass{article}
\\newcommand{\\kms}{km/s}
\\begin{document}
\\title{Winds at 100\\kms}
\\author{Ada Lovelace \\and Grace Hopper}
\\begin{abstract}
Following \\citet{smith2020}, we measure winds.
\\end{abstract}
\\bibliography{refs}
\\end{document}
";

const REFS: &str = "@article{smith2020,
  author = {Smith, John and Doe, Jane},
  year = {2020},
  doi = {10.1/wind},
}
";

fn write_file(dir: &Path, name: &str, content: &str) {
    let mut file = File::create(dir.join(name)).unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

#[test]
fn test_cli_prints_markdown() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "paper.tex", PAPER);

    let mut cmd = Command::cargo_bin("texdeck").unwrap();
    cmd.arg("-s").arg(dir.path()).arg("--no-rasterize");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("<div class=\"macros\" style=\"visibility:hidden;\">"))
        .stdout(predicate::str::contains("# Winds at 100$\\kms$"))
        .stdout(predicate::str::contains("Ada Lovelace, Grace Hopper"));
}

#[test]
fn test_cli_resolves_citations() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "paper.tex", PAPER);
    write_file(dir.path(), "refs.bib", REFS);

    let mut cmd = Command::cargo_bin("texdeck").unwrap();
    cmd.arg("-s").arg(dir.path()).arg("--no-rasterize");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("[Smith and Doe (2020)](https://doi.org/10.1/wind)"))
        .stdout(predicate::str::contains("\\citet").not());
}

#[test]
fn test_cli_highlight_and_comment() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "paper.tex", PAPER);

    let mut cmd = Command::cargo_bin("texdeck").unwrap();
    cmd.arg("-s")
        .arg(dir.path())
        .arg("--no-rasterize")
        .arg("--highlight")
        .arg("Hopper")
        .arg("--comment")
        .arg("Accepted");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Accepted\n\nAda Lovelace, <mark>Grace Hopper</mark>"));
}

#[test]
fn test_cli_json_report() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "paper.tex", PAPER);

    let mut cmd = Command::cargo_bin("texdeck").unwrap();
    cmd.arg("-s").arg(dir.path()).arg("--json");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"title\": \"Winds at 100\\\\kms\""))
        .stdout(predicate::str::contains("\"Grace Hopper\""));
}

#[test]
fn test_cli_writes_output_file() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "paper.tex", PAPER);
    let output = dir.path().join("summary.md");

    let mut cmd = Command::cargo_bin("texdeck").unwrap();
    cmd.arg("-s").arg(dir.path()).arg("--no-rasterize").arg("-o").arg(&output);
    cmd.assert().success();

    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.contains("<div id=\"abstract\">"));
}

#[test]
fn test_cli_missing_source_fails() {
    let mut cmd = Command::cargo_bin("texdeck").unwrap();
    cmd.arg("-s").arg("/nonexistent/paper");
    cmd.assert().failure();
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("texdeck").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--highlight"));
}

const FIGURE_PAPER: &str = "\\documentclass{article}
\\begin{document}
\\title{Packed}
\\begin{figure}
\\includegraphics{plot}
\\caption{A plot.}\\label{fig:plot}
\\end{figure}
See \\ref{fig:plot}.
\\end{document}
";

fn write_figure_archive(dir: &Path) -> PathBuf {
    write_file(dir, "main.tex", FIGURE_PAPER);
    write_file(dir, "plot.png", "not really a png");
    let archive_path = dir.join("paper.tar.gz");
    let encoder = GzEncoder::new(File::create(&archive_path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_path_with_name(dir.join("main.tex"), "main.tex").unwrap();
    builder.append_path_with_name(dir.join("plot.png"), "plot.png").unwrap();
    builder.into_inner().unwrap().finish().unwrap();
    archive_path
}

fn image_sources(markdown: &str) -> Vec<PathBuf> {
    markdown
        .split("<img src=\"")
        .skip(1)
        .filter_map(|rest| rest.split('"').next())
        .map(PathBuf::from)
        .collect()
}

#[test]
fn test_cli_archive_images_outlive_the_run() {
    let dir = tempdir().unwrap();
    let archive_path = write_figure_archive(dir.path());

    let mut cmd = Command::cargo_bin("texdeck").unwrap();
    let output = cmd.arg("-s").arg(&archive_path).arg("--no-rasterize").output().unwrap();
    assert!(output.status.success());

    let markdown = String::from_utf8(output.stdout).unwrap();
    let images = image_sources(&markdown);
    assert_eq!(images.len(), 1);
    assert!(images[0].ends_with("plot.png"));
    assert!(images[0].is_file());

    if let Some(extracted) = images[0].parent() {
        std::fs::remove_dir_all(extracted).unwrap();
    }
}

#[test]
fn test_cli_extract_to() {
    let dir = tempdir().unwrap();
    let archive_path = write_figure_archive(dir.path());
    let target = dir.path().join("unpacked");

    let mut cmd = Command::cargo_bin("texdeck").unwrap();
    let output = cmd
        .arg("-s")
        .arg(&archive_path)
        .arg("--no-rasterize")
        .arg("--extract-to")
        .arg(&target)
        .output()
        .unwrap();
    assert!(output.status.success());

    let markdown = String::from_utf8(output.stdout).unwrap();
    assert_eq!(image_sources(&markdown), vec![target.join("plot.png")]);
    assert!(target.join("plot.png").is_file());
    assert!(target.join("main.tex").is_file());
}
