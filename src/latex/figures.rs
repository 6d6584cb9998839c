//! Figures: image resolution, rasterization, captions and ranking.

use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Result, TexDeckError};
use crate::latex::diagnostics::{DiagnosticSink, LatexWarning};
use crate::latex::tree::{nodes_source, Node, TexTree};

/// Extensions tried, in order, when an image reference has none.
pub const IMAGE_EXTENSIONS: [&str; 5] = [".png", ".jpg", ".jpeg", ".pdf", ".eps"];

/// Caption used when a figure declares none.
pub const MISSING_CAPTION: &str = "- Incorrectly specified caption -";

pub const FIGURE_ENVIRONMENTS: [&str; 2] = ["figure", "figure*"];

/// Commands whose last argument names an image.
const IMAGE_COMMANDS: [&str; 3] = ["includegraphics", "plotone", "plottwo"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Figure {
    /// 1-based position among the document's figures.
    pub number: usize,
    pub images: Vec<PathBuf>,
    pub caption: String,
    pub label: String,
}

impl Figure {
    /// Image block followed by the caption line.
    pub fn to_markdown(&self) -> String {
        let images = if self.images.len() > 1 {
            let width = 100 / self.images.len();
            self.images
                .iter()
                .enumerate()
                .map(|(sub, image)| {
                    format!(
                        "<img src=\"{}\" alt=\"Fig{}.{}\" width=\"{}%\"/>",
                        image.display(),
                        self.number,
                        sub + 1,
                        width
                    )
                })
                .collect::<String>()
        } else {
            let image = self.images.first().map(|p| p.display().to_string()).unwrap_or_default();
            format!("<img src=\"{}\" alt=\"Fig{}\" width=\"100%\"/>", image, self.number)
        };
        format!("{}\n\n**Figure {}. -** {} (*{}*)", images, self.number, self.caption, self.label)
    }
}

/// Turns vector images into PNG files written next to them.
pub trait Rasterizer {
    /// One PNG per page.
    fn rasterize_pdf(&self, pdf: &Path, dpi: u32) -> Result<Vec<PathBuf>>;
    fn rasterize_eps(&self, eps: &Path, dpi: u32) -> Result<PathBuf>;
}

/// Shells out to `pdftoppm` (poppler) and `gs` (ghostscript).
#[derive(Debug, Default, Clone, Copy)]
pub struct ExternalRasterizer;

fn run(command: &mut Command, path: &Path) -> Result<()> {
    debug!("Running {:?}", command);
    let output = command.output().map_err(|e| TexDeckError::Rasterize {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !output.status.success() {
        return Err(TexDeckError::Rasterize {
            path: path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

fn stem_and_dir(path: &Path) -> (String, PathBuf) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    (stem, dir)
}

impl Rasterizer for ExternalRasterizer {
    fn rasterize_pdf(&self, pdf: &Path, dpi: u32) -> Result<Vec<PathBuf>> {
        let (stem, dir) = stem_and_dir(pdf);
        let prefix = dir.join(format!("{}.page", stem));
        run(
            Command::new("pdftoppm")
                .arg("-png")
                .arg("-cropbox")
                .arg("-r")
                .arg(dpi.to_string())
                .arg(pdf)
                .arg(&prefix),
            pdf,
        )?;

        // pdftoppm writes <prefix>-<page>.png with zero padded page numbers
        let page_prefix = format!("{}.page-", stem);
        let mut pages: Vec<(usize, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let Some(number) = name
                .strip_prefix(&page_prefix)
                .and_then(|rest| rest.strip_suffix(".png"))
                .and_then(|n| n.parse().ok())
            else {
                continue;
            };
            pages.push((number, path));
        }
        pages.sort();

        let single = pages.len() == 1;
        let mut images = Vec::with_capacity(pages.len());
        for (number, page) in pages {
            let target = if single {
                dir.join(format!("{}.png", stem))
            } else {
                dir.join(format!("{}.{}.png", stem, number))
            };
            fs::rename(&page, &target)?;
            images.push(target);
        }
        if images.is_empty() {
            return Err(TexDeckError::Rasterize {
                path: pdf.to_path_buf(),
                reason: "no page was produced".to_string(),
            });
        }
        Ok(images)
    }

    fn rasterize_eps(&self, eps: &Path, dpi: u32) -> Result<PathBuf> {
        let (stem, dir) = stem_and_dir(eps);
        let target = dir.join(format!("{}.png", stem));
        run(
            Command::new("gs")
                .args(["-dSAFER", "-dBATCH", "-dNOPAUSE", "-dEPSCrop", "-sDEVICE=png16m"])
                .arg(format!("-r{}", dpi))
                .arg(format!("-sOutputFile={}", target.display()))
                .arg(eps),
            eps,
        )?;
        Ok(target)
    }
}

/// Leaves every image as it is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughRasterizer;

impl Rasterizer for PassthroughRasterizer {
    fn rasterize_pdf(&self, pdf: &Path, _dpi: u32) -> Result<Vec<PathBuf>> {
        Ok(vec![pdf.to_path_buf()])
    }

    fn rasterize_eps(&self, eps: &Path, _dpi: u32) -> Result<PathBuf> {
        Ok(eps.to_path_buf())
    }
}

/// How figures are read from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FigureSettings {
    pub recover_extensions: bool,
    pub pdf_dpi: u32,
    pub eps_dpi: u32,
}

impl Default for FigureSettings {
    fn default() -> Self {
        Self { recover_extensions: true, pdf_dpi: 500, eps_dpi: 300 }
    }
}

/// Directories listed by `\graphicspath`, relative to `folder`, followed by
/// `folder` itself.
pub fn graphics_search_path(tree: &TexTree, folder: &Path) -> Vec<PathBuf> {
    let mut path = Vec::new();
    if let Some(arg) = tree.find("graphicspath").and_then(Node::last_required_arg) {
        let groups: Vec<&Node> = arg.contents.iter().filter(|n| matches!(n, Node::Group(_))).collect();
        let entries: Vec<String> = if groups.is_empty() {
            vec![nodes_source(&arg.contents)]
        } else {
            groups.iter().map(|group| nodes_source(group.children())).collect()
        };
        for entry in entries {
            let entry = entry.trim();
            if !entry.is_empty() {
                path.push(folder.join(entry));
            }
        }
    }
    if !path.iter().any(|dir| dir == folder) {
        path.push(folder.to_path_buf());
    }
    path
}

/// Find the file an image reference points to: the literal name in every
/// search directory first, then each known extension appended.
pub fn resolve_graphics(reference: &str, search_path: &[PathBuf], recover_extensions: bool) -> Result<PathBuf> {
    let reference = reference.trim();
    for dir in search_path {
        let candidate = dir.join(reference);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    if recover_extensions {
        for dir in search_path {
            for extension in IMAGE_EXTENSIONS {
                let candidate = dir.join(format!("{}{}", reference, extension));
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
    }
    Err(TexDeckError::ImageNotFound {
        reference: reference.to_string(),
        searched: search_path.to_vec(),
    })
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// Rasterize PDF and EPS images; other formats pass through. A failed
/// conversion keeps the original file.
pub fn convert_images(
    images: Vec<PathBuf>,
    settings: &FigureSettings,
    rasterizer: &dyn Rasterizer,
    sink: &dyn DiagnosticSink,
) -> Vec<PathBuf> {
    let mut converted = Vec::with_capacity(images.len());
    for image in images {
        let result = if has_extension(&image, "pdf") {
            rasterizer.rasterize_pdf(&image, settings.pdf_dpi)
        } else if has_extension(&image, "eps") {
            rasterizer.rasterize_eps(&image, settings.eps_dpi).map(|png| vec![png])
        } else {
            converted.push(image);
            continue;
        };
        match result {
            Ok(pngs) => converted.extend(pngs),
            Err(e) => {
                sink.report(LatexWarning::RasterizeFailed { path: image.clone(), reason: e.to_string() });
                converted.push(image);
            }
        }
    }
    converted
}

fn image_references(figure: &Node) -> Vec<String> {
    let mut references = Vec::new();
    for command in figure.find_all(&IMAGE_COMMANDS) {
        let names: Vec<String> = match command.name() {
            Some("plottwo") => command
                .required_args()
                .map(|arg| nodes_source(&arg.contents))
                .collect(),
            _ => command
                .last_required_arg()
                .map(|arg| vec![nodes_source(&arg.contents)])
                .unwrap_or_default(),
        };
        references.extend(names.into_iter().map(|name| name.trim().to_string()).filter(|n| !n.is_empty()));
    }
    references
}

fn caption_of(figure: &Node) -> Option<String> {
    let captions = figure.find_all(&["caption"]);
    if captions.is_empty() {
        return None;
    }
    let caption: String = captions
        .iter()
        .filter_map(|caption| caption.last_required_arg())
        .map(|arg| nodes_source(&arg.contents))
        .collect();
    Some(caption.replace('~', " ").trim().to_string())
}

fn label_of(figure: &Node) -> String {
    figure
        .find_all(&["label"])
        .first()
        .and_then(|label| label.last_required_arg())
        .map(|arg| nodes_source(&arg.contents).trim().to_string())
        .unwrap_or_default()
}

/// Every figure of the tree, numbered in source order.
pub fn extract_figures(
    tree: &TexTree,
    search_path: &[PathBuf],
    settings: &FigureSettings,
    rasterizer: &dyn Rasterizer,
    sink: &dyn DiagnosticSink,
) -> Result<Vec<Figure>> {
    let mut figures = Vec::new();
    for (index, node) in tree.find_all(&FIGURE_ENVIRONMENTS).into_iter().enumerate() {
        let number = index + 1;
        let images = image_references(node)
            .iter()
            .map(|reference| resolve_graphics(reference, search_path, settings.recover_extensions))
            .collect::<Result<Vec<_>>>()?;
        let images = convert_images(images, settings, rasterizer, sink);

        let caption = caption_of(node).unwrap_or_else(|| {
            sink.report(LatexWarning::MissingCaption { figure: number });
            MISSING_CAPTION.to_string()
        });
        let label = label_of(node);

        figures.push(Figure { number, images, caption, label });
    }
    info!("Extracted {} figures", figures.len());
    Ok(figures)
}

/// Rank figures by how often their label occurs in `text` and keep the `n`
/// most cited. Equal counts keep source order; an empty label counts zero.
pub fn select_most_cited_figures<'f>(figures: &'f [Figure], text: &str, n: usize) -> Vec<&'f Figure> {
    let mut ranked: Vec<(usize, &Figure)> = figures
        .iter()
        .map(|figure| {
            let count = if figure.label.is_empty() { 0 } else { text.matches(figure.label.as_str()).count() };
            (count, figure)
        })
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked.into_iter().take(n).map(|(_, figure)| figure).collect()
}
