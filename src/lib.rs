pub mod error;
pub mod latex;

pub use error::{Result, TexDeckError};
pub use latex::{generate_markdown_text, replace_citations, Bibliography, DocumentBuilder, DocumentOptions, LatexDocument};
