use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(combo_remap::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid value for '{option}': {message}")]
    #[diagnostic(code(combo_remap::config::invalid))]
    Invalid { option: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
