use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HookError {
    #[error("failed to decode VMI descriptor: {message}")]
    #[diagnostic(help("the descriptor must be a JSON object with string annotations"))]
    DescriptorDecode { message: String },

    #[error("failed to decode domain XML: {message}")]
    DocumentDecode { message: String },

    #[error("failed to decode qemu arguments '{value}': {message}")]
    #[diagnostic(help("the value must be a JSON array of strings, e.g. [\"-foo\",\"-bar\"]"))]
    QemuArgsDecode { value: String, message: String },

    #[error("failed to encode domain XML: {message}")]
    DocumentEncode { message: String },

    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("hook call failed: {message}")]
    Rpc { message: String },

    #[error("server terminated after a fatal call error: {reason}")]
    Terminated { reason: String },
}

impl HookError {
    /// Whether this error aborts the whole OnDefineDomain call.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, HookError::QemuArgsDecode { .. })
    }
}
