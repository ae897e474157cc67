/// Configuration failures. These are the only errors an attack surfaces to its
/// caller; per-request failures are recorded in [`crate::AttackResult`] instead.
#[derive(Debug, thiserror::Error)]
pub enum AttackError {
    /// Rate must be a finite number of requests per second above zero.
    #[error("invalid rate {rate}: must be a finite value greater than zero")]
    InvalidRate { rate: f64 },

    #[error("invalid target url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported url scheme '{scheme}' (expected http or https)")]
    UnsupportedScheme { scheme: String },

    #[error("invalid http method '{method}'")]
    InvalidMethod { method: String },

    #[error("invalid header '{name}'")]
    InvalidHeader { name: String },

    #[error("failed to build http client: {source}")]
    Client {
        #[from]
        source: reqwest::Error,
    },

    #[error("failed to read config file '{path}': {source}")]
    ConfigIo {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {source}")]
    ConfigParse {
        #[from]
        source: toml::de::Error,
    },

    #[error("config validation error: {message}")]
    ConfigValidation { message: String },
}
