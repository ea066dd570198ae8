/// Errors raised while reading, writing or checking a [`super::CmsConfig`]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// A value is out of range or inconsistent with another one
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
