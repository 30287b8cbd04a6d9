/// Errors raised while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Invalid(Box<figment::Error>),
}

impl From<figment::Error> for SettingsError {
    fn from(e: figment::Error) -> Self {
        Self::Invalid(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;
