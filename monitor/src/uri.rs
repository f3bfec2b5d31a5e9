use std::path::PathBuf;

use crate::Error;

/// Which store a monitor URI names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorUri {
    File(PathBuf),
    Sqlite(PathBuf),
    /// Recognized, but there is no http store.
    Http(String),
}

impl MonitorUri {
    pub fn parse(uri: &str) -> Result<Self, Error> {
        if let Some(path) = uri.strip_prefix("file://") {
            Ok(Self::File(PathBuf::from(path)))
        } else if let Some(path) = uri.strip_prefix("sqlite://") {
            Ok(Self::Sqlite(PathBuf::from(path)))
        } else if uri.starts_with("http://") || uri.starts_with("https://") {
            Ok(Self::Http(uri.to_owned()))
        } else {
            Err(Error::UnknownScheme(uri.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(
            MonitorUri::parse("sqlite:///tmp/jobs.db").unwrap(),
            MonitorUri::Sqlite("/tmp/jobs.db".into())
        );
        assert_eq!(
            MonitorUri::parse("file://rel/log.txt").unwrap(),
            MonitorUri::File("rel/log.txt".into())
        );
        assert!(matches!(MonitorUri::parse("http://host/q"), Ok(MonitorUri::Http(_))));
        assert!(matches!(MonitorUri::parse("/tmp/jobs.db"), Err(Error::UnknownScheme(_))));
    }
}
