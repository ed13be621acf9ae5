//! Error aggregation for batch operations.

use std::error::Error;
use std::fmt;

type BoxError = Box<dyn Error + Send + Sync>;

/// Collects errors from a batch so one failing item does not starve the
/// rest. Empty aggregates convert to `Ok(())`.
#[derive(Debug, Default)]
pub struct Aggregate {
    errors: Vec<BoxError>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error.
    pub fn push(&mut self, err: impl Into<BoxError>) {
        self.errors.push(err.into());
    }

    /// Record the error of a result, if any.
    pub fn extend_from<T, E: Into<BoxError>>(&mut self, result: Result<T, E>) {
        if let Err(e) = result {
            self.push(e);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok(())` when nothing was collected, the aggregate itself otherwise.
    pub fn into_result(self) -> Result<(), Aggregate> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => write!(f, "no errors"),
            1 => write!(f, "{}", self.errors[0]),
            n => {
                write!(f, "{n} errors: ")?;
                for (i, e) in self.errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{e}")?;
                }
                Ok(())
            }
        }
    }
}

impl Error for Aggregate {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_aggregate_is_ok() {
        let agg = Aggregate::new();
        assert!(agg.is_empty());
        assert!(agg.into_result().is_ok());
    }

    #[test]
    fn collects_and_formats() {
        let mut agg = Aggregate::new();
        agg.push(std::io::Error::new(std::io::ErrorKind::Other, "first"));
        agg.push(std::io::Error::new(std::io::ErrorKind::Other, "second"));
        assert_eq!(agg.len(), 2);
        let err = agg.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("first"));
        assert!(msg.contains("second"));
    }

    #[test]
    fn single_error_formats_bare() {
        let mut agg = Aggregate::new();
        agg.push(std::io::Error::new(std::io::ErrorKind::Other, "only"));
        assert_eq!(agg.to_string(), "only");
    }
}
