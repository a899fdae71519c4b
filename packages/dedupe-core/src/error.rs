use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Signature parameter mismatch: {0}")]
    ParamsMismatch(String),

    #[error("Invalid band partition: {num_hashes} hashes cannot split into {bands} bands of {rows} rows")]
    InvalidPartition {
        num_hashes: usize,
        bands: usize,
        rows: usize,
    },
}

impl CoreError {
    pub fn invalid_config<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidConfig(e.to_string())
    }

    pub fn params_mismatch<E: std::fmt::Display>(e: E) -> Self {
        Self::ParamsMismatch(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::invalid_config("weights sum to zero");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: weights sum to zero"
        );

        let err = CoreError::InvalidPartition {
            num_hashes: 128,
            bands: 16,
            rows: 9,
        };
        assert!(err.to_string().contains("128"));
    }
}
