use std::error::Error as StdError;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("feature {0:?} was not declared by this application")]
    FeatureNotRegistered(String),

    #[error("feature {0:?} is declared more than once")]
    FeatureNameCollision(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    #[error("node rejected environment {0:?}")]
    EnvironmentMismatch(String),

    #[error("node unreachable: {message}")]
    NodeUnreachable { message: String, code: Option<i32> },

    #[error("node rejected registration with status {status}")]
    RegistrationFailed { status: u16 },

    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    pub(crate) fn unreachable(error: &reqwest::Error) -> Self {
        ClientError::NodeUnreachable {
            message: error.to_string(),
            code: os_error_code(error),
        }
    }
}

/// Socket error code of the first I/O error in the source chain, if any.
fn os_error_code(error: &(dyn StdError + 'static)) -> Option<i32> {
    let mut source = Some(error);
    while let Some(current) = source {
        if let Some(io_error) = current.downcast_ref::<std::io::Error>() {
            if let Some(code) = io_error.raw_os_error() {
                return Some(code);
            }
        }
        source = current.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(thiserror::Error, Debug)]
    #[error("connect failed")]
    struct Wrapper(#[source] std::io::Error);

    #[test]
    fn test_os_error_code_follows_source_chain() {
        let refused = std::io::Error::from_raw_os_error(111);
        let wrapped = Wrapper(refused);
        assert_eq!(os_error_code(&wrapped), Some(111));

        let plain = std::io::Error::other("no code");
        assert_eq!(os_error_code(&plain), None);
    }
}
