//! Server errors and their JSON-RPC codes.

/// JSON-RPC 2.0 error codes used by the server.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Server-defined: HTTP verb other than POST on the endpoint.
    pub const METHOD_NOT_ALLOWED: i64 = -32000;
    pub const TRANSPORT_ERROR: i64 = -32002;
    /// Server-defined: request arrived before `initialize`.
    pub const NOT_INITIALIZED: i64 = -32003;
}

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Malformed message: {message}")]
    ParseError { message: String },

    #[error("Not a valid JSON-RPC 2.0 request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown method '{method}'")]
    MethodNotFound { method: String },

    #[error("Bad params: {message}")]
    InvalidParams { message: String },

    #[error("Server failure: {message}")]
    InternalError { message: String },

    #[error("No tool named '{name}'; this server only offers 'deep-research'")]
    ToolNotFound { name: String },

    #[error("Method not allowed.")]
    MethodNotAllowed,

    #[error("Transport failure: {message}")]
    TransportError { message: String },

    #[error("Call 'initialize' before any other request")]
    NotInitialized,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Code carried in the JSON-RPC error object.
    pub fn error_code(&self) -> i64 {
        use codes::*;
        match self {
            Self::ParseError { .. } | Self::Json(_) => PARSE_ERROR,
            Self::InvalidRequest { .. } => INVALID_REQUEST,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND,
            Self::InvalidParams { .. } | Self::ToolNotFound { .. } => INVALID_PARAMS,
            Self::InternalError { .. } | Self::Io(_) => INTERNAL_ERROR,
            Self::MethodNotAllowed => METHOD_NOT_ALLOWED,
            Self::TransportError { .. } => TRANSPORT_ERROR,
            Self::NotInitialized => NOT_INITIALIZED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_maps_to_invalid_params() {
        let err = McpError::ToolNotFound {
            name: "web-search".into(),
        };
        assert_eq!(err.error_code(), codes::INVALID_PARAMS);
        assert!(err.to_string().contains("web-search"));
    }

    #[test]
    fn test_server_defined_codes() {
        assert_eq!(McpError::MethodNotAllowed.error_code(), -32000);
        assert_eq!(McpError::MethodNotAllowed.to_string(), "Method not allowed.");
        assert_eq!(McpError::NotInitialized.error_code(), -32003);
    }

    #[test]
    fn test_broken_pipe_is_internal() {
        let err: McpError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert_eq!(err.error_code(), codes::INTERNAL_ERROR);
    }

    #[test]
    fn test_malformed_message_code() {
        let err = McpError::ParseError {
            message: "expected value at line 1".into(),
        };
        assert_eq!(err.error_code(), -32700);
    }
}
