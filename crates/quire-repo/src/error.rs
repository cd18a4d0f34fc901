//! Error types for repository operations

use std::error::Error;
use std::fmt;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Repository operation error with rich diagnostics
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct RepoError {
    kind: RepoErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for repository operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoErrorKind {
    /// Record operation attempted before the repository was initialized
    NotInitialized,
    /// Record, block, or commit not found
    NotFound,
    /// Record or repository already exists
    AlreadyExists,
    /// A swap check failed (expected CID did not match current state)
    ConcurrencyConflict,
    /// Value could not be canonically encoded or decoded
    Encoding,
    /// Signing or signature verification failed
    Signature,
    /// Block store operation failed
    Storage,
    /// Invalid MST structure
    InvalidMst,
    /// Invalid commit or broken commit chain
    InvalidCommit,
    /// Invalid key format
    InvalidKey,
    /// Codec or hash algorithm combination that cannot be used
    UnsupportedCodec,
    /// CAR file operation failed
    Car,
    /// I/O error
    Io,
}

impl RepoError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: RepoErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    /// Add a help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add context information to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> &RepoErrorKind {
        &self.kind
    }

    /// Check the error kind
    pub fn is(&self, kind: RepoErrorKind) -> bool {
        self.kind == kind
    }

    // Constructors for different error kinds

    /// Create a not-initialized error
    pub fn not_initialized() -> Self {
        Self::new(RepoErrorKind::NotInitialized, None)
            .with_help("call initialize() or import() before writing records")
    }

    /// Create a not found error
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::new(RepoErrorKind::NotFound, None)
            .with_context(format!("{} not found: {}", resource, id))
    }

    /// Create an already exists error
    pub fn already_exists(resource: &str, id: impl fmt::Display) -> Self {
        Self::new(RepoErrorKind::AlreadyExists, None)
            .with_context(format!("{} already exists: {}", resource, id))
    }

    /// Create a concurrency conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::ConcurrencyConflict, None)
            .with_context(msg)
            .with_help("re-read the current state and retry with fresh swap values")
    }

    /// Create an encoding error from a source error
    pub fn encoding(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Encoding, Some(Box::new(source)))
    }

    /// Create an encoding error from a message
    pub fn encoding_msg(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::Encoding, Some(msg.into().into()))
    }

    /// Create a signature error
    pub fn signature(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Signature, Some(Box::new(source)))
    }

    /// Create a storage error
    pub fn storage(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Storage, Some(Box::new(source)))
    }

    /// Create a storage error from a message
    pub fn storage_msg(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::Storage, Some(msg.into().into()))
    }

    /// Create an invalid MST error
    pub fn invalid_mst(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidMst, Some(msg.into().into()))
            .with_help("MST nodes must follow the canonical layer structure")
    }

    /// Create an invalid commit error
    pub fn invalid_commit(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidCommit, Some(msg.into().into()))
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidKey, None)
            .with_help("keys must match [a-zA-Z0-9._:~-/]+, max 1024 bytes")
            .with_context(format!("key: {}", key.into()))
    }

    /// Create an unsupported codec error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::UnsupportedCodec, Some(msg.into().into()))
    }

    /// Create a CAR file error
    pub fn car(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Car, Some(Box::new(source)))
    }

    /// Create a CAR error from a message
    pub fn car_msg(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::Car, Some(msg.into().into()))
    }

    /// Create a CAR parse error
    pub fn car_parse(source: impl Error + Send + Sync + 'static) -> Self {
        Self::car(source).with_context("failed to parse CAR data".to_string())
    }

    /// Create an I/O error
    pub fn io(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Io, Some(Box::new(source)))
    }
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;

        if let Some(ctx) = &self.context {
            write!(f, ": {}", ctx)?;
        }

        if let Some(src) = &self.source {
            write!(f, ": {}", src)?;
        }

        Ok(())
    }
}

// Internal granular errors

/// MST-specific errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum MstError {
    /// Empty key not allowed
    #[error("Empty key not allowed")]
    EmptyKey,

    /// Key too long
    #[error("Key too long: {len} bytes (max {max})")]
    KeyTooLong {
        /// Actual key length
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Invalid key characters
    #[error("Invalid key characters: {key}")]
    InvalidKeyChars {
        /// The invalid key
        key: String,
    },

    /// Node structure invalid
    #[error("Node structure invalid: {0}")]
    InvalidNode(String),

    /// Serialization failed
    #[error("Serialization failed")]
    Serialization(#[source] BoxError),
}

impl From<MstError> for RepoError {
    fn from(e: MstError) -> Self {
        match e {
            MstError::EmptyKey => RepoError::invalid_key(""),
            MstError::KeyTooLong { len, max } => {
                RepoError::invalid_key(format!("length {}/{}", len, max))
            }
            MstError::InvalidKeyChars { key } => RepoError::invalid_key(key),
            MstError::InvalidNode(msg) => RepoError::invalid_mst(msg),
            MstError::Serialization(e) => RepoError::new(RepoErrorKind::Encoding, Some(e)),
        }
    }
}

/// Commit-specific errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CommitError {
    /// Invalid signature format
    #[error("Invalid signature format: {0}")]
    InvalidSignature(String),

    /// Signature verification failed
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Invalid key format
    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    /// Unsupported key type
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(u64),

    /// The signer failed to produce a signature
    #[error("Signer failed")]
    Signer(#[source] BoxError),

    /// Serialization failed
    #[error("Serialization failed")]
    Serialization(#[source] BoxError),
}

impl From<CommitError> for RepoError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::InvalidSignature(msg) => {
                RepoError::new(RepoErrorKind::Signature, Some(msg.into()))
                    .with_context("invalid signature format".to_string())
            }
            CommitError::SignatureVerificationFailed => {
                RepoError::new(RepoErrorKind::Signature, None)
                    .with_context("signature verification failed".to_string())
            }
            CommitError::InvalidKey(msg) => {
                RepoError::new(RepoErrorKind::Signature, Some(msg.into()))
                    .with_context("invalid key format".to_string())
            }
            CommitError::UnsupportedKeyType(code) => RepoError::new(RepoErrorKind::Signature, None)
                .with_context(format!("unsupported key type: 0x{:x}", code)),
            CommitError::Signer(e) => RepoError::new(RepoErrorKind::Signature, Some(e))
                .with_context("signer failed".to_string()),
            CommitError::Serialization(e) => RepoError::new(RepoErrorKind::Encoding, Some(e)),
        }
    }
}

/// Codec and hash selection errors
#[derive(Debug, Clone, thiserror::Error, miette::Diagnostic, PartialEq, Eq)]
pub enum CodecError {
    /// Multicodec code that is not in the supported table
    #[error("unknown multicodec: 0x{0:x}")]
    UnknownCodec(u64),

    /// Multihash code that is not in the supported table
    #[error("unknown hash algorithm: 0x{0:x}")]
    UnknownHash(u64),

    /// A hash function name used where a content codec is required
    #[error("{0} names a hash function, not a content codec")]
    #[diagnostic(help("use a content codec such as dag-cbor or raw"))]
    NotContentCodec(&'static str),

    /// Structured DAG codec with the identity hash
    #[error("{0} content requires a cryptographic hash, not identity")]
    IdentityForStructured(&'static str),

    /// Key codecs address the key material itself
    #[error("{0} identifiers must embed the key with the identity hash")]
    KeyRequiresIdentity(&'static str),

    /// Identity hash over content that is too large
    #[error("identity hash content is {len} bytes (max {max})")]
    IdentityTooLarge {
        /// Content length
        len: usize,
        /// Maximum embeddable length
        max: usize,
    },

    /// Legacy v0 identifiers are fixed to sha2-256 over dag-pb
    #[error("CIDv0 requires sha2-256 over dag-pb")]
    InvalidV0,

    /// Multihash construction failed
    #[error("multihash error: {0}")]
    Multihash(String),
}

impl From<CodecError> for RepoError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Multihash(_) => RepoError::new(RepoErrorKind::Encoding, Some(Box::new(e))),
            other => RepoError::new(RepoErrorKind::UnsupportedCodec, Some(Box::new(other))),
        }
    }
}
