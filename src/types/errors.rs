use thiserror::Error;

// === ValidationError ===

/// Input rejected locally, before any remote call is made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Title is empty after trimming.
    #[error("Title is required")]
    EmptyTitle,
    /// Location is empty after trimming.
    #[error("URL is required")]
    EmptyLocation,
}

// === StoreError ===

/// Errors returned by the remote record store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The request never produced a response.
    #[error("Store network error: {0}")]
    Network(String),
    /// The store answered with a non-success status.
    #[error("Store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The bearer token was missing, expired or refused.
    #[error("Store request unauthorized: {0}")]
    Unauthorized(String),
    /// The response body could not be decoded.
    #[error("Store decode error: {0}")]
    Decode(String),
}

// === AuthError ===

/// Errors related to the session/token provider.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No session is available.
    #[error("Not signed in")]
    NoSession,
    /// A network error occurred while talking to the identity service.
    #[error("Auth network error: {0}")]
    Network(String),
    /// The identity service refused the request.
    #[error("Auth request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The identity service response could not be decoded.
    #[error("Auth decode error: {0}")]
    Decode(String),
    /// The OAuth redirect did not carry a usable code.
    #[error("Invalid auth callback: {0}")]
    InvalidCallback(String),
}

// === ChannelError ===

/// Errors related to the change-notification channel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// Subscribing was attempted without a bearer token.
    #[error("Channel requires an access token")]
    Unauthorized,
    /// A channel is already open for this topic.
    #[error("Channel already open: {0}")]
    AlreadyOpen(String),
    /// The transport could not establish the subscription.
    #[error("Channel connect failed: {0}")]
    Connect(String),
}

// === BookmarkError ===

/// Errors surfaced to the caller of a bookmark operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookmarkError {
    /// Input failed local validation; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The remote insert/delete/query failed.
    #[error(transparent)]
    Persistence(#[from] StoreError),
    /// No session is active.
    #[error("Not signed in")]
    NotAuthenticated,
    /// A row returned by the store did not match the bookmark shape.
    #[error("Bookmark decode error: {0}")]
    Decode(String),
}

// === SessionError ===

/// Errors related to the local session cache.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Failed to serialize or deserialize session data.
    #[error("Session serialization error: {0}")]
    SerializationError(String),
    /// Database operation failed.
    #[error("Session database error: {0}")]
    DatabaseError(String),
}

// === ConfigError ===

/// Errors related to loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading or writing the config file.
    #[error("Config I/O error: {0}")]
    IoError(String),
    /// Failed to parse or serialize the config file.
    #[error("Config serialization error: {0}")]
    SerializationError(String),
    /// A required setting is empty.
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}
