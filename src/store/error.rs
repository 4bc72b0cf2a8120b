use ulid::Ulid;

#[derive(Debug)]
pub enum StoreError {
    /// No booking with this id belongs to the requesting owner.
    NotFound(Ulid),
    Validation(&'static str),
    WalError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "booking not found: {id}"),
            StoreError::Validation(msg) => write!(f, "invalid booking: {msg}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
