use crate::store::StoreError;

// ============================================================================
// Order Error Taxonomy
// ============================================================================

/// Coarse classification used by the ingest loop and the HTTP boundary to
/// decide between skip, 4xx and 5xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    TransientInfra,
}

/// A message or record that breaks one of the required-field rules.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid order UID")]
    EmptyOrderUid,

    #[error("invalid track number")]
    EmptyTrackNumber,

    #[error("items list is empty")]
    EmptyItems,

    #[error("message has no payload")]
    EmptyPayload,

    #[error("invalid JSON data: {0}")]
    MalformedPayload(#[source] serde_json::Error),
}

impl ValidationError {
    /// Stable label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::EmptyOrderUid => "empty_order_uid",
            ValidationError::EmptyTrackNumber => "empty_track_number",
            ValidationError::EmptyItems => "empty_items",
            ValidationError::EmptyPayload => "empty_payload",
            ValidationError::MalformedPayload(_) => "malformed_payload",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("order not found: {order_uid}")]
    NotFound { order_uid: String },

    #[error("order store failure")]
    Store(#[from] StoreError),
}

impl OrderError {
    pub fn not_found(order_uid: impl Into<String>) -> Self {
        OrderError::NotFound {
            order_uid: order_uid.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::Validation(_) => ErrorKind::Validation,
            OrderError::NotFound { .. } => ErrorKind::NotFound,
            OrderError::Store(_) => ErrorKind::TransientInfra,
        }
    }
}
