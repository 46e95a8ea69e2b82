use thiserror::Error;

/// Failures surfaced by a checkout attempt
#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("A user id is required to check out")]
    MissingUserId,
    #[error("Another checkout is in progress for user {0}, retry later")]
    LockUnavailable(String),
    #[error("Cart is empty")]
    EmptyCart,
    #[error("Product {0} referenced by the cart no longer exists")]
    ProductNotFound(String),
    #[error("Checkout failed: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Stable failure kinds for the transport layer to map onto responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingUserId,
    LockUnavailable,
    EmptyCart,
    ProductNotFound,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingUserId => "MISSING_USER_ID",
            ErrorKind::LockUnavailable => "LOCK_UNAVAILABLE",
            ErrorKind::EmptyCart => "EMPTY_CART",
            ErrorKind::ProductNotFound => "PRODUCT_NOT_FOUND",
            ErrorKind::Internal => "INTERNAL",
        }
    }
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::MissingUserId => 401,
            ErrorKind::EmptyCart => 400,
            ErrorKind::LockUnavailable => 409,
            ErrorKind::ProductNotFound | ErrorKind::Internal => 500,
        }
    }
}

impl CheckoutError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckoutError::MissingUserId => ErrorKind::MissingUserId,
            CheckoutError::LockUnavailable(_) => ErrorKind::LockUnavailable,
            CheckoutError::EmptyCart => ErrorKind::EmptyCart,
            CheckoutError::ProductNotFound(_) => ErrorKind::ProductNotFound,
            CheckoutError::Internal(_) => ErrorKind::Internal,
        }
    }
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckoutError::LockUnavailable(_))
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Checkout lock for user {0} is held by another checkout")]
    Unavailable(String),
    #[error("Checkout lock for user {0} expired or was taken over before release")]
    Lost(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum CouponError {
    #[error("Coupon {0} not found")]
    NotFound(String),
    #[error("Coupon {0} has already been used")]
    AlreadyUsed(String),
    #[error("Coupon {0} has expired")]
    Expired(String),
    #[error("Coupon {0} already exists")]
    Duplicate(String),
    #[error("Discount of {0}% is outside 0..=100")]
    InvalidPercent(u8),
    #[error("Could not find a free coupon code after {0} attempts")]
    CodeSpaceExhausted(u32),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum CartError {
    #[error("Quantity must be greater than zero")]
    InvalidQuantity,
    #[error("Product {0} not found")]
    ProductNotFound(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lock_contention_is_retryable() {
        assert!(CheckoutError::LockUnavailable("u1".into()).is_retryable());
        assert!(!CheckoutError::EmptyCart.is_retryable());
        assert!(!CheckoutError::Internal(anyhow::anyhow!("disk gone")).is_retryable());
    }

    #[test]
    fn kinds_map_to_transport_status() {
        assert_eq!(CheckoutError::LockUnavailable("u1".into()).kind().status_code(), 409);
        assert_eq!(CheckoutError::EmptyCart.kind().status_code(), 400);
        assert_eq!(CheckoutError::ProductNotFound("p9".into()).kind().status_code(), 500);
        assert_eq!(CheckoutError::MissingUserId.kind().as_str(), "MISSING_USER_ID");
        assert_eq!(CheckoutError::MissingUserId.kind().status_code(), 401);
    }
}
