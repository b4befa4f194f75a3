//! Money and share-count type aliases.
//!
//! All prices and sizes use [`rust_decimal::Decimal`] rather than `f64` —
//! floating point has no place representing exchange prices or share counts.

pub type Price = rust_decimal::Decimal;
pub type Shares = rust_decimal::Decimal;
