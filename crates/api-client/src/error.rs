use thiserror::Error;

/// Binance codes meaning the referenced order or order list does not exist.
const UNKNOWN_ORDER_CODES: [i64; 2] = [-2011, -2013];

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Binance rejected the request ({code}): {msg}")]
    Binance { code: i64, msg: String },

    #[error("Failed to deserialize the API response: {0}")]
    Deserialization(String),

    #[error("Invalid data format from API: {0}")]
    InvalidData(String),

    #[error("Symbol {0} is not listed on the exchange")]
    MissingSymbol(String),

    #[error("Symbol {symbol} has no {filter} filter")]
    MissingFilter { symbol: String, filter: &'static str },

    #[error("Failed to sign request: {0}")]
    Signing(String),
}

impl ApiError {
    pub fn is_unknown_order(&self) -> bool {
        matches!(self, ApiError::Binance { code, .. } if UNKNOWN_ORDER_CODES.contains(code))
    }
}
