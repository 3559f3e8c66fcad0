//! Ledger: append-only record of sightings in a Google Sheets spreadsheet.

mod auth;
mod sheets;

pub use auth::{
    AccessTokenProvider, AuthError, ServiceAccountAuth, ServiceAccountKey, StaticToken,
    DEFAULT_TOKEN_URI, SHEETS_SCOPE,
};
pub use sheets::{LedgerError, LedgerSink, SheetsClient, DEFAULT_SHEETS_API_BASE};
