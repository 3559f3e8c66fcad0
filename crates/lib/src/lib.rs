//! metlog core library: Messenger webhook intake, the conversation state machine,
//! the event router, and the reply and spreadsheet clients used by the CLI.

pub mod config;
pub mod conversation;
pub mod gateway;
pub mod init;
pub mod ledger;
pub mod message;
pub mod messenger;
pub mod router;
