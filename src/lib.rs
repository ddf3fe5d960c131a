//! A TN3270/TN3270E client engine.
//!
//! `Session` owns the telnet/TN3270E negotiation, the 3270 data-stream
//! state machine, the screen buffer, and the IND$FILE file-transfer
//! sub-protocol, and exposes them as a single cooperative connect/wait/act
//! loop: the caller's thread drives both I/O and keyboard input, there is
//! no background thread and no async runtime.

/// Byte-plane addressing: 12/14-bit buffer address encode/decode and the
/// circular address-space helpers the screen buffer is built on.
pub mod addressing;

/// EBCDIC/Unicode code pages and the primary/alternate codec registry.
pub mod codec;

/// 3270 data-stream command, order, attribute, and AID byte constants.
pub mod codes;

/// Session configuration.
pub mod config;

/// IND$FILE / DDM file-transfer sub-protocol.
pub mod ddm;

/// Crate error type.
pub mod error;

/// AID-record construction: inbound data-stream bytes sent to the host.
pub mod inbound;

/// Keyboard engine: field protection, MDT, insert/overtype, editing keys.
pub mod keyboard;

/// Write/Erase/Read-Buffer command interpreter and structured-field
/// dispatch.
pub mod outbound;

/// Read Partition Query / Query List structured-field replies.
pub mod query_reply;

/// Single-threaded cooperative event and scheduling shim.
pub mod runtime;

/// Screen buffer: field attributes, cursor, extended attributes.
pub mod screen;

/// The consumer-facing session handle.
pub mod session;

/// Telnet IAC framing and option negotiation.
pub mod telnet;

/// TN3270E device-type/functions negotiation and record headers.
pub mod tn3270e;

/// Observer hooks a caller can register to react to screen changes.
pub mod traits;

/// TCP/TLS transport.
pub mod transport;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use runtime::WaitOutcome;
pub use session::Session;
pub use traits::{NullObserver, ScreenObserver};
