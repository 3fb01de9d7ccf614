//! Network Layer
//!
//! WebSocket gateway for the crash table. This layer is
//! **non-authoritative** - every game decision runs through `game/`.

pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ErrorCode, ServerMessage, HISTORY_RESPONSE_CAP};
pub use server::{GameServer, GameServerError, ServerConfig};
