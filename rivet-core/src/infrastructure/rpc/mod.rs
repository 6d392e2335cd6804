//! Line-delimited JSON-RPC 2.0 wire format spoken with tool providers.

pub mod codec;
pub mod types;

pub use codec::{LineDecoder, encode_line};
pub use types::{
    IncomingMessage, RpcError, RpcErrorObject, RpcNotification, RpcReply, RpcRequest,
    initialize_params,
};
