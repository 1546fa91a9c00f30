//! Stateless message transformers.
//!
//! Each modifier clones the query or response before touching it, forwards
//! to a single downstream and never keeps state between queries (the
//! padding block sizes and clamp bounds are configuration, not state).

pub mod collapse;
pub mod ecs;
pub mod edns0;
pub mod minimize;
pub mod pad;
pub mod static_responder;
pub mod ttl;

use hickory_proto::op::{Edns, Message};
use hickory_proto::rr::rdata::opt::{EdnsCode, EdnsOption};

/// Raw bytes of an EDNS0 option, regardless of whether the decoder mapped
/// it onto a typed variant.
pub(crate) fn option_bytes(option: &EdnsOption) -> Option<Vec<u8>> {
    match option {
        EdnsOption::Unknown(_, bytes) => Some(bytes.clone()),
        other => Vec::<u8>::try_from(other).ok(),
    }
}

pub(crate) fn get_option(msg: &Message, code: EdnsCode) -> Option<Vec<u8>> {
    msg.extensions()
        .as_ref()
        .and_then(|edns| edns.options().get(code))
        .and_then(option_bytes)
}

pub(crate) fn set_option(msg: &mut Message, code: u16, value: Vec<u8>) {
    let edns = msg.extensions_mut().get_or_insert_with(Edns::new);
    edns.options_mut().insert(EdnsOption::Unknown(code, value));
}

pub(crate) fn remove_option(msg: &mut Message, code: EdnsCode) {
    if let Some(edns) = msg.extensions_mut().as_mut() {
        edns.options_mut().remove(code);
    }
}
