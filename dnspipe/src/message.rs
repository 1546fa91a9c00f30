//! Helpers for synthesizing and manipulating DNS messages.
//!
//! Middleware never mutates a caller-owned message in place; it clones the
//! message first so siblings and cache entries observe the original. The
//! helpers here operate on owned messages and keep the EDNS0 OPT
//! pseudo-record out of TTL arithmetic.

use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::{Record, RecordType};
use rand::seq::SliceRandom;

use crate::error::Result;
use crate::ResolveError;

/// Build a response to `query` carrying only the rcode and the echoed
/// question section.
pub fn synthesize(query: &Message, rcode: ResponseCode) -> Message {
    let mut msg = Message::new();
    msg.set_id(query.id());
    msg.set_op_code(query.op_code());
    msg.set_message_type(MessageType::Response);
    msg.set_recursion_desired(query.recursion_desired());
    msg.set_recursion_available(true);
    msg.set_response_code(rcode);
    for q in query.queries() {
        msg.add_query(q.clone());
    }
    msg
}

pub fn nxdomain(query: &Message) -> Message {
    synthesize(query, ResponseCode::NXDomain)
}

pub fn servfail(query: &Message) -> Message {
    synthesize(query, ResponseCode::ServFail)
}

pub fn refused(query: &Message) -> Message {
    synthesize(query, ResponseCode::Refused)
}

/// First question of a message, if any. Predicates throughout the pipeline
/// only ever inspect `question[0]`.
pub fn first_question(msg: &Message) -> Option<&Query> {
    msg.queries().first()
}

/// True when query and response agree on `question[0]`. Name comparison is
/// case-insensitive per RFC 1035.
pub fn questions_match(query: &Message, response: &Message) -> bool {
    match (first_question(query), first_question(response)) {
        (Some(q), Some(r)) => {
            q.name() == r.name() && q.query_type() == r.query_type() && q.query_class() == r.query_class()
        }
        (None, None) => true,
        _ => false,
    }
}

/// Iterate every resource record of the three sections, skipping OPT.
fn non_opt_records(msg: &Message) -> impl Iterator<Item = &Record> {
    msg.answers()
        .iter()
        .chain(msg.name_servers().iter())
        .chain(msg.additionals().iter())
        .filter(|r| r.record_type() != RecordType::OPT)
}

/// Minimum TTL among all non-OPT records, or `None` for a record-less
/// message (negative responses without SOA).
pub fn min_ttl(msg: &Message) -> Option<u32> {
    non_opt_records(msg).map(|r| r.ttl()).min()
}

/// Subtract `secs` from every non-OPT record TTL. Returns an error if any
/// TTL would underflow; callers treat that as an expired entry.
pub fn age_ttls(msg: &mut Message, secs: u32) -> Result<()> {
    if secs == 0 {
        return Ok(());
    }
    if non_opt_records(msg).any(|r| r.ttl() < secs) {
        return Err(ResolveError::protocol("ttl underflow"));
    }
    map_records(msg, |r| {
        if r.record_type() != RecordType::OPT {
            let ttl = r.ttl() - secs;
            r.set_ttl(ttl);
        }
    });
    Ok(())
}

/// Clamp every non-OPT record TTL into `[min, max]`.
pub fn clamp_ttls(msg: &mut Message, min: u32, max: u32) {
    map_records(msg, |r| {
        if r.record_type() != RecordType::OPT {
            let ttl = r.ttl().clamp(min, max);
            r.set_ttl(ttl);
        }
    });
}

/// Apply `f` to every record of every section, in place.
pub fn map_records<F: FnMut(&mut Record)>(msg: &mut Message, mut f: F) {
    let mut answers = msg.take_answers();
    answers.iter_mut().for_each(&mut f);
    msg.insert_answers(answers);
    let mut authority = msg.take_name_servers();
    authority.iter_mut().for_each(&mut f);
    msg.insert_name_servers(authority);
    let mut extra = msg.take_additionals();
    extra.iter_mut().for_each(&mut f);
    msg.insert_additionals(extra);
}

/// How cached answer sets are reordered before being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuffleMode {
    None,
    /// Random permutation of the A/AAAA answers.
    Random,
    /// Rotate the A/AAAA answers by one position per hit.
    Rotate,
}

/// Reorder the address records of the answer section according to `mode`.
/// Non-address records (CNAME chains and the like) keep their positions.
pub fn shuffle_answers(msg: &mut Message, mode: ShuffleMode) {
    if mode == ShuffleMode::None {
        return;
    }
    let mut answers = msg.take_answers();
    let idx: Vec<usize> = answers
        .iter()
        .enumerate()
        .filter(|(_, r)| matches!(r.record_type(), RecordType::A | RecordType::AAAA))
        .map(|(i, _)| i)
        .collect();
    if idx.len() > 1 {
        let mut addresses: Vec<Record> = Vec::with_capacity(idx.len());
        for &i in idx.iter().rev() {
            addresses.push(answers.remove(i));
        }
        addresses.reverse();
        match mode {
            ShuffleMode::Random => addresses.shuffle(&mut rand::thread_rng()),
            ShuffleMode::Rotate => addresses.rotate_left(1),
            ShuffleMode::None => {}
        }
        for (&i, rec) in idx.iter().zip(addresses.into_iter()) {
            answers.insert(i, rec);
        }
    }
    msg.insert_answers(answers);
}

/// Encode `msg`, truncating to `max_size` if necessary. A truncated reply
/// keeps the question and OPT record and sets the TC flag so the client can
/// retry over TCP.
pub fn encode_for_udp(msg: &Message, max_size: usize) -> Result<Vec<u8>> {
    let wire = msg.to_vec()?;
    if wire.len() <= max_size {
        return Ok(wire);
    }
    let mut truncated = msg.clone();
    truncated.set_truncated(true);
    truncated.take_answers();
    truncated.take_name_servers();
    let extra: Vec<Record> = truncated
        .take_additionals()
        .into_iter()
        .filter(|r| r.record_type() == RecordType::OPT)
        .collect();
    truncated.insert_additionals(extra);
    Ok(truncated.to_vec()?)
}

/// Advertised maximum UDP response size for a query: the EDNS0 payload size
/// when present, the RFC 1035 512-byte floor otherwise.
pub fn max_udp_size(query: &Message) -> usize {
    query
        .extensions()
        .as_ref()
        .map(|edns| (edns.max_payload() as usize).max(512))
        .unwrap_or(512)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{a_response, query};
    use hickory_proto::rr::RecordType;

    #[test]
    fn synthesized_response_echoes_question() {
        let q = query("example.com.", RecordType::A);
        let r = nxdomain(&q);
        assert_eq!(r.id(), q.id());
        assert_eq!(r.response_code(), ResponseCode::NXDomain);
        assert!(questions_match(&q, &r));
    }

    #[test]
    fn ttl_decay_and_underflow() {
        let q = query("example.com.", RecordType::A);
        let mut r = a_response(&q, [1, 2, 3, 4], 300);
        age_ttls(&mut r, 10).unwrap();
        assert_eq!(r.answers()[0].ttl(), 290);
        assert!(age_ttls(&mut r, 291).is_err());
    }

    #[test]
    fn min_ttl_skips_opt() {
        let q = query("example.com.", RecordType::A);
        let r = a_response(&q, [1, 2, 3, 4], 60);
        assert_eq!(min_ttl(&r), Some(60));
        assert_eq!(min_ttl(&q), None);
    }

    #[test]
    fn clamp_applies_bounds() {
        let q = query("example.com.", RecordType::A);
        let mut r = a_response(&q, [1, 2, 3, 4], 10_000);
        clamp_ttls(&mut r, 60, 3600);
        assert_eq!(r.answers()[0].ttl(), 3600);
    }

    #[test]
    fn oversize_udp_reply_is_truncated() {
        let q = query("example.com.", RecordType::A);
        let mut r = a_response(&q, [1, 2, 3, 4], 60);
        for i in 0..60 {
            r.add_answer(r.answers()[0].clone().set_ttl(i).to_owned());
        }
        let wire = encode_for_udp(&r, 512).unwrap();
        assert!(wire.len() <= 512);
        let decoded = Message::from_vec(&wire).unwrap();
        assert!(decoded.truncated());
        assert!(decoded.answers().is_empty());
    }
}
