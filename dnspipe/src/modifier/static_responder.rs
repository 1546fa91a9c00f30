//! Fixed responses from configuration.
//!
//! Records are given as zone-file-style lines, e.g.
//! `www.example.com. 300 IN A 192.0.2.1`. Answer owner names are rewritten
//! to the query name; authority and additional records are returned
//! verbatim. Lines may carry a `{qname}` placeholder which is substituted
//! with the query name before parsing; such lines are parsed per query.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA, CNAME, MX, NS, PTR, SOA, TXT};
use hickory_proto::rr::{Name, RData, Record, RecordType};

use crate::error::Result;
use crate::{ClientInfo, ResolveError, Resolver};

const PLACEHOLDER: &str = "{qname}";
const DEFAULT_TTL: u32 = 3600;

#[derive(Debug, Clone, Default)]
pub struct StaticOptions {
    pub rcode: u16,
    pub answers: Vec<String>,
    pub name_servers: Vec<String>,
    pub additionals: Vec<String>,
    pub truncated: bool,
}

/// Parse one zone-file-style line: `<owner> [<ttl>] [IN] <TYPE> <rdata...>`.
pub fn parse_line(line: &str) -> Result<Record> {
    let mut tokens = line.split_whitespace().peekable();
    let owner = tokens
        .next()
        .ok_or_else(|| ResolveError::config(format!("empty record line: {:?}", line)))?;
    let owner = Name::from_str(owner)
        .map_err(|e| ResolveError::config(format!("bad owner name in {:?}: {}", line, e)))?;

    let ttl = match tokens.peek().and_then(|t| t.parse::<u32>().ok()) {
        Some(ttl) => {
            tokens.next();
            ttl
        }
        None => DEFAULT_TTL,
    };
    if tokens.peek().map(|t| t.eq_ignore_ascii_case("IN")).unwrap_or(false) {
        tokens.next();
    }
    let rtype = tokens
        .next()
        .ok_or_else(|| ResolveError::config(format!("missing record type in {:?}", line)))?;
    let fields: Vec<&str> = tokens.collect();
    let field = |i: usize| -> Result<&str> {
        fields
            .get(i)
            .copied()
            .ok_or_else(|| ResolveError::config(format!("missing rdata field in {:?}", line)))
    };
    let name_field = |i: usize| -> Result<Name> {
        Name::from_str(field(i)?)
            .map_err(|e| ResolveError::config(format!("bad name in {:?}: {}", line, e)))
    };

    let rdata = match rtype.to_ascii_uppercase().as_str() {
        "A" => RData::A(A(Ipv4Addr::from_str(field(0)?)
            .map_err(|e| ResolveError::config(format!("bad IPv4 in {:?}: {}", line, e)))?)),
        "AAAA" => RData::AAAA(AAAA(Ipv6Addr::from_str(field(0)?)
            .map_err(|e| ResolveError::config(format!("bad IPv6 in {:?}: {}", line, e)))?)),
        "CNAME" => RData::CNAME(CNAME(name_field(0)?)),
        "NS" => RData::NS(NS(name_field(0)?)),
        "PTR" => RData::PTR(PTR(name_field(0)?)),
        "MX" => {
            let pref = field(0)?
                .parse()
                .map_err(|e| ResolveError::config(format!("bad MX preference in {:?}: {}", line, e)))?;
            RData::MX(MX::new(pref, name_field(1)?))
        }
        "TXT" => {
            let text = fields.join(" ");
            RData::TXT(TXT::new(vec![text.trim_matches('"').to_string()]))
        }
        "SOA" => {
            let num = |i: usize| -> Result<u32> {
                field(i)?
                    .parse()
                    .map_err(|e| ResolveError::config(format!("bad SOA field in {:?}: {}", line, e)))
            };
            RData::SOA(SOA::new(
                name_field(0)?,
                name_field(1)?,
                num(2)?,
                num(3)? as i32,
                num(4)? as i32,
                num(5)? as i32,
                num(6)?,
            ))
        }
        other => {
            return Err(ResolveError::config(format!(
                "unsupported record type {} in {:?}",
                other, line
            )))
        }
    };
    Ok(Record::from_rdata(owner, ttl, rdata))
}

enum Section {
    /// Parsed once at construction.
    Fixed(Vec<Record>),
    /// Contains `{qname}`; substituted and parsed per query.
    Template(Vec<String>),
}

impl Section {
    fn build(lines: &[String]) -> Result<Section> {
        if lines.iter().any(|l| l.contains(PLACEHOLDER)) {
            // Validate now with a dummy name so malformed lines still fail
            // at load time.
            for line in lines {
                parse_line(&line.replace(PLACEHOLDER, "placeholder.invalid."))?;
            }
            Ok(Section::Template(lines.to_vec()))
        } else {
            Ok(Section::Fixed(
                lines.iter().map(|l| parse_line(l)).collect::<Result<_>>()?,
            ))
        }
    }

    fn records(&self, qname: &Name) -> Vec<Record> {
        match self {
            Section::Fixed(records) => records.clone(),
            Section::Template(lines) => lines
                .iter()
                .filter_map(|l| parse_line(&l.replace(PLACEHOLDER, &qname.to_string())).ok())
                .collect(),
        }
    }
}

/// Terminal resolver returning a configured response.
pub struct StaticResponder {
    id: String,
    rcode: ResponseCode,
    answers: Section,
    name_servers: Section,
    additionals: Section,
    truncated: bool,
}

fn rcode_from(code: u16) -> Result<ResponseCode> {
    Ok(match code {
        0 => ResponseCode::NoError,
        1 => ResponseCode::FormErr,
        2 => ResponseCode::ServFail,
        3 => ResponseCode::NXDomain,
        4 => ResponseCode::NotImp,
        5 => ResponseCode::Refused,
        other => {
            return Err(ResolveError::config(format!(
                "unsupported response code {}",
                other
            )))
        }
    })
}

impl StaticResponder {
    pub fn new(id: impl Into<String>, opts: StaticOptions) -> Result<Self> {
        Ok(StaticResponder {
            id: id.into(),
            rcode: rcode_from(opts.rcode)?,
            answers: Section::build(&opts.answers)?,
            name_servers: Section::build(&opts.name_servers)?,
            additionals: Section::build(&opts.additionals)?,
            truncated: opts.truncated,
        })
    }
}

#[async_trait]
impl Resolver for StaticResponder {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, _client: &ClientInfo) -> Result<Option<Message>> {
        let mut response = Message::new();
        response.set_id(query.id());
        response.set_op_code(query.op_code());
        response.set_message_type(MessageType::Response);
        response.set_recursion_desired(query.recursion_desired());
        response.set_recursion_available(true);
        response.set_response_code(self.rcode);
        response.set_truncated(self.truncated);
        for q in query.queries() {
            response.add_query(q.clone());
        }
        if let Some(q) = query.queries().first() {
            let qname = q.name();
            for mut record in self.answers.records(qname) {
                record.set_name(qname.clone());
                response.add_answer(record);
            }
            for record in self.name_servers.records(qname) {
                response.add_name_server(record);
            }
            for record in self.additionals.records(qname) {
                response.add_additional(record);
            }
        }
        Ok(Some(response))
    }
}
