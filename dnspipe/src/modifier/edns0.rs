//! Raw EDNS0 option editing by numeric code.
//!
//! Used for options the pipeline has no dedicated support for, e.g.
//! attaching a MAC address under the local-use code 65001 or a DNS cookie
//! under code 10.

use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::rr::rdata::opt::EdnsCode;

use crate::error::Result;
use crate::{ClientInfo, Resolver, SharedResolver};

#[derive(Debug, Clone)]
pub enum Edns0Op {
    /// Attach `value` under `code`, replacing an existing option.
    Add { code: u16, value: Vec<u8> },
    /// Remove the option stored under `code`.
    Delete { code: u16 },
}

pub struct Edns0Modifier {
    id: String,
    resolver: SharedResolver,
    ops: Vec<Edns0Op>,
}

impl Edns0Modifier {
    pub fn new(id: impl Into<String>, resolver: SharedResolver, ops: Vec<Edns0Op>) -> Self {
        Edns0Modifier {
            id: id.into(),
            resolver,
            ops,
        }
    }

    fn apply(&self, query: &mut Message) {
        for op in &self.ops {
            match op {
                Edns0Op::Add { code, value } => super::set_option(query, *code, value.clone()),
                Edns0Op::Delete { code } => super::remove_option(query, EdnsCode::from(*code)),
            }
        }
    }
}

#[async_trait]
impl Resolver for Edns0Modifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        let mut modified = query.clone();
        self.apply(&mut modified);
        self.resolver.resolve(&modified, client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::get_option;
    use crate::test_util::{query, MockResolver};
    use hickory_proto::rr::RecordType;

    #[test]
    fn add_then_delete_roundtrip() {
        let upstream = MockResolver::echoing("up");
        let adder = Edns0Modifier::new(
            "add",
            upstream.clone(),
            vec![Edns0Op::Add {
                code: 65001,
                value: vec![0xde, 0xad, 0xbe, 0xef],
            }],
        );
        let mut q = query("example.com.", RecordType::A);
        adder.apply(&mut q);
        assert_eq!(
            get_option(&q, EdnsCode::from(65001)),
            Some(vec![0xde, 0xad, 0xbe, 0xef])
        );

        let deleter = Edns0Modifier::new("del", upstream, vec![Edns0Op::Delete { code: 65001 }]);
        deleter.apply(&mut q);
        assert_eq!(get_option(&q, EdnsCode::from(65001)), None);
    }
}
