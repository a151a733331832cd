//! Handler chain contract.
//!
//! Handlers form a one-hop chain of responsibility: each gets the request
//! and the response built so far, and either finishes the response, passes
//! it on untouched for the next handler, or drops the exchange entirely.

use dhcproto::{v4, v6};

/// What a handler decided about one request.
#[derive(Debug)]
pub enum Outcome<M> {
    /// The response is complete; send it and stop the chain.
    Respond(M),
    /// This handler cannot place the client; hand the response to the next
    /// handler unmodified.
    Pass(M),
    /// No response should be sent for this request.
    Drop,
}

/// A DHCPv4 handler in the chain.
#[async_trait::async_trait]
pub trait Handler4: Send + Sync {
    async fn handle(&self, req: &v4::Message, resp: v4::Message) -> Outcome<v4::Message>;
}

/// A DHCPv6 handler in the chain.
#[async_trait::async_trait]
pub trait Handler6: Send + Sync {
    async fn handle(&self, req: &v6::Message, resp: v6::Message) -> Outcome<v6::Message>;
}
