//! Request handler answering from one snapshot, then the chained authorities.
//!
//! Hickory's catalog reports an authority's SERVFAIL as an empty NOERROR
//! answer and sends nothing when every authority skips, so responses are
//! built here instead. Each request reads a single snapshot; names it cannot
//! answer are offered to the next authorities in order, and fail with
//! SERVFAIL when none of them answers either.

use async_trait::async_trait;
use hickory_proto::op::{Header, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{LowerName, Record, RecordType};
use hickory_server::authority::{
    AuthorityObject, LookupControlFlow, LookupError, LookupObject, LookupOptions,
    MessageResponseBuilder,
};
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::authority::OmadaAuthority;
use crate::metrics::{self, QueryResult, Timer};
use crate::state::DnsState;

/// What the chained authorities made of a query.
enum Deferred {
    Records(Box<dyn LookupObject>),
    Code(ResponseCode),
    Unanswered,
}

/// Serves queries from the snapshot, then the chained authorities, then SERVFAIL.
pub struct QueryHandler {
    authority: OmadaAuthority,
    state: DnsState,
    next: Vec<Arc<dyn AuthorityObject>>,
}

impl QueryHandler {
    /// Build a handler answering from `state` alone.
    pub fn new(state: DnsState) -> Self {
        Self::with_next_authorities(state, Vec::new())
    }

    /// Build a handler that defers unanswerable queries to `next`, in order.
    pub fn with_next_authorities(state: DnsState, next: Vec<Arc<dyn AuthorityObject>>) -> Self {
        let authority = OmadaAuthority::new(state.clone()).chained(!next.is_empty());
        Self {
            authority,
            state,
            next,
        }
    }

    /// Ask each chained authority covering `name` until one answers.
    ///
    /// Skips, SERVFAIL and empty answers move on to the next authority. Any
    /// other response code is the chain's answer.
    async fn defer(&self, name: &LowerName, rtype: RecordType) -> Deferred {
        for authority in self.next.iter().filter(|a| a.origin().zone_of(name)) {
            match authority.lookup(name, rtype, LookupOptions::default()).await {
                LookupControlFlow::Break(Ok(lookup)) if !lookup.is_empty() => {
                    return Deferred::Records(lookup);
                }
                LookupControlFlow::Break(Err(LookupError::ResponseCode(code)))
                    if code != ResponseCode::ServFail && code != ResponseCode::NoError =>
                {
                    return Deferred::Code(code);
                }
                _ => {
                    trace!(name = %name, origin = %authority.origin(), "next authority has no answer");
                }
            }
        }
        Deferred::Unanswered
    }

    async fn send_records<'a, R, I>(
        &self,
        request: &Request,
        mut response_handle: R,
        answers: I,
    ) -> ResponseInfo
    where
        R: ResponseHandler,
        I: Iterator<Item = &'a Record> + Send + 'a,
    {
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_response_code(ResponseCode::NoError);

        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(
            header,
            answers,
            std::iter::empty::<&Record>(),
            std::iter::empty::<&Record>(),
            std::iter::empty::<&Record>(),
        );

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to send response: {}", e);
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }

    async fn send_code<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        code: ResponseCode,
    ) -> ResponseInfo {
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.error_msg(request.header(), code);

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to send {} response: {}", code, e);
                let mut header = Header::new();
                header.set_response_code(code);
                header.into()
            }
        }
    }
}

#[async_trait]
impl RequestHandler for QueryHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        if request.message_type() != MessageType::Query || request.op_code() != OpCode::Query {
            return self
                .send_code(request, response_handle, ResponseCode::NotImp)
                .await;
        }
        let Some(query) = request.queries().first() else {
            return self
                .send_code(request, response_handle, ResponseCode::FormErr)
                .await;
        };

        let timer = Timer::start();
        let name = query.name();
        let rtype = query.query_type();

        let snapshot = self.state.snapshot();
        if let Some(record_set) = self.authority.answer_from(&snapshot, name, rtype) {
            return self
                .send_records(request, response_handle, record_set.records_without_rrsigs())
                .await;
        }

        if self.authority.is_chained() {
            match self.defer(name, rtype).await {
                Deferred::Records(lookup) => {
                    metrics::record_query(&rtype.to_string(), QueryResult::Deferred, timer.elapsed());
                    return self.send_records(request, response_handle, lookup.iter()).await;
                }
                Deferred::Code(code) => {
                    metrics::record_query(&rtype.to_string(), QueryResult::Deferred, timer.elapsed());
                    return self.send_code(request, response_handle, code).await;
                }
                Deferred::Unanswered => {}
            }
        }

        debug!(src = %request.src(), name = %name, rtype = %rtype, "no answer, returning SERVFAIL");
        metrics::record_query(&rtype.to_string(), QueryResult::ServFail, timer.elapsed());
        self.send_code(request, response_handle, ResponseCode::ServFail)
            .await
    }
}
