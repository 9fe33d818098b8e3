//! DNS server subsystem.
//!
//! Listens on UDP and TCP with [hickory-server] and hands every question to
//! the [`Responder`]:
//!
//! * **Answers** are returned authoritatively with the configured TTL.
//! * **No answer** inside a zone becomes `SERVFAIL`.
//! * **Pass-through** questions are forwarded to the system resolver, or
//!   refused when forwarding is disabled.
//!
//! [hickory-server]: https://crates.io/crates/hickory-server

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::proto::op::{Header, ResponseCode};
use hickory_server::proto::rr::rdata::{A, AAAA, PTR};
use hickory_server::proto::rr::{Name, RData, Record};
use hickory_server::server::{
    Request, RequestHandler, ResponseHandler, ResponseInfo, ServerFuture,
};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::Duration;

use crate::responder::{Answer, Resolution, Responder};

/// Timeout for idle TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(10);

/// Start the DNS server and serve until the listeners fail.
pub async fn run_dns_server(bind_addr: SocketAddr, handler: DockerDns) -> anyhow::Result<()> {
    info!("DNS server starting on {}", bind_addr);

    let mut server = ServerFuture::new(handler);

    let udp = UdpSocket::bind(bind_addr).await?;
    server.register_socket(udp);

    let tcp = TcpListener::bind(bind_addr).await?;
    server.register_listener(tcp, TCP_TIMEOUT);

    server.block_until_done().await?;
    Ok(())
}

pub struct DockerDns {
    responder: Arc<Responder>,
    ttl: u32,
    upstream: Option<TokioAsyncResolver>,
}

impl DockerDns {
    pub fn new(responder: Arc<Responder>, ttl: u32, forward_upstream: bool) -> Self {
        let upstream = forward_upstream.then(|| {
            TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
                error!(
                    "Failed to load system resolv.conf: {}. Falling back to defaults.",
                    e
                );
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            })
        });
        Self {
            responder,
            ttl,
            upstream,
        }
    }

    async fn send<R>(
        request: &Request,
        mut response_handle: R,
        header: Header,
        records: &[Record],
    ) -> ResponseInfo
    where
        R: ResponseHandler + Send,
    {
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(
            header,
            records.iter(),
            std::iter::empty(),
            std::iter::empty(),
            std::iter::empty(),
        );
        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to send DNS response: {}", e);
                header.into()
            }
        }
    }

    async fn forward<R>(
        &self,
        request: &Request,
        response_handle: R,
        mut header: Header,
    ) -> ResponseInfo
    where
        R: ResponseHandler + Send,
    {
        let query = request.query();
        let Some(resolver) = &self.upstream else {
            header.set_response_code(ResponseCode::Refused);
            return Self::send(request, response_handle, header, &[]).await;
        };

        let name = Name::from(query.name().clone());
        match resolver.lookup(name, query.query_type()).await {
            Ok(lookup) => Self::send(request, response_handle, header, lookup.records()).await,
            Err(e) => {
                match e.kind() {
                    ResolveErrorKind::NoRecordsFound { response_code, .. } => {
                        header.set_response_code(*response_code);
                    }
                    _ => {
                        warn!("Resolver lookup failed for {}: {}", query.name(), e);
                        header.set_response_code(ResponseCode::ServFail);
                    }
                }
                Self::send(request, response_handle, header, &[]).await
            }
        }
    }
}

/// Build the answer section for `name`.
pub fn answer_records(name: &Name, answer: &Answer, ttl: u32) -> Vec<Record> {
    match answer {
        Answer::A(addrs) => addrs
            .iter()
            .map(|ip| Record::from_rdata(name.clone(), ttl, RData::A(A(*ip))))
            .collect(),
        Answer::Aaaa(addrs) => addrs
            .iter()
            .map(|ip| Record::from_rdata(name.clone(), ttl, RData::AAAA(AAAA(*ip))))
            .collect(),
        Answer::Ptr(hosts) => hosts
            .iter()
            .filter_map(|host| match Name::from_ascii(host) {
                Ok(target) => Some(Record::from_rdata(name.clone(), ttl, RData::PTR(PTR(target)))),
                Err(e) => {
                    warn!("Skipping unencodable PTR target {}: {}", host, e);
                    None
                }
            })
            .collect(),
    }
}

#[async_trait]
impl RequestHandler for DockerDns {
    async fn handle_request<R>(&self, request: &Request, response_handle: R) -> ResponseInfo
    where
        R: ResponseHandler + Send,
    {
        let query = request.query();
        let qtype = query.query_type();

        let mut header = Header::response_from_request(request.header());
        header.set_recursion_available(self.upstream.is_some());

        match self.responder.resolve(query.name(), qtype) {
            Resolution::Answer(answer) => {
                header.set_authoritative(true);
                let records = answer_records(query.original().name(), &answer, self.ttl);
                Self::send(request, response_handle, header, &records).await
            }
            Resolution::NoAnswer => {
                debug!("No records for {} ({})", query.name(), qtype);
                header.set_response_code(ResponseCode::ServFail);
                Self::send(request, response_handle, header, &[]).await
            }
            Resolution::PassThrough => self.forward(request, response_handle, header).await,
        }
    }
}
