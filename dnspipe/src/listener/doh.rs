//! DoH listener (RFC 8484).
//!
//! Accepts POST with an `application/dns-message` body and GET with the
//! query in the base64url `dns` parameter. Runs plain HTTP as well (for
//! deployments that terminate TLS in front) or TLS when certificate
//! material is configured.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::middleware::Logger;
use actix_web::{guard, web, App, HttpRequest, HttpResponse, HttpServer};
use base64::prelude::{Engine, BASE64_URL_SAFE_NO_PAD};

use super::Frontend;
use crate::error::Result;
use crate::tls::{self, TlsOptions};
use crate::ResolveError;

const CONTENT_TYPE: &str = "application/dns-message";

/// Peer address, falling back to an unspecified source when the connection
/// info is unavailable.
fn source_of(req: &HttpRequest) -> SocketAddr {
    req.peer_addr()
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)))
}

async fn answer(frontend: &Frontend, wire: &[u8], source: SocketAddr) -> HttpResponse {
    match frontend.handle_wire(wire, source).await {
        Some((response, _)) => match response.to_vec() {
            Ok(encoded) => HttpResponse::Ok().content_type(CONTENT_TYPE).body(encoded),
            Err(err) => {
                log::warn!("listener {}: cannot encode response: {}", frontend.id(), err);
                HttpResponse::InternalServerError().finish()
            }
        },
        // Dropped silently, or unparseable input.
        None => HttpResponse::BadRequest().finish(),
    }
}

async fn post_handler(
    req: HttpRequest,
    body: web::Bytes,
    frontend: web::Data<Arc<Frontend>>,
) -> HttpResponse {
    answer(&frontend, &body, source_of(&req)).await
}

async fn get_handler(
    req: HttpRequest,
    params: web::Query<HashMap<String, String>>,
    frontend: web::Data<Arc<Frontend>>,
) -> HttpResponse {
    let Some(encoded) = params.get("dns") else {
        return HttpResponse::BadRequest().body("missing dns parameter");
    };
    let Ok(wire) = BASE64_URL_SAFE_NO_PAD.decode(encoded) else {
        return HttpResponse::BadRequest().body("bad dns parameter");
    };
    answer(&frontend, &wire, source_of(&req)).await
}

/// Serve DoH until shut down.
pub async fn serve(frontend: Arc<Frontend>, addr: SocketAddr, tls_opts: Option<TlsOptions>) -> Result<()> {
    log::info!("listener {}: serving doh on {}", frontend.id(), addr);
    let data = web::Data::new(frontend);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(Logger::default().log_target("doh"))
            .route(
                "/dns-query",
                web::post()
                    .guard(guard::Header("Content-Type", CONTENT_TYPE))
                    .to(post_handler),
            )
            .route("/dns-query", web::get().to(get_handler))
    })
    .workers(1);

    let server = match tls_opts {
        Some(opts) => {
            let config = tls::server_config(&opts, &["h2", "http/1.1"])?;
            server
                .bind_rustls_0_23(addr, config)
                .map_err(|e| ResolveError::config(format!("cannot bind doh listener {}: {}", addr, e)))?
        }
        None => server
            .bind(addr)
            .map_err(|e| ResolveError::config(format!("cannot bind doh listener {}: {}", addr, e)))?,
    };
    server.run().await?;
    Ok(())
}
