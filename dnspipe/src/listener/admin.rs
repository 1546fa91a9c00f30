//! Admin listener: read-only metrics over HTTP(S).

use std::net::SocketAddr;

use actix_web::middleware::Logger;
use actix_web::{web, App, HttpResponse, HttpServer};

use crate::error::Result;
use crate::metrics::Registry;
use crate::tls::{self, TlsOptions};
use crate::ResolveError;

/// Default path of the variable dump.
pub const DEFAULT_VARS_PATH: &str = "/routedns/vars";

async fn vars_handler() -> HttpResponse {
    HttpResponse::Ok().json(Registry::global().dump())
}

/// Serve the metrics endpoint until shut down. `path` defaults to
/// [`DEFAULT_VARS_PATH`] when empty.
pub async fn serve(id: &str, addr: SocketAddr, path: String, tls_opts: Option<TlsOptions>) -> Result<()> {
    let path = if path.is_empty() {
        DEFAULT_VARS_PATH.to_string()
    } else {
        path
    };
    log::info!("listener {}: serving metrics on {}{}", id, addr, path);
    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default().log_target("admin"))
            .route(&path, web::get().to(vars_handler))
    })
    .workers(1);

    let server = match tls_opts {
        Some(opts) => {
            let config = tls::server_config(&opts, &["h2", "http/1.1"])?;
            server
                .bind_rustls_0_23(addr, config)
                .map_err(|e| ResolveError::config(format!("cannot bind admin listener {}: {}", addr, e)))?
        }
        None => server
            .bind(addr)
            .map_err(|e| ResolveError::config(format!("cannot bind admin listener {}: {}", addr, e)))?,
    };
    server.run().await?;
    Ok(())
}
