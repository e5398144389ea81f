//! Listener loops for plain HTTP and HTTPS.

use axum::Router;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::tls::ListenerPlan;

/// Bind the address chosen by `plan` and serve `app` until `shutdown` fires.
pub async fn run(app: Router, plan: ListenerPlan, shutdown: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(plan.bind()).await?;
    let acceptor = match plan {
        ListenerPlan::Secure { acceptor, .. } => Some(acceptor),
        ListenerPlan::Insecure { .. } => None,
    };
    serve(listener, app, acceptor, shutdown).await
}

/// Serve on an already-bound listener. With an acceptor every connection is
/// wrapped in TLS; without one this is plain `axum::serve`.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    acceptor: Option<TlsAcceptor>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    match acceptor {
        None => {
            tracing::info!(%addr, "listening (http)");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }
        Some(acceptor) => {
            tracing::info!(%addr, "listening (https)");
            serve_tls(listener, app, acceptor, shutdown).await;
            Ok(())
        }
    }
}

async fn serve_tls(
    listener: TcpListener,
    app: Router,
    acceptor: TlsAcceptor,
    shutdown: CancellationToken,
) {
    loop {
        let (tcp_stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = listener.accept() => match result {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(tcp_stream).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let io = hyper_util::rt::TokioIo::new(tls_stream);
            let service = hyper_util::service::TowerToHyperService::new(app);
            let builder =
                hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new());
            let conn = builder.serve_connection_with_upgrades(io, service);
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = conn => {
                    if let Err(e) = result {
                        tracing::debug!(%peer, error = %e, "connection closed with error");
                    }
                }
            }
        });
    }
}
