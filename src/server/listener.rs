use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::server::pool::{ProcessorPool, SocketProcessor};

/// Accepts connections on `addr` and hands them to `pool`.
///
/// Sockets the pool cannot take are closed at once. Returns only on an
/// accept or bind error.
pub async fn run<P>(addr: &str, pool: Arc<ProcessorPool<P>>) -> anyhow::Result<()>
where
    P: SocketProcessor<Socket = TcpStream>,
{
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);
    serve(listener, pool).await
}

/// Accept loop over an already bound listener.
pub async fn serve<P>(listener: TcpListener, pool: Arc<ProcessorPool<P>>) -> anyhow::Result<()>
where
    P: SocketProcessor<Socket = TcpStream>,
{
    loop {
        let (socket, peer) = listener.accept().await?;
        debug!("Accepted connection from {}", peer);
        if let Err(socket) = pool.dispatch(socket).await {
            warn!(%peer, "No processor available, dropping connection");
            drop(socket);
        }
    }
}
