//! Broker server: the accept loop and the per-connection servicer.

use crate::admin::Admin;
use crate::config::{Config, QUEUE_SQL, QUEUE_SQLITE_DRIVER};
use crate::conn::{ServerConn, TcpTransport};
use crate::handlers::{
    CanDoHandler, EchoHandler, GetStatusHandler, GrabJobHandler, HandlerRegistry, OptionHandler,
    SetClientIdHandler, SleepHandler, SubmitJobHandler, WorkStatusHandler,
};
use crate::jobs::JobsManager;
use crate::queue::Queue;
use crate::registry::ConnRegistry;
use crate::sleep::SleepSet;
use crate::sql_queue::SqlQueue;
use anyhow::{bail, Context, Result};
use gearhive_protocol::{read_frame, Frame, Id, Message, PacketKind};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// A bound broker instance. All process-wide state (connection registry,
/// sleep set, pending-job table, queue) is initialized before the listener
/// starts accepting.
pub struct Server {
    inner: Arc<Inner>,
    listener: TcpListener,
}

struct Inner {
    jobs: Arc<JobsManager>,
    registry: Arc<ConnRegistry>,
    sleep: Arc<SleepSet>,
    handlers: HandlerRegistry,
    admin: Admin,
}

impl Server {
    pub async fn bind(config: Config) -> Result<Self> {
        let queue: Arc<dyn Queue> = match config.queue_type.as_str() {
            QUEUE_SQL => match config.queue_driver.as_str() {
                QUEUE_SQLITE_DRIVER => Arc::new(
                    SqlQueue::connect(&config.queue_datasource, &config.queue_table)
                        .await
                        .context("Failed to open queue database")?,
                ),
                other => bail!("unsupported SQL queue driver: {other}"),
            },
            other => bail!("unknown queue type: {other}"),
        };

        let jobs = Arc::new(JobsManager::new(queue));
        let registry = Arc::new(ConnRegistry::new());
        let sleep = Arc::new(SleepSet::new());

        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(EchoHandler));
        handlers.register(Arc::new(CanDoHandler));
        handlers.register(Arc::new(OptionHandler));
        handlers.register(Arc::new(SetClientIdHandler));
        handlers.register(Arc::new(SleepHandler::new(Arc::clone(&sleep))));
        handlers.register(Arc::new(SubmitJobHandler::new(
            Arc::clone(&jobs),
            Arc::clone(&sleep),
            Arc::clone(&registry),
        )));
        handlers.register(Arc::new(GrabJobHandler::new(Arc::clone(&jobs))));
        handlers.register(Arc::new(WorkStatusHandler::new(
            Arc::clone(&jobs),
            config.request_timeout,
        )));
        handlers.register(Arc::new(GetStatusHandler::new(
            Arc::clone(&jobs),
            config.request_timeout,
        )));

        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("Failed to listen on {}", config.bind_addr))?;
        info!(addr = %listener.local_addr()?, "broker listening");

        Ok(Self {
            inner: Arc::new(Inner {
                jobs,
                registry,
                sleep,
                handlers,
                admin: Admin::new(),
            }),
            listener,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails; one servicer task per
    /// connection.
    pub async fn run(self) -> Result<()> {
        loop {
            let (socket, peer) = self
                .listener
                .accept()
                .await
                .context("listener accept failed")?;
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.serve(socket, peer).await;
            });
        }
    }
}

impl Inner {
    /// Read-dispatch-reply loop for one connection. On EOF the connection is
    /// deregistered and closed; closing fires the closed-watch that
    /// coordinators observe to prune attachments.
    async fn serve(self: Arc<Self>, socket: TcpStream, peer: SocketAddr) {
        let (read_half, write_half) = socket.into_split();
        let transport = Arc::new(TcpTransport::new(Id::random(), peer, write_half));
        let conn = ServerConn::new(transport);
        debug!(%conn, "connection established");
        self.registry.add(Arc::clone(&conn));

        let mut reader = BufReader::new(read_half);
        self.read_loop(&mut reader, &conn).await;

        debug!(%conn, "connection closed");
        self.registry.remove(conn.id());
        self.sleep.remove(conn.id());
        conn.close().await;
    }

    async fn read_loop(&self, reader: &mut BufReader<OwnedReadHalf>, conn: &Arc<ServerConn>) {
        loop {
            match read_frame(reader).await {
                Ok(None) => return,
                Err(err) if err.is_disconnect() => return,
                Err(err) => {
                    warn!(%conn, %err, "read packet failed");
                    continue;
                }
                Ok(Some(Frame::Text(line))) => {
                    self.admin.handle(&line, conn).await;
                }
                Ok(Some(Frame::Packet(msg))) => {
                    // any packet from a sleeping worker wakes it
                    self.sleep.remove(conn.id());
                    match self.handlers.dispatch(&msg, conn).await {
                        Ok(()) => debug!(%conn, %msg, "processed message"),
                        Err(err) => {
                            warn!(%conn, %msg, %err, "failed to process message");
                            if let Some(args) = err.error_arguments() {
                                let reply = Message::response(PacketKind::Error, args);
                                if let Err(err) = conn.write_message(&reply).await {
                                    debug!(%conn, %err, "ERROR reply write failed");
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
