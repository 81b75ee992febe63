/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! FIXP acceptor demo.
//!
//! Accepts initiators over TCP, authenticates them by firm, and answers every
//! business message with a report echoing its body. Sequence numbers persist
//! to a file ledger so sessions survive a restart.
//!
//! Environment:
//! - `FIXP_HOST` / `FIXP_PORT`: listen address (default `127.0.0.1:9876`)
//! - `FIXP_LEDGER`: ledger file (default `fixp-ledger.dat` in the temp dir)
//! - `FIXP_FIRM`: the only firm id allowed to log on (default: any)
//!
//! Run with:
//! ```sh
//! RUST_LOG=debug cargo run --example acceptor
//! ```

use bytes::Bytes;
use fixp::prelude::*;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 9876;
const REPORT_TEMPLATE_ID: u16 = 301;

/// Initialize logging for the demo.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

/// Accepts one firm, or everyone when none is configured.
struct FirmAuthenticator {
    firm_id: Option<u32>,
}

impl Authenticator for FirmAuthenticator {
    fn authenticate(&mut self, context: &AuthContext<'_>) -> std::result::Result<AuthDecision, FixpError> {
        match self.firm_id {
            Some(firm) if firm != context.credentials.firm_id => {
                info!(
                    session = %context.identity,
                    firm = context.credentials.firm_id,
                    "unknown firm"
                );
                Ok(AuthDecision::Reject)
            }
            _ => Ok(AuthDecision::Accept),
        }
    }
}

/// Acquires every session and acknowledges each business message.
struct ReportingConsumer;

impl Consumer for ReportingConsumer {
    fn on_session_exists(&mut self, session: &SessionInfo) -> bool {
        info!(session = %session.identity, "session available");
        true
    }

    fn on_connection_acquired(&mut self, session: &SessionInfo) {
        info!(
            session = %session.identity,
            next_recv = session.next_recv_seq_no,
            next_sent = session.next_sent_seq_no,
            "session acquired"
        );
    }

    fn on_business_message(
        &mut self,
        identity: SessionIdentity,
        message: &BusinessMessage,
        outbox: &mut Outbox,
    ) {
        info!(
            session = %identity,
            template_id = message.template_id,
            seq_no = message.seq_no,
            "business message"
        );
        let mut report = Vec::with_capacity(message.body.len() + 4);
        report.extend_from_slice(b"ack:");
        report.extend_from_slice(&message.body);
        outbox.send(REPORT_TEMPLATE_ID, Bytes::from(report));
    }

    fn on_finished_sending(&mut self, identity: SessionIdentity) {
        info!(session = %identity, "peer finished sending");
    }

    fn on_unbound(&mut self, identity: SessionIdentity) {
        info!(session = %identity, "session offline");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let host = env::var("FIXP_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let port = env::var("FIXP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let ledger_path = env::var("FIXP_LEDGER")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("fixp-ledger.dat"));
    let firm_id = env::var("FIXP_FIRM").ok().and_then(|f| f.parse().ok());

    let config = SessionConfig::new()
        .with_throttle(RateLimit::new(1_000, Duration::from_secs(1)))
        .with_max_retransmission_range(10_000);
    let ledger = Arc::new(FileLedger::open(&ledger_path)?);

    let (handle, engine_task) = EngineBuilder::new()
        .with_config(config)
        .with_ledger(ledger)
        .with_authenticator(FirmAuthenticator { firm_id })
        .spawn()?;
    let consumer = handle.add_consumer(Box::new(ReportingConsumer)).await?;
    info!(consumer = %consumer, ledger = %ledger_path.display(), "engine started");

    let acceptor = Acceptor::bind((host.as_str(), port), handle.clone(), FixpCodec::new(), 1024).await?;

    tokio::select! {
        result = acceptor.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    handle.close().await?;
    engine_task.await?;
    Ok(())
}
