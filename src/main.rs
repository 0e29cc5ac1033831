use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use ftpd_core::auth::{AuthStore, UserTable};
use ftpd_core::config::Config;
use ftpd_core::context::ServerContext;
use ftpd_core::{logging, server};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse_args();
    logging::init(config.log_level);

    let root_dir = PathBuf::from(&config.root);
    if let Err(e) = std::fs::create_dir_all(&root_dir) {
        tracing::error!(error = %e, path = %root_dir.display(), "failed to create root directory");
        return ExitCode::from(1);
    }
    let root_dir = match root_dir.canonicalize() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to resolve root directory");
            return ExitCode::from(1);
        }
    };

    let mut table = UserTable::new(config.anonymous);
    if let Some(path) = &config.users_file {
        if let Err(e) = table.load_from_file(path) {
            tracing::error!(error = %e, path = %path.display(), "failed to load users file");
            return ExitCode::from(1);
        }
    }
    let auth = Arc::new(AuthStore::new(table));

    let server_ip = resolve_server_ip(&config.host);
    let ctx = ServerContext::new(config, auth, root_dir, server_ip);

    let listener = match server::bind(&ctx).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind listening socket");
            return ExitCode::from(1);
        }
    };

    tracing::info!(port = ctx.config.port, root = %ctx.root_dir.display(), "ftp server listening");
    server::serve(ctx, listener).await;
    ExitCode::from(0)
}

/// Best-effort resolution of the address reported in PASV replies. A
/// concrete configured host is used as-is; an unspecified address
/// (`0.0.0.0`, and an unparseable host) falls back to loopback since
/// there's no single "the" external address to report in that case.
fn resolve_server_ip(host: &str) -> [u8; 4] {
    match host.parse::<Ipv4Addr>() {
        Ok(addr) if !addr.is_unspecified() => addr.octets(),
        _ => [127, 0, 0, 1],
    }
}
