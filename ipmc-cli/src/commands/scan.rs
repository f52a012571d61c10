//! `scan` command.

use anyhow::Result;
use ipmc::{DeviceSession, SerialBackend};

use super::{Context, connect};

/// Find the board, report its port and release it again.
pub(crate) fn cmd_scan(ctx: &Context, json: bool) -> Result<()> {
    let mut session = ctx.session();
    let port = scan(&mut session, ctx)?;

    if json {
        println!("{}", serde_json::json!({ "port": port }));
    } else {
        println!("{port}");
    }
    Ok(())
}

/// Connect, note the port, disconnect.
fn scan<B: SerialBackend>(session: &mut DeviceSession<B>, ctx: &Context) -> Result<String> {
    connect(session, ctx)?;
    let port = session.snapshot().port.unwrap_or_default();
    session.disconnect();
    Ok(port)
}
