use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_rooms_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("room_relay");

    let (mut node_child, mut node_stdout) = spawn_node(&binary).await?;
    let addr = read_node_addr(&mut node_stdout).await?;

    // Drain additional node logs in the background so the pipe never fills.
    let node_log_task = tokio::spawn(async move {
        drain_stdout(node_stdout).await;
    });

    let mut alice = spawn_client(&binary, "alice", &addr).await?;
    let mut bob = spawn_client(&binary, "bob", &addr).await?;

    // Alice speaks in the lobby; both members get it, including her own echo.
    alice.send_line("hi").await.context("alice send line")?;
    let bob_hears_alice =
        read_line_expect(&mut bob.stdout, "waiting for bob to hear alice").await?;
    assert_eq!(bob_hears_alice, "[message] hi");
    let alice_echo = read_line_expect(&mut alice.stdout, "waiting for alice echo").await?;
    assert_eq!(alice_echo, "[message] hi");

    bob.send_line("/count").await.context("bob send count")?;
    let count = read_line_expect(&mut bob.stdout, "waiting for member count").await?;
    assert_eq!(count, "*** lobby has 2 members");

    // Bob moves to another room and stops hearing the lobby.
    bob.send_line("/join games").await.context("bob join games")?;
    let joined = read_line_expect(&mut bob.stdout, "waiting for games join").await?;
    assert_eq!(joined, "*** joined games");
    bob.send_line("/leave lobby").await.context("bob leave lobby")?;
    let left = read_line_expect(&mut bob.stdout, "waiting for lobby leave").await?;
    assert_eq!(left, "*** left lobby");
    bob.send_line("/rooms").await.context("bob list rooms")?;
    let rooms = read_line_expect(&mut bob.stdout, "waiting for room list").await?;
    assert_eq!(rooms, "*** rooms: games");

    alice.send_line("/quit").await.context("alice send quit")?;
    let alice_quit =
        read_line_expect(&mut alice.stdout, "waiting for alice quit confirmation").await?;
    assert_eq!(alice_quit, "*** leaving");

    bob.send_line("/quit").await.context("bob send quit")?;
    let bob_quit = read_line_expect(&mut bob.stdout, "waiting for bob quit confirmation").await?;
    assert_eq!(bob_quit, "*** leaving");

    ensure_success(&mut alice.child, "alice client").await?;
    ensure_success(&mut bob.child, "bob client").await?;

    // The node stays up after clients disconnect; terminate it manually.
    let _ = node_child.kill().await;
    let _ = node_child.wait().await;
    let _ = node_log_task.await;

    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

async fn spawn_node(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("node")
        .arg("--standalone")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .env("RUST_LOG_STYLE", "never")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn node")?;
    let stdout = child
        .stdout
        .take()
        .context("node stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_node_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    // Adaptor startup logs come first; the banner carries the address.
    let line = loop {
        let line = read_line(reader)
            .await?
            .context("node did not emit listening address")?;
        if line.contains("listening on") {
            break line;
        }
    };
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected node banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("node banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

async fn spawn_client(binary: &Path, name: &str, addr: &str) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--server")
        .arg(addr)
        .env("RUST_LOG", "warn")
        .env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn client {name}"))?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };

    // Connection ids are generated by the node, so only the prefix is known.
    let welcome = read_line_expect(&mut process.stdout, "waiting for welcome banner").await?;
    if !welcome.starts_with("*** connected as ") {
        return Err(anyhow!("expected welcome banner for {name}, got '{welcome}'"));
    }
    let joined = read_line_expect(&mut process.stdout, "waiting for lobby join").await?;
    if joined != "*** joined lobby" {
        return Err(anyhow!("expected {name} to join the lobby, got '{joined}'"));
    }

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = child
        .wait()
        .await
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
