use anyhow::{Context, Result};
use serde_json::Value;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{ClientToServer, ServerToClient, decode_line, write_message},
};

const MESSAGE_EVENT: &str = "message";

/// What a line typed by the user asks for.
#[derive(Debug, PartialEq)]
enum Input {
    Join(String),
    Leave(Option<String>),
    Rooms,
    Count,
    Quit,
    Say(String),
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut server, mut writer) = establish_connection(&args).await?;
    let mut room = Some(args.room.clone());
    write_message(
        &mut writer,
        &ClientToServer::Join {
            room: args.room.clone(),
        },
    )
    .await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    run_client_loop(&mut server, &mut writer, &mut stdin, &mut room).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader).lines(), writer))
}

async fn run_client_loop(
    server: &mut Lines<BufReader<OwnedReadHalf>>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut Lines<BufReader<tokio::io::Stdin>>,
    room: &mut Option<String>,
) -> Result<()> {
    loop {
        select! {
            line = server.next_line() => {
                if !handle_server_line(line?).await? {
                    break;
                }
            }
            line = stdin.next_line() => {
                if !handle_stdin_line(line?, writer, room).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_line(line: Option<String>) -> Result<bool> {
    let Some(line) = line else {
        write_stdout("*** server closed the connection").await?;
        return Ok(false);
    };
    if let Some(message) = decode_line::<ServerToClient>(&line)? {
        write_stdout_or_err(render_server_message(message)).await?;
    }
    Ok(true)
}

async fn handle_stdin_line(
    line: Option<String>,
    writer: &mut OwnedWriteHalf,
    room: &mut Option<String>,
) -> Result<bool> {
    let Some(line) = line else {
        return Ok(false);
    };
    let Some(input) = parse_input(&line) else {
        return Ok(true);
    };

    if input == Input::Quit {
        write_stdout("*** leaving").await?;
        return Ok(false);
    }
    match request_for(input, room) {
        Some(request) => write_message(writer, &request).await?,
        None => write_stderr("!!! not in a room; /join one first").await?,
    }
    Ok(true)
}

/// The request for one input, tracking the room plain text goes to. `None`
/// when the input needs a current room and there is none.
fn request_for(input: Input, room: &mut Option<String>) -> Option<ClientToServer> {
    let request = match input {
        Input::Quit => return None,
        Input::Join(target) => {
            *room = Some(target.clone());
            ClientToServer::Join { room: target }
        }
        Input::Leave(target) => {
            let target = target.or_else(|| room.clone())?;
            if room.as_deref() == Some(target.as_str()) {
                *room = None;
            }
            ClientToServer::Leave { room: target }
        }
        Input::Rooms => ClientToServer::Rooms,
        Input::Count => ClientToServer::Count {
            room: room.clone()?,
        },
        Input::Say(text) => ClientToServer::Send {
            room: room.clone()?,
            event: MESSAGE_EVENT.to_string(),
            args: vec![Value::String(text)],
        },
    };
    Some(request)
}

fn parse_input(line: &str) -> Option<Input> {
    let text = line.trim_end();
    if text.trim().is_empty() {
        return None;
    }
    if !text.starts_with('/') {
        return Some(Input::Say(text.to_string()));
    }

    let mut parts = text.split_whitespace();
    let command = parts.next().unwrap_or_default().to_ascii_lowercase();
    let argument = parts.next().map(str::to_string);
    let input = match (command.as_str(), argument) {
        ("/quit", _) => Input::Quit,
        ("/rooms", _) => Input::Rooms,
        ("/count", _) => Input::Count,
        ("/join", Some(room)) => Input::Join(room),
        ("/leave", room) => Input::Leave(room),
        _ => Input::Say(text.to_string()),
    };
    Some(input)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

/// Text for one server message; `Err` lines go to stderr.
fn render_server_message(message: ServerToClient) -> Result<String, String> {
    match message {
        ServerToClient::Welcome { id } => Ok(format!("*** connected as {id}")),
        ServerToClient::Joined { room } => Ok(format!("*** joined {room}")),
        ServerToClient::Left { room } => Ok(format!("*** left {room}")),
        ServerToClient::Event { event, args } => Ok(format!("[{event}] {}", render_args(&args))),
        ServerToClient::Rooms { rooms } if rooms.is_empty() => {
            Ok("*** not in any room".to_string())
        }
        ServerToClient::Rooms { rooms } => Ok(format!("*** rooms: {}", rooms.join(", "))),
        ServerToClient::Count { room, count } => Ok(format!("*** {room} has {count} members")),
        ServerToClient::Error { message } => Err(format!("!!! {message}")),
    }
}

fn render_args(args: &[Value]) -> String {
    args.iter()
        .map(|arg| match arg {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

async fn write_stdout_or_err(line: Result<String, String>) -> io::Result<()> {
    match line {
        Ok(line) => write_stdout(&line).await,
        Err(line) => write_stderr(&line).await,
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_slash_commands() {
        assert_eq!(parse_input("/join games"), Some(Input::Join("games".into())));
        assert_eq!(parse_input("/leave"), Some(Input::Leave(None)));
        assert_eq!(parse_input("/leave games"), Some(Input::Leave(Some("games".into()))));
        assert_eq!(parse_input("/ROOMS"), Some(Input::Rooms));
        assert_eq!(parse_input("/count"), Some(Input::Count));
        assert_eq!(parse_input("/quit"), Some(Input::Quit));
        assert_eq!(parse_input("   "), None);
    }

    #[test]
    fn plain_text_and_unknown_commands_are_said() {
        assert_eq!(parse_input("hello there"), Some(Input::Say("hello there".into())));
        assert_eq!(parse_input("/join"), Some(Input::Say("/join".into())));
        assert_eq!(parse_input("/shrug"), Some(Input::Say("/shrug".into())));
    }

    #[test]
    fn leaving_the_current_room_stops_sending_into_it() {
        let mut room = Some("lobby".to_string());

        let leave = request_for(Input::Leave(None), &mut room);
        assert_eq!(leave, Some(ClientToServer::Leave { room: "lobby".into() }));
        assert_eq!(room, None);
        assert_eq!(request_for(Input::Say("hi".into()), &mut room), None);
        assert_eq!(request_for(Input::Count, &mut room), None);
        assert_eq!(request_for(Input::Leave(None), &mut room), None);

        request_for(Input::Join("games".into()), &mut room);
        assert_eq!(
            request_for(Input::Say("hi".into()), &mut room),
            Some(ClientToServer::Send {
                room: "games".into(),
                event: "message".into(),
                args: vec![json!("hi")],
            })
        );
    }

    #[test]
    fn leaving_another_room_keeps_the_current_one() {
        let mut room = Some("lobby".to_string());
        let leave = request_for(Input::Leave(Some("games".into())), &mut room);
        assert_eq!(leave, Some(ClientToServer::Leave { room: "games".into() }));
        assert_eq!(room.as_deref(), Some("lobby"));
    }

    #[test]
    fn renders_events_with_plain_strings() {
        let rendered = render_server_message(ServerToClient::Event {
            event: "message".into(),
            args: vec![json!("hi"), json!(3), json!({"a": true})],
        });
        assert_eq!(rendered, Ok(r#"[message] hi 3 {"a":true}"#.to_string()));

        let error = render_server_message(ServerToClient::Error {
            message: "nope".into(),
        });
        assert_eq!(error, Err("!!! nope".to_string()));
    }
}
