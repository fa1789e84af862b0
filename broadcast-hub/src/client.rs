use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncWriteExt, BufReader, Stdin},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{DEFAULT_MAX_LINE_BYTES, LineReader, write_line},
};

const QUIT_COMMAND: &str = "/quit";

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;

    let mut stdin = LineReader::new(BufReader::new(tokio::io::stdin()), DEFAULT_MAX_LINE_BYTES);

    run_client_loop(&mut reader, &mut writer, &mut stdin).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(LineReader<BufReader<OwnedReadHalf>>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((
        LineReader::new(BufReader::new(reader), DEFAULT_MAX_LINE_BYTES),
        writer,
    ))
}

async fn run_client_loop(
    reader: &mut LineReader<BufReader<OwnedReadHalf>>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut LineReader<BufReader<Stdin>>,
) -> Result<()> {
    // Both line readers keep partial input across iterations, so losing a
    // race in `select!` never drops bytes.
    loop {
        select! {
            server_line = reader.next_line() => {
                if !handle_server_line(server_line).await? {
                    break;
                }
            }
            input = stdin.next_line() => {
                if !handle_stdin_input(input, writer).await? {
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

async fn handle_server_line(line: io::Result<Option<String>>) -> Result<bool> {
    match line? {
        Some(line) => {
            write_stdout(&line).await?;
            Ok(true)
        }
        None => {
            info!("server closed the connection");
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    input: io::Result<Option<String>>,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let Some(text) = input? else {
        return Ok(false);
    };
    if text == QUIT_COMMAND {
        return Ok(false);
    }

    write_line(writer, &format!("{text}\n")).await?;
    Ok(true)
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

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
