use clap::{App, Arg};
use colored::*;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "23";
const ONE_SHOT_WINDOW: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("tilelink-console")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("Terminal for the tilelink device console")
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Device address")
                .takes_value(true)
                .default_value(DEFAULT_HOST),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Console port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .validator(|v| match v.parse::<u16>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Port must be a number between 0 and 65535".into()),
                }),
        )
        .arg(
            Arg::with_name("command")
                .short("e")
                .long("execute")
                .value_name("LINE")
                .help("Send one line, print what comes back for a moment, then exit")
                .takes_value(true),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let addr = format!("{}:{}", host, port);

    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to device at {}", "error:".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("Is the console up? It only listens once the modem is configured.");
            }
            return Err(e.into());
        }
    };
    let (reader, mut writer) = stream.into_split();
    let mut device_lines = BufReader::new(reader).lines();

    if let Some(line) = matches.value_of("command") {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        let _ = tokio::time::timeout(ONE_SHOT_WINDOW, async {
            while let Ok(Some(line)) = device_lines.next_line().await {
                print_device_line(&line);
            }
        })
        .await;
        return Ok(());
    }

    println!("{} {}", "Connected to".green(), addr.bright_white());
    println!("{}", "Type @help for device commands. Other lines go to the modem.".dimmed());

    let printer = tokio::spawn(async move {
        while let Ok(Some(line)) = device_lines.next_line().await {
            print_device_line(&line);
        }
        println!("{}", "Device closed the connection".yellow());
    });

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = input.next_line().await? {
        if printer.is_finished() {
            break;
        }
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    printer.abort();
    Ok(())
}

fn print_device_line(line: &str) {
    if line.starts_with('$') {
        println!("{}", line.cyan());
    } else if line.contains("Successfully") {
        println!("{}", line.green());
    } else if line.starts_with("Invalid") || line.starts_with("Usage") || line.starts_with("Interval") {
        println!("{}", line.yellow());
    } else if line.contains("Resetting") {
        println!("{}", line.bright_red());
    } else {
        println!("{}", line);
    }
}
