use clap::{Parser, Subcommand};
use log::{debug, info};
use shared::{Color, Packet, Point, DEFAULT_PORT, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sends one request to a paint-board server", long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// Seconds to wait for a reply
    #[arg(short = 't', long, default_value = "2")]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Paint one pixel
    Draw {
        token: String,
        zone: u32,
        x: i32,
        y: i32,
        /// Color as RRGGBB or RRGGBBAA hex
        color: String,
    },
    /// Create a zone (master token)
    CreateZone {
        token: String,
        width: i32,
        height: i32,
        /// Cool-down in ticks between draws of one painter token
        #[arg(default_value = "0")]
        freeze: u64,
    },
    /// Issue a painter token for a zone
    IssueToken { token: String, zone: u32 },
    /// Revoke a painter token
    RevokeToken {
        token: String,
        zone: u32,
        target: String,
    },
    /// Query the current tick and zone count
    Info,
    /// Stop the server (master token)
    Stop { token: String },
}

fn parse_color(hex_color: &str) -> Result<Color, Box<dyn std::error::Error>> {
    let bytes = hex::decode(hex_color.trim_start_matches('#'))?;
    match bytes.as_slice() {
        [r, g, b] => Ok(Color::new(*r, *g, *b, 255)),
        [r, g, b, a] => Ok(Color::new(*r, *g, *b, *a)),
        _ => Err(format!("expected 3 or 4 color bytes, got {}", bytes.len()).into()),
    }
}

impl Command {
    fn into_packet(self) -> Result<Packet, Box<dyn std::error::Error>> {
        let packet = match self {
            Command::Draw {
                token,
                zone,
                x,
                y,
                color,
            } => Packet::Draw {
                token,
                zone,
                point: Point::new(x, y),
                color: parse_color(&color)?,
            },
            Command::CreateZone {
                token,
                width,
                height,
                freeze,
            } => Packet::CreateZone {
                token,
                width,
                height,
                freeze,
            },
            Command::IssueToken { token, zone } => Packet::IssueToken { token, zone },
            Command::RevokeToken {
                token,
                zone,
                target,
            } => Packet::RevokeToken {
                token,
                zone,
                target,
            },
            Command::Info => Packet::Info,
            Command::Stop { token } => Packet::Stop { token },
        };
        Ok(packet)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let server_addr = args.server.parse::<SocketAddr>()?;
    let expects_reply = !matches!(args.command, Command::Draw { .. });
    let packet = args.command.into_packet()?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    debug!("Client socket bound to {}", socket.local_addr()?);

    info!("Sending {:?} to {}", packet, server_addr);
    socket.send_to(&packet.encode()?, server_addr).await?;

    // Accepted draws are silent; only a rejection comes back.
    let wait = if expects_reply {
        Duration::from_secs(args.timeout)
    } else {
        Duration::from_millis(300)
    };

    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    match timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => match Packet::decode(&buf[0..len])? {
            Packet::ZoneCreated {
                zone,
                privileged_token,
            } => println!("zone {} created, privileged token {}", zone, privileged_token),
            Packet::TokenIssued { zone, token } => println!("zone {} token {}", zone, token),
            Packet::TokenRevoked { zone } => println!("zone {} token revoked", zone),
            Packet::ServerInfo { tick, zones } => println!("tick {} zones {}", tick, zones),
            Packet::Stopping => println!("server stopping"),
            Packet::Rejected { reason } => {
                eprintln!("rejected: {}", reason);
                std::process::exit(1);
            }
            other => println!("unexpected reply: {:?}", other),
        },
        Ok(Err(e)) => return Err(e.into()),
        Err(_) if expects_reply => {
            eprintln!("no reply within {}s", args.timeout);
            std::process::exit(1);
        }
        Err(_) => println!("draw sent"),
    }

    Ok(())
}
