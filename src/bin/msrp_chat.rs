//! MSRP chat CLI binary.
//!
//! Offline tools around the chat stream core.
//!
//! # Commands
//!
//! - `cpim encode` - Wrap content in a CPIM envelope
//! - `cpim decode` - Decode a CPIM envelope to JSON
//! - `uri parse` - Parse an MSRP path
//! - `plan` - Show the connection plan for an account

use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::Context;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use msrp_chat::{
    config::Config,
    negotiation::{decide, Direction, NegotiationInput, Role},
    payload::{parse_timestamp, ChatIdentity, CpimPayload, MultilingualText},
    transport::{parse_path, ConnectorSpec},
    VERSION,
};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "msrp-chat")]
#[command(version = VERSION)]
#[command(about = "MSRP chat stream tools", long_about = None)]
struct Cli {
    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// CPIM envelope tools
    Cpim {
        #[command(subcommand)]
        action: CpimAction,
    },

    /// MSRP URI tools
    Uri {
        #[command(subcommand)]
        action: UriAction,
    },

    /// Show the connector and role negotiation would pick
    Plan {
        /// Config file (default: user config dir, then environment)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Session direction (outgoing, incoming)
        #[arg(short, long, default_value = "outgoing")]
        direction: String,

        /// Remote setup role of an incoming offer (active, passive, actpass)
        #[arg(short, long)]
        remote_role: Option<String>,
    },
}

#[derive(Subcommand)]
enum CpimAction {
    /// Wrap content in a CPIM envelope
    Encode {
        /// Body (or - for stdin)
        input: Option<String>,

        /// Sender, e.g. "Alice <sip:alice@example.com>"
        #[arg(long)]
        from: Option<String>,

        /// Recipient (repeatable)
        #[arg(long)]
        to: Vec<String>,

        /// Courtesy recipient (repeatable)
        #[arg(long)]
        cc: Vec<String>,

        /// Subject
        #[arg(long)]
        subject: Option<String>,

        /// DateTime (ISO-8601)
        #[arg(long)]
        datetime: Option<String>,

        /// Required extensions, comma separated
        #[arg(long, value_delimiter = ',')]
        required: Vec<String>,

        /// Content-Type of the body
        #[arg(short = 't', long, default_value = "text/plain")]
        content_type: String,

        /// Charset of the body
        #[arg(long)]
        charset: Option<String>,
    },

    /// Decode a CPIM envelope to JSON
    Decode {
        /// Input file path (default: stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output as pretty-printed JSON
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Subcommand)]
enum UriAction {
    /// Parse a space separated MSRP path
    Parse {
        /// Path value
        path: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Cpim {
            action:
                CpimAction::Encode {
                    input,
                    from,
                    to,
                    cc,
                    subject,
                    datetime,
                    required,
                    content_type,
                    charset,
                },
        } => cmd_cpim_encode(input, from, to, cc, subject, datetime, required, content_type, charset),

        Commands::Cpim {
            action: CpimAction::Decode { file, pretty },
        } => cmd_cpim_decode(file, pretty),

        Commands::Uri {
            action: UriAction::Parse { path },
        } => cmd_uri_parse(&path),

        Commands::Plan {
            config,
            direction,
            remote_role,
        } => cmd_plan(config, &direction, remote_role.as_deref()),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_identity(value: &str) -> anyhow::Result<ChatIdentity> {
    ChatIdentity::parse(value).with_context(|| format!("invalid identity {value:?}"))
}

#[allow(clippy::too_many_arguments)]
fn cmd_cpim_encode(
    input: Option<String>,
    from: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    subject: Option<String>,
    datetime: Option<String>,
    required: Vec<String>,
    content_type: String,
    charset: Option<String>,
) -> anyhow::Result<()> {
    let body = match input {
        Some(s) if s != "-" => s.into_bytes(),
        _ => {
            let mut buffer = Vec::new();
            io::stdin().read_to_end(&mut buffer)?;
            buffer
        },
    };

    let mut payload = CpimPayload::new(body, content_type);
    payload.charset = charset;
    payload.sender = from.as_deref().map(parse_identity).transpose()?;
    payload.recipients = to.iter().map(|v| parse_identity(v)).collect::<anyhow::Result<_>>()?;
    payload.courtesy_recipients = cc.iter().map(|v| parse_identity(v)).collect::<anyhow::Result<_>>()?;
    payload.subject = subject.map(MultilingualText::from);
    payload.timestamp = match datetime {
        Some(value) => Some(parse_timestamp(&value).with_context(|| format!("invalid datetime {value:?}"))?),
        None => None,
    };
    payload.required = required;

    let (encoded, _) = payload.encode();
    io::stdout().write_all(&encoded)?;
    Ok(())
}

fn cmd_cpim_decode(file: Option<PathBuf>, pretty: bool) -> anyhow::Result<()> {
    let data = match file {
        Some(path) => std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buffer = Vec::new();
            io::stdin().read_to_end(&mut buffer)?;
            buffer
        },
    };
    let payload = CpimPayload::decode(&data)?;

    let identities = |list: &[ChatIdentity]| list.iter().map(ToString::to_string).collect::<Vec<_>>();
    let body = if payload.charset.is_some() || payload.content_type.starts_with("text/") {
        json!({ "text": String::from_utf8_lossy(&payload.content) })
    } else {
        json!({ "base64": base64::engine::general_purpose::STANDARD.encode(&payload.content) })
    };
    let headers: Vec<Value> = payload
        .additional_headers
        .iter()
        .map(|h| json!({ "namespace": h.namespace.uri, "prefix": h.namespace.prefix, "name": h.name, "value": h.value }))
        .collect();
    let output = json!({
        "from": payload.sender.as_ref().map(ToString::to_string),
        "to": identities(&payload.recipients),
        "cc": identities(&payload.courtesy_recipients),
        "subject": payload.subject.as_ref().map(|s| json!({ "default": s.default, "translations": s.translations })),
        "datetime": payload.timestamp.map(|ts| ts.to_rfc3339()),
        "required": payload.required,
        "headers": headers,
        "content_type": payload.content_type,
        "charset": payload.charset,
        "body": body,
    });

    if pretty {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", serde_json::to_string(&output)?);
    }
    Ok(())
}

fn cmd_uri_parse(path: &str) -> anyhow::Result<()> {
    let hops: Vec<Value> = parse_path(path)?
        .iter()
        .map(|uri| {
            json!({
                "scheme": uri.scheme(),
                "user": uri.user,
                "host": uri.host,
                "port": uri.port_or_default(),
                "session_id": uri.session_id,
                "transport": uri.transport,
                "parameters": uri.parameters,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&hops)?);
    Ok(())
}

fn cmd_plan(config: Option<PathBuf>, direction: &str, remote_role: Option<&str>) -> anyhow::Result<()> {
    let config = match config.or_else(|| Config::default_path().filter(|p| p.exists())) {
        Some(path) => Config::from_file(&path)?,
        None => Config::from_env(),
    };
    let direction: Direction = direction.parse().map_err(anyhow::Error::msg)?;
    let remote_role = remote_role
        .map(|role| role.parse::<Role>().map_err(anyhow::Error::msg))
        .transpose()?;

    let plan = decide(NegotiationInput {
        account: &config.account,
        has_certificate: config.tls.has_certificate(),
        direction,
        remote_role,
    })?;

    let relay = match &plan.connector {
        ConnectorSpec::Relay { relay, mode } => Some(json!({
            "host": relay.host,
            "port": relay.port,
            "transport": relay.transport.name(),
            "mode": mode.as_str(),
        })),
        _ => None,
    };
    let output = json!({
        "direction": direction.to_string(),
        "transport": config.account.transport.name(),
        "connector": plan.connector.name(),
        "local_role": plan.local_role.as_str(),
        "relay": relay,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
