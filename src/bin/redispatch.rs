use clap::{ArgAction, Parser};
use redispatch::{Client, ClientConfig, Command, RespValue, TracingLog};
use std::io::{self, BufRead};
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, error, info};

/// Send commands read from stdin, one per line, pipelined over one connection.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 6379)]
    port: u16,

    /// Database index
    #[arg(short = 'n', long, default_value_t = 0)]
    db: i64,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity
    #[arg(short, long, action = ArgAction::Count)]
    quiet: u8,

    /// Silence the logger
    #[arg(short, long)]
    silent: bool,
}

/// Level relative to WARN: each -v goes one step more verbose, each -q one step quieter.
fn log_level(verbose: u8, quiet: u8, silent: bool) -> &'static str {
    if silent {
        return "off";
    }
    match i32::from(verbose) - i32::from(quiet) {
        i32::MIN..=-3 => "off",
        -2 | -1 => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Split a line into words with shell-like quoting.
///
/// Single quotes are literal, double quotes allow backslash escapes.
fn split_command_line(line: &str) -> anyhow::Result<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => anyhow::bail!("unterminated single quote"),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c) => word.push(c),
                            None => anyhow::bail!("unterminated double quote"),
                        },
                        Some(c) => word.push(c),
                        None => anyhow::bail!("unterminated double quote"),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => word.push(c),
                    None => anyhow::bail!("no escaped character"),
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

fn report(command: &Command, started: Instant, reply: RespValue) {
    debug!(
        "Ran {} in {} seconds",
        command,
        started.elapsed().as_secs_f64()
    );
    debug!("Received: {:?}", reply);
    println!("{}", reply);
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if let Some(config_path) = &args.config {
        ClientConfig::from_file(config_path)?
    } else {
        ClientConfig {
            host: args.host.clone(),
            port: args.port,
            db: args.db,
            ..Default::default()
        }
    };
    config.validate()?;

    // Initialize tracing
    let level = if args.verbose == 0 && args.quiet == 0 && !args.silent {
        config.log_level.as_str()
    } else {
        log_level(args.verbose, args.quiet, args.silent)
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("redispatch={}", level))
        .with_writer(io::stderr)
        .init();

    let addr = config.addr();
    let db = config.db;
    let mut client: Client<Instant> = Client::connect_with_handler(
        &config,
        Box::new(TracingLog),
        move |_: &Command, started: Instant, _: RespValue| {
            info!(
                "Connected to {}/{} in {} seconds",
                addr,
                db,
                started.elapsed().as_secs_f64()
            );
        },
        Instant::now(),
    )?;

    if config.db != 0 {
        client.select_db(config.db, Instant::now())?;
    }

    // Setup signal handler; pending commands are abandoned on interrupt
    let shutdown = client.shutdown_handle();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::Release);
    })?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let words = match split_command_line(&line) {
            Ok(words) => words,
            Err(e) => {
                error!("Skipping {:?}: {}", line, e);
                continue;
            }
        };
        let Some((name, args)) = words.split_first() else {
            continue;
        };
        client.submit(Command::with_args(name, args), report, Instant::now())?;
    }

    client.run_until_idle()?;

    let abandoned = client.close();
    if abandoned > 0 {
        info!("Interrupted with {} commands unanswered", abandoned);
    }
    Ok(())
}
